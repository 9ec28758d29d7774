//! Ownership and move analysis.
//!
//! ============================================================================
//! OWNERSHIP ANALYZER
//! ============================================================================
//!
//! A forward data-flow over each desugared function body. The state maps
//! every live binding to `Owned`, `Moved`, or `PartiallyMoved(fields)`:
//!
//! - `let y = x` with non-`Copy` `x` moves `x` (recording the destination).
//! - `let n = d.name` moves one field: `d` becomes partially moved, its
//!   remaining fields stay accessible.
//! - Reassignment returns a moved binding to `Owned`; assigning to a moved
//!   field removes it from the partially-moved set.
//! - Passing by value moves; `&`/`&mut` arguments borrow and leave ownership
//!   unchanged (the borrow checker enforces aliasing separately).
//! - Enum variant construction consumes its arguments but the constructed
//!   value is a fresh ownership, so constructor idioms never flag.
//!
//! At join points (if/match arms) states merge: `Owned ⊔ Moved = Moved`, and
//! a later use reports "conditionally moved". Loop bodies run to fixpoint;
//! the lattice is finite so the iteration terminates.
//!
//! Closures capture their free variables syntactically: `move` closures
//! transfer each capture into the environment (the outer binding moves),
//! plain closures borrow. A `defer` body is checked under the state at the
//! `defer` statement, and any later move of a variable the defer still needs
//! is an error at the move site.

use crate::context::Context;
use crate::symbols::{DefId, SymbolKind};
use crate::timeline::EventKind;
use pyritec_ast::{
    Block, Expr, ExprKind, FnItem, Item, Pattern, Program, SelfKind, Stmt, StmtKind,
};
use pyritec_util::{DiagnosticCode, FxHashMap, FxHashSet, Span, Symbol};
use std::collections::BTreeMap;

/// Upper bound on loop re-analysis; the lattice converges far earlier
const MAX_LOOP_ITERATIONS: u32 = 8;

/// Per-binding ownership status
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnStatus {
    Owned,
    Moved {
        /// Destination binding, when the move had one
        to: Option<DefId>,
        at: Span,
        /// True when the move happened on only some incoming paths
        conditional: bool,
    },
    PartiallyMoved {
        /// Moved field -> move site
        fields: BTreeMap<Symbol, Span>,
    },
}

/// Tracked state for one binding
#[derive(Clone, Debug, PartialEq, Eq)]
struct BindState {
    name: Symbol,
    status: OwnStatus,
    is_copy: bool,
    decl_span: Span,
}

type OwnState = FxHashMap<DefId, BindState>;

/// How an expression uses a place
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UseMode {
    /// Read without consuming (copy reads, receiver borrows)
    Read,
    /// Consume by value
    Move,
    /// Take a reference
    Borrow,
}

/// A pending defer and the bindings its body still needs
#[derive(Debug)]
struct PendingDefer {
    free_vars: FxHashSet<DefId>,
    span: Span,
}

/// Run the ownership analysis over every function body
pub fn analyze_ownership(ctx: &mut Context<'_>, program: &Program) {
    for item in &program.items {
        match item {
            Item::Fn(func) => analyze_fn(ctx, func),
            Item::Impl(imp) => {
                for method in &imp.methods {
                    analyze_fn(ctx, method);
                }
            }
            _ => {}
        }
    }
}

/// Analyze one function body; also used to re-check inlined specializations
pub(crate) fn analyze_fn(ctx: &mut Context<'_>, func: &FnItem) {
    let Some(body) = &func.body else { return };
    let mut analyzer = OwnershipAnalyzer {
        ctx,
        state: OwnState::default(),
        defer_stack: Vec::new(),
    };

    for param in &func.params {
        if let Some(def) = analyzer.ctx.node_def(param.id) {
            analyzer.bind(def, param.name.name, param.name.span);
        }
    }
    if func.self_param == Some(SelfKind::Value) {
        if let Some(&fn_scope) = analyzer.ctx.fn_scopes.get(&func.id) {
            if let Some(self_def) = analyzer.ctx.symbols.lookup_in(
                fn_scope,
                crate::symbols::Namespace::Value,
                pyritec_util::symbol::sym::SELF_LOWER,
            ) {
                analyzer.bind(self_def, pyritec_util::symbol::sym::SELF_LOWER, func.span);
            }
        }
    }

    analyzer.walk_block(body);
}

struct OwnershipAnalyzer<'c, 'a> {
    ctx: &'c mut Context<'a>,
    state: OwnState,
    /// One frame per open scope, innermost last
    defer_stack: Vec<Vec<PendingDefer>>,
}

impl OwnershipAnalyzer<'_, '_> {
    // ------------------------------------------------------------------------
    // State plumbing
    // ------------------------------------------------------------------------

    fn bind(&mut self, def: DefId, name: Symbol, span: Span) {
        let is_copy = self
            .ctx
            .def_types
            .get(&def)
            .map(|&ty| self.ctx.types.is_copy(ty, &self.ctx.symbols))
            .unwrap_or(true);
        self.state.insert(
            def,
            BindState {
                name,
                status: OwnStatus::Owned,
                is_copy,
                decl_span: span,
            },
        );
        self.ctx.timeline.add_event(
            name,
            EventKind::Allocate,
            format!("'{name}' allocated"),
            span,
        );
    }

    fn join(base: OwnState, other: OwnState) -> OwnState {
        let mut merged = OwnState::default();
        for (def, a) in base {
            let Some(b) = other.get(&def) else {
                merged.insert(def, a);
                continue;
            };
            let status = match (&a.status, &b.status) {
                (x, y) if x == y => x.clone(),
                (OwnStatus::Owned, OwnStatus::Owned) => OwnStatus::Owned,
                (OwnStatus::Moved { to, at, .. }, _) | (_, OwnStatus::Moved { to, at, .. }) => {
                    OwnStatus::Moved {
                        to: *to,
                        at: *at,
                        conditional: true,
                    }
                }
                (
                    OwnStatus::PartiallyMoved { fields: fa },
                    OwnStatus::PartiallyMoved { fields: fb },
                ) => {
                    let mut fields = fa.clone();
                    for (k, v) in fb {
                        fields.entry(*k).or_insert(*v);
                    }
                    OwnStatus::PartiallyMoved { fields }
                }
                (OwnStatus::PartiallyMoved { fields }, OwnStatus::Owned)
                | (OwnStatus::Owned, OwnStatus::PartiallyMoved { fields }) => {
                    OwnStatus::PartiallyMoved {
                        fields: fields.clone(),
                    }
                }
            };
            merged.insert(
                def,
                BindState {
                    status,
                    ..a
                },
            );
        }
        merged
    }

    // ------------------------------------------------------------------------
    // Places
    // ------------------------------------------------------------------------

    /// Resolve `binding(.field)*`; returns the base binding and first field
    fn resolve_place(&self, expr: &Expr) -> Option<(DefId, Option<(Symbol, Span)>)> {
        match &expr.kind {
            ExprKind::Path(path) if path.is_ident() => {
                let def = self.ctx.node_def(expr.id)?;
                if matches!(self.ctx.symbols.symbol(def).kind, SymbolKind::Value { .. }) {
                    Some((def, None))
                } else {
                    None
                }
            }
            ExprKind::FieldAccess(access) => {
                let (def, first) = self.resolve_place(&access.object)?;
                // Deeper paths collapse onto the first field; overlap checks
                // stay sound at that granularity
                Some((def, first.or(Some((access.field.name, access.field.span)))))
            }
            _ => None,
        }
    }

    fn use_place(&mut self, expr: &Expr, mode: UseMode) -> bool {
        let Some((def, field)) = self.resolve_place(expr) else {
            return false;
        };
        match field {
            None => self.use_whole(def, mode, expr),
            Some((field, _)) => self.use_field(def, field, mode, expr),
        }
        true
    }

    fn use_whole(&mut self, def: DefId, mode: UseMode, expr: &Expr) {
        let Some(bind) = self.state.get(&def).cloned() else {
            return;
        };
        let span = expr.span;
        match &bind.status {
            OwnStatus::Moved { at, conditional, .. } => {
                let code = if mode == UseMode::Borrow {
                    DiagnosticCode::BORROW_OF_MOVED
                } else {
                    DiagnosticCode::USE_OF_MOVED
                };
                let verb = if mode == UseMode::Borrow { "borrow" } else { "use" };
                let mut builder = self
                    .ctx
                    .diag
                    .build_error(
                        code,
                        span,
                        format!("cannot {verb} moved value '{}'", bind.name),
                    )
                    .label(*at, "value moved here")
                    .label(bind.decl_span, "binding declared here")
                    .var_name(bind.name)
                    .suggest_fixes();
                if *conditional {
                    builder = builder.note("the value is moved on only some paths to this use");
                }
                builder.emit(&self.ctx.diag);
                return;
            }
            OwnStatus::PartiallyMoved { fields } => {
                if mode != UseMode::Borrow {
                    let moved: Vec<&str> = fields.keys().map(|f| f.as_str()).collect();
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::MOVE_OF_PARTIALLY_MOVED,
                            span,
                            format!(
                                "cannot use '{}': it has partially moved fields ({})",
                                bind.name,
                                moved.join(", ")
                            ),
                        )
                        .var_name(bind.name)
                        .emit(&self.ctx.diag);
                }
                return;
            }
            OwnStatus::Owned => {}
        }

        match mode {
            UseMode::Read => {
                self.ctx.timeline.add_event(
                    bind.name,
                    EventKind::Use,
                    format!("'{}' used", bind.name),
                    span,
                );
            }
            UseMode::Borrow => {
                self.ctx.timeline.add_event(
                    bind.name,
                    EventKind::Borrow,
                    format!("'{}' borrowed", bind.name),
                    span,
                );
            }
            UseMode::Move => {
                if bind.is_copy {
                    self.ctx.timeline.add_event(
                        bind.name,
                        EventKind::Use,
                        format!("'{}' copied", bind.name),
                        span,
                    );
                    return;
                }
                self.check_defer_liveness(def, &bind, span);
                self.ctx.timeline.add_event(
                    bind.name,
                    EventKind::Move,
                    format!("'{}' moved", bind.name),
                    span,
                );
                if let Some(state) = self.state.get_mut(&def) {
                    state.status = OwnStatus::Moved {
                        to: None,
                        at: span,
                        conditional: false,
                    };
                }
            }
        }
    }

    fn use_field(&mut self, def: DefId, field: Symbol, mode: UseMode, expr: &Expr) {
        let Some(bind) = self.state.get(&def).cloned() else {
            return;
        };
        let span = expr.span;
        match &bind.status {
            OwnStatus::Moved { at, .. } => {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::USE_OF_MOVED,
                        span,
                        format!("cannot use moved value '{}'", bind.name),
                    )
                    .label(*at, "value moved here")
                    .var_name(bind.name)
                    .suggest_fixes()
                    .emit(&self.ctx.diag);
                return;
            }
            OwnStatus::PartiallyMoved { fields } => {
                if let Some(moved_at) = fields.get(&field) {
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::USE_OF_MOVED_FIELD,
                            span,
                            format!("cannot use already moved field '{field}' of '{}'", bind.name),
                        )
                        .label(*moved_at, "field moved here")
                        .var_name(bind.name)
                        .emit(&self.ctx.diag);
                    return;
                }
            }
            OwnStatus::Owned => {}
        }

        if mode != UseMode::Move {
            return;
        }
        // A copy field never transitions its owner
        let field_is_copy = self
            .ctx
            .node_type(expr.id)
            .map(|ty| self.ctx.types.is_copy(ty, &self.ctx.symbols))
            .unwrap_or(true);
        if field_is_copy || bind.is_copy {
            return;
        }
        self.check_defer_liveness(def, &bind, span);
        self.ctx.timeline.add_event(
            bind.name,
            EventKind::Move,
            format!("field '{field}' of '{}' moved", bind.name),
            span,
        );
        if let Some(state) = self.state.get_mut(&def) {
            match &mut state.status {
                OwnStatus::Owned => {
                    let mut fields = BTreeMap::new();
                    fields.insert(field, span);
                    state.status = OwnStatus::PartiallyMoved { fields };
                }
                OwnStatus::PartiallyMoved { fields } => {
                    fields.insert(field, span);
                }
                OwnStatus::Moved { .. } => {}
            }
        }
    }

    /// A move of a binding a pending defer still needs is an error here
    fn check_defer_liveness(&self, def: DefId, bind: &BindState, span: Span) {
        for frame in &self.defer_stack {
            for pending in frame {
                if pending.free_vars.contains(&def) {
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::DEFER_USES_MOVED,
                            span,
                            format!(
                                "'{}' is moved here but a pending defer still needs it",
                                bind.name
                            ),
                        )
                        .label(pending.span, "defer recorded here")
                        .var_name(bind.name)
                        .emit(&self.ctx.diag);
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Walkers
    // ------------------------------------------------------------------------

    fn walk_block(&mut self, block: &Block) {
        self.defer_stack.push(Vec::new());
        for stmt in &block.stmts {
            self.walk_stmt(stmt);
        }
        self.defer_stack.pop();
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let(let_stmt) => {
                if let Some(init) = &let_stmt.init {
                    // Record the destination when the init is a straight move
                    let source = self.resolve_place(init).map(|(def, _)| def);
                    self.eval_expr(init);
                    if let (Some(src), Some(dest)) = (source, self.ctx.node_def(stmt.id)) {
                        if let Some(state) = self.state.get_mut(&src) {
                            if let OwnStatus::Moved { to, .. } = &mut state.status {
                                *to = Some(dest);
                            }
                        }
                    }
                }
                if let Some(def) = self.ctx.node_def(stmt.id) {
                    self.bind(def, let_stmt.name.name, let_stmt.name.span);
                }
            }
            StmtKind::Expr(expr) => self.eval_expr(expr),
            StmtKind::While(w) => {
                self.eval_expr(&w.cond);
                self.loop_fixpoint(|this| {
                    this.walk_block(&w.body);
                    this.eval_expr(&w.cond);
                });
            }
            StmtKind::For(f) => {
                self.eval_expr(&f.iter);
                if let Some(def) = self.ctx.node_def(stmt.id) {
                    self.bind(def, f.var.name, f.var.span);
                }
                self.loop_fixpoint(|this| this.walk_block(&f.body));
            }
            StmtKind::With(w) => {
                // Already desugared in the normal pipeline
                self.eval_expr(&w.init);
                self.walk_block(&w.body);
            }
            StmtKind::Defer(d) => {
                // Checked under the state at the defer statement
                let saved = self.state.clone();
                self.walk_block(&d.body);
                self.state = saved;

                let mut free_vars = FxHashSet::default();
                self.collect_free_vars_block(&d.body, &mut free_vars);
                if let Some(frame) = self.defer_stack.last_mut() {
                    frame.push(PendingDefer {
                        free_vars,
                        span: stmt.span,
                    });
                }
            }
            StmtKind::Unsafe(b) => self.walk_block(b),
        }
    }

    /// Iterate a loop body to fixpoint over the finite ownership lattice
    fn loop_fixpoint(&mut self, mut body: impl FnMut(&mut Self)) {
        for _ in 0..MAX_LOOP_ITERATIONS {
            let before = self.state.clone();
            body(self);
            let merged = Self::join(before.clone(), std::mem::take(&mut self.state));
            let stable = merged == before;
            self.state = merged;
            if stable {
                return;
            }
        }
    }

    fn eval_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Break | ExprKind::Continue => {}
            ExprKind::Path(_) | ExprKind::FieldAccess(_) => {
                if !self.use_place(expr, UseMode::Move) {
                    if let ExprKind::FieldAccess(access) = &expr.kind {
                        self.eval_expr(&access.object);
                    }
                }
            }
            ExprKind::Reference(r) => {
                if !self.use_place(&r.operand, UseMode::Borrow) {
                    self.eval_expr(&r.operand);
                }
            }
            ExprKind::Unary(u) => self.eval_expr(&u.operand),
            ExprKind::Binary(b) => {
                self.eval_expr(&b.lhs);
                self.eval_expr(&b.rhs);
            }
            ExprKind::Call(call) => {
                if self.is_drop_call(call) {
                    self.eval_drop(expr, call);
                    return;
                }
                if !matches!(call.callee.kind, ExprKind::Path(_)) {
                    self.eval_expr(&call.callee);
                }
                for arg in &call.const_args {
                    self.eval_expr(arg);
                }
                // print and friends take their arguments by reference
                let reads_only = self.is_print_call(call);
                for arg in &call.args {
                    if reads_only && self.use_place(arg, UseMode::Read) {
                        continue;
                    }
                    self.eval_expr(arg);
                }
            }
            ExprKind::MethodCall(call) => {
                // Receiver mode follows the resolved method's self parameter
                let receiver_mode = match self
                    .ctx
                    .node_def(expr.id)
                    .and_then(|def| match &self.ctx.symbols.symbol(def).kind {
                        SymbolKind::Function(sig) => sig.self_param,
                        _ => None,
                    }) {
                    Some(SelfKind::Value) => UseMode::Move,
                    Some(SelfKind::Ref) | Some(SelfKind::RefMut) => UseMode::Borrow,
                    None => UseMode::Read,
                };
                if !self.use_place(&call.receiver, receiver_mode) {
                    if !matches!(call.receiver.kind, ExprKind::Path(_)) {
                        self.eval_expr(&call.receiver);
                    }
                }
                for arg in &call.args {
                    self.eval_expr(arg);
                }
            }
            ExprKind::Index(index) => {
                if !self.use_place(&index.object, UseMode::Read) {
                    self.eval_expr(&index.object);
                }
                self.eval_expr(&index.index);
            }
            ExprKind::Block(b) => self.walk_block(b),
            ExprKind::If(if_expr) => {
                self.eval_expr(&if_expr.cond);
                let before = self.state.clone();
                self.walk_block(&if_expr.then_block);
                let after_then = std::mem::replace(&mut self.state, before.clone());
                if let Some(else_branch) = &if_expr.else_branch {
                    self.eval_expr(else_branch);
                }
                let after_else = std::mem::take(&mut self.state);
                self.state = Self::join(after_then, after_else);
            }
            ExprKind::Match(m) => {
                if !self.use_place(&m.scrutinee, UseMode::Read) {
                    self.eval_expr(&m.scrutinee);
                }
                let before = self.state.clone();
                let mut joined: Option<OwnState> = None;
                for arm in &m.arms {
                    self.state = before.clone();
                    self.bind_pattern(&arm.pattern);
                    if let Some(guard) = &arm.guard {
                        self.eval_expr(guard);
                    }
                    self.walk_block(&arm.body);
                    let after = std::mem::take(&mut self.state);
                    joined = Some(match joined {
                        None => after,
                        Some(acc) => Self::join(acc, after),
                    });
                }
                self.state = joined.unwrap_or(before);
            }
            ExprKind::Closure(c) => self.eval_closure(expr, c),
            ExprKind::Assign(assign) => {
                self.eval_expr(&assign.value);
                self.eval_assign_place(&assign.place);
            }
            ExprKind::CompoundAssign(assign) => {
                self.eval_expr(&assign.value);
                // Read-modify-write: the place must still be live
                if !self.use_place(&assign.place, UseMode::Read) {
                    self.eval_expr(&assign.place);
                }
            }
            ExprKind::Try(inner) => self.eval_expr(inner),
            ExprKind::Return(inner) => {
                if let Some(value) = inner {
                    self.eval_expr(value);
                }
            }
            ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
                for e in elems {
                    self.eval_expr(e);
                }
            }
            ExprKind::Range(r) => {
                self.eval_expr(&r.lo);
                self.eval_expr(&r.hi);
            }
            ExprKind::Cast(c) => self.eval_expr(&c.expr),
            ExprKind::StructLiteral(lit) => {
                for (_, value) in &lit.fields {
                    self.eval_expr(value);
                }
            }
            // Arguments are consumed; the constructed value is a fresh
            // ownership and is not itself move-tracked here
            ExprKind::EnumVariant(variant) => {
                for arg in &variant.args {
                    self.eval_expr(arg);
                }
            }
        }
    }

    fn eval_assign_place(&mut self, place: &Expr) {
        let Some((def, field)) = self.resolve_place(place) else {
            self.eval_expr(place);
            return;
        };
        let Some(bind) = self.state.get(&def).cloned() else {
            return;
        };
        match field {
            None => {
                // Whole reassignment returns the binding to Owned
                self.ctx.timeline.add_event(
                    bind.name,
                    EventKind::Allocate,
                    format!("'{}' reassigned", bind.name),
                    place.span,
                );
                if let Some(state) = self.state.get_mut(&def) {
                    state.status = OwnStatus::Owned;
                }
            }
            Some((field_name, _)) => match bind.status {
                OwnStatus::Moved { at, .. } => {
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::USE_OF_MOVED,
                            place.span,
                            format!(
                                "cannot assign to field of moved value '{}'",
                                bind.name
                            ),
                        )
                        .label(at, "value moved here")
                        .var_name(bind.name)
                        .emit(&self.ctx.diag);
                }
                _ => {
                    // A moved field becomes owned again
                    if let Some(state) = self.state.get_mut(&def) {
                        if let OwnStatus::PartiallyMoved { fields } = &mut state.status {
                            fields.remove(&field_name);
                            if fields.is_empty() {
                                state.status = OwnStatus::Owned;
                            }
                        }
                    }
                }
            },
        }
    }

    fn is_drop_call(&self, call: &pyritec_ast::CallExpr) -> bool {
        match &call.callee.kind {
            ExprKind::Path(path) => path.is_ident() && path.last().name.eq_str("drop"),
            _ => false,
        }
    }

    fn is_print_call(&self, call: &pyritec_ast::CallExpr) -> bool {
        match &call.callee.kind {
            ExprKind::Path(path) => {
                path.is_ident()
                    && (path.last().name.eq_str("print") || path.last().name.eq_str("println"))
            }
            _ => false,
        }
    }

    fn eval_drop(&mut self, _expr: &Expr, call: &pyritec_ast::CallExpr) {
        let Some(arg) = call.args.first() else { return };
        let Some((def, None)) = self.resolve_place(arg) else {
            self.eval_expr(arg);
            return;
        };
        let Some(bind) = self.state.get(&def).cloned() else {
            return;
        };
        match &bind.status {
            OwnStatus::PartiallyMoved { fields } => {
                let moved: Vec<&str> = fields.keys().map(|f| f.as_str()).collect();
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::MOVE_OF_PARTIALLY_MOVED,
                        arg.span,
                        format!(
                            "cannot drop '{}': it has partially moved fields ({})",
                            bind.name,
                            moved.join(", ")
                        ),
                    )
                    .var_name(bind.name)
                    .emit(&self.ctx.diag);
            }
            OwnStatus::Owned => {
                self.check_defer_liveness(def, &bind, arg.span);
                self.ctx.timeline.add_event(
                    bind.name,
                    EventKind::Drop,
                    format!("'{}' dropped", bind.name),
                    arg.span,
                );
                if let Some(state) = self.state.get_mut(&def) {
                    state.status = OwnStatus::Moved {
                        to: None,
                        at: arg.span,
                        conditional: false,
                    };
                }
            }
            // Dropping an already-moved value is a no-op
            OwnStatus::Moved { .. } => {}
        }
    }

    fn eval_closure(&mut self, expr: &Expr, closure: &pyritec_ast::ClosureExpr) {
        let mut captures = FxHashSet::default();
        self.collect_free_vars_expr(&closure.body, &mut captures);

        for def in captures {
            let Some(bind) = self.state.get(&def).cloned() else {
                continue;
            };
            if let OwnStatus::Moved { at, .. } = &bind.status {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::CAPTURE_OF_MOVED,
                        expr.span,
                        format!("closure captures moved value '{}'", bind.name),
                    )
                    .label(*at, "value moved here")
                    .var_name(bind.name)
                    .emit(&self.ctx.diag);
                continue;
            }
            if closure.is_move && !bind.is_copy {
                self.check_defer_liveness(def, &bind, expr.span);
                self.ctx.timeline.add_event(
                    bind.name,
                    EventKind::Move,
                    format!("'{}' moved into closure", bind.name),
                    expr.span,
                );
                if let Some(state) = self.state.get_mut(&def) {
                    state.status = OwnStatus::Moved {
                        to: None,
                        at: expr.span,
                        conditional: false,
                    };
                }
            } else {
                self.ctx.timeline.add_event(
                    bind.name,
                    EventKind::Borrow,
                    format!("'{}' captured by reference", bind.name),
                    expr.span,
                );
            }
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern) {
        self.bind_pattern_defs(pattern);
    }

    fn bind_pattern_defs(&mut self, pattern: &Pattern) {
        use pyritec_ast::PatternKind;
        match &pattern.kind {
            PatternKind::Binding { name, .. } => {
                if let Some(def) = self.ctx.node_def(pattern.id) {
                    self.bind(def, name.name, name.span);
                }
            }
            PatternKind::Tuple(pats) => {
                for p in pats {
                    self.bind_pattern_defs(p);
                }
            }
            PatternKind::Struct { fields, .. } => {
                for (_, p) in fields {
                    self.bind_pattern_defs(p);
                }
            }
            PatternKind::EnumVariant { fields, .. } => {
                for p in fields {
                    self.bind_pattern_defs(p);
                }
            }
            PatternKind::Wildcard | PatternKind::Literal(_) => {}
        }
    }

    // ------------------------------------------------------------------------
    // Free variables (closure captures, defer liveness)
    // ------------------------------------------------------------------------

    fn collect_free_vars_block(&self, block: &Block, out: &mut FxHashSet<DefId>) {
        for stmt in &block.stmts {
            match &stmt.kind {
                StmtKind::Let(l) => {
                    if let Some(init) = &l.init {
                        self.collect_free_vars_expr(init, out);
                    }
                }
                StmtKind::Expr(e) => self.collect_free_vars_expr(e, out),
                StmtKind::While(w) => {
                    self.collect_free_vars_expr(&w.cond, out);
                    self.collect_free_vars_block(&w.body, out);
                }
                StmtKind::For(f) => {
                    self.collect_free_vars_expr(&f.iter, out);
                    self.collect_free_vars_block(&f.body, out);
                }
                StmtKind::With(w) => {
                    self.collect_free_vars_expr(&w.init, out);
                    self.collect_free_vars_block(&w.body, out);
                }
                StmtKind::Defer(d) => self.collect_free_vars_block(&d.body, out),
                StmtKind::Unsafe(b) => self.collect_free_vars_block(b, out),
            }
        }
    }

    /// Free variables are paths resolving to bindings tracked in the current
    /// state; closure params and body-locals are not in the state, so they
    /// exclude themselves.
    fn collect_free_vars_expr(&self, expr: &Expr, out: &mut FxHashSet<DefId>) {
        match &expr.kind {
            ExprKind::Path(_) => {
                if let Some(def) = self.ctx.node_def(expr.id) {
                    if self.state.contains_key(&def) {
                        out.insert(def);
                    }
                }
            }
            ExprKind::Literal(_) | ExprKind::Break | ExprKind::Continue => {}
            ExprKind::Binary(b) => {
                self.collect_free_vars_expr(&b.lhs, out);
                self.collect_free_vars_expr(&b.rhs, out);
            }
            ExprKind::Unary(u) => self.collect_free_vars_expr(&u.operand, out),
            ExprKind::Reference(r) => self.collect_free_vars_expr(&r.operand, out),
            ExprKind::Call(c) => {
                self.collect_free_vars_expr(&c.callee, out);
                for a in c.const_args.iter().chain(c.args.iter()) {
                    self.collect_free_vars_expr(a, out);
                }
            }
            ExprKind::MethodCall(c) => {
                self.collect_free_vars_expr(&c.receiver, out);
                for a in &c.args {
                    self.collect_free_vars_expr(a, out);
                }
            }
            ExprKind::FieldAccess(f) => self.collect_free_vars_expr(&f.object, out),
            ExprKind::Index(i) => {
                self.collect_free_vars_expr(&i.object, out);
                self.collect_free_vars_expr(&i.index, out);
            }
            ExprKind::Block(b) => self.collect_free_vars_block(b, out),
            ExprKind::If(i) => {
                self.collect_free_vars_expr(&i.cond, out);
                self.collect_free_vars_block(&i.then_block, out);
                if let Some(e) = &i.else_branch {
                    self.collect_free_vars_expr(e, out);
                }
            }
            ExprKind::Match(m) => {
                self.collect_free_vars_expr(&m.scrutinee, out);
                for arm in &m.arms {
                    if let Some(g) = &arm.guard {
                        self.collect_free_vars_expr(g, out);
                    }
                    self.collect_free_vars_block(&arm.body, out);
                }
            }
            ExprKind::Closure(c) => self.collect_free_vars_expr(&c.body, out),
            ExprKind::Assign(a) => {
                self.collect_free_vars_expr(&a.place, out);
                self.collect_free_vars_expr(&a.value, out);
            }
            ExprKind::CompoundAssign(a) => {
                self.collect_free_vars_expr(&a.place, out);
                self.collect_free_vars_expr(&a.value, out);
            }
            ExprKind::Try(inner) => self.collect_free_vars_expr(inner, out),
            ExprKind::Return(inner) => {
                if let Some(e) = inner {
                    self.collect_free_vars_expr(e, out);
                }
            }
            ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
                for e in elems {
                    self.collect_free_vars_expr(e, out);
                }
            }
            ExprKind::Range(r) => {
                self.collect_free_vars_expr(&r.lo, out);
                self.collect_free_vars_expr(&r.hi, out);
            }
            ExprKind::Cast(c) => self.collect_free_vars_expr(&c.expr, out),
            ExprKind::StructLiteral(lit) => {
                for (_, v) in &lit.fields {
                    self.collect_free_vars_expr(v, out);
                }
            }
            ExprKind::EnumVariant(v) => {
                for a in &v.args {
                    self.collect_free_vars_expr(a, out);
                }
            }
        }
    }
}
