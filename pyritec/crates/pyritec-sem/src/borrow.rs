//! Borrow checking.
//!
//! ============================================================================
//! BORROW CHECKER
//! ============================================================================
//!
//! Enforces shared-XOR-exclusive over every place at every program point.
//! A place is `binding(.field)*`; two places overlap when one path is a
//! prefix of the other, so `x.a` and `x.b` never conflict while `x` and
//! `x.a` always do.
//!
//! Borrow liveness uses the within-function approximation: a borrow is live
//! from its creation to its last use inside the smallest enclosing block.
//! A borrow bound by `let r = &x` lives until the last statement of the
//! block that mentions `r`; a temporary borrow (`f(&x)`) lives for its own
//! statement.
//!
//! Rules enforced at each site:
//! - creating an exclusive borrow while any overlapping borrow is live is
//!   `P0499` (second exclusive) or `P0502` (shared outstanding);
//! - creating a shared borrow while an overlapping exclusive borrow is live
//!   is `P0502`;
//! - using the owner while an exclusive borrow is outstanding is `P0503`;
//!   owner reads under shared borrows are fine;
//! - returning a reference to a function-local is `P0505`, and a labeled
//!   return lifetime must name an input lifetime (`P0505` at the signature).

use crate::context::Context;
use crate::symbols::{DefId, SymbolKind};
use crate::ty::TyKind;
use pyritec_ast::{
    Block, Expr, ExprKind, FnItem, Item, Program, Stmt, StmtKind,
};
use pyritec_util::{DiagnosticCode, FxHashMap, FxHashSet, Span, Symbol};

/// A borrowed place at field granularity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Place {
    base: DefId,
    field: Option<Symbol>,
}

impl Place {
    /// Prefix overlap: `x` overlaps `x.a`; `x.a` does not overlap `x.b`
    fn overlaps(&self, other: &Place) -> bool {
        if self.base != other.base {
            return false;
        }
        match (self.field, other.field) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// One live borrow
#[derive(Clone, Debug)]
struct LiveBorrow {
    place: Place,
    mutable: bool,
    /// Binding holding the reference, for `let r = &x`
    binder: Option<DefId>,
    created: Span,
    /// Statement index in its block past which the borrow expires
    last_use: usize,
    /// Nesting depth of the block the borrow belongs to
    depth: usize,
}

/// Run the borrow checker over every function body
pub fn check_borrows(ctx: &mut Context<'_>, program: &Program) {
    for item in &program.items {
        match item {
            Item::Fn(func) => check_fn(ctx, func),
            Item::Impl(imp) => {
                for method in &imp.methods {
                    check_fn(ctx, method);
                }
            }
            _ => {}
        }
    }
}

pub(crate) fn check_fn(ctx: &mut Context<'_>, func: &FnItem) {
    check_signature_lifetimes(ctx, func);
    let Some(body) = &func.body else { return };

    let mut params = FxHashSet::default();
    for param in &func.params {
        if let Some(def) = ctx.node_def(param.id) {
            params.insert(def);
        }
    }
    if func.self_param.is_some() {
        if let Some(&fn_scope) = ctx.fn_scopes.get(&func.id) {
            if let Some(self_def) = ctx.symbols.lookup_in(
                fn_scope,
                crate::symbols::Namespace::Value,
                pyritec_util::symbol::sym::SELF_LOWER,
            ) {
                params.insert(self_def);
            }
        }
    }

    let mut checker = BorrowChecker {
        ctx,
        live: Vec::new(),
        params,
        depth: 0,
    };
    checker.walk_block(body);
}

/// A labeled return lifetime must come from an input
fn check_signature_lifetimes(ctx: &mut Context<'_>, func: &FnItem) {
    let Some(def) = ctx.node_def(func.id) else { return };
    let sig = match &ctx.symbols.symbol(def).kind {
        SymbolKind::Function(sig) => sig.clone(),
        _ => return,
    };
    let TyKind::Ref {
        lifetime: Some(label),
        ..
    } = ctx.types.kind(sig.ret)
    else {
        return;
    };
    let label = *label;
    let named_by_input = sig.params.iter().any(|&p| {
        matches!(
            ctx.types.kind(p),
            TyKind::Ref {
                lifetime: Some(l),
                ..
            } if *l == label
        )
    });
    if !named_by_input {
        ctx.diag
            .build_error(
                DiagnosticCode::DOES_NOT_LIVE_LONG_ENOUGH,
                func.span,
                format!(
                    "return lifetime '{label} does not name an input lifetime of `{}`",
                    func.name.name
                ),
            )
            .emit(&ctx.diag);
    }
}

struct BorrowChecker<'c, 'a> {
    ctx: &'c mut Context<'a>,
    live: Vec<LiveBorrow>,
    /// Parameter bindings; references to these may be returned
    params: FxHashSet<DefId>,
    depth: usize,
}

impl BorrowChecker<'_, '_> {
    // ------------------------------------------------------------------------
    // Places
    // ------------------------------------------------------------------------

    fn resolve_place(&self, expr: &Expr) -> Option<Place> {
        match &expr.kind {
            ExprKind::Path(path) if path.is_ident() => {
                let def = self.ctx.node_def(expr.id)?;
                if matches!(self.ctx.symbols.symbol(def).kind, SymbolKind::Value { .. }) {
                    Some(Place { base: def, field: None })
                } else {
                    None
                }
            }
            ExprKind::FieldAccess(access) => {
                let inner = self.resolve_place(&access.object)?;
                Some(Place {
                    base: inner.base,
                    field: inner.field.or(Some(access.field.name)),
                })
            }
            _ => None,
        }
    }

    fn binding_name(&self, def: DefId) -> Symbol {
        self.ctx.symbols.symbol(def).name
    }

    // ------------------------------------------------------------------------
    // Borrow creation
    // ------------------------------------------------------------------------

    /// Check the shared-XOR-exclusive rule at a borrow-creation site
    fn check_new_borrow(&mut self, place: Place, mutable: bool, span: Span) {
        let name = self.binding_name(place.base);
        for existing in &self.live {
            if !existing.place.overlaps(&place) {
                continue;
            }
            if mutable && existing.mutable {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::DOUBLE_MUTABLE_BORROW,
                        span,
                        format!("cannot borrow '{name}' as mutable more than once"),
                    )
                    .label(existing.created, "first mutable borrow here")
                    .var_name(name)
                    .suggest_fixes()
                    .emit(&self.ctx.diag);
                return;
            }
            if mutable && !existing.mutable {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::MUTABLE_WHILE_SHARED,
                        span,
                        format!(
                            "cannot borrow '{name}' as mutable while it is borrowed as immutable"
                        ),
                    )
                    .label(existing.created, "immutable borrow here")
                    .var_name(name)
                    .suggest_fixes()
                    .emit(&self.ctx.diag);
                return;
            }
            if !mutable && existing.mutable {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::MUTABLE_WHILE_SHARED,
                        span,
                        format!(
                            "cannot borrow '{name}' as immutable while it is borrowed as mutable"
                        ),
                    )
                    .label(existing.created, "mutable borrow here")
                    .var_name(name)
                    .suggest_fixes()
                    .emit(&self.ctx.diag);
                return;
            }
            // shared + shared coexist
        }
    }

    /// Using the owner of a place while an exclusive borrow is live
    fn check_owner_use(&mut self, place: Place, span: Span) {
        let name = self.binding_name(place.base);
        for existing in &self.live {
            if existing.mutable && existing.place.overlaps(&place) {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::USE_WHILE_MUTABLY_BORROWED,
                        span,
                        format!("cannot use '{name}' while it is mutably borrowed"),
                    )
                    .label(existing.created, "mutable borrow here")
                    .var_name(name)
                    .emit(&self.ctx.diag);
                return;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Walkers
    // ------------------------------------------------------------------------

    fn walk_block(&mut self, block: &Block) {
        self.depth += 1;
        let start = self.live.len();

        // Pre-scan: last statement index mentioning each binding, so a
        // borrow's region extends to its final use in this block
        let mut last_mention: FxHashMap<DefId, usize> = FxHashMap::default();
        for (idx, stmt) in block.stmts.iter().enumerate() {
            let mut mentioned = FxHashSet::default();
            collect_mentions_stmt(self.ctx, stmt, &mut mentioned);
            for def in mentioned {
                last_mention.insert(def, idx);
            }
        }

        for (idx, stmt) in block.stmts.iter().enumerate() {
            self.walk_stmt(stmt, idx, &last_mention);
            // Expire this block's borrows past their last use
            let depth = self.depth;
            self.live
                .retain(|b| b.depth != depth || b.last_use > idx);
        }

        self.live.truncate(start);
        self.depth -= 1;
    }

    fn walk_stmt(&mut self, stmt: &Stmt, idx: usize, last_mention: &FxHashMap<DefId, usize>) {
        match &stmt.kind {
            StmtKind::Let(let_stmt) => {
                let Some(init) = &let_stmt.init else { return };
                // `let r = &x` creates a borrow bound to r
                if let ExprKind::Reference(r) = &init.kind {
                    if let Some(place) = self.resolve_place(&r.operand) {
                        self.check_new_borrow(place, r.mutable, init.span);
                        let binder = self.ctx.node_def(stmt.id);
                        let last_use = binder
                            .and_then(|b| last_mention.get(&b).copied())
                            .unwrap_or(idx);
                        self.live.push(LiveBorrow {
                            place,
                            mutable: r.mutable,
                            binder,
                            created: init.span,
                            last_use,
                            depth: self.depth,
                        });
                        return;
                    }
                }
                self.walk_expr(init, idx);
            }
            StmtKind::Expr(expr) => self.walk_expr(expr, idx),
            StmtKind::While(w) => {
                self.walk_expr(&w.cond, idx);
                self.walk_block(&w.body);
            }
            StmtKind::For(f) => {
                self.walk_expr(&f.iter, idx);
                self.walk_block(&f.body);
            }
            StmtKind::With(w) => {
                self.walk_expr(&w.init, idx);
                self.walk_block(&w.body);
            }
            StmtKind::Defer(d) => self.walk_block(&d.body),
            StmtKind::Unsafe(b) => self.walk_block(b),
        }
    }

    fn walk_expr(&mut self, expr: &Expr, idx: usize) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Break | ExprKind::Continue => {}
            ExprKind::Path(_) | ExprKind::FieldAccess(_) => {
                if let Some(place) = self.resolve_place(expr) {
                    // Using the binder of a borrow is using the reference,
                    // not the owner
                    let is_binder = self
                        .live
                        .iter()
                        .any(|b| b.binder == Some(place.base) && place.field.is_none());
                    if !is_binder {
                        self.check_owner_use(place, expr.span);
                    }
                } else if let ExprKind::FieldAccess(access) = &expr.kind {
                    self.walk_expr(&access.object, idx);
                }
            }
            ExprKind::Reference(r) => {
                // Temporary borrow: checked, lives for this statement only
                if let Some(place) = self.resolve_place(&r.operand) {
                    self.check_new_borrow(place, r.mutable, expr.span);
                } else {
                    self.walk_expr(&r.operand, idx);
                }
            }
            ExprKind::Unary(u) => self.walk_expr(&u.operand, idx),
            ExprKind::Binary(b) => {
                self.walk_expr(&b.lhs, idx);
                self.walk_expr(&b.rhs, idx);
            }
            ExprKind::Call(call) => {
                if !matches!(call.callee.kind, ExprKind::Path(_)) {
                    self.walk_expr(&call.callee, idx);
                }
                for arg in call.const_args.iter().chain(call.args.iter()) {
                    self.walk_expr(arg, idx);
                }
            }
            ExprKind::MethodCall(call) => {
                // A `&mut self` method takes an implicit exclusive borrow
                let needs_mut = matches!(
                    self.ctx
                        .node_def(expr.id)
                        .and_then(|def| match &self.ctx.symbols.symbol(def).kind {
                            SymbolKind::Function(sig) => sig.self_param,
                            _ => None,
                        }),
                    Some(pyritec_ast::SelfKind::RefMut)
                );
                if let Some(place) = self.resolve_place(&call.receiver) {
                    if needs_mut {
                        self.check_new_borrow(place, true, call.receiver.span);
                    } else {
                        self.check_owner_use(place, call.receiver.span);
                    }
                } else if !matches!(call.receiver.kind, ExprKind::Path(_)) {
                    self.walk_expr(&call.receiver, idx);
                }
                for arg in &call.args {
                    self.walk_expr(arg, idx);
                }
            }
            ExprKind::Index(i) => {
                self.walk_expr(&i.object, idx);
                self.walk_expr(&i.index, idx);
            }
            ExprKind::Block(b) => self.walk_block(b),
            ExprKind::If(i) => {
                self.walk_expr(&i.cond, idx);
                self.walk_block(&i.then_block);
                if let Some(e) = &i.else_branch {
                    self.walk_expr(e, idx);
                }
            }
            ExprKind::Match(m) => {
                self.walk_expr(&m.scrutinee, idx);
                for arm in &m.arms {
                    if let Some(g) = &arm.guard {
                        self.walk_expr(g, idx);
                    }
                    self.walk_block(&arm.body);
                }
            }
            ExprKind::Closure(c) => self.walk_expr(&c.body, idx),
            ExprKind::Assign(a) => {
                self.walk_expr(&a.value, idx);
                // Writing through a place is a use of its owner
                if let Some(place) = self.resolve_place(&a.place) {
                    let is_binder = self.live.iter().any(|b| b.binder == Some(place.base));
                    if !is_binder {
                        self.check_owner_use(place, a.place.span);
                    }
                }
            }
            ExprKind::CompoundAssign(a) => {
                self.walk_expr(&a.place, idx);
                self.walk_expr(&a.value, idx);
            }
            ExprKind::Try(inner) => self.walk_expr(inner, idx),
            ExprKind::Return(inner) => {
                if let Some(value) = inner {
                    self.check_returned_reference(value);
                    self.walk_expr(value, idx);
                }
            }
            ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
                for e in elems {
                    self.walk_expr(e, idx);
                }
            }
            ExprKind::Range(r) => {
                self.walk_expr(&r.lo, idx);
                self.walk_expr(&r.hi, idx);
            }
            ExprKind::Cast(c) => self.walk_expr(&c.expr, idx),
            ExprKind::StructLiteral(lit) => {
                for (_, v) in &lit.fields {
                    self.walk_expr(v, idx);
                }
            }
            ExprKind::EnumVariant(v) => {
                for a in &v.args {
                    self.walk_expr(a, idx);
                }
            }
        }
    }

    /// Returning a reference to a function-local cannot outlive the frame
    fn check_returned_reference(&mut self, value: &Expr) {
        let local_base = match &value.kind {
            ExprKind::Reference(r) => self.resolve_place(&r.operand).map(|p| p.base),
            ExprKind::Path(_) => {
                // Returning a binding that holds a borrow of a local
                let def = self.ctx.node_def(value.id);
                def.and_then(|d| {
                    self.live
                        .iter()
                        .find(|b| b.binder == Some(d))
                        .map(|b| b.place.base)
                })
            }
            _ => None,
        };
        let Some(base) = local_base else { return };
        if self.params.contains(&base) {
            return;
        }
        let name = self.binding_name(base);
        self.ctx
            .diag
            .build_error(
                DiagnosticCode::DOES_NOT_LIVE_LONG_ENOUGH,
                value.span,
                format!("'{name}' does not live long enough"),
            )
            .note("the reference would outlive the function's stack frame")
            .var_name(name)
            .suggest_fixes()
            .emit(&self.ctx.diag);
    }
}

// ============================================================================
// Mention scanning (borrow regions)
// ============================================================================

fn collect_mentions_stmt(ctx: &Context<'_>, stmt: &Stmt, out: &mut FxHashSet<DefId>) {
    match &stmt.kind {
        StmtKind::Let(l) => {
            if let Some(init) = &l.init {
                collect_mentions_expr(ctx, init, out);
            }
        }
        StmtKind::Expr(e) => collect_mentions_expr(ctx, e, out),
        StmtKind::While(w) => {
            collect_mentions_expr(ctx, &w.cond, out);
            collect_mentions_block(ctx, &w.body, out);
        }
        StmtKind::For(f) => {
            collect_mentions_expr(ctx, &f.iter, out);
            collect_mentions_block(ctx, &f.body, out);
        }
        StmtKind::With(w) => {
            collect_mentions_expr(ctx, &w.init, out);
            collect_mentions_block(ctx, &w.body, out);
        }
        StmtKind::Defer(d) => collect_mentions_block(ctx, &d.body, out),
        StmtKind::Unsafe(b) => collect_mentions_block(ctx, b, out),
    }
}

fn collect_mentions_block(ctx: &Context<'_>, block: &Block, out: &mut FxHashSet<DefId>) {
    for stmt in &block.stmts {
        collect_mentions_stmt(ctx, stmt, out);
    }
}

fn collect_mentions_expr(ctx: &Context<'_>, expr: &Expr, out: &mut FxHashSet<DefId>) {
    if let ExprKind::Path(_) = &expr.kind {
        if let Some(def) = ctx.node_def(expr.id) {
            out.insert(def);
        }
        return;
    }
    match &expr.kind {
        ExprKind::Binary(b) => {
            collect_mentions_expr(ctx, &b.lhs, out);
            collect_mentions_expr(ctx, &b.rhs, out);
        }
        ExprKind::Unary(u) => collect_mentions_expr(ctx, &u.operand, out),
        ExprKind::Reference(r) => collect_mentions_expr(ctx, &r.operand, out),
        ExprKind::Call(c) => {
            collect_mentions_expr(ctx, &c.callee, out);
            for a in c.const_args.iter().chain(c.args.iter()) {
                collect_mentions_expr(ctx, a, out);
            }
        }
        ExprKind::MethodCall(c) => {
            collect_mentions_expr(ctx, &c.receiver, out);
            for a in &c.args {
                collect_mentions_expr(ctx, a, out);
            }
        }
        ExprKind::FieldAccess(f) => collect_mentions_expr(ctx, &f.object, out),
        ExprKind::Index(i) => {
            collect_mentions_expr(ctx, &i.object, out);
            collect_mentions_expr(ctx, &i.index, out);
        }
        ExprKind::Block(b) => collect_mentions_block(ctx, b, out),
        ExprKind::If(i) => {
            collect_mentions_expr(ctx, &i.cond, out);
            collect_mentions_block(ctx, &i.then_block, out);
            if let Some(e) = &i.else_branch {
                collect_mentions_expr(ctx, e, out);
            }
        }
        ExprKind::Match(m) => {
            collect_mentions_expr(ctx, &m.scrutinee, out);
            for arm in &m.arms {
                if let Some(g) = &arm.guard {
                    collect_mentions_expr(ctx, g, out);
                }
                collect_mentions_block(ctx, &arm.body, out);
            }
        }
        ExprKind::Closure(c) => collect_mentions_expr(ctx, &c.body, out),
        ExprKind::Assign(a) => {
            collect_mentions_expr(ctx, &a.place, out);
            collect_mentions_expr(ctx, &a.value, out);
        }
        ExprKind::CompoundAssign(a) => {
            collect_mentions_expr(ctx, &a.place, out);
            collect_mentions_expr(ctx, &a.value, out);
        }
        ExprKind::Try(inner) => collect_mentions_expr(ctx, inner, out),
        ExprKind::Return(Some(inner)) => collect_mentions_expr(ctx, inner, out),
        ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
            for e in elems {
                collect_mentions_expr(ctx, e, out);
            }
        }
        ExprKind::Range(r) => {
            collect_mentions_expr(ctx, &r.lo, out);
            collect_mentions_expr(ctx, &r.hi, out);
        }
        ExprKind::Cast(c) => collect_mentions_expr(ctx, &c.expr, out),
        ExprKind::StructLiteral(lit) => {
            for (_, v) in &lit.fields {
                collect_mentions_expr(ctx, v, out);
            }
        }
        ExprKind::EnumVariant(v) => {
            for a in &v.args {
                collect_mentions_expr(ctx, a, out);
            }
        }
        ExprKind::Literal(_)
        | ExprKind::Path(_)
        | ExprKind::Return(None)
        | ExprKind::Break
        | ExprKind::Continue => {}
    }
}
