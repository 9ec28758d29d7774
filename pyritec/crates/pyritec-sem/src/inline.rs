//! Closure-inline pass.
//!
//! ============================================================================
//! CLOSURE INLINING
//! ============================================================================
//!
//! Runs after type checking, when closure body types are known.
//!
//! PARAMETER CLOSURES - a function may declare compile-time parameters of
//! function type. Call sites pass closure literals for them; this pass
//! substitutes the closure body into the callee at each such call site,
//! renaming the closure's parameters to fresh bindings so nothing collides,
//! and removes the parameter from the specialized signature. The result is a
//! plain AST function, which re-enters name resolution, type checking, and
//! ownership analysis so any error the substitution introduced is caught.
//!
//! RUNTIME CLOSURES - every remaining closure literal gets an environment
//! record layout, one slot per capture in source appearance order, and a
//! synthetic function symbol `__closure_<n>` whose first parameter is the
//! environment pointer. A closure with zero captures degenerates to a bare
//! function pointer.

use crate::context::Context;
use crate::symbols::{DefId, SymbolKind};
use crate::ty::{TyId, TyKind};
use pyritec_ast::{
    Block, ClosureExpr, Expr, ExprKind, FnItem, Ident, Item, LetStmt, NodeId, Path, Program, Stmt,
    StmtKind,
};
use pyritec_util::{FxHashMap, FxHashSet, Symbol};

/// Environment layout for one runtime closure
#[derive(Clone, Debug)]
pub struct ClosureLayout {
    /// Synthetic function symbol, `__closure_<n>`
    pub symbol: Symbol,
    /// The closure literal this layout belongs to
    pub closure_node: NodeId,
    /// Captured bindings in source appearance order
    pub captures: Vec<(Symbol, TyId)>,
    /// True when there are no captures: the value is a bare function pointer
    pub fn_ptr_only: bool,
}

/// A call-site specialization of a parameter-closure function
#[derive(Debug)]
pub struct SpecializedFn {
    /// The synthesized function, already re-checked
    pub item: FnItem,
    /// The call that demanded it
    pub call_site: NodeId,
}

/// Run the closure-inline pass; returns the call-site specializations
pub fn run_closure_pass(ctx: &mut Context<'_>, program: &Program) -> Vec<SpecializedFn> {
    // Functions with fn-typed compile-time parameters, by definition id
    let mut inlinable: FxHashMap<DefId, FnItem> = FxHashMap::default();
    for item in &program.items {
        if let Item::Fn(func) = item {
            let Some(def) = ctx.node_def(func.id) else { continue };
            if fn_closure_params(ctx, def).is_empty() {
                continue;
            }
            inlinable.insert(def, func.clone());
        }
    }

    let mut pass = ClosureInlinePass {
        ctx,
        inlinable,
        specialized: Vec::new(),
        consumed_closures: FxHashSet::default(),
        next_specialization: 0,
    };
    for item in &program.items {
        match item {
            Item::Fn(func) => {
                if let Some(body) = &func.body {
                    pass.scan_block(body);
                }
            }
            Item::Impl(imp) => {
                for method in &imp.methods {
                    if let Some(body) = &method.body {
                        pass.scan_block(body);
                    }
                }
            }
            _ => {}
        }
    }
    let specialized = std::mem::take(&mut pass.specialized);
    let consumed = std::mem::take(&mut pass.consumed_closures);

    assign_runtime_layouts(ctx, program, &consumed);
    specialized
}

/// Compile-time parameters of function type, with their declared types
fn fn_closure_params(ctx: &Context<'_>, def: DefId) -> Vec<(usize, DefId)> {
    let SymbolKind::Function(sig) = &ctx.symbols.symbol(def).kind else {
        return Vec::new();
    };
    sig.const_params
        .iter()
        .enumerate()
        .filter(|(_, cp)| {
            matches!(
                &ctx.symbols.symbol(**cp).kind,
                SymbolKind::ConstParam { ty } if matches!(ctx.types.kind(*ty), TyKind::Fn { .. })
            )
        })
        .map(|(i, cp)| (i, *cp))
        .collect()
}

struct ClosureInlinePass<'c, 'a> {
    ctx: &'c mut Context<'a>,
    inlinable: FxHashMap<DefId, FnItem>,
    specialized: Vec<SpecializedFn>,
    /// Closure literals consumed by inlining; they get no runtime layout
    consumed_closures: FxHashSet<NodeId>,
    next_specialization: u32,
}

impl ClosureInlinePass<'_, '_> {
    fn scan_block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.scan_stmt(stmt);
        }
    }

    fn scan_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let(l) => {
                if let Some(init) = &l.init {
                    self.scan_expr(init);
                }
            }
            StmtKind::Expr(e) => self.scan_expr(e),
            StmtKind::While(w) => {
                self.scan_expr(&w.cond);
                self.scan_block(&w.body);
            }
            StmtKind::For(f) => {
                self.scan_expr(&f.iter);
                self.scan_block(&f.body);
            }
            StmtKind::With(w) => {
                self.scan_expr(&w.init);
                self.scan_block(&w.body);
            }
            StmtKind::Defer(d) => self.scan_block(&d.body),
            StmtKind::Unsafe(b) => self.scan_block(b),
        }
    }

    fn scan_expr(&mut self, expr: &Expr) {
        if let ExprKind::Call(call) = &expr.kind {
            let callee_def = self.ctx.node_def(call.callee.id);
            if let Some(def) = callee_def {
                if self.inlinable.contains_key(&def) {
                    self.specialize_call(expr, def, call);
                }
            }
        }
        // Continue into subtrees
        match &expr.kind {
            ExprKind::Binary(b) => {
                self.scan_expr(&b.lhs);
                self.scan_expr(&b.rhs);
            }
            ExprKind::Unary(u) => self.scan_expr(&u.operand),
            ExprKind::Reference(r) => self.scan_expr(&r.operand),
            ExprKind::Call(c) => {
                for a in c.const_args.iter().chain(c.args.iter()) {
                    self.scan_expr(a);
                }
            }
            ExprKind::MethodCall(c) => {
                self.scan_expr(&c.receiver);
                for a in &c.args {
                    self.scan_expr(a);
                }
            }
            ExprKind::FieldAccess(f) => self.scan_expr(&f.object),
            ExprKind::Index(i) => {
                self.scan_expr(&i.object);
                self.scan_expr(&i.index);
            }
            ExprKind::Block(b) => self.scan_block(b),
            ExprKind::If(i) => {
                self.scan_expr(&i.cond);
                self.scan_block(&i.then_block);
                if let Some(e) = &i.else_branch {
                    self.scan_expr(e);
                }
            }
            ExprKind::Match(m) => {
                self.scan_expr(&m.scrutinee);
                for arm in &m.arms {
                    if let Some(g) = &arm.guard {
                        self.scan_expr(g);
                    }
                    self.scan_block(&arm.body);
                }
            }
            ExprKind::Closure(c) => self.scan_expr(&c.body),
            ExprKind::Assign(a) => {
                self.scan_expr(&a.place);
                self.scan_expr(&a.value);
            }
            ExprKind::CompoundAssign(a) => {
                self.scan_expr(&a.place);
                self.scan_expr(&a.value);
            }
            ExprKind::Try(inner) => self.scan_expr(inner),
            ExprKind::Return(Some(inner)) => self.scan_expr(inner),
            ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
                for e in elems {
                    self.scan_expr(e);
                }
            }
            ExprKind::Range(r) => {
                self.scan_expr(&r.lo);
                self.scan_expr(&r.hi);
            }
            ExprKind::Cast(c) => self.scan_expr(&c.expr),
            ExprKind::StructLiteral(lit) => {
                for (_, v) in &lit.fields {
                    self.scan_expr(v);
                }
            }
            ExprKind::EnumVariant(v) => {
                for a in &v.args {
                    self.scan_expr(a);
                }
            }
            _ => {}
        }
    }

    /// Build one specialization for a call that passes closure literals
    fn specialize_call(&mut self, call_expr: &Expr, callee_def: DefId, call: &pyritec_ast::CallExpr) {
        let template = self.inlinable[&callee_def].clone();
        let closure_params = fn_closure_params(self.ctx, callee_def);

        // Pair each fn-typed const param with the closure literal at the site
        let mut substitutions: FxHashMap<Symbol, ClosureExpr> = FxHashMap::default();
        let mut removed: Vec<Symbol> = Vec::new();
        for (index, _) in &closure_params {
            let Some(arg) = call.const_args.get(*index) else {
                continue;
            };
            let ExprKind::Closure(closure) = &arg.kind else {
                continue; // a named function was passed; nothing to inline
            };
            let param_name = template.const_params[*index].name.name;
            substitutions.insert(param_name, closure.clone());
            removed.push(param_name);
            self.consumed_closures.insert(arg.id);
        }
        if substitutions.is_empty() {
            return;
        }

        let n = self.next_specialization;
        self.next_specialization += 1;
        let name = Symbol::intern(&format!("__{}_inline_{}", template.name.name, n));

        let mut inliner = Inliner {
            ctx: &mut *self.ctx,
            substitutions,
            prefix: n,
        };
        let body = template.body.as_ref().map(|b| inliner.rewrite_block(b));

        let specialized = FnItem {
            id: self.ctx.ids.fresh(),
            name: Ident::new(name, template.name.span),
            generics: template.generics.clone(),
            const_params: template
                .const_params
                .iter()
                .filter(|cp| !removed.contains(&cp.name.name))
                .cloned()
                .collect(),
            self_param: template.self_param,
            params: template
                .params
                .iter()
                .map(|p| pyritec_ast::Param {
                    id: self.ctx.ids.fresh(),
                    ..p.clone()
                })
                .collect(),
            ret_type: template.ret_type.clone(),
            where_clause: template.where_clause.clone(),
            body,
            is_extern: false,
            extern_abi: None,
            span: template.span,
        };

        // The substituted region re-enters resolution, type checking, and
        // ownership analysis
        let root = self.ctx.symbols.root_scope();
        let mut resolver = crate::resolve::Resolver::new(self.ctx);
        resolver.declare_fn(&specialized, root);
        resolver.resolve_fn_body(&specialized, root);
        crate::check::lower_fn_sig(self.ctx, &specialized, None);
        crate::check::check_fn_body(self.ctx, &specialized, None);
        crate::ownership::analyze_fn(self.ctx, &specialized);

        self.specialized.push(SpecializedFn {
            item: specialized,
            call_site: call_expr.id,
        });
    }
}

/// Rewrites a template body, expanding calls to substituted closure params
struct Inliner<'c, 'a> {
    ctx: &'c mut Context<'a>,
    substitutions: FxHashMap<Symbol, ClosureExpr>,
    prefix: u32,
}

impl Inliner<'_, '_> {
    fn fresh(&mut self) -> NodeId {
        self.ctx.ids.fresh()
    }

    fn rewrite_block(&mut self, block: &Block) -> Block {
        Block {
            id: self.fresh(),
            stmts: block.stmts.iter().map(|s| self.rewrite_stmt(s)).collect(),
            span: block.span,
        }
    }

    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Stmt {
        let kind = match &stmt.kind {
            StmtKind::Let(l) => StmtKind::Let(LetStmt {
                name: l.name,
                mutable: l.mutable,
                ty: l.ty.clone(),
                init: l.init.as_ref().map(|e| self.rewrite_expr(e)),
            }),
            StmtKind::Expr(e) => StmtKind::Expr(self.rewrite_expr(e)),
            StmtKind::While(w) => StmtKind::While(pyritec_ast::WhileStmt {
                cond: self.rewrite_expr(&w.cond),
                body: self.rewrite_block(&w.body),
            }),
            StmtKind::For(f) => StmtKind::For(pyritec_ast::ForStmt {
                var: f.var,
                iter: self.rewrite_expr(&f.iter),
                body: self.rewrite_block(&f.body),
            }),
            StmtKind::With(w) => StmtKind::With(pyritec_ast::WithStmt {
                name: w.name,
                init: self.rewrite_expr(&w.init),
                body: self.rewrite_block(&w.body),
            }),
            StmtKind::Defer(d) => StmtKind::Defer(pyritec_ast::DeferStmt {
                body: self.rewrite_block(&d.body),
            }),
            StmtKind::Unsafe(b) => StmtKind::Unsafe(self.rewrite_block(b)),
        };
        Stmt {
            id: self.fresh(),
            span: stmt.span,
            kind,
        }
    }

    /// Expand `f(args)` where `f` is a substituted closure parameter into
    /// `{ let p0 = arg0; ...; <closure body> }` with renamed parameters
    fn expand_closure_call(&mut self, call: &pyritec_ast::CallExpr, span: pyritec_util::Span) -> Option<Expr> {
        let ExprKind::Path(path) = &call.callee.kind else {
            return None;
        };
        if !path.is_ident() {
            return None;
        }
        let closure = self.substitutions.get(&path.last().name)?.clone();

        let mut stmts = Vec::new();
        let mut renames: FxHashMap<Symbol, Symbol> = FxHashMap::default();
        for (param, arg) in closure.params.iter().zip(call.args.iter()) {
            let fresh_name =
                Symbol::intern(&format!("__inline{}_{}", self.prefix, param.name.name));
            renames.insert(param.name.name, fresh_name);
            let arg = self.rewrite_expr(arg);
            stmts.push(Stmt {
                id: self.fresh(),
                span: arg.span,
                kind: StmtKind::Let(LetStmt {
                    name: Ident::new(fresh_name, param.name.span),
                    mutable: false,
                    ty: param.ty.clone(),
                    init: Some(arg),
                }),
            });
        }
        let body = self.rename_expr(&closure.body, &renames);
        stmts.push(Stmt {
            id: self.fresh(),
            span: body.span,
            kind: StmtKind::Expr(body),
        });

        Some(Expr {
            id: self.fresh(),
            span,
            kind: ExprKind::Block(Block {
                id: self.fresh(),
                stmts,
                span,
            }),
        })
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Expr {
        if let ExprKind::Call(call) = &expr.kind {
            if let Some(expanded) = self.expand_closure_call(call, expr.span) {
                return expanded;
            }
        }
        let kind = match &expr.kind {
            ExprKind::Literal(l) => ExprKind::Literal(l.clone()),
            ExprKind::Path(p) => ExprKind::Path(p.clone()),
            ExprKind::Binary(b) => ExprKind::Binary(pyritec_ast::BinaryExpr {
                op: b.op,
                lhs: Box::new(self.rewrite_expr(&b.lhs)),
                rhs: Box::new(self.rewrite_expr(&b.rhs)),
            }),
            ExprKind::Unary(u) => ExprKind::Unary(pyritec_ast::UnaryExpr {
                op: u.op,
                operand: Box::new(self.rewrite_expr(&u.operand)),
            }),
            ExprKind::Reference(r) => ExprKind::Reference(pyritec_ast::ReferenceExpr {
                mutable: r.mutable,
                operand: Box::new(self.rewrite_expr(&r.operand)),
            }),
            ExprKind::Call(c) => ExprKind::Call(pyritec_ast::CallExpr {
                callee: Box::new(self.rewrite_expr(&c.callee)),
                ty_args: c.ty_args.clone(),
                const_args: c.const_args.iter().map(|a| self.rewrite_expr(a)).collect(),
                args: c.args.iter().map(|a| self.rewrite_expr(a)).collect(),
            }),
            ExprKind::MethodCall(c) => ExprKind::MethodCall(pyritec_ast::MethodCallExpr {
                receiver: Box::new(self.rewrite_expr(&c.receiver)),
                method: c.method,
                ty_args: c.ty_args.clone(),
                args: c.args.iter().map(|a| self.rewrite_expr(a)).collect(),
            }),
            ExprKind::FieldAccess(f) => ExprKind::FieldAccess(pyritec_ast::FieldAccessExpr {
                object: Box::new(self.rewrite_expr(&f.object)),
                field: f.field,
            }),
            ExprKind::Index(i) => ExprKind::Index(pyritec_ast::IndexExpr {
                object: Box::new(self.rewrite_expr(&i.object)),
                index: Box::new(self.rewrite_expr(&i.index)),
            }),
            ExprKind::Block(b) => ExprKind::Block(self.rewrite_block(b)),
            ExprKind::If(i) => ExprKind::If(pyritec_ast::IfExpr {
                cond: Box::new(self.rewrite_expr(&i.cond)),
                then_block: self.rewrite_block(&i.then_block),
                else_branch: i.else_branch.as_ref().map(|e| Box::new(self.rewrite_expr(e))),
            }),
            ExprKind::Match(m) => ExprKind::Match(pyritec_ast::MatchExpr {
                scrutinee: Box::new(self.rewrite_expr(&m.scrutinee)),
                arms: m
                    .arms
                    .iter()
                    .map(|arm| pyritec_ast::MatchArm {
                        pattern: arm.pattern.clone(),
                        guard: arm.guard.as_ref().map(|g| self.rewrite_expr(g)),
                        body: self.rewrite_block(&arm.body),
                        span: arm.span,
                    })
                    .collect(),
            }),
            ExprKind::Closure(c) => ExprKind::Closure(ClosureExpr {
                params: c.params.clone(),
                body: Box::new(self.rewrite_expr(&c.body)),
                is_move: c.is_move,
            }),
            ExprKind::Assign(a) => ExprKind::Assign(pyritec_ast::AssignExpr {
                place: Box::new(self.rewrite_expr(&a.place)),
                value: Box::new(self.rewrite_expr(&a.value)),
            }),
            ExprKind::CompoundAssign(a) => {
                ExprKind::CompoundAssign(pyritec_ast::CompoundAssignExpr {
                    op: a.op,
                    place: Box::new(self.rewrite_expr(&a.place)),
                    value: Box::new(self.rewrite_expr(&a.value)),
                })
            }
            ExprKind::Try(inner) => ExprKind::Try(Box::new(self.rewrite_expr(inner))),
            ExprKind::Return(inner) => {
                ExprKind::Return(inner.as_ref().map(|e| Box::new(self.rewrite_expr(e))))
            }
            ExprKind::Break => ExprKind::Break,
            ExprKind::Continue => ExprKind::Continue,
            ExprKind::Tuple(elems) => {
                ExprKind::Tuple(elems.iter().map(|e| self.rewrite_expr(e)).collect())
            }
            ExprKind::Array(elems) => {
                ExprKind::Array(elems.iter().map(|e| self.rewrite_expr(e)).collect())
            }
            ExprKind::Range(r) => ExprKind::Range(pyritec_ast::RangeExpr {
                lo: Box::new(self.rewrite_expr(&r.lo)),
                hi: Box::new(self.rewrite_expr(&r.hi)),
            }),
            ExprKind::Cast(c) => ExprKind::Cast(pyritec_ast::CastExpr {
                expr: Box::new(self.rewrite_expr(&c.expr)),
                ty: c.ty.clone(),
            }),
            ExprKind::StructLiteral(lit) => {
                ExprKind::StructLiteral(pyritec_ast::StructLiteralExpr {
                    name: lit.name,
                    ty_args: lit.ty_args.clone(),
                    fields: lit
                        .fields
                        .iter()
                        .map(|(n, v)| (*n, self.rewrite_expr(v)))
                        .collect(),
                })
            }
            ExprKind::EnumVariant(v) => ExprKind::EnumVariant(pyritec_ast::EnumVariantExpr {
                enum_name: v.enum_name,
                variant: v.variant,
                ty_args: v.ty_args.clone(),
                args: v.args.iter().map(|a| self.rewrite_expr(a)).collect(),
            }),
        };
        Expr {
            id: self.fresh(),
            span: expr.span,
            kind,
        }
    }

    /// Clone an expression with fresh ids, renaming closure parameters
    fn rename_expr(&mut self, expr: &Expr, renames: &FxHashMap<Symbol, Symbol>) -> Expr {
        match &expr.kind {
            ExprKind::Path(path) if path.is_ident() => {
                let name = path.last();
                let kind = match renames.get(&name.name) {
                    Some(renamed) => {
                        ExprKind::Path(Path::ident(Ident::new(*renamed, name.span)))
                    }
                    None => ExprKind::Path(path.clone()),
                };
                Expr {
                    id: self.fresh(),
                    span: expr.span,
                    kind,
                }
            }
            _ => {
                // Rewrite structurally, then fix up nested paths
                let rewritten = self.rewrite_expr(expr);
                rename_in_place(rewritten, renames)
            }
        }
    }
}

/// Post-pass renaming for nested paths produced by `rewrite_expr`
fn rename_in_place(mut expr: Expr, renames: &FxHashMap<Symbol, Symbol>) -> Expr {
    fn walk(expr: &mut Expr, renames: &FxHashMap<Symbol, Symbol>) {
        if let ExprKind::Path(path) = &mut expr.kind {
            if path.is_ident() {
                let name = path.segments[0];
                if let Some(renamed) = renames.get(&name.name) {
                    path.segments[0] = Ident::new(*renamed, name.span);
                }
            }
            return;
        }
        match &mut expr.kind {
            ExprKind::Binary(b) => {
                walk(&mut b.lhs, renames);
                walk(&mut b.rhs, renames);
            }
            ExprKind::Unary(u) => walk(&mut u.operand, renames),
            ExprKind::Reference(r) => walk(&mut r.operand, renames),
            ExprKind::Call(c) => {
                walk(&mut c.callee, renames);
                for a in c.const_args.iter_mut().chain(c.args.iter_mut()) {
                    walk(a, renames);
                }
            }
            ExprKind::MethodCall(c) => {
                walk(&mut c.receiver, renames);
                for a in &mut c.args {
                    walk(a, renames);
                }
            }
            ExprKind::FieldAccess(f) => walk(&mut f.object, renames),
            ExprKind::Index(i) => {
                walk(&mut i.object, renames);
                walk(&mut i.index, renames);
            }
            ExprKind::Block(b) => walk_block(b, renames),
            ExprKind::If(i) => {
                walk(&mut i.cond, renames);
                walk_block(&mut i.then_block, renames);
                if let Some(e) = &mut i.else_branch {
                    walk(e, renames);
                }
            }
            ExprKind::Match(m) => {
                walk(&mut m.scrutinee, renames);
                for arm in &mut m.arms {
                    if let Some(g) = &mut arm.guard {
                        walk(g, renames);
                    }
                    walk_block(&mut arm.body, renames);
                }
            }
            ExprKind::Closure(c) => walk(&mut c.body, renames),
            ExprKind::Assign(a) => {
                walk(&mut a.place, renames);
                walk(&mut a.value, renames);
            }
            ExprKind::CompoundAssign(a) => {
                walk(&mut a.place, renames);
                walk(&mut a.value, renames);
            }
            ExprKind::Try(inner) => walk(inner, renames),
            ExprKind::Return(Some(inner)) => walk(inner, renames),
            ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
                for e in elems {
                    walk(e, renames);
                }
            }
            ExprKind::Range(r) => {
                walk(&mut r.lo, renames);
                walk(&mut r.hi, renames);
            }
            ExprKind::Cast(c) => walk(&mut c.expr, renames),
            ExprKind::StructLiteral(lit) => {
                for (_, v) in &mut lit.fields {
                    walk(v, renames);
                }
            }
            ExprKind::EnumVariant(v) => {
                for a in &mut v.args {
                    walk(a, renames);
                }
            }
            _ => {}
        }
    }

    fn walk_block(block: &mut Block, renames: &FxHashMap<Symbol, Symbol>) {
        for stmt in &mut block.stmts {
            match &mut stmt.kind {
                StmtKind::Let(l) => {
                    if let Some(init) = &mut l.init {
                        walk(init, renames);
                    }
                }
                StmtKind::Expr(e) => walk(e, renames),
                StmtKind::While(w) => {
                    walk(&mut w.cond, renames);
                    walk_block(&mut w.body, renames);
                }
                StmtKind::For(f) => {
                    walk(&mut f.iter, renames);
                    walk_block(&mut f.body, renames);
                }
                StmtKind::With(w) => {
                    walk(&mut w.init, renames);
                    walk_block(&mut w.body, renames);
                }
                StmtKind::Defer(d) => walk_block(&mut d.body, renames),
                StmtKind::Unsafe(b) => walk_block(b, renames),
            }
        }
    }

    walk(&mut expr, renames);
    expr
}

// ============================================================================
// RUNTIME CLOSURE LAYOUTS
// ============================================================================

/// Assign environment layouts to every closure not consumed by inlining
fn assign_runtime_layouts(ctx: &mut Context<'_>, program: &Program, consumed: &FxHashSet<NodeId>) {
    let mut collector = LayoutCollector {
        layouts: Vec::new(),
        consumed,
        next: 0,
    };
    for item in &program.items {
        match item {
            Item::Fn(func) => {
                if let Some(body) = &func.body {
                    collector.visit_block(ctx, body);
                }
            }
            Item::Impl(imp) => {
                for method in &imp.methods {
                    if let Some(body) = &method.body {
                        collector.visit_block(ctx, body);
                    }
                }
            }
            _ => {}
        }
    }
    ctx.closure_layouts.extend(collector.layouts);
}

struct LayoutCollector<'s> {
    layouts: Vec<ClosureLayout>,
    consumed: &'s FxHashSet<NodeId>,
    next: u32,
}

impl LayoutCollector<'_> {
    fn visit_block(&mut self, ctx: &Context<'_>, block: &Block) {
        for stmt in &block.stmts {
            self.visit_stmt(ctx, stmt);
        }
    }

    fn visit_stmt(&mut self, ctx: &Context<'_>, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let(l) => {
                if let Some(init) = &l.init {
                    self.visit_expr(ctx, init);
                }
            }
            StmtKind::Expr(e) => self.visit_expr(ctx, e),
            StmtKind::While(w) => {
                self.visit_expr(ctx, &w.cond);
                self.visit_block(ctx, &w.body);
            }
            StmtKind::For(f) => {
                self.visit_expr(ctx, &f.iter);
                self.visit_block(ctx, &f.body);
            }
            StmtKind::With(w) => {
                self.visit_expr(ctx, &w.init);
                self.visit_block(ctx, &w.body);
            }
            StmtKind::Defer(d) => self.visit_block(ctx, &d.body),
            StmtKind::Unsafe(b) => self.visit_block(ctx, b),
        }
    }

    fn visit_expr(&mut self, ctx: &Context<'_>, expr: &Expr) {
        if let ExprKind::Closure(closure) = &expr.kind {
            if !self.consumed.contains(&expr.id) {
                let captures = closure_captures(ctx, closure);
                let n = self.next;
                self.next += 1;
                self.layouts.push(ClosureLayout {
                    symbol: Symbol::intern(&format!("__closure_{n}")),
                    closure_node: expr.id,
                    fn_ptr_only: captures.is_empty(),
                    captures,
                });
            }
            self.visit_expr(ctx, &closure.body);
            return;
        }
        match &expr.kind {
            ExprKind::Binary(b) => {
                self.visit_expr(ctx, &b.lhs);
                self.visit_expr(ctx, &b.rhs);
            }
            ExprKind::Unary(u) => self.visit_expr(ctx, &u.operand),
            ExprKind::Reference(r) => self.visit_expr(ctx, &r.operand),
            ExprKind::Call(c) => {
                self.visit_expr(ctx, &c.callee);
                for a in c.const_args.iter().chain(c.args.iter()) {
                    self.visit_expr(ctx, a);
                }
            }
            ExprKind::MethodCall(c) => {
                self.visit_expr(ctx, &c.receiver);
                for a in &c.args {
                    self.visit_expr(ctx, a);
                }
            }
            ExprKind::FieldAccess(f) => self.visit_expr(ctx, &f.object),
            ExprKind::Index(i) => {
                self.visit_expr(ctx, &i.object);
                self.visit_expr(ctx, &i.index);
            }
            ExprKind::Block(b) => self.visit_block(ctx, b),
            ExprKind::If(i) => {
                self.visit_expr(ctx, &i.cond);
                self.visit_block(ctx, &i.then_block);
                if let Some(e) = &i.else_branch {
                    self.visit_expr(ctx, e);
                }
            }
            ExprKind::Match(m) => {
                self.visit_expr(ctx, &m.scrutinee);
                for arm in &m.arms {
                    if let Some(g) = &arm.guard {
                        self.visit_expr(ctx, g);
                    }
                    self.visit_block(ctx, &arm.body);
                }
            }
            ExprKind::Assign(a) => {
                self.visit_expr(ctx, &a.place);
                self.visit_expr(ctx, &a.value);
            }
            ExprKind::CompoundAssign(a) => {
                self.visit_expr(ctx, &a.place);
                self.visit_expr(ctx, &a.value);
            }
            ExprKind::Try(inner) => self.visit_expr(ctx, inner),
            ExprKind::Return(Some(inner)) => self.visit_expr(ctx, inner),
            ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
                for e in elems {
                    self.visit_expr(ctx, e);
                }
            }
            ExprKind::Range(r) => {
                self.visit_expr(ctx, &r.lo);
                self.visit_expr(ctx, &r.hi);
            }
            ExprKind::Cast(c) => self.visit_expr(ctx, &c.expr),
            ExprKind::StructLiteral(lit) => {
                for (_, v) in &lit.fields {
                    self.visit_expr(ctx, v);
                }
            }
            ExprKind::EnumVariant(v) => {
                for a in &v.args {
                    self.visit_expr(ctx, a);
                }
            }
            _ => {}
        }
    }
}

/// Captured bindings in source appearance order
///
/// A capture is a free variable of the body: a path resolving to a `Value`
/// binding declared outside the closure (parameters and body-locals resolve
/// to defs introduced inside it).
fn closure_captures(ctx: &Context<'_>, closure: &ClosureExpr) -> Vec<(Symbol, TyId)> {
    // Defs introduced by the closure itself
    let mut bound: FxHashSet<DefId> = FxHashSet::default();
    for param in &closure.params {
        if let Some(def) = ctx.node_def(param.id) {
            bound.insert(def);
        }
    }
    collect_bound_defs(ctx, &closure.body, &mut bound);

    let mut seen: FxHashSet<DefId> = FxHashSet::default();
    let mut captures = Vec::new();
    collect_captures(ctx, &closure.body, &bound, &mut seen, &mut captures);
    captures
}

fn collect_bound_defs(ctx: &Context<'_>, expr: &Expr, out: &mut FxHashSet<DefId>) {
    match &expr.kind {
        ExprKind::Block(b) => {
            for stmt in &b.stmts {
                if let StmtKind::Let(_) = &stmt.kind {
                    if let Some(def) = ctx.node_def(stmt.id) {
                        out.insert(def);
                    }
                }
                if let StmtKind::Expr(e) = &stmt.kind {
                    collect_bound_defs(ctx, e, out);
                }
            }
        }
        ExprKind::If(i) => {
            collect_bound_defs_block(ctx, &i.then_block, out);
            if let Some(e) = &i.else_branch {
                collect_bound_defs(ctx, e, out);
            }
        }
        _ => {}
    }
}

fn collect_bound_defs_block(ctx: &Context<'_>, block: &Block, out: &mut FxHashSet<DefId>) {
    for stmt in &block.stmts {
        if let StmtKind::Let(_) = &stmt.kind {
            if let Some(def) = ctx.node_def(stmt.id) {
                out.insert(def);
            }
        }
    }
}

fn collect_captures(
    ctx: &Context<'_>,
    expr: &Expr,
    bound: &FxHashSet<DefId>,
    seen: &mut FxHashSet<DefId>,
    out: &mut Vec<(Symbol, TyId)>,
) {
    if let ExprKind::Path(path) = &expr.kind {
        if path.is_ident() {
            if let Some(def) = ctx.node_def(expr.id) {
                if !bound.contains(&def)
                    && matches!(ctx.symbols.symbol(def).kind, SymbolKind::Value { .. })
                    && seen.insert(def)
                {
                    let ty = ctx
                        .def_types
                        .get(&def)
                        .copied()
                        .unwrap_or(ctx.types.common.error);
                    out.push((ctx.symbols.symbol(def).name, ty));
                }
            }
        }
        return;
    }
    match &expr.kind {
        ExprKind::Binary(b) => {
            collect_captures(ctx, &b.lhs, bound, seen, out);
            collect_captures(ctx, &b.rhs, bound, seen, out);
        }
        ExprKind::Unary(u) => collect_captures(ctx, &u.operand, bound, seen, out),
        ExprKind::Reference(r) => collect_captures(ctx, &r.operand, bound, seen, out),
        ExprKind::Call(c) => {
            collect_captures(ctx, &c.callee, bound, seen, out);
            for a in c.const_args.iter().chain(c.args.iter()) {
                collect_captures(ctx, a, bound, seen, out);
            }
        }
        ExprKind::MethodCall(c) => {
            collect_captures(ctx, &c.receiver, bound, seen, out);
            for a in &c.args {
                collect_captures(ctx, a, bound, seen, out);
            }
        }
        ExprKind::FieldAccess(f) => collect_captures(ctx, &f.object, bound, seen, out),
        ExprKind::Index(i) => {
            collect_captures(ctx, &i.object, bound, seen, out);
            collect_captures(ctx, &i.index, bound, seen, out);
        }
        ExprKind::Block(b) => {
            for stmt in &b.stmts {
                match &stmt.kind {
                    StmtKind::Let(l) => {
                        if let Some(init) = &l.init {
                            collect_captures(ctx, init, bound, seen, out);
                        }
                    }
                    StmtKind::Expr(e) => collect_captures(ctx, e, bound, seen, out),
                    StmtKind::While(w) => {
                        collect_captures(ctx, &w.cond, bound, seen, out);
                        for s in &w.body.stmts {
                            if let StmtKind::Expr(e) = &s.kind {
                                collect_captures(ctx, e, bound, seen, out);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        ExprKind::If(i) => {
            collect_captures(ctx, &i.cond, bound, seen, out);
            for stmt in &i.then_block.stmts {
                if let StmtKind::Expr(e) = &stmt.kind {
                    collect_captures(ctx, e, bound, seen, out);
                }
            }
            if let Some(e) = &i.else_branch {
                collect_captures(ctx, e, bound, seen, out);
            }
        }
        ExprKind::Try(inner) => collect_captures(ctx, inner, bound, seen, out),
        ExprKind::Return(Some(inner)) => collect_captures(ctx, inner, bound, seen, out),
        ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
            for e in elems {
                collect_captures(ctx, e, bound, seen, out);
            }
        }
        ExprKind::Cast(c) => collect_captures(ctx, &c.expr, bound, seen, out),
        ExprKind::StructLiteral(lit) => {
            for (_, v) in &lit.fields {
                collect_captures(ctx, v, bound, seen, out);
            }
        }
        ExprKind::EnumVariant(v) => {
            for a in &v.args {
                collect_captures(ctx, a, bound, seen, out);
            }
        }
        _ => {}
    }
}
