//! Cost analysis: allocation sites and implicit copies.
//!
//! When `track_costs` is on, this pass walks checked function bodies and
//! records where heap allocations happen (container constructors, string
//! concatenation, heap-owning struct literals) and where large values copy
//! implicitly (by-value passing of wide `Copy` types). With `warn_costs` the
//! records also surface as `P10xx` advisories: allocation inside a loop and
//! large implicit copy. Advisories never affect compilation.

use crate::context::Context;
use crate::layout::{is_heap_allocated, layout_of};
use crate::ty::TyKind;
use pyritec_ast::{Block, Expr, ExprKind, Item, Program, Stmt, StmtKind};
use pyritec_util::symbol::sym;
use pyritec_util::{DiagnosticCode, Span, Symbol};

/// Copies wider than this are worth an advisory
const LARGE_COPY_BYTES: u64 = 128;

/// What a cost record describes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CostKind {
    /// A heap allocation of the named type
    Allocation { type_name: String },
    /// An implicit by-value copy of the named type
    ImplicitCopy { type_name: String },
}

/// One per-statement cost record
#[derive(Clone, Debug)]
pub struct CostRecord {
    /// Enclosing function
    pub function: Symbol,
    pub span: Span,
    /// Estimated bytes involved
    pub bytes: u64,
    pub kind: CostKind,
}

/// Run the cost analysis over a checked program
pub fn analyze_costs(ctx: &mut Context<'_>, program: &Program) {
    if !ctx.flags.track_costs {
        return;
    }
    for item in &program.items {
        if let Item::Fn(func) = item {
            if let Some(body) = &func.body {
                let mut analyzer = CostAnalyzer {
                    ctx,
                    function: func.name.name,
                    loop_depth: 0,
                };
                analyzer.walk_block(body);
            }
        }
    }
}

struct CostAnalyzer<'c, 'a> {
    ctx: &'c mut Context<'a>,
    function: Symbol,
    loop_depth: u32,
}

impl CostAnalyzer<'_, '_> {
    fn walk_block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let(let_stmt) => {
                if let Some(init) = &let_stmt.init {
                    self.walk_expr(init);
                }
            }
            StmtKind::Expr(expr) => self.walk_expr(expr),
            StmtKind::While(w) => {
                self.walk_expr(&w.cond);
                self.loop_depth += 1;
                self.walk_block(&w.body);
                self.loop_depth -= 1;
            }
            StmtKind::For(f) => {
                self.walk_expr(&f.iter);
                self.loop_depth += 1;
                self.walk_block(&f.body);
                self.loop_depth -= 1;
            }
            StmtKind::With(w) => {
                self.walk_expr(&w.init);
                self.walk_block(&w.body);
            }
            StmtKind::Defer(d) => self.walk_block(&d.body),
            StmtKind::Unsafe(b) => self.walk_block(b),
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::MethodCall(call) => {
                self.walk_expr(&call.receiver);
                for arg in &call.args {
                    self.walk_expr(arg);
                    self.check_implicit_copy(arg);
                }
                if call.method.name == sym::NEW {
                    self.check_allocation(expr);
                }
            }
            ExprKind::Call(call) => {
                self.walk_expr(&call.callee);
                for arg in &call.args {
                    self.walk_expr(arg);
                    self.check_implicit_copy(arg);
                }
            }
            ExprKind::StructLiteral(lit) => {
                for (_, value) in &lit.fields {
                    self.walk_expr(value);
                }
                self.check_allocation(expr);
            }
            ExprKind::Binary(bin) => {
                self.walk_expr(&bin.lhs);
                self.walk_expr(&bin.rhs);
                // String concatenation allocates a fresh string
                if let Some(ty) = self.ctx.node_type(expr.id) {
                    if matches!(self.ctx.types.kind(ty), TyKind::Str) {
                        self.record_allocation(expr, ty);
                    }
                }
            }
            ExprKind::Unary(u) => self.walk_expr(&u.operand),
            ExprKind::Reference(r) => self.walk_expr(&r.operand),
            ExprKind::FieldAccess(f) => self.walk_expr(&f.object),
            ExprKind::Index(i) => {
                self.walk_expr(&i.object);
                self.walk_expr(&i.index);
            }
            ExprKind::Block(b) => self.walk_block(b),
            ExprKind::If(i) => {
                self.walk_expr(&i.cond);
                self.walk_block(&i.then_block);
                if let Some(e) = &i.else_branch {
                    self.walk_expr(e);
                }
            }
            ExprKind::Match(m) => {
                self.walk_expr(&m.scrutinee);
                for arm in &m.arms {
                    if let Some(g) = &arm.guard {
                        self.walk_expr(g);
                    }
                    self.walk_block(&arm.body);
                }
            }
            ExprKind::Closure(c) => self.walk_expr(&c.body),
            ExprKind::Assign(a) => {
                self.walk_expr(&a.place);
                self.walk_expr(&a.value);
                self.check_implicit_copy(&a.value);
            }
            ExprKind::CompoundAssign(a) => {
                self.walk_expr(&a.place);
                self.walk_expr(&a.value);
            }
            ExprKind::Try(inner) => self.walk_expr(inner),
            ExprKind::Return(Some(inner)) => self.walk_expr(inner),
            ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
                for e in elems {
                    self.walk_expr(e);
                }
            }
            ExprKind::Range(r) => {
                self.walk_expr(&r.lo);
                self.walk_expr(&r.hi);
            }
            ExprKind::Cast(c) => self.walk_expr(&c.expr),
            ExprKind::EnumVariant(v) => {
                for arg in &v.args {
                    self.walk_expr(arg);
                }
            }
            ExprKind::Literal(_)
            | ExprKind::Path(_)
            | ExprKind::Return(None)
            | ExprKind::Break
            | ExprKind::Continue => {}
        }
    }

    /// Record an allocation if the expression produces a heap-owning value
    fn check_allocation(&mut self, expr: &Expr) {
        let Some(ty) = self.ctx.node_type(expr.id) else {
            return;
        };
        if is_heap_allocated(ty, &self.ctx.types, &self.ctx.symbols) {
            self.record_allocation(expr, ty);
        }
    }

    fn record_allocation(&mut self, expr: &Expr, ty: crate::ty::TyId) {
        let layout = layout_of(ty, &self.ctx.types, &self.ctx.symbols);
        let type_name = self.ctx.types.display(ty, &self.ctx.symbols);
        self.ctx.costs.push(CostRecord {
            function: self.function,
            span: expr.span,
            bytes: layout.stack_bytes + layout.heap_bytes,
            kind: CostKind::Allocation {
                type_name: type_name.clone(),
            },
        });
        if self.loop_depth > 0 {
            self.ctx
                .diag
                .build_warning(
                    DiagnosticCode::ALLOC_IN_LOOP,
                    expr.span,
                    format!("allocation of `{type_name}` inside a loop"),
                )
                .help("hoist the allocation out of the loop or reuse a buffer")
                .emit(&self.ctx.diag);
        }
    }

    /// Record an advisory for wide by-value copies
    fn check_implicit_copy(&mut self, arg: &Expr) {
        let Some(ty) = self.ctx.node_type(arg.id) else {
            return;
        };
        if !self.ctx.types.is_copy(ty, &self.ctx.symbols) {
            return;
        }
        let layout = layout_of(ty, &self.ctx.types, &self.ctx.symbols);
        if layout.stack_bytes <= LARGE_COPY_BYTES {
            return;
        }
        let type_name = self.ctx.types.display(ty, &self.ctx.symbols);
        self.ctx.costs.push(CostRecord {
            function: self.function,
            span: arg.span,
            bytes: layout.stack_bytes,
            kind: CostKind::ImplicitCopy {
                type_name: type_name.clone(),
            },
        });
        self.ctx
            .diag
            .build_warning(
                DiagnosticCode::LARGE_IMPLICIT_COPY,
                arg.span,
                format!(
                    "implicit copy of `{type_name}` ({} bytes)",
                    layout.stack_bytes
                ),
            )
            .help("pass by reference to avoid the copy")
            .emit(&self.ctx.diag);
    }
}
