//! Early desugaring: `with`, `try`, and `defer` ordering.
//!
//! ============================================================================
//! DESUGAR PIPELINE
//! ============================================================================
//!
//! Three mandatory rewrites, in order:
//!
//! 1. `with x = init: body` becomes
//!    `let x = init; defer { x.close() }; body...`
//!    spliced into the enclosing block. The initializer's type must
//!    implement `Closeable` (a single `close(&mut self)` method); the pass
//!    records a close obligation carrying the `with` span so the checker
//!    reports a failure against the `with` form, never the expansion.
//!
//! 2. `try` inside `with` initializers stays a `try`; only the `with` form
//!    expands here. The checker gives `try` its meaning.
//!
//! 3. Every `defer` in a lexical scope is tagged with a monotonically
//!    increasing index. Code generation runs them in reverse (LIFO) on every
//!    normal and abrupt exit path.
//!
//! The rewrite preserves source spans: the synthesized `let` keeps the
//! `with` statement's node id and span, so post-desugar diagnostics still
//! point at user-written syntax. Running the pass on an already-desugared
//! tree changes nothing.

use crate::context::Context;
use pyritec_ast::{
    Block, DeferStmt, Expr, ExprKind, LetStmt, MethodCallExpr, NodeId, Path, Stmt, StmtKind,
};
use pyritec_util::symbol::sym;
use pyritec_util::{Span, Symbol};

/// A `with` initializer whose type must prove `Closeable`
#[derive(Clone, Debug)]
pub struct CloseObligation {
    /// The bound variable
    pub var: Symbol,
    /// The binding definition, when resolution succeeded
    pub binding_def: Option<crate::symbols::DefId>,
    /// The initializer expression node
    pub init_node: NodeId,
    /// The synthesized `close()` call, tainted if the obligation fails
    pub close_call: NodeId,
    /// The original `with` form's span; failures attach here
    pub with_span: Span,
}

/// Run the desugar pipeline over a program
pub fn desugar(ctx: &mut Context<'_>, program: pyritec_ast::Program) -> pyritec_ast::Program {
    let items = program
        .items
        .into_iter()
        .map(|item| match item {
            pyritec_ast::Item::Fn(mut func) => {
                func.body = func.body.map(|b| desugar_block(ctx, b));
                pyritec_ast::Item::Fn(func)
            }
            pyritec_ast::Item::Impl(mut imp) => {
                imp.methods = imp
                    .methods
                    .into_iter()
                    .map(|mut m| {
                        m.body = m.body.map(|b| desugar_block(ctx, b));
                        m
                    })
                    .collect();
                pyritec_ast::Item::Impl(imp)
            }
            other => other,
        })
        .collect();
    pyritec_ast::Program { items }
}

fn desugar_block(ctx: &mut Context<'_>, block: Block) -> Block {
    let mut stmts = Vec::with_capacity(block.stmts.len());
    let mut defer_index = 0u32;
    for stmt in block.stmts {
        desugar_stmt(ctx, stmt, &mut stmts, &mut defer_index);
    }
    Block {
        id: block.id,
        stmts,
        span: block.span,
    }
}

fn desugar_stmt(ctx: &mut Context<'_>, stmt: Stmt, out: &mut Vec<Stmt>, defer_index: &mut u32) {
    match stmt.kind {
        StmtKind::With(with) => {
            let var = with.name;
            let binding_def = ctx.node_def(stmt.id);
            let init_node = with.init.id;

            // let x = init  -- keeps the with statement's id and span
            out.push(Stmt {
                id: stmt.id,
                span: stmt.span,
                kind: StmtKind::Let(LetStmt {
                    name: var,
                    mutable: true,
                    ty: None,
                    init: Some(desugar_expr(ctx, with.init)),
                }),
            });

            // defer { x.close() }
            let receiver_id = ctx.ids.fresh();
            let close_id = ctx.ids.fresh();
            let close_stmt_id = ctx.ids.fresh();
            let defer_block_id = ctx.ids.fresh();
            let defer_stmt_id = ctx.ids.fresh();
            if let Some(def) = binding_def {
                ctx.set_node_def(receiver_id, def);
            }
            let close_call = Expr {
                id: close_id,
                span: stmt.span,
                kind: ExprKind::MethodCall(MethodCallExpr {
                    receiver: Box::new(Expr {
                        id: receiver_id,
                        span: var.span,
                        kind: ExprKind::Path(Path::ident(var)),
                    }),
                    method: pyritec_ast::Ident::new(sym::CLOSE, stmt.span),
                    ty_args: Vec::new(),
                    args: Vec::new(),
                }),
            };
            ctx.close_obligations.push(CloseObligation {
                var: var.name,
                binding_def,
                init_node,
                close_call: close_id,
                with_span: stmt.span,
            });
            let defer_stmt = Stmt {
                id: defer_stmt_id,
                span: stmt.span,
                kind: StmtKind::Defer(DeferStmt {
                    body: Block {
                        id: defer_block_id,
                        stmts: vec![Stmt {
                            id: close_stmt_id,
                            span: stmt.span,
                            kind: StmtKind::Expr(close_call),
                        }],
                        span: stmt.span,
                    },
                }),
            };
            ctx.defer_order.insert(defer_stmt_id, *defer_index);
            *defer_index += 1;
            out.push(defer_stmt);

            // The body statements splice into the enclosing block
            let body = desugar_block(ctx, with.body);
            for body_stmt in body.stmts {
                // Already desugared; only the defer counter continues
                if let StmtKind::Defer(_) = body_stmt.kind {
                    ctx.defer_order.insert(body_stmt.id, *defer_index);
                    *defer_index += 1;
                }
                out.push(body_stmt);
            }
        }
        StmtKind::Defer(defer) => {
            ctx.defer_order.insert(stmt.id, *defer_index);
            *defer_index += 1;
            out.push(Stmt {
                id: stmt.id,
                span: stmt.span,
                kind: StmtKind::Defer(DeferStmt {
                    body: desugar_block(ctx, defer.body),
                }),
            });
        }
        StmtKind::Let(let_stmt) => {
            out.push(Stmt {
                id: stmt.id,
                span: stmt.span,
                kind: StmtKind::Let(LetStmt {
                    init: let_stmt.init.map(|e| desugar_expr(ctx, e)),
                    ..let_stmt
                }),
            });
        }
        StmtKind::Expr(expr) => {
            out.push(Stmt {
                id: stmt.id,
                span: stmt.span,
                kind: StmtKind::Expr(desugar_expr(ctx, expr)),
            });
        }
        StmtKind::While(mut w) => {
            w.cond = desugar_expr(ctx, w.cond);
            w.body = desugar_block(ctx, w.body);
            out.push(Stmt {
                id: stmt.id,
                span: stmt.span,
                kind: StmtKind::While(w),
            });
        }
        StmtKind::For(mut f) => {
            f.iter = desugar_expr(ctx, f.iter);
            f.body = desugar_block(ctx, f.body);
            out.push(Stmt {
                id: stmt.id,
                span: stmt.span,
                kind: StmtKind::For(f),
            });
        }
        StmtKind::Unsafe(block) => {
            out.push(Stmt {
                id: stmt.id,
                span: stmt.span,
                kind: StmtKind::Unsafe(desugar_block(ctx, block)),
            });
        }
    }
}

fn desugar_expr(ctx: &mut Context<'_>, expr: Expr) -> Expr {
    let kind = match expr.kind {
        ExprKind::Block(b) => ExprKind::Block(desugar_block(ctx, b)),
        ExprKind::If(mut i) => {
            i.cond = Box::new(desugar_expr(ctx, *i.cond));
            i.then_block = desugar_block(ctx, i.then_block);
            i.else_branch = i.else_branch.map(|e| Box::new(desugar_expr(ctx, *e)));
            ExprKind::If(i)
        }
        ExprKind::Match(mut m) => {
            m.scrutinee = Box::new(desugar_expr(ctx, *m.scrutinee));
            m.arms = m
                .arms
                .into_iter()
                .map(|mut arm| {
                    arm.guard = arm.guard.map(|g| desugar_expr(ctx, g));
                    arm.body = desugar_block(ctx, arm.body);
                    arm
                })
                .collect();
            ExprKind::Match(m)
        }
        ExprKind::Closure(mut c) => {
            c.body = Box::new(desugar_expr(ctx, *c.body));
            ExprKind::Closure(c)
        }
        ExprKind::Binary(mut b) => {
            b.lhs = Box::new(desugar_expr(ctx, *b.lhs));
            b.rhs = Box::new(desugar_expr(ctx, *b.rhs));
            ExprKind::Binary(b)
        }
        ExprKind::Unary(mut u) => {
            u.operand = Box::new(desugar_expr(ctx, *u.operand));
            ExprKind::Unary(u)
        }
        ExprKind::Reference(mut r) => {
            r.operand = Box::new(desugar_expr(ctx, *r.operand));
            ExprKind::Reference(r)
        }
        ExprKind::Call(mut call) => {
            call.callee = Box::new(desugar_expr(ctx, *call.callee));
            call.const_args = call
                .const_args
                .into_iter()
                .map(|a| desugar_expr(ctx, a))
                .collect();
            call.args = call.args.into_iter().map(|a| desugar_expr(ctx, a)).collect();
            ExprKind::Call(call)
        }
        ExprKind::MethodCall(mut call) => {
            call.receiver = Box::new(desugar_expr(ctx, *call.receiver));
            call.args = call.args.into_iter().map(|a| desugar_expr(ctx, a)).collect();
            ExprKind::MethodCall(call)
        }
        ExprKind::FieldAccess(mut f) => {
            f.object = Box::new(desugar_expr(ctx, *f.object));
            ExprKind::FieldAccess(f)
        }
        ExprKind::Index(mut i) => {
            i.object = Box::new(desugar_expr(ctx, *i.object));
            i.index = Box::new(desugar_expr(ctx, *i.index));
            ExprKind::Index(i)
        }
        ExprKind::Assign(mut a) => {
            a.place = Box::new(desugar_expr(ctx, *a.place));
            a.value = Box::new(desugar_expr(ctx, *a.value));
            ExprKind::Assign(a)
        }
        ExprKind::CompoundAssign(mut a) => {
            a.place = Box::new(desugar_expr(ctx, *a.place));
            a.value = Box::new(desugar_expr(ctx, *a.value));
            ExprKind::CompoundAssign(a)
        }
        // `try` is preserved; the checker expands its meaning
        ExprKind::Try(inner) => ExprKind::Try(Box::new(desugar_expr(ctx, *inner))),
        ExprKind::Return(inner) => {
            ExprKind::Return(inner.map(|e| Box::new(desugar_expr(ctx, *e))))
        }
        ExprKind::Tuple(elems) => {
            ExprKind::Tuple(elems.into_iter().map(|e| desugar_expr(ctx, e)).collect())
        }
        ExprKind::Array(elems) => {
            ExprKind::Array(elems.into_iter().map(|e| desugar_expr(ctx, e)).collect())
        }
        ExprKind::Range(mut r) => {
            r.lo = Box::new(desugar_expr(ctx, *r.lo));
            r.hi = Box::new(desugar_expr(ctx, *r.hi));
            ExprKind::Range(r)
        }
        ExprKind::Cast(mut c) => {
            c.expr = Box::new(desugar_expr(ctx, *c.expr));
            ExprKind::Cast(c)
        }
        ExprKind::StructLiteral(mut lit) => {
            lit.fields = lit
                .fields
                .into_iter()
                .map(|(name, value)| (name, desugar_expr(ctx, value)))
                .collect();
            ExprKind::StructLiteral(lit)
        }
        ExprKind::EnumVariant(mut v) => {
            v.args = v.args.into_iter().map(|a| desugar_expr(ctx, a)).collect();
            ExprKind::EnumVariant(v)
        }
        other @ (ExprKind::Literal(_)
        | ExprKind::Path(_)
        | ExprKind::Break
        | ExprKind::Continue) => other,
    };
    Expr {
        id: expr.id,
        span: expr.span,
        kind,
    }
}
