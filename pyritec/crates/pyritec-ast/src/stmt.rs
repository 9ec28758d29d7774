//! Statement definitions.

use crate::{Expr, Ident, NodeId, TypeExpr};
use pyritec_util::Span;

/// A statement
#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

/// Statement kinds
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `let x = init` / `var x = init`
    Let(LetStmt),
    /// Bare expression
    Expr(Expr),
    /// `while cond: body`
    While(WhileStmt),
    /// `for x in iter: body`
    For(ForStmt),
    /// `with x = init: body` - removed by the desugar pass
    With(WithStmt),
    /// `defer: body`
    Defer(DeferStmt),
    /// `unsafe: body`
    Unsafe(Block),
}

/// Let binding
#[derive(Debug, Clone)]
pub struct LetStmt {
    pub name: Ident,
    pub mutable: bool,
    pub ty: Option<TypeExpr>,
    pub init: Option<Expr>,
}

/// While loop
#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: Block,
}

/// For loop over a range or iterable
#[derive(Debug, Clone)]
pub struct ForStmt {
    pub var: Ident,
    pub iter: Expr,
    pub body: Block,
}

/// `with x = init: body`
///
/// Present only before desugaring; the desugar pass rewrites it to
/// `let x = init; defer { x.close() }; body...` in the enclosing block.
#[derive(Debug, Clone)]
pub struct WithStmt {
    pub name: Ident,
    pub init: Expr,
    pub body: Block,
}

/// Deferred block, run LIFO on every exit path of the enclosing scope
#[derive(Debug, Clone)]
pub struct DeferStmt {
    pub body: Block,
}

/// A block of statements
#[derive(Debug, Clone)]
pub struct Block {
    pub id: NodeId,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}
