//! Constant expression evaluation.
//!
//! Used for array sizes, compile-time arguments, and `const` declarations.
//! Supports integer literals, `+ - * / %` with two's-complement semantics on
//! the declared width, boolean logic, negation, and previously evaluated
//! named consts. Arithmetic that would exceed the declared width is an
//! overflow failure, not a wrap.

use crate::context::Context;
use crate::symbols::SymbolKind;
use crate::ty::{ConstValue, IntTy};
use pyritec_ast::{BinOp, Expr, ExprKind, Literal, UnOp};
use pyritec_util::Symbol;
use thiserror::Error;

/// Why a constant expression failed to evaluate
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstEvalError {
    #[error("division by zero in constant expression")]
    DivisionByZero,
    #[error("constant arithmetic overflows {0}")]
    Overflow(&'static str),
    #[error("`{0}` is not a constant")]
    NotConstant(Symbol),
    #[error("expression is not usable in a constant")]
    NonConstExpr,
    #[error("operand has the wrong type for this constant operator")]
    TypeError,
}

/// Evaluate a constant expression at the given integer width
pub fn eval_const_expr(
    ctx: &Context<'_>,
    expr: &Expr,
    width: IntTy,
) -> Result<ConstValue, ConstEvalError> {
    match &expr.kind {
        ExprKind::Literal(Literal::Int(n)) => {
            check_width(*n as i128, width)?;
            Ok(ConstValue::Int(*n))
        }
        ExprKind::Literal(Literal::Bool(b)) => Ok(ConstValue::Bool(*b)),
        ExprKind::Path(path) if path.is_ident() => {
            let name = path.last().name;
            let Some(def) = ctx.node_def(expr.id) else {
                return Err(ConstEvalError::NotConstant(name));
            };
            match &ctx.symbols.symbol(def).kind {
                SymbolKind::Const {
                    value: Some(value), ..
                } => Ok(*value),
                // A compile-time parameter stays symbolic inside the
                // generic body; call sites supply the concrete value.
                SymbolKind::ConstParam { .. } => Ok(ConstValue::Param(def)),
                _ => Err(ConstEvalError::NotConstant(name)),
            }
        }
        ExprKind::Unary(unary) => {
            let operand = eval_const_expr(ctx, &unary.operand, width)?;
            match (unary.op, operand) {
                (UnOp::Neg, ConstValue::Int(n)) => {
                    let result = -(n as i128);
                    check_width(result, width)?;
                    Ok(ConstValue::Int(result as i64))
                }
                (UnOp::Not, ConstValue::Bool(b)) => Ok(ConstValue::Bool(!b)),
                _ => Err(ConstEvalError::TypeError),
            }
        }
        ExprKind::Binary(binary) => {
            let lhs = eval_const_expr(ctx, &binary.lhs, width)?;
            let rhs = eval_const_expr(ctx, &binary.rhs, width)?;
            match (lhs, rhs) {
                (ConstValue::Int(a), ConstValue::Int(b)) => {
                    let (a, b) = (a as i128, b as i128);
                    let result = match binary.op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        BinOp::Mul => a * b,
                        BinOp::Div => {
                            if b == 0 {
                                return Err(ConstEvalError::DivisionByZero);
                            }
                            a / b
                        }
                        BinOp::Rem => {
                            if b == 0 {
                                return Err(ConstEvalError::DivisionByZero);
                            }
                            a % b
                        }
                        _ => return Err(ConstEvalError::NonConstExpr),
                    };
                    check_width(result, width)?;
                    Ok(ConstValue::Int(result as i64))
                }
                (ConstValue::Bool(a), ConstValue::Bool(b)) => match binary.op {
                    BinOp::And => Ok(ConstValue::Bool(a && b)),
                    BinOp::Or => Ok(ConstValue::Bool(a || b)),
                    _ => Err(ConstEvalError::TypeError),
                },
                _ => Err(ConstEvalError::TypeError),
            }
        }
        _ => Err(ConstEvalError::NonConstExpr),
    }
}

fn check_width(value: i128, width: IntTy) -> Result<(), ConstEvalError> {
    let (min, max) = width.range();
    if value < min || value > max {
        Err(ConstEvalError::Overflow(width.name()))
    } else {
        Ok(())
    }
}
