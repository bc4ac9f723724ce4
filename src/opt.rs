//! Boolean negation rewriting.
//!
//! `not` blocks are pushed into their operand when that produces cheaper
//! code: comparisons flip to their complement, double negation cancels,
//! and `and`/`or` go through De Morgan when the rewrite pays for itself.

use crate::ir::{Expr, ExprKind};
use crate::types::{Constant, Type};

/// Savings of pushing a negation into `expr`. Positive means the rewrite
/// removes work, zero is break-even, negative would add a wrapper.
pub fn push_not_cost(expr: &Expr) -> i32 {
    match &expr.kind {
        ExprKind::Const(_) | ExprKind::Not(_) => 1,
        ExprKind::Compare { .. } => 0,
        ExprKind::And(l, r) | ExprKind::Or(l, r) => push_not_cost(l) + push_not_cost(r),
        _ => -1,
    }
}

/// Negate `expr`, rewriting instead of wrapping wherever profitable.
pub fn push_not(expr: Expr, precompute: bool) -> Expr {
    match expr.kind {
        ExprKind::Compare { op, left, right } => Expr::new(
            Type::Boolean,
            ExprKind::Compare {
                op: op.complement(),
                left,
                right,
            },
        ),
        ExprKind::Not(inner) => *inner,
        ExprKind::And(l, r) if push_not_cost(&l) + push_not_cost(&r) > 0 => Expr::new(
            Type::Boolean,
            ExprKind::Or(
                Box::new(push_not(*l, precompute)),
                Box::new(push_not(*r, precompute)),
            ),
        ),
        ExprKind::Or(l, r) if push_not_cost(&l) + push_not_cost(&r) > 0 => Expr::new(
            Type::Boolean,
            ExprKind::And(
                Box::new(push_not(*l, precompute)),
                Box::new(push_not(*r, precompute)),
            ),
        ),
        ExprKind::Const(c) if precompute => {
            Expr::constant(Type::Boolean, Constant::Bool(!c.truthy()))
        }
        kind => Expr::new(
            Type::Boolean,
            ExprKind::Not(Box::new(Expr::new(expr.ty, kind))),
        ),
    }
}
