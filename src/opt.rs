//! Peephole optimisation of flattened programs.
//!
//! Two passes run until the program stops shrinking:
//!
//! 1. constant folding, which evaluates every instruction whose operands are known
//!    at build time (unary functions only when the result is finite, division only by
//!    a non-zero constant);
//! 2. fusion of `a b * c +` and `a b * c -` with three loads into `Fma` / `Fmsub`.

use crate::expr::{FlattenedExpr, LinearOp};

pub fn optimize(flattened: FlattenedExpr) -> FlattenedExpr {
    let mut ops = flattened.ops;
    loop {
        let before = ops.len();
        ops = fuse_fma(fold_consts(ops));
        if ops.len() == before {
            break;
        }
    }
    FlattenedExpr { ops, ..flattened }
}

fn fold_consts(ops: Vec<LinearOp>) -> Vec<LinearOp> {
    let mut out: Vec<LinearOp> = Vec::with_capacity(ops.len());
    // compile-time value of each stack slot, `None` when only known at run time
    let mut known: Vec<Option<f64>> = Vec::with_capacity(8);

    for op in ops {
        let arity = op.arity();
        let operands = known.split_off(known.len().saturating_sub(arity));
        let folded = if operands.len() == arity {
            evaluate(&op, &operands)
        } else {
            None
        };
        match folded {
            // every known operand is a single `LoadConst` at the tail of `out`
            Some(value) => {
                out.truncate(out.len() - arity);
                out.push(LinearOp::LoadConst(value));
                known.push(Some(value));
            }
            None => {
                out.push(op);
                known.push(None);
            }
        }
    }
    out
}

fn evaluate(op: &LinearOp, operands: &[Option<f64>]) -> Option<f64> {
    match (op, operands) {
        (LinearOp::LoadConst(c), []) => Some(*c),
        (LinearOp::Div, [Some(_), Some(b)]) if *b == 0.0 => None,
        (LinearOp::Fma, [Some(a), Some(b), Some(c)]) => Some(a.mul_add(*b, *c)),
        (LinearOp::Fmsub, [Some(a), Some(b), Some(c)]) => Some(a.mul_add(*b, -c)),
        (_, [Some(a), Some(b)]) => op.apply_binary(*a, *b),
        (_, [Some(a)]) => op.apply_unary(*a).filter(|v| v.is_finite()),
        _ => None,
    }
}

fn fuse_fma(ops: Vec<LinearOp>) -> Vec<LinearOp> {
    use LinearOp::*;
    let is_load = |op: &LinearOp| matches!(op, LoadVar(_) | LoadConst(_));

    let mut out = Vec::with_capacity(ops.len());
    let mut rest = ops.as_slice();
    while let Some((first, tail)) = rest.split_first() {
        if let [a, b, Mul, c, op @ (Add | Sub), after @ ..] = rest {
            if is_load(a) && is_load(b) && is_load(c) {
                let fused = if matches!(op, Add) { Fma } else { Fmsub };
                out.extend([a.clone(), b.clone(), c.clone(), fused]);
                rest = after;
                continue;
            }
        }
        out.push(first.clone());
        rest = tail;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use LinearOp::*;

    fn flat(ops: Vec<LinearOp>) -> FlattenedExpr {
        FlattenedExpr {
            ops,
            max_var_index: Some(1),
            constant_result: None,
        }
    }

    #[test]
    fn folds_constant_subprograms() {
        let optimized = optimize(flat(vec![
            LoadVar(0),
            LoadConst(2.0),
            LoadConst(3.0),
            Mul,
            Add,
        ]));
        assert_eq!(optimized.ops, vec![LoadVar(0), LoadConst(6.0), Add]);
    }

    #[test]
    fn folds_unary_functions_of_constants() {
        let optimized = optimize(flat(vec![LoadConst(0.0), Exp, LoadVar(1), Mul]));
        assert_eq!(optimized.ops, vec![LoadConst(1.0), LoadVar(1), Mul]);
    }

    #[test]
    fn keeps_division_by_zero() {
        let ops = vec![LoadConst(1.0), LoadConst(0.0), Div];
        assert_eq!(optimize(flat(ops.clone())).ops, ops);
    }

    #[test]
    fn keeps_non_finite_unary_results() {
        let ops = vec![LoadConst(-1.0), Ln];
        assert_eq!(optimize(flat(ops.clone())).ops, ops);
    }

    #[test]
    fn fuses_multiply_add() {
        let optimized = optimize(flat(vec![
            LoadConst(2.0),
            LoadVar(1),
            Mul,
            LoadVar(0),
            Add,
        ]));
        assert_eq!(
            optimized.ops,
            vec![LoadConst(2.0), LoadVar(1), LoadVar(0), Fma]
        );

        let optimized = optimize(flat(vec![LoadVar(0), LoadVar(1), Mul, LoadConst(1.0), Sub]));
        assert_eq!(
            optimized.ops,
            vec![LoadVar(0), LoadVar(1), LoadConst(1.0), Fmsub]
        );
    }

    #[test]
    fn optimizes_flattened_riccati_rhs() {
        // t + 2*x^2
        let expr = Expr::Add(
            Expr::var("t", 0),
            Box::new(Expr::Mul(
                Expr::constant(2.0),
                Box::new(Expr::Pow(Expr::var("x", 1), 2)),
            )),
        );
        let optimized = optimize(expr.flatten());
        assert_eq!(
            optimized.ops,
            vec![LoadVar(0), LoadConst(2.0), LoadVar(1), PowConst(2), Mul, Add]
        );
        assert_eq!(optimized.max_var_index, Some(1));
    }
}
