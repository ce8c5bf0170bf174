//! This module turns expression trees into callable functions.
//!
//! Expressions are flattened into a postfix program of [`LinearOp`]s, run through the
//! peephole optimiser and validated once. The validated [`Program`] is then evaluated
//! by a small stack interpreter that does not allocate for programs of ordinary depth.
//!
//! The main entry points are:
//! - `build_program()` - Flattens, optimises and validates an expression
//! - `build_function()` - Wraps a validated program into a shareable function

use std::fmt;
use std::sync::Arc;

use crate::{
    errors::{BuilderError, EquationError},
    expr::{Expr, LinearOp},
    opt::optimize,
    types::CompiledFunction,
};

/// Stack depth served from an inline buffer before falling back to the heap.
const INLINE_STACK: usize = 32;

/// A validated postfix program.
///
/// Every operation is guaranteed to find its operands on the stack and the program
/// leaves exactly one value behind.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    ops: Vec<LinearOp>,
    max_depth: usize,
    max_var_index: Option<u32>,
}

impl Program {
    /// The optimised operations in execution order.
    pub fn ops(&self) -> &[LinearOp] {
        &self.ops
    }

    /// Deepest stack the program reaches.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Highest input index the program reads, if any.
    pub fn max_var_index(&self) -> Option<u32> {
        self.max_var_index
    }

    /// Evaluates the program. Variables missing from `input` read as NaN.
    pub fn eval(&self, input: &[f64]) -> f64 {
        if self.max_depth <= INLINE_STACK {
            let mut stack = [0.0; INLINE_STACK];
            run(&self.ops, input, &mut stack)
        } else {
            let mut stack = vec![0.0; self.max_depth];
            run(&self.ops, input, &mut stack)
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, op) in self.ops.iter().enumerate() {
            writeln!(f, "{position:>4}  {}", mnemonic(op))?;
        }
        Ok(())
    }
}

fn mnemonic(op: &LinearOp) -> String {
    match op {
        LinearOp::LoadConst(c) => format!("const {c}"),
        LinearOp::LoadVar(idx) => format!("load {idx}"),
        LinearOp::Add => "add".into(),
        LinearOp::Sub => "sub".into(),
        LinearOp::Mul => "mul".into(),
        LinearOp::Div => "div".into(),
        LinearOp::Abs => "abs".into(),
        LinearOp::Neg => "neg".into(),
        LinearOp::PowConst(e) => format!("powi {e}"),
        LinearOp::PowFloat(e) => format!("powf {e}"),
        LinearOp::PowExpr => "pow".into(),
        LinearOp::Exp => "exp".into(),
        LinearOp::Ln => "ln".into(),
        LinearOp::Sqrt => "sqrt".into(),
        LinearOp::Sin => "sin".into(),
        LinearOp::Cos => "cos".into(),
        LinearOp::Tan => "tan".into(),
        LinearOp::Fma => "fma".into(),
        LinearOp::Fmsub => "fmsub".into(),
    }
}

/// Flattens, optimises and validates an expression.
///
/// # Errors
/// Returns a `BuilderError` if the resulting program would underflow the stack or
/// leave anything other than a single value behind.
pub fn build_program(expr: &Expr) -> Result<Program, BuilderError> {
    let flattened = optimize(expr.flatten());
    let max_depth = validate(&flattened.ops)?;
    Ok(Program {
        ops: flattened.ops,
        max_depth,
        max_var_index: flattened.max_var_index,
    })
}

/// Builds a callable function from an expression tree.
///
/// # Arguments
/// * `expr` - The expression AST to compile
///
/// # Returns
/// A thread-safe function that takes a slice of f64 values and returns an f64 result.
/// The function is wrapped in an Arc to allow sharing between threads.
///
/// # Errors
/// Returns an EquationError if the program cannot be assembled.
pub fn build_function(expr: Expr) -> Result<CompiledFunction, EquationError> {
    let program = build_program(&expr)?;
    if let [LinearOp::LoadConst(c)] = program.ops() {
        let c = *c;
        return Ok(Arc::new(move |_: &[f64]| c));
    }
    Ok(Arc::new(move |input: &[f64]| program.eval(input)))
}

/// Checks stack discipline and returns the maximum depth.
fn validate(ops: &[LinearOp]) -> Result<usize, BuilderError> {
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    for (position, op) in ops.iter().enumerate() {
        let arity = op.arity();
        if depth < arity {
            return Err(BuilderError::StackUnderflow {
                position,
                operation: mnemonic(op),
            });
        }
        // every operation pushes exactly one result
        depth = depth - arity + 1;
        max_depth = max_depth.max(depth);
    }
    if depth != 1 {
        return Err(BuilderError::UnbalancedProgram { depth });
    }
    Ok(max_depth)
}

/// Runs a validated program on the given stack buffer.
fn run(ops: &[LinearOp], input: &[f64], stack: &mut [f64]) -> f64 {
    let mut sp = 0usize;
    for op in ops {
        match op {
            LinearOp::LoadConst(c) => {
                stack[sp] = *c;
                sp += 1;
            }
            LinearOp::LoadVar(idx) => {
                stack[sp] = input.get(*idx as usize).copied().unwrap_or(f64::NAN);
                sp += 1;
            }
            LinearOp::Add | LinearOp::Sub | LinearOp::Mul | LinearOp::Div | LinearOp::PowExpr => {
                sp -= 1;
                stack[sp - 1] = op
                    .apply_binary(stack[sp - 1], stack[sp])
                    .unwrap_or(f64::NAN);
            }
            LinearOp::Fma | LinearOp::Fmsub => {
                sp -= 2;
                let c = stack[sp + 1];
                let b = stack[sp];
                let a = stack[sp - 1];
                stack[sp - 1] = if matches!(op, LinearOp::Fma) {
                    a.mul_add(b, c)
                } else {
                    a.mul_add(b, -c)
                };
            }
            unary => {
                stack[sp - 1] = unary.apply_unary(stack[sp - 1]).unwrap_or(f64::NAN);
            }
        }
    }
    stack[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn riccati() -> Expr {
        // t + 2*x^2
        Expr::Add(
            Expr::var("t", 0),
            Box::new(Expr::Mul(
                Expr::constant(2.0),
                Box::new(Expr::Pow(Expr::var("x", 1), 2)),
            )),
        )
    }

    #[test]
    fn evaluates_polynomial() {
        let fun = build_function(riccati()).unwrap();
        assert_eq!(fun(&[0.5, 2.0]), 8.5);
        assert_eq!(fun(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn evaluates_transcendental_functions() {
        let expr = Expr::Add(
            Box::new(Expr::Mul(
                Box::new(Expr::Sin(Expr::var("t", 0))),
                Box::new(Expr::Exp(Expr::var("x", 1))),
            )),
            Box::new(Expr::Div(
                Box::new(Expr::Ln(Expr::var("x", 1))),
                Box::new(Expr::Sqrt(Expr::var("t", 0))),
            )),
        );
        let fun = build_function(expr).unwrap();
        let (t, x) = (0.7_f64, 1.3_f64);
        assert_relative_eq!(
            fun(&[t, x]),
            t.sin() * x.exp() + x.ln() / t.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn fused_and_plain_programs_agree() {
        // 3*x - t is fused into fmsub
        let expr = Expr::Sub(
            Box::new(Expr::Mul(Expr::constant(3.0), Expr::var("x", 1))),
            Expr::var("t", 0),
        );
        let program = build_program(&expr).unwrap();
        assert!(program.ops().contains(&LinearOp::Fmsub));
        assert_relative_eq!(program.eval(&[0.25, 1.5]), 4.25, epsilon = 1e-15);
    }

    #[test]
    fn constant_expression_ignores_input() {
        let expr = Expr::Mul(Expr::constant(2.0), Expr::constant(4.0));
        let fun = build_function(expr).unwrap();
        assert_eq!(fun(&[]), 8.0);
        assert_eq!(fun(&[1.0, 2.0]), 8.0);
    }

    #[test]
    fn missing_input_reads_nan() {
        let program = build_program(&Expr::Var(crate::expr::VarRef {
            name: "x".into(),
            index: 3,
        }))
        .unwrap();
        assert!(program.eval(&[1.0]).is_nan());
        assert_eq!(program.max_var_index(), Some(3));
    }

    #[test]
    fn deep_programs_use_heap_stack() {
        // x + (x + (x + ...)) nests deeper than the inline buffer
        let mut expr = *Expr::var("x", 0);
        for _ in 0..40 {
            expr = Expr::Add(Expr::var("x", 0), Box::new(expr));
        }
        let program = build_program(&expr).unwrap();
        assert!(program.max_depth() > INLINE_STACK);
        assert_eq!(program.eval(&[1.0]), 41.0);
    }

    #[test]
    fn rejects_malformed_programs() {
        assert!(matches!(
            validate(&[LinearOp::LoadVar(0), LinearOp::Add]),
            Err(BuilderError::StackUnderflow { position: 1, .. })
        ));
        assert!(matches!(
            validate(&[LinearOp::LoadVar(0), LinearOp::LoadVar(1)]),
            Err(BuilderError::UnbalancedProgram { depth: 2 })
        ));
        assert_eq!(validate(&[LinearOp::LoadVar(0)]).unwrap(), 1);
    }

    #[test]
    fn listing_names_each_operation() {
        let program = build_program(&riccati()).unwrap();
        let listing = program.to_string();
        assert!(listing.contains("load 1"));
        assert!(listing.contains("powi 2"));
        assert_eq!(listing.lines().count(), program.ops().len());
    }
}
