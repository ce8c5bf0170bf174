//! The right-hand side f(t, x) of the differential equation x'(t) = f(t, x).
//!
//! A [`RightHandSide`] wraps an [`Equation`] with the fixed variable layout `t → 0`,
//! `x → 1`, so the solver can evaluate f and its analytic partial derivative ∂f/∂x
//! without building input slices by hand.

use std::collections::HashMap;
use std::fmt;

use crate::equation::Equation;
use crate::errors::EquationError;
use crate::types::CompiledFunction;

/// Name of the independent variable.
pub const TIME: &str = "t";
/// Name of the unknown function.
pub const STATE: &str = "x";

/// Compiled f(t, x) together with its partial derivative ∂f/∂x.
#[derive(Clone)]
pub struct RightHandSide {
    equation: Equation,
    partial_x: CompiledFunction,
}

impl fmt::Debug for RightHandSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RightHandSide")
            .field("expression", &self.expression())
            .field("equation", &self.equation)
            .finish_non_exhaustive()
    }
}

impl RightHandSide {
    /// Parses a normalized expression over `t` and `x`.
    ///
    /// The input is expected to have every `x(t)` already rewritten to `x`.
    ///
    /// # Errors
    /// - `EquationError::ExpressionParse` for syntactically invalid input
    /// - `EquationError::VariableNotFound` for identifiers other than `t`, `x`, `pi` and `e`
    /// - `EquationError::Convert` for unsupported operators and functions
    pub fn parse(expression: &str) -> Result<Self, EquationError> {
        let variables = HashMap::from([(TIME.to_string(), 0), (STATE.to_string(), 1)]);
        let equation = Equation::from_var_map(expression.to_string(), &variables)?;
        let partial_x = equation.derivative(STATE)?.clone();
        Ok(Self {
            equation,
            partial_x,
        })
    }

    /// Evaluates f(t, x).
    #[inline]
    pub fn value(&self, t: f64, x: f64) -> f64 {
        (self.equation.fun())(&[t, x])
    }

    /// Evaluates ∂f/∂x(t, x).
    #[inline]
    pub fn partial_x(&self, t: f64, x: f64) -> f64 {
        (self.partial_x)(&[t, x])
    }

    /// The underlying equation.
    pub fn equation(&self) -> &Equation {
        &self.equation
    }

    /// The normalized expression string this right-hand side was parsed from.
    pub fn expression(&self) -> &str {
        self.equation.equation_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn riccati_value_and_partial() {
        let rhs = RightHandSide::parse("t+2*x^2").unwrap();
        assert_eq!(rhs.value(0.5, 2.0), 8.5);
        assert_eq!(rhs.partial_x(0.5, 2.0), 8.0);
        assert_eq!(rhs.expression(), "t+2*x^2");
    }

    #[test]
    fn linear_partial_is_constant() {
        let rhs = RightHandSide::parse("2*x").unwrap();
        for (t, x) in [(0.0, 1.0), (0.25, -3.0), (7.0, 1e6)] {
            assert_eq!(rhs.partial_x(t, x), 2.0);
        }
    }

    #[test]
    fn time_only_right_hand_side() {
        let rhs = RightHandSide::parse("cos(t)").unwrap();
        assert_relative_eq!(rhs.value(1.0, 42.0), 1.0_f64.cos());
        assert_eq!(rhs.partial_x(1.0, 42.0), 0.0);
    }

    #[test]
    fn nonlinear_partial() {
        let rhs = RightHandSide::parse("x*sin(t) - sqrt(x)").unwrap();
        let (t, x) = (0.4_f64, 2.25_f64);
        assert_relative_eq!(
            rhs.partial_x(t, x),
            t.sin() - 0.5 / x.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn rejects_foreign_variables() {
        assert!(matches!(
            RightHandSide::parse("x + y"),
            Err(EquationError::VariableNotFound(name)) if name == "y"
        ));
    }

    #[test]
    fn debug_names_the_expression() {
        let rhs = RightHandSide::parse("t+2*x^2").unwrap();
        let debug = format!("{rhs:?}");
        assert!(debug.starts_with("RightHandSide"));
        assert!(debug.contains("t+2*x^2"));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(matches!(
            RightHandSide::parse("t + )"),
            Err(EquationError::ExpressionParse(_))
        ));
    }
}
