//! Two-sided Chaplygin approximation of first-order ordinary differential equations.
//!
//! This crate approximates the solution of x'(t) = f(t, x), x(t0) = x0 on [t0, t1] by
//! successively tightening an upper and a lower bound until their distance at t1 falls
//! below a requested accuracy. The right-hand side is entered as text, parsed with the
//! [evalexpr](https://github.com/ISibboI/evalexpr) crate and differentiated symbolically,
//! so the partial derivative ∂f/∂x the method needs is exact.
//!
//! # Features
//!
//! - Symbolic differentiation and simplification of the right-hand side
//! - Lenient or strict parsing of interval and initial condition strings
//! - Memoized fixed-step quadrature for the integrating factors
//! - Parallel solving of independent tasks
//!
//! # Example
//!
//! ```rust
//! use chaplygin::{solve, Task};
//!
//! // x' = 2x, x(0) = 1 on [0, 1/4]
//! let task = Task::new("2x(t)", "x(0)=1", "[0,1/4]", 0.1);
//! let solution = solve(&task).unwrap();
//!
//! assert!(solution.error() <= 0.1);
//! let x = solution.value(0.25); // close to e^0.5
//! assert!((x - 0.5f64.exp()).abs() < 1e-2);
//! ```

pub use engine::{solve, Solution, Solver};
pub use equation::Equation;
pub use errors::{EquationError, SolveError, TaskError};
pub use settings::SolverSettings;
pub use task::{Interval, ParseMode, ParsedNumber, Task};

pub mod prelude {
    pub use crate::builder::build_function;
    pub use crate::convert::build_ast;
    pub use crate::engine::{solve, Solution, Solver};
    pub use crate::equation::Equation;
    pub use crate::expr::Expr;
    pub use crate::rhs::RightHandSide;
    pub use crate::settings::SolverSettings;
    pub use crate::task::{ParseMode, Task};
}

/// Flattened stack programs and their interpreter
pub mod builder;
/// Conversion from parsed expressions to internal AST
pub mod convert;
/// The two-sided iteration
pub mod engine;
/// High-level equation handling
pub mod equation;
/// Error types for the various failure modes
pub mod errors;
/// Expression tree representation and symbolic differentiation
pub mod expr;
/// Trapezoidal quadrature
pub mod integrate;
/// Peephole optimisation of flattened programs
pub mod opt;
/// The right-hand side f(t, x) and its partial derivative
pub mod rhs;
/// Solver configuration
pub mod settings;
/// Task strings and their normalization
pub mod task;
/// Shared function types
pub mod types;
