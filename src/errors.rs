//! Error types for the chaplygin crate.
//!
//! This module defines the error types that can occur while turning a task into a
//! solution. The main error types are:
//!
//! - `ConvertError`: Errors during conversion from the evalexpr AST to the internal representation
//! - `BuilderError`: Errors while assembling the flattened evaluation program
//! - `EquationError`: High-level errors when parsing and differentiating expressions
//! - `TaskError`: Malformed task strings (only raised in strict parsing mode) and invalid accuracy
//! - `SolveError`: Everything that can abort a solve, including non-convergence
//!
//! Each error type implements the standard Error trait and provides detailed error messages.

use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors that can occur during conversion from evalexpr AST to our internal AST representation.
///
/// This enum represents various failure modes when converting the evalexpr expression tree
/// into our own AST format that can be used for evaluation and symbolic differentiation.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Error when an operator node does not carry the expected number of operands
    #[error("Operator {operator} expects {expected} operand(s), got {got}")]
    Arity {
        operator: String,
        expected: usize,
        got: usize,
    },
    /// Error when encountering an operator that is not supported by our implementation
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// Error when encountering a function that is not supported by our implementation
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),
    /// Error when the root node does not have exactly one child
    #[error("Expected single child for root node: {0}")]
    RootNode(String),
    /// Error when a constant value is not numeric
    #[error("Expected numeric constant: {0}")]
    ConstOperator(String),
    /// Error when a variable is not found in the variable map
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
}

/// Errors that can occur while assembling a flattened evaluation program.
///
/// The flattened program is a linear sequence of stack operations. These errors
/// indicate a malformed sequence, which would otherwise read past the evaluation stack.
#[derive(Error, Debug)]
pub enum BuilderError {
    /// An operation needs more operands than the stack holds at that point
    #[error("stack underflow at operation {position}: {operation}")]
    StackUnderflow { position: usize, operation: String },
    /// The program leaves a number of values other than one on the stack
    #[error("program leaves {depth} values on the stack, expected exactly one")]
    UnbalancedProgram { depth: usize },
}

/// High-level errors that can occur when working with mathematical equations.
///
/// This enum represents the various ways that equation parsing, conversion
/// and differentiation can fail. It wraps lower-level errors from the expression
/// conversion and program assembly stages.
#[derive(Debug, Error)]
pub enum EquationError {
    /// Error when parsing the expression string with evalexpr
    #[error("Failed to parse expression: {0}")]
    ExpressionParse(#[from] EvalexprError<DefaultNumericTypes>),
    /// Error when converting from the evalexpr AST to our internal AST representation
    #[error("Failed to convert expression: {0}")]
    Convert(#[from] ConvertError),
    /// Error when assembling the evaluation program
    #[error("Failed to build evaluation program: {0}")]
    Build(#[from] BuilderError),
    /// Error when trying to get derivative for a variable that doesn't exist
    #[error("Derivative not found for variable: {0}")]
    DerivativeNotFound(String),
    /// Error when the input length is not the same as the number of variables
    #[error("Invalid input length: expected {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// Error when a variable is not found in the equation
    #[error("Variable not found in equation: {0}")]
    VariableNotFound(String),
}

/// Errors raised while normalizing a task.
///
/// In lenient mode malformed numbers degrade to 0 (or NaN for a non-numeric initial
/// value) and only `InvalidAccuracy` can occur. Strict mode reports every defaulted
/// component through one of the `Malformed*` variants.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    /// The section is not of the form `[a,b]`
    #[error("Malformed section '{0}', expected the form [a,b]")]
    MalformedSection(String),
    /// The initial condition is not of the form `x(t0)=value`
    #[error("Malformed initial condition '{0}', expected the form x(t0)=value")]
    MalformedInitial(String),
    /// A numeric component could not be parsed or divides by zero
    #[error("Malformed number '{0}'")]
    MalformedNumber(String),
    /// The accuracy is not a finite positive number
    #[error("Accuracy must be a finite positive number, got {0}")]
    InvalidAccuracy(f64),
}

/// Errors that abort a solve.
#[derive(Debug, Error)]
pub enum SolveError {
    /// The task could not be normalized
    #[error("Invalid task: {0}")]
    Task(#[from] TaskError),
    /// The differential expression could not be parsed or differentiated
    #[error("Invalid differential expression: {0}")]
    Expression(#[from] EquationError),
    /// The bracket did not narrow below the requested accuracy within the iteration cap
    #[error("No convergence after {iterations} iteration(s), last epsilon {epsilon}")]
    Convergence { iterations: usize, epsilon: f64 },
    /// The solver settings are out of range
    #[error("Invalid solver settings: {0}")]
    InvalidSettings(String),
}
