use std::sync::Arc;

/// Type alias for a compiled function that evaluates a single expression.
///
/// This represents a function that:
/// - Takes a slice of input values corresponding to variables in index order
/// - Returns a single f64 result from evaluating the expression
/// - Is both Send and Sync so equations can be shared with worker threads
pub type CompiledFunction = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;
