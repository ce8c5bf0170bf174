//! Parsed and compiled scalar expressions over named variables.
//!
//! An [`Equation`] is built once from text: the evalexpr operator tree is converted,
//! simplified, differentiated with respect to every variable and compiled into stack
//! programs. Evaluation afterwards only runs the compiled programs.
//!
//! ```
//! use chaplygin::Equation;
//!
//! // alphabetical layout: t → 0, x → 1
//! let eq = Equation::new("t + 2*x^2".to_string()).unwrap();
//! assert_eq!(eq.eval(&[1.0, 0.5]).unwrap(), 1.5);
//! assert_eq!(eq.gradient(&[1.0, 0.5]).unwrap(), vec![1.0, 2.0]);
//! ```

use std::collections::{HashMap, HashSet};

use evalexpr::{build_operator_tree, DefaultNumericTypes, Node, Operator};

use crate::builder::{build_function, build_program, Program};
use crate::convert::{build_ast, named_constant};
use crate::errors::EquationError;
use crate::expr::Expr;
use crate::types::CompiledFunction;
use colored::Colorize;
use itertools::Itertools;

/// A compiled expression together with all of its first-order partial derivatives.
///
/// Input slices follow the variable layout the equation was built with: either the
/// alphabetical order chosen by [`Equation::new`] or the explicit indices passed to
/// [`Equation::from_var_map`].
#[derive(Clone)]
pub struct Equation {
    source: String,
    ast: Box<Expr>,
    fun: CompiledFunction,
    layout: HashMap<String, u32>,
    /// Variable names ordered by their input index.
    ordered: Vec<String>,
    /// Partial derivatives, aligned with `ordered`.
    partials: Vec<CompiledFunction>,
}

impl std::fmt::Debug for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Equation")
            .field("source", &self.source)
            .field("simplified", &format_args!("{}", self.ast))
            .field("variables", &self.ordered)
            .finish()
    }
}

impl std::fmt::Display for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} f({})",
            self.source,
            "→".cyan(),
            self.ordered.join(", ")
        )
    }
}

impl Equation {
    /// Parses `source`, laying out its variables alphabetically.
    ///
    /// # Errors
    /// - `EquationError::ExpressionParse` if evalexpr rejects the input
    /// - `EquationError::Convert` for operators or functions without a counterpart in [`Expr`]
    pub fn new(source: String) -> Result<Self, EquationError> {
        let node = build_operator_tree::<DefaultNumericTypes>(&source)?;
        let layout = extract_symbols(&node);
        Self::compile(&node, layout, source)
    }

    /// Parses `source` with an explicit variable layout.
    ///
    /// The layout may name variables the expression never mentions; their partial
    /// derivatives are zero.
    ///
    /// ```
    /// # use chaplygin::Equation;
    /// # use std::collections::HashMap;
    /// let layout = HashMap::from([("x".to_string(), 0), ("t".to_string(), 1)]);
    /// let eq = Equation::from_var_map("x*t".to_string(), &layout).unwrap();
    /// assert_eq!(eq.eval(&[3.0, 2.0]).unwrap(), 6.0);
    /// ```
    ///
    /// # Errors
    /// As [`Equation::new`], plus `EquationError::VariableNotFound` listing every
    /// identifier of the expression that the layout lacks.
    pub fn from_var_map(
        source: String,
        layout: &HashMap<String, u32>,
    ) -> Result<Self, EquationError> {
        let node = build_operator_tree::<DefaultNumericTypes>(&source)?;
        let missing = extract_symbols(&node)
            .into_keys()
            .filter(|name| !layout.contains_key(name))
            .sorted()
            .join(", ");
        if !missing.is_empty() {
            return Err(EquationError::VariableNotFound(missing));
        }
        Self::compile(&node, layout.clone(), source)
    }

    fn compile(
        node: &Node<DefaultNumericTypes>,
        layout: HashMap<String, u32>,
        source: String,
    ) -> Result<Self, EquationError> {
        let ordered: Vec<String> = layout
            .iter()
            .sorted_by_key(|(_, &index)| index)
            .map(|(name, _)| name.clone())
            .collect();

        let ast = build_ast(node, &layout)?.simplify();
        let fun = build_function((*ast).clone())?;
        let partials = ordered
            .iter()
            .map(|name| build_function(*ast.derivative(name).simplify()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source,
            ast,
            fun,
            layout,
            ordered,
            partials,
        })
    }

    /// Evaluates the expression.
    ///
    /// # Errors
    /// `EquationError::InvalidInputLength` unless `values` holds one entry per variable.
    pub fn eval(&self, values: &[f64]) -> Result<f64, EquationError> {
        self.check_len(values)?;
        Ok((self.fun)(values))
    }

    /// Evaluates every first-order partial derivative, in layout order.
    ///
    /// # Errors
    /// `EquationError::InvalidInputLength` unless `values` holds one entry per variable.
    pub fn gradient(&self, values: &[f64]) -> Result<Vec<f64>, EquationError> {
        self.check_len(values)?;
        Ok(self.partials.iter().map(|partial| partial(values)).collect())
    }

    /// The compiled partial derivative with respect to `variable`.
    ///
    /// # Errors
    /// `EquationError::DerivativeNotFound` if `variable` is not part of the layout.
    pub fn derivative(&self, variable: &str) -> Result<&CompiledFunction, EquationError> {
        self.ordered
            .iter()
            .position(|name| name == variable)
            .map(|position| &self.partials[position])
            .ok_or_else(|| EquationError::DerivativeNotFound(variable.to_string()))
    }

    /// Rebuilds the optimised stack program of the expression for inspection.
    pub fn program(&self) -> Result<Program, EquationError> {
        Ok(build_program(&self.ast)?)
    }

    pub fn variables(&self) -> &HashMap<String, u32> {
        &self.layout
    }

    pub fn equation_str(&self) -> &str {
        &self.source
    }

    /// The simplified expression tree.
    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    pub fn fun(&self) -> &CompiledFunction {
        &self.fun
    }

    /// Variable names in input order.
    pub fn sorted_variables(&self) -> &[String] {
        &self.ordered
    }

    fn check_len(&self, values: &[f64]) -> Result<(), EquationError> {
        if values.len() == self.ordered.len() {
            Ok(())
        } else {
            Err(EquationError::InvalidInputLength {
                expected: self.ordered.len(),
                got: values.len(),
            })
        }
    }
}

/// Collects the identifiers of an operator tree and numbers them alphabetically.
///
/// Named constants such as `pi` are skipped.
pub fn extract_symbols(node: &Node<DefaultNumericTypes>) -> HashMap<String, u32> {
    let mut names = HashSet::new();
    collect_identifiers(node, &mut names);
    names
        .into_iter()
        .sorted()
        .zip(0u32..)
        .collect()
}

fn collect_identifiers(node: &Node<DefaultNumericTypes>, names: &mut HashSet<String>) {
    if let Operator::VariableIdentifierRead { identifier } = node.operator() {
        if named_constant(identifier).is_none() {
            names.insert(identifier.to_string());
        }
        return;
    }
    for child in node.children() {
        collect_identifiers(child, names);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tx_layout() -> HashMap<String, u32> {
        HashMap::from([("t".to_string(), 0), ("x".to_string(), 1)])
    }

    #[test]
    fn evaluates_riccati_right_hand_side() {
        let eq = Equation::new("t + 2*x^2".to_string()).unwrap();
        assert_eq!(eq.sorted_variables(), &["t", "x"]);
        assert_relative_eq!(eq.eval(&[0.5, 0.25]).unwrap(), 0.625);
    }

    #[test]
    fn gradient_follows_layout() {
        let eq = Equation::new("t + 2*x^2".to_string()).unwrap();
        assert_eq!(eq.gradient(&[0.5, 0.25]).unwrap(), vec![1.0, 1.0]);

        let swapped = HashMap::from([("x".to_string(), 0), ("t".to_string(), 1)]);
        let eq = Equation::from_var_map("t + 2*x^2".to_string(), &swapped).unwrap();
        assert_eq!(eq.gradient(&[0.25, 0.5]).unwrap(), vec![1.0, 1.0]);
        assert_relative_eq!(eq.eval(&[0.25, 0.5]).unwrap(), 0.625);
    }

    #[test]
    fn derivative_lookup() {
        let eq = Equation::from_var_map("x*sin(t)".to_string(), &tx_layout()).unwrap();
        let dx = eq.derivative("x").unwrap();
        assert_relative_eq!(dx(&[0.3, 7.0]), 0.3f64.sin(), epsilon = 1e-15);
        assert!(matches!(
            eq.derivative("y"),
            Err(EquationError::DerivativeNotFound(name)) if name == "y"
        ));
    }

    #[test]
    fn transcendental_gradient() {
        let eq = Equation::from_var_map("exp(-t) * ln(1 + x^2)".to_string(), &tx_layout())
            .unwrap();
        let (t, x) = (0.4_f64, 1.5_f64);
        let gradient = eq.gradient(&[t, x]).unwrap();
        assert_relative_eq!(
            gradient[0],
            -(-t).exp() * (1.0 + x * x).ln(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            gradient[1],
            (-t).exp() * 2.0 * x / (1.0 + x * x),
            epsilon = 1e-12
        );
    }

    #[test]
    fn absent_variable_has_zero_partial() {
        let eq = Equation::from_var_map("3*x".to_string(), &tx_layout()).unwrap();
        assert_eq!(eq.eval(&[9.0, 2.0]).unwrap(), 6.0);
        assert_eq!(eq.gradient(&[9.0, 2.0]).unwrap(), vec![0.0, 3.0]);
    }

    #[test]
    fn rejects_unknown_identifiers() {
        let result = Equation::from_var_map("x + y*z".to_string(), &tx_layout());
        assert!(matches!(
            result,
            Err(EquationError::VariableNotFound(names)) if names == "y, z"
        ));
    }

    #[test]
    fn rejects_wrong_input_length() {
        let eq = Equation::from_var_map("x".to_string(), &tx_layout()).unwrap();
        assert!(matches!(
            eq.eval(&[1.0]),
            Err(EquationError::InvalidInputLength {
                expected: 2,
                got: 1
            })
        ));
        assert!(eq.gradient(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            Equation::new("t + )".to_string()),
            Err(EquationError::ExpressionParse(_))
        ));
    }

    #[test]
    fn named_constants_are_not_variables() {
        let eq = Equation::new("pi * x + e".to_string()).unwrap();
        assert_eq!(eq.sorted_variables(), &["x"]);
        assert_relative_eq!(
            eq.eval(&[2.0]).unwrap(),
            2.0 * std::f64::consts::PI + std::f64::consts::E
        );
    }

    #[test]
    fn program_listing() {
        let eq = Equation::new("t + 2*x^2".to_string()).unwrap();
        let program = eq.program().unwrap();
        assert_eq!(program.max_var_index(), Some(1));
        assert!(program.to_string().contains("powi 2"));
    }

    #[test]
    fn formatting() {
        let eq = Equation::from_var_map("t + x".to_string(), &tx_layout()).unwrap();
        assert!(format!("{eq:?}").contains("t + x"));
        let shown = eq.to_string();
        assert!(shown.starts_with("t + x"));
        assert!(shown.ends_with("f(t, x)"));
    }
}
