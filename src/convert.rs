//! Conversion module for transforming evalexpr AST nodes into our internal expression representation.
//!
//! This module handles converting the AST nodes from the evalexpr crate into our own
//! expression types that support evaluation and symbolic differentiation. It maps
//! variables, named constants, operators and function calls into our internal representation.
//!
//! The main entry point is the `build_ast` function which recursively traverses the
//! evalexpr AST and builds up our expression tree.

use std::collections::HashMap;
use std::f64::consts::{E, PI};

use crate::{
    errors::ConvertError,
    expr::{Expr, VarRef},
};
use evalexpr::{DefaultNumericTypes, Node, Operator, Value};

/// Named constants recognised in expressions. They never count as variables.
pub const NAMED_CONSTANTS: [(&str, f64); 2] = [("pi", PI), ("e", E)];

/// Looks up a named constant.
pub fn named_constant(identifier: &str) -> Option<f64> {
    NAMED_CONSTANTS
        .iter()
        .find(|(name, _)| *name == identifier)
        .map(|(_, value)| *value)
}

/// Converts an evalexpr AST node into our internal expression representation.
///
/// This function recursively traverses the evalexpr AST and builds up our own AST
/// representation that can be used for evaluation and symbolic differentiation.
///
/// # Arguments
/// * `node` - The evalexpr AST node to convert
/// * `var_map` - A mapping of variable names to their indices in the input array
///
/// # Returns
/// * `Result<Expr, ConvertError>` - The converted expression or an error if conversion fails
///
/// # Examples of supported operations:
/// * Basic arithmetic: +, -, *, /
/// * Variables: t, x, etc. and the constants `pi` and `e`
/// * Constants: integer and floating point numbers
/// * Functions: abs, exp, ln, log (natural), sqrt, sin, cos, tan
/// * Exponentiation: x^n with integer, float or expression exponents
pub fn build_ast(
    node: &Node<DefaultNumericTypes>,
    var_map: &HashMap<String, u32>,
) -> Result<Expr, ConvertError> {
    let children = node.children();
    match node.operator() {
        // Addition and multiplication fold any number of children into binary nodes
        Operator::Add | Operator::Mul => {
            let (first, rest) = children.split_first().ok_or_else(|| ConvertError::Arity {
                operator: format!("{:?}", node.operator()),
                expected: 2,
                got: 0,
            })?;
            let is_add = matches!(node.operator(), Operator::Add);
            rest.iter()
                .try_fold(build_ast(first, var_map)?, |acc, child| {
                    let rhs = Box::new(build_ast(child, var_map)?);
                    Ok(if is_add {
                        Expr::Add(Box::new(acc), rhs)
                    } else {
                        Expr::Mul(Box::new(acc), rhs)
                    })
                })
        }
        Operator::Sub => {
            let [lhs, rhs] = expect_children::<2>(node)?;
            Ok(Expr::Sub(
                Box::new(build_ast(lhs, var_map)?),
                Box::new(build_ast(rhs, var_map)?),
            ))
        }
        Operator::Div => {
            let [lhs, rhs] = expect_children::<2>(node)?;
            Ok(Expr::Div(
                Box::new(build_ast(lhs, var_map)?),
                Box::new(build_ast(rhs, var_map)?),
            ))
        }
        Operator::Neg => {
            let [inner] = expect_children::<1>(node)?;
            Ok(Expr::Neg(Box::new(build_ast(inner, var_map)?)))
        }
        Operator::Const { value } => match value {
            Value::Float(f) => Ok(Expr::Const(*f)),
            Value::Int(i) => Ok(Expr::Const(*i as f64)),
            _ => Err(ConvertError::ConstOperator(format!("{value:?}"))),
        },
        Operator::VariableIdentifierRead { identifier } => {
            if let Some(index) = var_map.get(identifier.as_str()) {
                return Ok(Expr::Var(VarRef {
                    name: identifier.to_string(),
                    index: *index,
                }));
            }
            named_constant(identifier)
                .map(Expr::Const)
                .ok_or_else(|| ConvertError::VariableNotFound(identifier.to_string()))
        }
        Operator::FunctionIdentifier { identifier } => {
            let [argument] = expect_children::<1>(node)?;
            let argument = Box::new(build_ast(argument, var_map)?);
            match identifier.as_str() {
                "abs" => Ok(Expr::Abs(argument)),
                "ln" | "log" => Ok(Expr::Ln(argument)),
                "sqrt" => Ok(Expr::Sqrt(argument)),
                "exp" => Ok(Expr::Exp(argument)),
                "sin" => Ok(Expr::Sin(argument)),
                "cos" => Ok(Expr::Cos(argument)),
                "tan" => Ok(Expr::Tan(argument)),
                _ => Err(ConvertError::UnsupportedFunction(identifier.to_string())),
            }
        }
        // Root nodes wrap the whole expression and every parenthesised group
        Operator::RootNode => match children {
            [inner] => build_ast(inner, var_map),
            _ => Err(ConvertError::RootNode(format!(
                "{} children",
                children.len()
            ))),
        },
        Operator::Exp => {
            let [base, exponent] = expect_children::<2>(node)?;
            let base = Box::new(build_ast(base, var_map)?);
            match exponent.operator() {
                Operator::Const {
                    value: Value::Int(exp),
                } => Ok(Expr::Pow(base, *exp)),
                Operator::Const {
                    value: Value::Float(exp),
                } => Ok(Expr::PowFloat(base, *exp)),
                _ => Ok(Expr::PowExpr(base, Box::new(build_ast(exponent, var_map)?))),
            }
        }
        other => Err(ConvertError::UnsupportedOperator(format!("{other:?}"))),
    }
}

/// Borrows exactly `N` children of a node or reports an arity error.
fn expect_children<const N: usize>(
    node: &Node<DefaultNumericTypes>,
) -> Result<&[Node<DefaultNumericTypes>; N], ConvertError> {
    let children = node.children();
    children.try_into().map_err(|_| ConvertError::Arity {
        operator: format!("{:?}", node.operator()),
        expected: N,
        got: children.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalexpr::build_operator_tree;

    fn convert(input: &str) -> Result<Expr, ConvertError> {
        let node = build_operator_tree::<DefaultNumericTypes>(input).unwrap();
        let var_map = HashMap::from([("t".to_string(), 0), ("x".to_string(), 1)]);
        build_ast(&node, &var_map)
    }

    #[test]
    fn converts_riccati_rhs() {
        let expr = convert("t + 2*x^2").unwrap();
        assert_eq!(format!("{expr}"), "(t + (2 * (x^2)))");
    }

    #[test]
    fn converts_exponent_kinds() {
        assert!(matches!(convert("x^2").unwrap(), Expr::Pow(_, 2)));
        assert!(matches!(convert("x^0.5").unwrap(), Expr::PowFloat(_, e) if e == 0.5));
        assert!(matches!(convert("x^t").unwrap(), Expr::PowExpr(_, _)));
    }

    #[test]
    fn converts_functions() {
        for (input, expected) in [
            ("sin(t)", "sin(t)"),
            ("cos(x)", "cos(x)"),
            ("tan(t)", "tan(t)"),
            ("log(x)", "ln(x)"),
            ("exp(-t)", "exp(-(t))"),
            ("abs(x)", "|x|"),
        ] {
            assert_eq!(format!("{}", convert(input).unwrap()), expected);
        }
    }

    #[test]
    fn maps_named_constants() {
        let expr = convert("pi*x").unwrap();
        assert_eq!(
            expr,
            Expr::Mul(Expr::constant(PI), Expr::var("x", 1))
        );
    }

    #[test]
    fn rejects_unknown_identifiers() {
        assert!(matches!(
            convert("x + y"),
            Err(ConvertError::VariableNotFound(name)) if name == "y"
        ));
        assert!(matches!(
            convert("floor(x)"),
            Err(ConvertError::UnsupportedFunction(name)) if name == "floor"
        ));
        assert!(matches!(
            convert("x % 2"),
            Err(ConvertError::UnsupportedOperator(_))
        ));
    }
}
