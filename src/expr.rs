//! Expression trees for right-hand sides f(t, x).
//!
//! [`Expr`] is what the evalexpr operator tree is converted into. It supports symbolic
//! differentiation ([`Expr::derivative`]), algebraic clean-up ([`Expr::simplify`]) and
//! lowering to a postfix program of [`LinearOp`]s ([`Expr::flatten`]) that the
//! interpreter in [`crate::builder`] runs.
//!
//! Simplification only applies rewrites that hold on the whole real line. Rules such as
//! ln(x*y) → ln(x) + ln(y) are not applied, since the iterated bounds are free to leave
//! the positive half-axis.

/// A variable together with its position in the input slice.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Var(VarRef),
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Abs(Box<Expr>),
    /// Integer constant exponent
    Pow(Box<Expr>, i64),
    /// Floating point constant exponent
    PowFloat(Box<Expr>, f64),
    /// Exponent that is itself an expression
    PowExpr(Box<Expr>, Box<Expr>),
    Exp(Box<Expr>),
    Ln(Box<Expr>),
    Sqrt(Box<Expr>),
    /// Trigonometric functions take radians
    Sin(Box<Expr>),
    Cos(Box<Expr>),
    Tan(Box<Expr>),
    Neg(Box<Expr>),
}

/// One instruction of a flattened program. Operands are popped from the stack and the
/// result pushed back.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearOp {
    LoadConst(f64),
    LoadVar(u32),
    Add,
    /// below − top
    Sub,
    Mul,
    /// below / top
    Div,
    Abs,
    Neg,
    PowConst(i64),
    PowFloat(f64),
    /// below ^ top
    PowExpr,
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Tan,
    /// a × b + c, single rounding
    Fma,
    /// a × b − c, single rounding
    Fmsub,
}

impl LinearOp {
    /// Number of operands the operation pops from the stack.
    pub fn arity(&self) -> usize {
        match self {
            LinearOp::LoadConst(_) | LinearOp::LoadVar(_) => 0,
            LinearOp::Add | LinearOp::Sub | LinearOp::Mul | LinearOp::Div | LinearOp::PowExpr => 2,
            LinearOp::Fma | LinearOp::Fmsub => 3,
            _ => 1,
        }
    }

    /// Applies a unary operation to a value. Returns `None` for non-unary operations.
    pub fn apply_unary(&self, v: f64) -> Option<f64> {
        let result = match self {
            LinearOp::Abs => v.abs(),
            LinearOp::Neg => -v,
            LinearOp::PowConst(e) => powi(v, *e),
            LinearOp::PowFloat(e) => v.powf(*e),
            LinearOp::Exp => v.exp(),
            LinearOp::Ln => v.ln(),
            LinearOp::Sqrt => v.sqrt(),
            LinearOp::Sin => v.sin(),
            LinearOp::Cos => v.cos(),
            LinearOp::Tan => v.tan(),
            _ => return None,
        };
        Some(result)
    }

    /// Applies a binary operation to `a` (below) and `b` (top). Returns `None` for
    /// other operations.
    pub fn apply_binary(&self, a: f64, b: f64) -> Option<f64> {
        let result = match self {
            LinearOp::Add => a + b,
            LinearOp::Sub => a - b,
            LinearOp::Mul => a * b,
            LinearOp::Div => a / b,
            LinearOp::PowExpr => a.powf(b),
            _ => return None,
        };
        Some(result)
    }
}

/// Integer power that falls back to `powf` when the exponent does not fit an `i32`.
pub(crate) fn powi(base: f64, exp: i64) -> f64 {
    match i32::try_from(exp) {
        Ok(e) => base.powi(e),
        Err(_) => base.powf(exp as f64),
    }
}

/// Result of [`Expr::flatten`].
#[derive(Debug, Clone)]
pub struct FlattenedExpr {
    pub ops: Vec<LinearOp>,
    /// Highest input index the program reads, `None` if it reads none
    pub max_var_index: Option<u32>,
    /// Set when the whole expression evaluated to a constant
    pub constant_result: Option<f64>,
}

fn add(a: Box<Expr>, b: Box<Expr>) -> Box<Expr> {
    Box::new(Expr::Add(a, b))
}

fn sub(a: Box<Expr>, b: Box<Expr>) -> Box<Expr> {
    Box::new(Expr::Sub(a, b))
}

fn mul(a: Box<Expr>, b: Box<Expr>) -> Box<Expr> {
    Box::new(Expr::Mul(a, b))
}

fn div(a: Box<Expr>, b: Box<Expr>) -> Box<Expr> {
    Box::new(Expr::Div(a, b))
}

fn pow(base: Box<Expr>, exp: i64) -> Box<Expr> {
    Box::new(Expr::Pow(base, exp))
}

fn neg(a: Box<Expr>) -> Box<Expr> {
    Box::new(Expr::Neg(a))
}

fn is_const(expr: &Expr) -> bool {
    matches!(expr, Expr::Const(_))
}

impl Expr {
    pub fn constant(value: f64) -> Box<Expr> {
        Box::new(Expr::Const(value))
    }

    pub fn var(name: &str, index: u32) -> Box<Expr> {
        Box::new(Expr::Var(VarRef {
            name: name.to_string(),
            index,
        }))
    }

    /// Operand and instruction of a single-operand node.
    fn unary_parts(&self) -> Option<(&Expr, LinearOp)> {
        let parts = match self {
            Expr::Abs(e) => (e, LinearOp::Abs),
            Expr::Neg(e) => (e, LinearOp::Neg),
            Expr::Pow(e, n) => (e, LinearOp::PowConst(*n)),
            Expr::PowFloat(e, p) => (e, LinearOp::PowFloat(*p)),
            Expr::Exp(e) => (e, LinearOp::Exp),
            Expr::Ln(e) => (e, LinearOp::Ln),
            Expr::Sqrt(e) => (e, LinearOp::Sqrt),
            Expr::Sin(e) => (e, LinearOp::Sin),
            Expr::Cos(e) => (e, LinearOp::Cos),
            Expr::Tan(e) => (e, LinearOp::Tan),
            _ => return None,
        };
        Some((&**parts.0, parts.1))
    }

    /// Operands and instruction of a two-operand node.
    fn binary_parts(&self) -> Option<(&Expr, &Expr, LinearOp)> {
        let (l, r, op) = match self {
            Expr::Add(l, r) => (l, r, LinearOp::Add),
            Expr::Sub(l, r) => (l, r, LinearOp::Sub),
            Expr::Mul(l, r) => (l, r, LinearOp::Mul),
            Expr::Div(l, r) => (l, r, LinearOp::Div),
            Expr::PowExpr(l, r) => (l, r, LinearOp::PowExpr),
            _ => return None,
        };
        Some((&**l, &**r, op))
    }

    /// Same function node applied to a new operand.
    fn with_operand(&self, operand: Box<Expr>) -> Box<Expr> {
        Box::new(match self {
            Expr::Abs(_) => Expr::Abs(operand),
            Expr::Neg(_) => Expr::Neg(operand),
            Expr::Pow(_, n) => Expr::Pow(operand, *n),
            Expr::PowFloat(_, p) => Expr::PowFloat(operand, *p),
            Expr::Exp(_) => Expr::Exp(operand),
            Expr::Ln(_) => Expr::Ln(operand),
            Expr::Sqrt(_) => Expr::Sqrt(operand),
            Expr::Sin(_) => Expr::Sin(operand),
            Expr::Cos(_) => Expr::Cos(operand),
            Expr::Tan(_) => Expr::Tan(operand),
            other => other.clone(),
        })
    }

    /// Returns true if the variable occurs anywhere in the expression.
    pub fn contains_var(&self, name: &str) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Var(var_ref) => var_ref.name == name,
            other => {
                if let Some((l, r, _)) = other.binary_parts() {
                    l.contains_var(name) || r.contains_var(name)
                } else {
                    other
                        .unary_parts()
                        .is_some_and(|(e, _)| e.contains_var(name))
                }
            }
        }
    }

    /// Symbolic derivative with respect to the variable named `v`.
    ///
    /// Every other variable is treated as a constant. `(f^g)'` uses the power rule when
    /// `g` does not depend on `v`, so the result stays defined for negative bases.
    ///
    /// The result is not simplified; call [`Expr::simplify`] on it before evaluation.
    pub fn derivative(&self, v: &str) -> Box<Expr> {
        match self {
            Expr::Const(_) => Expr::constant(0.0),
            Expr::Var(var_ref) => Expr::constant(if var_ref.name == v { 1.0 } else { 0.0 }),

            Expr::Add(l, r) => add(l.derivative(v), r.derivative(v)),
            Expr::Sub(l, r) => sub(l.derivative(v), r.derivative(v)),
            Expr::Mul(l, r) => add(
                mul(l.clone(), r.derivative(v)),
                mul(r.clone(), l.derivative(v)),
            ),
            Expr::Div(l, r) => div(
                sub(mul(r.clone(), l.derivative(v)), mul(l.clone(), r.derivative(v))),
                pow(r.clone(), 2),
            ),

            // d|f| = f/|f| df
            Expr::Abs(e) => mul(div(e.clone(), Box::new(self.clone())), e.derivative(v)),

            Expr::Pow(base, n) => mul(
                mul(Expr::constant(*n as f64), pow(base.clone(), n - 1)),
                base.derivative(v),
            ),
            Expr::PowFloat(base, p) => mul(
                mul(
                    Expr::constant(*p),
                    Box::new(Expr::PowFloat(base.clone(), p - 1.0)),
                ),
                base.derivative(v),
            ),
            Expr::PowExpr(base, exponent) if !exponent.contains_var(v) => mul(
                mul(
                    exponent.clone(),
                    Box::new(Expr::PowExpr(
                        base.clone(),
                        sub(exponent.clone(), Expr::constant(1.0)),
                    )),
                ),
                base.derivative(v),
            ),
            // d(f^g) = f^g (g' ln f + g f'/f)
            Expr::PowExpr(base, exponent) => mul(
                Box::new(self.clone()),
                add(
                    mul(exponent.derivative(v), Box::new(Expr::Ln(base.clone()))),
                    mul(exponent.clone(), div(base.derivative(v), base.clone())),
                ),
            ),

            Expr::Exp(e) => mul(Box::new(self.clone()), e.derivative(v)),
            Expr::Ln(e) => mul(div(Expr::constant(1.0), e.clone()), e.derivative(v)),
            Expr::Sqrt(e) => mul(
                div(
                    Expr::constant(1.0),
                    mul(Expr::constant(2.0), Box::new(self.clone())),
                ),
                e.derivative(v),
            ),
            Expr::Sin(e) => mul(Box::new(Expr::Cos(e.clone())), e.derivative(v)),
            Expr::Cos(e) => mul(neg(Box::new(Expr::Sin(e.clone()))), e.derivative(v)),
            Expr::Tan(e) => div(e.derivative(v), pow(Box::new(Expr::Cos(e.clone())), 2)),
            Expr::Neg(e) => neg(e.derivative(v)),
        }
    }

    /// Bottom-up algebraic simplification.
    ///
    /// Folds constants, removes neutral elements (`x + 0`, `x * 1`, `x / 1`, `x^1`),
    /// collects like terms `a*x ± b*x`, merges powers of a common base and moves
    /// constant factors to the left. Functions of constants are folded whenever the
    /// result is finite.
    pub fn simplify(&self) -> Box<Expr> {
        match self {
            Expr::Const(_) | Expr::Var(_) => Box::new(self.clone()),
            Expr::Add(l, r) => simplify_add(l.simplify(), r.simplify()),
            Expr::Sub(l, r) => simplify_sub(l.simplify(), r.simplify()),
            Expr::Mul(l, r) => simplify_mul(l.simplify(), r.simplify()),
            Expr::Div(l, r) => simplify_div(l.simplify(), r.simplify()),

            Expr::Pow(base, n) => {
                let b = base.simplify();
                match (&*b, *n) {
                    (_, 0) => Expr::constant(1.0),
                    (Expr::Const(a), n) => Expr::constant(powi(*a, n)),
                    (_, 1) => b,
                    (Expr::Pow(inner, m), n) => pow(inner.clone(), m * n).simplify(),
                    _ => pow(b, *n),
                }
            }

            Expr::PowFloat(base, p) => {
                let b = base.simplify();
                match &*b {
                    _ if *p == 0.0 => Expr::constant(1.0),
                    Expr::Const(a) => Expr::constant(a.powf(*p)),
                    _ if *p == 1.0 => b,
                    _ if p.fract() == 0.0 && p.abs() < i32::MAX as f64 => {
                        pow(b, *p as i64).simplify()
                    }
                    _ => Box::new(Expr::PowFloat(b, *p)),
                }
            }

            Expr::PowExpr(base, exponent) => {
                let b = base.simplify();
                let e = exponent.simplify();
                match (&*b, &*e) {
                    (Expr::Const(a), Expr::Const(c)) => Expr::constant(a.powf(*c)),
                    (_, Expr::Const(c)) => Box::new(Expr::PowFloat(b.clone(), *c)).simplify(),
                    _ => Box::new(Expr::PowExpr(b, e)),
                }
            }

            function => function.simplify_function(),
        }
    }

    fn simplify_function(&self) -> Box<Expr> {
        let Some((operand, op)) = self.unary_parts() else {
            return Box::new(self.clone());
        };
        let e = operand.simplify();
        if let Expr::Const(a) = *e {
            if let Some(value) = op.apply_unary(a).filter(|value| value.is_finite()) {
                return Expr::constant(value);
            }
        }

        match (self, &*e) {
            (Expr::Abs(_), Expr::Abs(_)) => e.clone(),
            (Expr::Abs(_), Expr::Neg(inner)) => Box::new(Expr::Abs(inner.clone())).simplify(),
            // even powers are never negative
            (Expr::Abs(_), Expr::Pow(_, n)) if n % 2 == 0 => e.clone(),
            (Expr::Exp(_), Expr::Ln(inner)) | (Expr::Ln(_), Expr::Exp(inner)) => inner.clone(),
            (Expr::Sqrt(_), Expr::Pow(inner, 2)) => Box::new(Expr::Abs(inner.clone())),
            (Expr::Neg(_), Expr::Neg(inner)) => inner.clone(),
            // -(c*x) → (-c)*x
            (Expr::Neg(_), Expr::Mul(c, x)) if is_const(c) => {
                mul(neg(c.clone()), x.clone()).simplify()
            }
            _ => self.with_operand(e),
        }
    }

    /// Lowers the tree to a postfix program. Constant trees collapse into a single load.
    pub fn flatten(&self) -> FlattenedExpr {
        if let Some(constant) = self.try_evaluate_constant() {
            return FlattenedExpr {
                ops: vec![LinearOp::LoadConst(constant)],
                max_var_index: None,
                constant_result: Some(constant),
            };
        }

        let mut ops = Vec::new();
        let mut max_var_index = None;
        self.emit(&mut ops, &mut max_var_index);
        FlattenedExpr {
            ops,
            max_var_index,
            constant_result: None,
        }
    }

    fn try_evaluate_constant(&self) -> Option<f64> {
        match self {
            Expr::Const(val) => Some(*val),
            Expr::Var(_) => None,
            other => match other.binary_parts() {
                Some((l, r, op)) => {
                    op.apply_binary(l.try_evaluate_constant()?, r.try_evaluate_constant()?)
                }
                None => {
                    let (e, op) = other.unary_parts()?;
                    op.apply_unary(e.try_evaluate_constant()?)
                }
            },
        }
    }

    fn emit(&self, ops: &mut Vec<LinearOp>, max_var_index: &mut Option<u32>) {
        match self {
            Expr::Const(val) => ops.push(LinearOp::LoadConst(*val)),
            Expr::Var(var_ref) => {
                let index = var_ref.index;
                *max_var_index = Some(max_var_index.map_or(index, |m| m.max(index)));
                ops.push(LinearOp::LoadVar(index));
            }
            other => {
                if let Some((l, r, op)) = other.binary_parts() {
                    l.emit(ops, max_var_index);
                    r.emit(ops, max_var_index);
                    ops.push(op);
                } else if let Some((e, op)) = other.unary_parts() {
                    e.emit(ops, max_var_index);
                    ops.push(op);
                }
            }
        }
    }
}

fn simplify_add(l: Box<Expr>, r: Box<Expr>) -> Box<Expr> {
    match (&*l, &*r) {
        (Expr::Const(a), Expr::Const(b)) => Expr::constant(a + b),
        (_, Expr::Const(0.0)) => l,
        (Expr::Const(0.0), _) => r,
        // a*x + b*x → (a+b)*x
        (Expr::Mul(a, x), Expr::Mul(b, y)) if x == y && is_const(a) => {
            mul(add(a.clone(), b.clone()).simplify(), x.clone()).simplify()
        }
        // (x + a) + b → x + (a+b)
        (Expr::Add(x, a), Expr::Const(b)) if is_const(a) => {
            add(x.clone(), add(a.clone(), Expr::constant(*b)).simplify())
        }
        (_, Expr::Neg(y)) => sub(l.clone(), y.clone()),
        _ => add(l, r),
    }
}

fn simplify_sub(l: Box<Expr>, r: Box<Expr>) -> Box<Expr> {
    match (&*l, &*r) {
        (Expr::Const(a), Expr::Const(b)) => Expr::constant(a - b),
        (_, Expr::Const(0.0)) => l,
        (Expr::Const(0.0), _) => neg(r).simplify(),
        _ if l == r => Expr::constant(0.0),
        // a*x - b*x → (a-b)*x
        (Expr::Mul(a, x), Expr::Mul(b, y)) if x == y && is_const(a) => {
            mul(sub(a.clone(), b.clone()).simplify(), x.clone()).simplify()
        }
        (_, Expr::Neg(y)) => add(l.clone(), y.clone()),
        _ => sub(l, r),
    }
}

fn simplify_mul(l: Box<Expr>, r: Box<Expr>) -> Box<Expr> {
    if l == r && !is_const(&l) {
        return pow(l, 2).simplify();
    }
    match (&*l, &*r) {
        (Expr::Const(a), Expr::Const(b)) => Expr::constant(a * b),
        (Expr::Const(0.0), _) | (_, Expr::Const(0.0)) => Expr::constant(0.0),
        (_, Expr::Const(1.0)) => l,
        (Expr::Const(1.0), _) => r,
        (_, Expr::Const(-1.0)) => neg(l).simplify(),
        (Expr::Const(-1.0), _) => neg(r).simplify(),
        // x^a * x^b → x^(a+b)
        (Expr::Pow(x, a), Expr::Pow(y, b)) if x == y => pow(x.clone(), a + b).simplify(),
        (_, Expr::Const(c)) => mul(Expr::constant(*c), l.clone()).simplify(),
        // a * (b * x) → (a*b) * x
        (Expr::Const(a), Expr::Mul(b, x)) if is_const(b) => mul(
            mul(Expr::constant(*a), b.clone()).simplify(),
            x.clone(),
        ),
        _ => mul(l, r),
    }
}

fn simplify_div(l: Box<Expr>, r: Box<Expr>) -> Box<Expr> {
    match (&*l, &*r) {
        (Expr::Const(a), Expr::Const(b)) if *b != 0.0 => Expr::constant(a / b),
        (_, Expr::Const(1.0)) => l,
        (_, Expr::Const(-1.0)) => neg(l).simplify(),
        // x^a / x^b → x^(a-b)
        (Expr::Pow(x, a), Expr::Pow(y, b)) if x == y => pow(x.clone(), a - b).simplify(),
        // (x/y)/z → x/(y*z)
        (Expr::Div(x, y), _) => div(x.clone(), mul(y.clone(), r.clone()).simplify()),
        _ => div(l, r),
    }
}

/// Implements string formatting for expressions.
///
/// Binary operations are wrapped in parentheses, functions use call notation and
/// absolute values use |x| notation.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Const(val) => write!(f, "{val}"),
            Expr::Var(var_ref) => write!(f, "{0}", var_ref.name),
            Expr::Add(left, right) => write!(f, "({left} + {right})"),
            Expr::Mul(left, right) => write!(f, "({left} * {right})"),
            Expr::Sub(left, right) => write!(f, "({left} - {right})"),
            Expr::Div(left, right) => write!(f, "({left} / {right})"),
            Expr::Abs(expr) => write!(f, "|{expr}|"),
            Expr::Pow(base, exp) => write!(f, "({base}^{exp})"),
            Expr::PowFloat(base, exp) => write!(f, "({base}^{exp})"),
            Expr::PowExpr(base, exponent) => write!(f, "({base}^{exponent})"),
            Expr::Exp(expr) => write!(f, "exp({expr})"),
            Expr::Ln(expr) => write!(f, "ln({expr})"),
            Expr::Sqrt(expr) => write!(f, "sqrt({expr})"),
            Expr::Sin(expr) => write!(f, "sin({expr})"),
            Expr::Cos(expr) => write!(f, "cos({expr})"),
            Expr::Tan(expr) => write!(f, "tan({expr})"),
            Expr::Neg(expr) => write!(f, "-({expr})"),
        }
    }
}
