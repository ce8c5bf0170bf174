//! Problem statements and their normalization.
//!
//! A [`Task`] carries the four user strings exactly as entered. [`Task::normalize`]
//! turns them into numbers and a parseable expression. Parsing is lenient by default:
//! malformed numeric components degrade to `0` (or `NaN` for a non-numeric initial
//! value) and are reported as [`ParsedNumber::Defaulted`] instead of failing.
//! [`ParseMode::Strict`] turns every such default into a [`TaskError`].

use std::fmt;

use crate::errors::TaskError;

/// How malformed numeric input is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Malformed components silently become their default value.
    #[default]
    Lenient,
    /// Malformed components are errors.
    Strict,
}

/// A number parsed from user input, tagged with whether a default stood in for it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedNumber {
    Exact(f64),
    Defaulted { raw: String, value: f64 },
}

impl ParsedNumber {
    pub fn value(&self) -> f64 {
        match self {
            ParsedNumber::Exact(value) | ParsedNumber::Defaulted { value, .. } => *value,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, ParsedNumber::Defaulted { .. })
    }

    fn defaulted(raw: &str, value: f64) -> Self {
        ParsedNumber::Defaulted {
            raw: raw.to_string(),
            value,
        }
    }
}

/// The integration interval `[start, end]`. `start <= end` is not enforced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    /// `intervals + 1` evenly spaced points from `start` to `end`, both included.
    pub fn grid(&self, intervals: usize) -> Vec<f64> {
        if intervals == 0 {
            return vec![self.start];
        }
        let dt = self.width() / intervals as f64;
        (0..=intervals)
            .map(|i| self.start + i as f64 * dt)
            .collect()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A first-order initial value problem as entered by the user.
///
/// ```
/// use chaplygin::Task;
///
/// let task = Task::new("t+2x(t)^2", "x(0)=0", "[0,1/2]", 0.1);
/// let normalized = task.normalize(Default::default()).unwrap();
/// assert_eq!(normalized.differential, "t+2*x^2");
/// assert_eq!(normalized.interval().end, 0.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Right-hand side f(t, x(t)), e.g. `t+2x(t)^2`.
    pub differential: String,
    /// Initial condition of the form `x(t0)=x0`.
    pub initial: String,
    /// Interval of the form `[t0,t1]`.
    pub section: String,
    /// Target width of the final bracket at `t1`.
    pub accuracy: f64,
}

impl Task {
    pub fn new(
        differential: impl Into<String>,
        initial: impl Into<String>,
        section: impl Into<String>,
        accuracy: f64,
    ) -> Self {
        Self {
            differential: differential.into(),
            initial: initial.into(),
            section: section.into(),
            accuracy,
        }
    }

    /// Riccati equation x' = t + 2x², x(0) = 0 on [0, 1/2].
    pub fn riccati_example() -> Self {
        Self::new("t+2x(t)^2", "x(0)=0", "[0,1/2]", 0.1)
    }

    /// Exponential growth x' = 2x, x(0) = 1 on [0, 1/4].
    pub fn exponential_example() -> Self {
        Self::new("2x(t)", "x(0)=1", "[0,1/4]", 0.1)
    }

    /// Parses the numeric parts and normalizes the differential expression.
    ///
    /// # Errors
    /// - `TaskError::InvalidAccuracy` if the accuracy is not finite and positive
    /// - in strict mode, `TaskError::MalformedSection`, `TaskError::MalformedInitial`
    ///   or `TaskError::MalformedNumber` for any component lenient mode would default
    pub fn normalize(&self, mode: ParseMode) -> Result<NormalizedTask, TaskError> {
        if !self.accuracy.is_finite() || self.accuracy <= 0.0 {
            return Err(TaskError::InvalidAccuracy(self.accuracy));
        }

        let (start, end) = parse_section(&self.section);
        let initial = parse_initial(&self.initial);

        if mode == ParseMode::Strict {
            check_section(&self.section, &start, &end)?;
            check_initial(&self.initial, &initial)?;
        }

        Ok(NormalizedTask {
            differential: normalize_differential(&self.differential),
            start,
            end,
            initial,
            accuracy: self.accuracy,
        })
    }
}

/// A task with parsed numbers and a normalized expression over `t` and `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTask {
    pub differential: String,
    pub start: ParsedNumber,
    pub end: ParsedNumber,
    pub initial: ParsedNumber,
    pub accuracy: f64,
}

impl NormalizedTask {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start.value(), self.end.value())
    }

    pub fn x0(&self) -> f64 {
        self.initial.value()
    }

    /// Components that fell back to a default value.
    pub fn defaulted(&self) -> impl Iterator<Item = &ParsedNumber> {
        [&self.start, &self.end, &self.initial]
            .into_iter()
            .filter(|number| number.is_defaulted())
    }
}

fn check_section(
    section: &str,
    start: &ParsedNumber,
    end: &ParsedNumber,
) -> Result<(), TaskError> {
    let trimmed = section.trim();
    let bracketed = trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.len() >= 2;
    if !bracketed || strip_ends(trimmed).split(',').count() != 2 {
        return Err(TaskError::MalformedSection(section.to_string()));
    }
    for number in [start, end] {
        if let ParsedNumber::Defaulted { raw, .. } = number {
            return Err(TaskError::MalformedNumber(raw.clone()));
        }
    }
    Ok(())
}

fn check_initial(initial: &str, parsed: &ParsedNumber) -> Result<(), TaskError> {
    if initial.split('=').count() != 2 {
        return Err(TaskError::MalformedInitial(initial.to_string()));
    }
    match parsed {
        ParsedNumber::Defaulted { raw, .. } => Err(TaskError::MalformedNumber(raw.clone())),
        ParsedNumber::Exact(_) => Ok(()),
    }
}

/// Drops the first and last character.
fn strip_ends(s: &str) -> &str {
    let mut chars = s.chars();
    chars.next();
    chars.next_back();
    chars.as_str()
}

/// Parses a section `[a,b]` into its two endpoints.
///
/// The first and last characters are dropped without inspection and the rest is split
/// on commas; the first two parts are parsed with [`parse_fraction_or_number`]. Without
/// an interior comma both endpoints default to 0.
pub fn parse_section(section: &str) -> (ParsedNumber, ParsedNumber) {
    let mut parts = strip_ends(section).split(',');
    match (parts.next(), parts.next()) {
        (Some(left), Some(right)) => (
            parse_fraction_or_number(left.trim()),
            parse_fraction_or_number(right.trim()),
        ),
        _ => (
            ParsedNumber::defaulted(section, 0.0),
            ParsedNumber::defaulted(section, 0.0),
        ),
    }
}

/// Parses an initial condition `x(t0)=value`.
///
/// Anything but exactly one `=` yields 0. Fractions follow [`parse_fraction_or_number`];
/// any other non-numeric value yields NaN.
pub fn parse_initial(initial: &str) -> ParsedNumber {
    let parts: Vec<&str> = initial.split('=').collect();
    let [_, value] = parts.as_slice() else {
        return ParsedNumber::defaulted(initial, 0.0);
    };
    let value = value.trim();
    if value.contains('/') {
        return parse_fraction(value);
    }
    if value.is_empty() {
        return ParsedNumber::defaulted(value, 0.0);
    }
    parse_plain(value).unwrap_or_else(|| ParsedNumber::defaulted(value, f64::NAN))
}

/// Parses `a/b` or a plain number.
///
/// For fractions the first two `/`-separated parts are used; an unparsable part or a
/// zero denominator yields 0. A plain value that does not parse yields 0.
///
/// ```
/// use chaplygin::task::parse_fraction_or_number;
///
/// assert_eq!(parse_fraction_or_number("1/2").value(), 0.5);
/// assert_eq!(parse_fraction_or_number("1/0").value(), 0.0);
/// assert_eq!(parse_fraction_or_number("-0.25").value(), -0.25);
/// assert!(parse_fraction_or_number("abc").is_defaulted());
/// ```
pub fn parse_fraction_or_number(raw: &str) -> ParsedNumber {
    let raw = raw.trim();
    if raw.contains('/') {
        return parse_fraction(raw);
    }
    parse_plain(raw).unwrap_or_else(|| ParsedNumber::defaulted(raw, 0.0))
}

fn parse_fraction(raw: &str) -> ParsedNumber {
    let mut parts = raw.split('/').map(|part| parse_component(part.trim()));
    match (parts.next().flatten(), parts.next().flatten()) {
        (Some(numerator), Some(denominator)) if denominator != 0.0 => {
            ParsedNumber::Exact(numerator / denominator)
        }
        _ => ParsedNumber::defaulted(raw, 0.0),
    }
}

fn parse_plain(raw: &str) -> Option<ParsedNumber> {
    parse_component(raw).map(ParsedNumber::Exact)
}

fn parse_component(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| !value.is_nan())
}

/// Rewrites a differential expression into the syntax of the expression parser.
///
/// Every `x(t)` (whitespace-insensitive) becomes `x`, and implicit products such as
/// `2x`, `2(t+1)`, `)(`, `)x` and `2sin(t)` get an explicit `*`. Scientific notation
/// like `1e-3` is left intact.
///
/// ```
/// use chaplygin::task::normalize_differential;
///
/// assert_eq!(normalize_differential("t+2x(t)^2"), "t+2*x^2");
/// assert_eq!(normalize_differential("x ( t ) * 1e-3"), "x * 1e-3");
/// ```
pub fn normalize_differential(differential: &str) -> String {
    insert_implicit_products(&collapse_state_calls(differential))
}

/// Replaces `x\s*(\s*t\s*)` with `x`.
fn collapse_state_calls(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == 'x' {
            if let Some(end) = match_call_suffix(&chars, i + 1) {
                out.push('x');
                i = end;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Matches `\s*(\s*t\s*)` starting at `from`, returning the index past `)`.
fn match_call_suffix(chars: &[char], from: usize) -> Option<usize> {
    let mut i = from;
    let expect = |c: char, i: &mut usize| -> bool {
        while chars.get(*i).is_some_and(|ch| ch.is_whitespace()) {
            *i += 1;
        }
        if chars.get(*i) == Some(&c) {
            *i += 1;
            true
        } else {
            false
        }
    };
    (expect('(', &mut i) && expect('t', &mut i) && expect(')', &mut i)).then_some(i)
}

#[derive(Clone, Copy, PartialEq)]
enum Token {
    None,
    Identifier,
    Number,
    Close,
}

fn insert_implicit_products(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);
    let mut previous = Token::None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // exponent of a numeric literal: 1e-3, 2.5E+4, 6e2
        if previous == Token::Number && (c == 'e' || c == 'E') {
            let sign = matches!(chars.get(i + 1), Some('+') | Some('-'));
            let digit_at = if sign { i + 2 } else { i + 1 };
            if chars.get(digit_at).is_some_and(|d| d.is_ascii_digit()) {
                out.extend(&chars[i..=digit_at]);
                i = digit_at + 1;
                continue;
            }
        }

        let starts_name = c.is_alphabetic() || c == '_';
        let needs_product = match previous {
            Token::Number => starts_name || c == '(',
            Token::Close => starts_name || c == '(' || c.is_ascii_digit() || c == '.',
            Token::Identifier | Token::None => false,
        };
        if needs_product {
            out.push('*');
        }
        out.push(c);

        previous = if starts_name {
            Token::Identifier
        } else if c.is_ascii_digit() || c == '.' {
            if previous == Token::Identifier {
                Token::Identifier
            } else {
                Token::Number
            }
        } else if c == ')' {
            Token::Close
        } else {
            Token::None
        };
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections() {
        let (start, end) = parse_section("[0,1/2]");
        assert_eq!(start, ParsedNumber::Exact(0.0));
        assert_eq!(end, ParsedNumber::Exact(0.5));

        let (start, end) = parse_section("( -1 , 2.5 )");
        assert_eq!((start.value(), end.value()), (-1.0, 2.5));
    }

    #[test]
    fn section_defaults() {
        let (start, end) = parse_section("[abc,1/0]");
        assert!(start.is_defaulted() && end.is_defaulted());
        assert_eq!((start.value(), end.value()), (0.0, 0.0));

        let (start, end) = parse_section("[,1]");
        assert_eq!(start.value(), 0.0);
        assert!(start.is_defaulted());
        assert_eq!(end, ParsedNumber::Exact(1.0));

        let (start, end) = parse_section("[0.5]");
        assert!(start.is_defaulted() && end.is_defaulted());
        assert_eq!((start.value(), end.value()), (0.0, 0.0));
    }

    #[test]
    fn parses_initial_conditions() {
        assert_eq!(parse_initial("x(0)=1"), ParsedNumber::Exact(1.0));
        assert_eq!(parse_initial("x(0) = 3/4").value(), 0.75);
        assert_eq!(parse_initial("x(0)=-2.5"), ParsedNumber::Exact(-2.5));
    }

    #[test]
    fn initial_defaults() {
        let garbage = parse_initial("garbage");
        assert!(garbage.is_defaulted());
        assert_eq!(garbage.value(), 0.0);

        assert_eq!(parse_initial("x(0)=1/0").value(), 0.0);
        assert_eq!(parse_initial("x(0)=1=2").value(), 0.0);
        assert!(parse_initial("x(0)=abc").value().is_nan());
    }

    #[test]
    fn fraction_uses_first_two_parts() {
        assert_eq!(parse_fraction_or_number("1/2/3").value(), 0.5);
        assert!(parse_fraction_or_number("a/2").is_defaulted());
        assert!(parse_fraction_or_number("1/").is_defaulted());
    }

    #[test]
    fn collapses_state_calls() {
        assert_eq!(collapse_state_calls("t+2x(t)^2"), "t+2x^2");
        assert_eq!(collapse_state_calls("x ( t )*x(\tt)"), "x*x");
        assert_eq!(collapse_state_calls("x(s)"), "x(s)");
    }

    #[test]
    fn inserts_implicit_products() {
        for (input, expected) in [
            ("2x", "2*x"),
            ("2(t+1)", "2*(t+1)"),
            ("(t+1)(x-1)", "(t+1)*(x-1)"),
            ("(t+1)x", "(t+1)*x"),
            ("(t)2", "(t)*2"),
            ("2sin(t)", "2*sin(t)"),
            ("0.5t", "0.5*t"),
            ("2e", "2*e"),
            ("2exp(t)", "2*exp(t)"),
            ("1e-3*x", "1e-3*x"),
            ("2.5E+4", "2.5E+4"),
            ("x2 + t", "x2 + t"),
            ("sin(t) + cos(x)", "sin(t) + cos(x)"),
        ] {
            assert_eq!(insert_implicit_products(input), expected, "input {input}");
        }
    }

    #[test]
    fn normalizes_examples() {
        let riccati = Task::riccati_example().normalize(ParseMode::Lenient).unwrap();
        assert_eq!(riccati.differential, "t+2*x^2");
        assert_eq!(riccati.interval(), Interval::new(0.0, 0.5));
        assert_eq!(riccati.x0(), 0.0);
        assert_eq!(riccati.defaulted().count(), 0);

        let exponential = Task::exponential_example()
            .normalize(ParseMode::Strict)
            .unwrap();
        assert_eq!(exponential.differential, "2*x");
        assert_eq!(exponential.interval().end, 0.25);
        assert_eq!(exponential.x0(), 1.0);
    }

    #[test]
    fn rejects_invalid_accuracy() {
        for accuracy in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            let task = Task::new("x", "x(0)=1", "[0,1]", accuracy);
            assert!(matches!(
                task.normalize(ParseMode::Lenient),
                Err(TaskError::InvalidAccuracy(_))
            ));
        }
    }

    #[test]
    fn strict_mode_reports_defaults() {
        let lenient = Task::new("x", "garbage", "[0,1]", 0.1)
            .normalize(ParseMode::Lenient)
            .unwrap();
        assert_eq!(lenient.defaulted().count(), 1);

        let strict = |initial: &str, section: &str| {
            Task::new("x", initial, section, 0.1).normalize(ParseMode::Strict)
        };
        assert_eq!(
            strict("garbage", "[0,1]"),
            Err(TaskError::MalformedInitial("garbage".into()))
        );
        assert_eq!(
            strict("x(0)=1/0", "[0,1]"),
            Err(TaskError::MalformedNumber("1/0".into()))
        );
        assert_eq!(
            strict("x(0)=1", "0,1"),
            Err(TaskError::MalformedSection("0,1".into()))
        );
        assert_eq!(
            strict("x(0)=1", "[0,1,2]"),
            Err(TaskError::MalformedSection("[0,1,2]".into()))
        );
        assert_eq!(
            strict("x(0)=1", "[0,one]"),
            Err(TaskError::MalformedNumber("one".into()))
        );
        assert!(strict("x(0)=1", "[0, 1/4]").is_ok());
    }

    #[test]
    fn interval_grid() {
        let grid = Interval::new(0.0, 1.0).grid(4);
        assert_eq!(grid, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(Interval::new(2.0, 3.0).grid(0), vec![2.0]);
        assert_eq!(Interval::new(0.0, 0.5).to_string(), "[0, 0.5]");
    }
}
