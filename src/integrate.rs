//! Fixed-step composite trapezoidal quadrature.
//!
//! The step is fixed at construction and only shrunk so that it divides the
//! interval evenly: `n = ceil(|b - a| / step)` sub-intervals of width `(b - a) / n`.
//! Reversed bounds negate the result exactly, a zero-width interval yields exactly 0.
//!
//! [`IntegralMemo`] adds a lazily filled cache for integrals with a fixed lower bound,
//! keyed by the bit pattern of the upper bound. [`AnchoredIntegral`] pairs such a cache
//! with its integrand, either owning the cache or borrowing one.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;

/// Default quadrature step.
pub const DEFAULT_STEP: f64 = 0.01;

/// Integrates `g` over `[a, b]` with the default step.
///
/// ```
/// use chaplygin::integrate::integrate;
///
/// let area = integrate(|t| 2.0 * t, 0.0, 1.0);
/// assert!((area - 1.0).abs() < 1e-12);
/// assert_eq!(integrate(|t| t, 0.5, 0.5), 0.0);
/// ```
pub fn integrate<G: Fn(f64) -> f64>(g: G, a: f64, b: f64) -> f64 {
    integrate_with_step(g, a, b, DEFAULT_STEP)
}

/// Integrates `g` over `[a, b]` with sub-intervals no wider than `step`.
///
/// `step` must be finite and positive; callers validate it up front.
pub fn integrate_with_step<G: Fn(f64) -> f64>(g: G, a: f64, b: f64, step: f64) -> f64 {
    if a == b {
        return 0.0;
    }
    if a > b {
        return -integrate_with_step(g, b, a, step);
    }
    let steps = ((b - a) / step).ceil().max(1.0) as usize;
    let h = (b - a) / steps as f64;
    let mut sum = 0.5 * (g(a) + g(b));
    for i in 1..steps {
        sum += g(a + i as f64 * h);
    }
    sum * h
}

/// Memoized values of `∫_{origin}^{t} integrand(τ) dτ`.
///
/// The integrand is supplied on every call rather than stored, so the memo can live
/// next to the data the integrand borrows. Callers must pass the same integrand for
/// the lifetime of the memo, or bind one once with [`IntegralMemo::anchored`].
#[derive(Debug, Clone)]
pub struct IntegralMemo {
    origin: f64,
    step: f64,
    cache: RefCell<HashMap<u64, f64>>,
}

impl IntegralMemo {
    pub fn new(origin: f64, step: f64) -> Self {
        Self {
            origin,
            step,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Lower bound of every integral in this memo.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Returns the integral up to `t`, computing it on the first request.
    pub fn evaluate<G: Fn(f64) -> f64>(&self, integrand: G, t: f64) -> f64 {
        let key = t.to_bits();
        let cached = self.cache.borrow().get(&key).copied();
        if let Some(value) = cached {
            return value;
        }
        let value = integrate_with_step(integrand, self.origin, t, self.step);
        self.cache.borrow_mut().insert(key, value);
        value
    }

    /// Binds `integrand` to this memo. Values cached through the returned view stay in
    /// the memo after the view is dropped.
    pub fn anchored<G: Fn(f64) -> f64>(&self, integrand: G) -> AnchoredIntegral<'_, G> {
        AnchoredIntegral {
            integrand,
            memo: Cow::Borrowed(self),
        }
    }

    /// Number of cached upper bounds.
    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }
}

/// An integral with a fixed integrand and lower bound, evaluable at any upper bound.
pub struct AnchoredIntegral<'m, G> {
    integrand: G,
    memo: Cow<'m, IntegralMemo>,
}

impl<G: Fn(f64) -> f64> AnchoredIntegral<'_, G> {
    /// Evaluates `∫_{origin}^{t} integrand`.
    pub fn at(&self, t: f64) -> f64 {
        self.memo.evaluate(&self.integrand, t)
    }

    /// Number of distinct upper bounds evaluated so far.
    pub fn cached(&self) -> usize {
        self.memo.len()
    }
}

/// Builds the memoized integral `t ↦ ∫_{origin}^{t} f(τ) dτ` with the default step.
///
/// ```
/// use chaplygin::integrate::integral_from;
///
/// let area = integral_from(|t| 3.0 * t * t, 0.0);
/// assert!((area.at(1.0) - 1.0).abs() < 1e-4);
/// assert_eq!(area.cached(), 1);
/// ```
pub fn integral_from<G: Fn(f64) -> f64>(f: G, origin: f64) -> AnchoredIntegral<'static, G> {
    AnchoredIntegral {
        integrand: f,
        memo: Cow::Owned(IntegralMemo::new(origin, DEFAULT_STEP)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::Cell;

    #[test]
    fn zero_width_interval_is_exactly_zero() {
        assert_eq!(integrate(|t| t.exp(), 0.3, 0.3), 0.0);
        assert_eq!(integrate(|_| f64::NAN, 1.0, 1.0), 0.0);
    }

    #[test]
    fn reversed_bounds_negate_exactly() {
        let g = |t: f64| t.sin() + t * t;
        for (a, b) in [(0.0, 0.5), (-1.25, 0.3), (0.1, 2.0)] {
            assert_eq!(integrate(g, b, a), -integrate(g, a, b));
        }
    }

    #[test]
    fn linear_integrands_are_exact() {
        assert_relative_eq!(integrate(|t| 2.0 * t + 1.0, 0.0, 0.5), 0.75, epsilon = 1e-14);
        assert_relative_eq!(integrate(|_| 4.0, -1.0, 1.0), 8.0, epsilon = 1e-14);
    }

    #[test]
    fn quadratic_error_matches_trapezoid_bound() {
        // error of the composite rule is (b - a) h^2 / 12 * g'' for g = t^2
        let exact = 1.0 / 3.0;
        let approx = integrate(|t| t * t, 0.0, 1.0);
        assert_relative_eq!(approx - exact, 0.01 * 0.01 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn step_shrinks_to_divide_interval() {
        // 0.015 needs two sub-intervals of 0.0075
        let calls = Cell::new(0);
        integrate(
            |t| {
                calls.set(calls.get() + 1);
                t
            },
            0.0,
            0.015,
        );
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn explicit_step() {
        let coarse = integrate_with_step(|t| t.exp(), 0.0, 1.0, 0.1);
        let fine = integrate_with_step(|t| t.exp(), 0.0, 1.0, 0.001);
        let exact = 1f64.exp() - 1.0;
        assert!((fine - exact).abs() < (coarse - exact).abs());
        assert_relative_eq!(fine, exact, epsilon = 1e-6);
    }

    #[test]
    fn memo_evaluates_each_bound_once() {
        let calls = Cell::new(0);
        let memo = IntegralMemo::new(0.0, DEFAULT_STEP);
        let integrand = |t: f64| {
            calls.set(calls.get() + 1);
            t
        };
        let first = memo.evaluate(integrand, 0.5);
        let after_first = calls.get();
        let second = memo.evaluate(integrand, 0.5);
        assert_eq!(first, second);
        assert_eq!(calls.get(), after_first);
        assert_eq!(memo.len(), 1);

        memo.evaluate(integrand, 0.25);
        assert_eq!(memo.len(), 2);
        assert!(calls.get() > after_first);
    }

    #[test]
    fn anchored_integral_respects_origin() {
        let integral = integral_from(|_| 1.0, 0.25);
        assert_relative_eq!(integral.at(1.0), 0.75, epsilon = 1e-14);
        assert_relative_eq!(integral.at(0.0), -0.25, epsilon = 1e-14);
        assert_eq!(integral.at(0.25), 0.0);
        assert_eq!(integral.cached(), 3);
    }

    #[test]
    fn anchored_view_fills_the_shared_memo() {
        let memo = IntegralMemo::new(0.0, DEFAULT_STEP);
        {
            let view = memo.anchored(|t| 2.0 * t);
            assert_relative_eq!(view.at(1.0), 1.0, epsilon = 1e-12);
            assert_eq!(view.cached(), 1);
        }
        assert_eq!(memo.len(), 1);

        // a later view over the same memo reuses the cached value
        let other = memo.anchored(|_| f64::NAN);
        assert_relative_eq!(other.at(1.0), 1.0, epsilon = 1e-12);
        assert_eq!(memo.len(), 1);
    }
}
