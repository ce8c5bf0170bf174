//! Two-sided approximation of x'(t) = f(t, x), x(t0) = x0 on [t0, t1].
//!
//! Starting from the upper bound v0(t) = x0 + (t - t0) and the lower bound u0(t) = x0,
//! every iteration n narrows the bracket with
//!
//! ```text
//! qn(t) = (f(t, vn) - f(t, un)) / (vn - un)          pn(t) = ∂f/∂x(t, un)
//! ψn(t) = vn'(t) - f(t, vn)                          φn(t) = -(un'(t) - f(t, un))
//! σn(t) = e^{Qn(t)} ∫ ψn e^{-Qn}                     ρn(t) = e^{Pn(t)} ∫ φn e^{-Pn}
//! v_{n+1} = vn - σn                                  u_{n+1} = un + ρn
//! ```
//!
//! where Qn and Pn are the integrals of qn and pn from t0, and vn', un' are forward
//! differences. The iteration stops once the signed width v(t1) - u(t1) drops to the
//! requested accuracy, which includes a bracket that has crossed; the solution is the
//! midpoint of the final bracket.
//!
//! The bounds are not closures nested inside each other. A `BoundChain` stores one
//! `Level` per iteration, each holding the caches for its σ, ρ, Q and P, and
//! evaluates a bound by summing the corrections of all levels below it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::errors::SolveError;
use crate::integrate::{integrate_with_step, IntegralMemo};
use crate::rhs::RightHandSide;
use crate::settings::{round_to, SolverSettings};
use crate::task::{Interval, Task};

/// Per-iteration caches, keyed by the bit pattern of t.
struct Level {
    q_integral: IntegralMemo,
    p_integral: IntegralMemo,
    sigma: RefCell<HashMap<u64, f64>>,
    rho: RefCell<HashMap<u64, f64>>,
}

impl Level {
    fn new(origin: f64, step: f64) -> Self {
        Self {
            q_integral: IntegralMemo::new(origin, step),
            p_integral: IntegralMemo::new(origin, step),
            sigma: RefCell::new(HashMap::new()),
            rho: RefCell::new(HashMap::new()),
        }
    }
}

fn memoized(cache: &RefCell<HashMap<u64, f64>>, t: f64, compute: impl FnOnce() -> f64) -> f64 {
    let key = t.to_bits();
    let cached = cache.borrow().get(&key).copied();
    if let Some(value) = cached {
        return value;
    }
    let value = compute();
    cache.borrow_mut().insert(key, value);
    value
}

/// The sequence of upper and lower bounds of one solve.
///
/// `upper(n, t)` and `lower(n, t)` are vn(t) and un(t). Level k holds σk and ρk, which
/// depend only on levels below k, so evaluating level n never re-enters its own caches.
pub(crate) struct BoundChain {
    rhs: RightHandSide,
    t0: f64,
    x0: f64,
    settings: SolverSettings,
    levels: Vec<Level>,
}

impl BoundChain {
    pub(crate) fn new(rhs: RightHandSide, t0: f64, x0: f64, settings: SolverSettings) -> Self {
        Self {
            rhs,
            t0,
            x0,
            settings,
            levels: Vec::new(),
        }
    }

    /// Number of refinement levels, i.e. the index of the newest bound pair.
    pub(crate) fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Adds the corrections σn, ρn on top of the newest bounds.
    pub(crate) fn refine(&mut self) {
        self.levels.push(Level::new(self.t0, self.settings.step));
    }

    pub(crate) fn upper(&self, depth: usize, t: f64) -> f64 {
        (0..depth).fold(self.x0 + (t - self.t0), |v, k| v - self.sigma(k, t))
    }

    pub(crate) fn lower(&self, depth: usize, t: f64) -> f64 {
        (0..depth).fold(self.x0, |u, k| u + self.rho(k, t))
    }

    /// Secant slope of f between the bounds; 0 where it is undefined.
    fn q(&self, k: usize, t: f64) -> f64 {
        let v = self.upper(k, t);
        let u = self.lower(k, t);
        let quotient = (self.rhs.value(t, v) - self.rhs.value(t, u)) / (v - u);
        if v == u || quotient.is_nan() {
            0.0
        } else {
            quotient
        }
    }

    fn p(&self, k: usize, t: f64) -> f64 {
        self.rhs.partial_x(t, self.lower(k, t))
    }

    /// Residual of the upper bound in the differential equation.
    fn psi(&self, k: usize, t: f64) -> f64 {
        let h = self.settings.derivative_step;
        let v = self.upper(k, t);
        let slope = (self.upper(k, t + h) - v) / h;
        self.snap(slope - self.rhs.value(t, v))
    }

    /// Negated residual of the lower bound.
    fn phi(&self, k: usize, t: f64) -> f64 {
        let h = self.settings.derivative_step;
        let u = self.lower(k, t);
        let slope = (self.lower(k, t + h) - u) / h;
        self.snap(-(slope - self.rhs.value(t, u)))
    }

    fn snap(&self, residual: f64) -> f64 {
        if residual.abs() < self.settings.residual_snap {
            0.0
        } else {
            round_to(residual, self.settings.residual_decimals)
        }
    }

    fn sigma(&self, k: usize, t: f64) -> f64 {
        let level = &self.levels[k];
        memoized(&level.sigma, t, || {
            let exponent = level.q_integral.anchored(|s| self.q(k, s));
            let weighted = integrate_with_step(
                |tau| self.psi(k, tau) * (-exponent.at(tau)).exp(),
                self.t0,
                t,
                self.settings.step,
            );
            exponent.at(t).exp() * weighted
        })
    }

    fn rho(&self, k: usize, t: f64) -> f64 {
        let level = &self.levels[k];
        memoized(&level.rho, t, || {
            let exponent = level.p_integral.anchored(|s| self.p(k, s));
            let weighted = integrate_with_step(
                |tau| self.phi(k, tau) * (-exponent.at(tau)).exp(),
                self.t0,
                t,
                self.settings.step,
            );
            exponent.at(t).exp() * weighted
        })
    }
}

/// An approximate solution x(t) with its error bound.
///
/// Owns the bound chain of the solve, so it can be evaluated anywhere, not only on
/// `[t0, t1]`. Evaluation fills caches through interior mutability: a `Solution` can be
/// moved to another thread but not shared between threads.
pub struct Solution {
    chain: BoundChain,
    interval: Interval,
    error: f64,
    epsilon: f64,
}

impl Solution {
    /// x(t), the midpoint of the final bracket.
    pub fn value(&self, t: f64) -> f64 {
        (self.upper(t) + self.lower(t)) / 2.0
    }

    /// Final upper bound v(t).
    pub fn upper(&self, t: f64) -> f64 {
        self.chain.upper(self.chain.depth(), t)
    }

    /// Final lower bound u(t).
    pub fn lower(&self, t: f64) -> f64 {
        self.chain.lower(self.chain.depth(), t)
    }

    /// |ε| at t1 rounded to the configured number of decimals.
    pub fn error(&self) -> f64 {
        self.error
    }

    /// Signed, unrounded bracket width v(t1) - u(t1).
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Number of refinement iterations performed.
    pub fn iterations(&self) -> usize {
        self.chain.depth()
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn rhs(&self) -> &RightHandSide {
        &self.chain.rhs
    }

    /// `(t, x(t))` at `intervals + 1` evenly spaced points across the interval.
    pub fn sample(&self, intervals: usize) -> Vec<(f64, f64)> {
        self.interval
            .grid(intervals)
            .into_iter()
            .map(|t| (t, self.value(t)))
            .collect()
    }
}

impl fmt::Debug for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solution")
            .field("differential", &self.chain.rhs.expression())
            .field("interval", &self.interval)
            .field("iterations", &self.iterations())
            .field("error", &self.error)
            .field("epsilon", &self.epsilon)
            .finish()
    }
}

/// Runs the two-sided iteration with fixed settings.
///
/// ```
/// use chaplygin::{Solver, SolverSettings, Task};
///
/// let solver = Solver::new(SolverSettings::default().with_max_iterations(2)).unwrap();
/// let solution = solver.solve(&Task::exponential_example()).unwrap();
/// assert!(solution.error() <= 0.1);
/// assert!((solution.value(0.25) - 0.5f64.exp()).abs() < 1e-2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Solver {
    settings: SolverSettings,
}

impl Solver {
    /// # Errors
    /// Returns `SolveError::InvalidSettings` if the settings fail validation.
    pub fn new(settings: SolverSettings) -> Result<Self, SolveError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Normalizes, parses and solves a task.
    ///
    /// # Errors
    /// - `SolveError::Task` for an invalid accuracy or, in strict mode, malformed numbers
    /// - `SolveError::Expression` if the differential cannot be parsed
    /// - `SolveError::Convergence` if the bracket does not narrow to the accuracy within
    ///   `max_iterations`, or its width stops being finite
    pub fn solve(&self, task: &Task) -> Result<Solution, SolveError> {
        let normalized = task.normalize(self.settings.parse_mode)?;
        for number in normalized.defaulted() {
            warn!(
                "malformed number replaced by its default {}: {:?}",
                number.value(),
                number
            );
        }
        let rhs = RightHandSide::parse(&normalized.differential)?;
        debug!(
            "solving x' = {} on {} with x0 = {}, accuracy = {}",
            rhs.expression(),
            normalized.interval(),
            normalized.x0(),
            normalized.accuracy
        );
        self.iterate(
            rhs,
            normalized.interval(),
            normalized.x0(),
            normalized.accuracy,
        )
    }

    /// Solves independent tasks in parallel. Results keep the order of `tasks`.
    pub fn solve_all(&self, tasks: &[Task]) -> Vec<Result<Solution, SolveError>> {
        tasks.par_iter().map(|task| self.solve(task)).collect()
    }

    fn iterate(
        &self,
        rhs: RightHandSide,
        interval: Interval,
        x0: f64,
        accuracy: f64,
    ) -> Result<Solution, SolveError> {
        let mut chain = BoundChain::new(rhs, interval.start, x0, self.settings);
        let t1 = interval.end;

        loop {
            chain.refine();
            let iterations = chain.depth();
            let epsilon = chain.upper(iterations, t1) - chain.lower(iterations, t1);
            debug!("iteration {iterations}: epsilon({t1}) = {epsilon}, accuracy = {accuracy}");

            if !epsilon.is_finite() {
                warn!("bracket width is no longer finite after {iterations} iteration(s)");
                return Err(SolveError::Convergence {
                    iterations,
                    epsilon,
                });
            }
            // a crossed bracket (negative width) also ends the iteration
            if epsilon <= accuracy {
                let error = round_to(epsilon, self.settings.error_decimals).abs();
                info!("converged after {iterations} iteration(s), error bound {error}");
                return Ok(Solution {
                    chain,
                    interval,
                    error,
                    epsilon,
                });
            }
            if iterations >= self.settings.max_iterations {
                warn!(
                    "no convergence within {iterations} iteration(s): epsilon = {epsilon}, accuracy = {accuracy}"
                );
                return Err(SolveError::Convergence {
                    iterations,
                    epsilon,
                });
            }
        }
    }
}

/// Solves a task with default settings.
pub fn solve(task: &Task) -> Result<Solution, SolveError> {
    Solver::default().solve(task)
}
