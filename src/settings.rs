//! Settings for the two-sided iteration

use crate::errors::SolveError;
use crate::integrate::DEFAULT_STEP;
use crate::task::ParseMode;

/// Settings for the [`Solver`](crate::Solver).
///
/// Every field has a default matching the classical formulation of the method; the
/// `with_*` setters override one field at a time.
///
/// ```
/// use chaplygin::{ParseMode, SolverSettings};
///
/// let settings = SolverSettings::default()
///     .with_max_iterations(2)
///     .with_parse_mode(ParseMode::Strict);
/// assert_eq!(settings.max_iterations, 2);
/// assert_eq!(settings.step, 0.01);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Maximum number of refinement levels before giving up. Evaluation cost grows
    /// geometrically with every level. Default: 4.
    pub max_iterations: usize,
    /// Trapezoidal quadrature step. Default: 0.01.
    pub step: f64,
    /// Forward-difference step for the derivatives of the bounds. Default: 1e-6.
    pub derivative_step: f64,
    /// Residuals below this magnitude are treated as exactly zero. Default: 1e-9.
    pub residual_snap: f64,
    /// Decimal places residuals are rounded to. Default: 10.
    pub residual_decimals: i32,
    /// Decimal places of the reported error bound. Default: 5.
    pub error_decimals: i32,
    /// Treatment of malformed numbers in tasks. Default: lenient.
    pub parse_mode: ParseMode,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            step: DEFAULT_STEP,
            derivative_step: 1e-6,
            residual_snap: 1e-9,
            residual_decimals: 10,
            error_decimals: 5,
            parse_mode: ParseMode::Lenient,
        }
    }
}

impl SolverSettings {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    pub fn with_derivative_step(mut self, derivative_step: f64) -> Self {
        self.derivative_step = derivative_step;
        self
    }

    pub fn with_residual_snap(mut self, residual_snap: f64) -> Self {
        self.residual_snap = residual_snap;
        self
    }

    pub fn with_residual_decimals(mut self, residual_decimals: i32) -> Self {
        self.residual_decimals = residual_decimals;
        self
    }

    pub fn with_error_decimals(mut self, error_decimals: i32) -> Self {
        self.error_decimals = error_decimals;
        self
    }

    pub fn with_parse_mode(mut self, parse_mode: ParseMode) -> Self {
        self.parse_mode = parse_mode;
        self
    }

    /// Checks that every field is usable.
    ///
    /// # Errors
    /// Returns `SolveError::InvalidSettings` naming the first offending field.
    pub fn validate(&self) -> Result<(), SolveError> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(SolveError::InvalidSettings(format!(
                    "{name} must be a finite positive number, got {value}"
                )))
            }
        };
        if self.max_iterations == 0 {
            return Err(SolveError::InvalidSettings(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        positive("step", self.step)?;
        positive("derivative_step", self.derivative_step)?;
        if !(self.residual_snap.is_finite() && self.residual_snap >= 0.0) {
            return Err(SolveError::InvalidSettings(format!(
                "residual_snap must be a finite non-negative number, got {}",
                self.residual_snap
            )));
        }
        for (name, decimals) in [
            ("residual_decimals", self.residual_decimals),
            ("error_decimals", self.error_decimals),
        ] {
            if !(0..=15).contains(&decimals) {
                return Err(SolveError::InvalidSettings(format!(
                    "{name} must lie in 0..=15, got {decimals}"
                )));
            }
        }
        Ok(())
    }
}

/// Rounds to `decimals` places, leaving values too large to scale untouched.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let scaled = value * scale;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = SolverSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_iterations, 4);
        assert_eq!(settings.derivative_step, 1e-6);
        assert_eq!(settings.residual_snap, 1e-9);
        assert_eq!(settings.residual_decimals, 10);
        assert_eq!(settings.error_decimals, 5);
        assert_eq!(settings.parse_mode, ParseMode::Lenient);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let invalid = [
            SolverSettings::default().with_max_iterations(0),
            SolverSettings::default().with_step(0.0),
            SolverSettings::default().with_step(f64::NAN),
            SolverSettings::default().with_derivative_step(-1e-6),
            SolverSettings::default().with_residual_snap(f64::INFINITY),
            SolverSettings::default().with_residual_decimals(-1),
            SolverSettings::default().with_error_decimals(16),
        ];
        for settings in invalid {
            assert!(
                matches!(settings.validate(), Err(SolveError::InvalidSettings(_))),
                "{settings:?}"
            );
        }
        assert!(SolverSettings::default()
            .with_residual_snap(0.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(0.0170349, 5), 0.01703);
        assert_eq!(round_to(-0.123456, 2), -0.12);
        assert_eq!(round_to(1e300, 10), 1e300);
        assert!(round_to(f64::NAN, 5).is_nan());
    }
}
