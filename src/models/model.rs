//! The forward-model capability the fit engine is written against.
//!
//! The engine only ever needs:
//! - the parameter layout (names, which slots live in log space)
//! - a pure evaluation `f(params, x, aux)`
//! - a way to turn fit-space values back into reported values
//!
//! The built-in families implement this in `family`; tests and external
//! callers can implement it for their own models.

use crate::domain::Uncertainty;

/// Per-point side information handed to the forward model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Auxiliary {
    /// Observation tag (satellite id for the built-in families).
    pub tag: i32,
    /// Calibration constant of the point's group.
    pub calibration: f64,
    /// Current relative tolerance requested from the model.
    pub tolerance: f64,
}

impl Default for Auxiliary {
    fn default() -> Self {
        Self {
            tag: 0,
            calibration: 0.0,
            tolerance: 1.0e-2,
        }
    }
}

/// A pure forward model.
///
/// `evaluate` must return the same value for the same arguments: the
/// optimizer calls it many times per iteration for finite differences.
pub trait ForwardModel {
    fn parameter_names(&self) -> &[&'static str];

    /// Slots stored as natural logarithms in fit space.
    fn log_positions(&self) -> &[usize] {
        &[]
    }

    fn evaluate(&self, params: &[f64], x: f64, aux: &Auxiliary) -> f64;

    fn parameter_count(&self) -> usize {
        self.parameter_names().len()
    }

    fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameter_names().iter().position(|n| *n == name)
    }

    fn is_log(&self, index: usize) -> bool {
        self.log_positions().contains(&index)
    }

    /// Fit-space parameters as reported to the user (log slots exponentiated).
    fn reported(&self, params: &[f64]) -> Vec<f64> {
        params
            .iter()
            .enumerate()
            .map(|(i, p)| if self.is_log(i) { p.exp() } else { *p })
            .collect()
    }

    /// Errors carried through the same transform as `reported`.
    fn reported_errors(&self, params: &[f64], errors: &[Uncertainty]) -> Vec<Uncertainty> {
        errors
            .iter()
            .zip(params)
            .enumerate()
            .map(|(i, (err, p))| match err {
                Uncertainty::Bounded(e) if self.is_log(i) => Uncertainty::Bounded(e * p.exp()),
                other => *other,
            })
            .collect()
    }

    /// One-line human-readable parameter summary.
    fn format_report(&self, params: &[f64]) -> String {
        self.parameter_names()
            .iter()
            .zip(self.reported(params))
            .map(|(name, v)| format!("{name}={v:.6}"))
            .collect::<Vec<_>>()
            .join("  ")
    }
}
