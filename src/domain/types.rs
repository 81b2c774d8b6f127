//! Shared domain types.
//!
//! These types are kept small and (where they cross the config boundary)
//! serializable so they can be:
//!
//! - read from the JSON run configuration
//! - passed by reference into the fitting engine
//! - written back out to the run directory

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One weighted observation.
///
/// `group` is the dense group index (`0..nfil`) assigned at load time, not the
/// raw id from the input file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub group: usize,
    pub x: f64,
    pub y: f64,
    /// Inverse uncertainty (already divided by the group normalization).
    pub weight: f64,
    /// Auxiliary tag forwarded to the forward model (e.g. satellite id).
    pub tag: i32,
}

/// Closed interval a nonlinear parameter must stay inside (fit space).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub right: f64,
}

impl Bounds {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.left && value <= self.right
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.left).min(self.right)
    }
}

/// Closed-form nuisance pair for one observation group.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinearCoefficients {
    /// Additive term (blend flux for magnification models).
    pub offset: f64,
    /// Multiplicative term (source flux). Never negative.
    pub scale: f64,
}

impl LinearCoefficients {
    /// `offset / scale`, the blending ratio.
    pub fn blending_ratio(&self) -> f64 {
        self.offset / self.scale
    }

    /// `offset + scale`, the baseline level.
    pub fn baseline(&self) -> f64 {
        self.offset + self.scale
    }
}

/// A propagated standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uncertainty {
    Bounded(f64),
    /// The propagated variance was non-positive or not a number.
    Unbounded,
}

impl Uncertainty {
    /// Value written to output files for an unbounded error.
    pub const UNBOUNDED_SENTINEL: f64 = 1.0e100;

    /// Error from a propagated variance (`gᵀ·Cov·g`).
    pub fn from_variance(variance: f64) -> Self {
        if variance > 0.0 && variance.is_finite() {
            Uncertainty::Bounded(variance.sqrt())
        } else {
            Uncertainty::Unbounded
        }
    }

    /// Error from a covariance diagonal entry, ignoring its sign.
    pub fn from_diagonal(variance: f64) -> Self {
        let err = variance.abs().sqrt();
        if err.is_finite() {
            Uncertainty::Bounded(err)
        } else {
            Uncertainty::Unbounded
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Uncertainty::Bounded(v) => Some(*v),
            Uncertainty::Unbounded => None,
        }
    }

    pub fn value_or_sentinel(&self) -> f64 {
        self.value().unwrap_or(Self::UNBOUNDED_SENTINEL)
    }
}

/// Which built-in model family to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ModelSpec {
    /// Single lens, finite source.
    #[serde(rename = "PS", alias = "ps")]
    #[value(name = "ps")]
    Ps,
    /// Single lens with annual parallax.
    #[serde(rename = "PX", alias = "px")]
    #[value(name = "px")]
    Px,
    /// Binary source, single lens.
    #[serde(rename = "BS", alias = "bs")]
    #[value(name = "bs")]
    Bs,
}

impl ModelSpec {
    pub fn code(self) -> &'static str {
        match self {
            ModelSpec::Ps => "PS",
            ModelSpec::Px => "PX",
            ModelSpec::Bs => "BS",
        }
    }
}

/// Equatorial coordinates of the target (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoordinates {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

/// A soft constraint as written in the run configuration.
///
/// `target` is resolved against the model's parameter names; see
/// `fit::constraints` for the accepted forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintSpec {
    pub target: String,
    pub value: f64,
    pub left: f64,
    pub right: f64,
}

/// Acceptance window for a finished descent.
///
/// The defaults are empirical; they are exposed so batch tooling can tune
/// them without recompiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidityThresholds {
    /// Objective must be strictly above this.
    pub min_objective: f64,
    /// Objective must be strictly below this.
    pub max_objective: f64,
    /// Bad-fit points must stay strictly below this fraction of the data.
    pub max_bad_fit_fraction: f64,
}

impl Default for ValidityThresholds {
    fn default() -> Self {
        Self {
            min_objective: 2.0,
            max_objective: 1.0e100,
            max_bad_fit_fraction: 0.5,
        }
    }
}

/// Forward-model precision knob, retuned by the objective evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToleranceOptions {
    pub initial: f64,
    /// The tolerance is only doubled while it is below `0.99 * ceiling`.
    pub ceiling: f64,
}

impl Default for ToleranceOptions {
    fn default() -> Self {
        Self {
            initial: 1.0e-2,
            ceiling: 1.0e-2,
        }
    }
}

/// Options for a batch of descents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitOptions {
    /// Number of descents started from the same initial condition.
    pub nfits: usize,
    /// Outer LM iterations per descent.
    pub max_steps: usize,
    /// Wall-clock budget for the whole batch (seconds).
    pub time_limit_secs: Option<f64>,
    /// Repulsion strength of bumpers.
    pub bumper_power: f64,
    /// Bumps allowed per descent before the batch is stopped.
    pub max_bumps: usize,
    pub thresholds: ValidityThresholds,
    pub tolerance: ToleranceOptions,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            nfits: 5,
            max_steps: 50,
            time_limit_secs: None,
            bumper_power: 2.0,
            max_bumps: 25,
            thresholds: ValidityThresholds::default(),
            tolerance: ToleranceOptions::default(),
        }
    }
}

/// The JSON run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub model: ModelSpec,
    /// Required by parallax families.
    #[serde(default)]
    pub coordinates: Option<SkyCoordinates>,
    /// Reference time for parallax offsets (defaults to the initial `t0`).
    #[serde(default)]
    pub parallax_reference: Option<f64>,
    /// Initial condition in natural units (log slots are converted on load).
    pub initial: Vec<f64>,
    /// Per-parameter trust-region scale override (fit space).
    #[serde(default)]
    pub step_sigma: Option<Vec<f64>>,
    /// Per-parameter `[left, right]` override (fit space).
    #[serde(default)]
    pub bounds: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    /// Per-group calibration constant forwarded to the model
    /// (limb darkening for the built-in families). Missing groups use 0.
    #[serde(default)]
    pub calibration: Vec<f64>,
    /// Per-group factor the weights are divided by. Missing groups use 1.
    #[serde(default)]
    pub normalizations: Vec<f64>,
    #[serde(default)]
    pub options: FitOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncertainty_guards_non_positive_variance() {
        assert_eq!(Uncertainty::from_variance(4.0), Uncertainty::Bounded(2.0));
        assert_eq!(Uncertainty::from_variance(0.0), Uncertainty::Unbounded);
        assert_eq!(Uncertainty::from_variance(-1.0), Uncertainty::Unbounded);
        assert_eq!(Uncertainty::from_variance(f64::NAN), Uncertainty::Unbounded);
        assert_eq!(Uncertainty::from_diagonal(-9.0), Uncertainty::Bounded(3.0));
        assert_eq!(Uncertainty::Unbounded.value_or_sentinel(), 1.0e100);
    }

    #[test]
    fn run_config_fills_option_defaults() {
        let json = r#"{ "model": "PS", "initial": [0.1, 20.0, 7500.0, 0.01] }"#;
        let cfg: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.model, ModelSpec::Ps);
        assert_eq!(cfg.options.nfits, 5);
        assert_eq!(cfg.options.max_steps, 50);
        assert_eq!(cfg.options.thresholds.min_objective, 2.0);
        assert!(cfg.constraints.is_empty());
    }

    #[test]
    fn run_config_rejects_unknown_fields() {
        let json = r#"{ "model": "PS", "initial": [], "bogus": 1 }"#;
        assert!(serde_json::from_str::<RunConfig>(json).is_err());
    }
}
