//! Soft constraints on parameters and derived quantities.
//!
//! A constraint adds `((c(p) − target) / scale)²` to the objective, where
//! `scale` is the left or right width depending on which side of the target
//! the current value sits.
//!
//! Accepted `target` strings:
//!
//! - `<name>`: a model parameter, target given in natural units
//! - `log_<name>`: the same parameter, target given as log10
//! - `g_<k>`: blending ratio `offset / scale` of group `k`
//! - `muangle`: `atan2(piE, piN)`
//! - `t*`: source crossing time `exp(tE + rho)`

use std::f64::consts::LN_10;

use crate::domain::{ConstraintSpec, LinearCoefficients};
use crate::error::AppError;
use crate::models::ForwardModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintTarget {
    /// A nonlinear parameter slot.
    Parameter(usize),
    /// `offset / scale` of one group.
    BlendingRatio(usize),
    /// Direction of the parallax vector.
    ParallaxAngle { north: usize, east: usize },
    /// `exp(tE + rho)` with both slots in log space.
    CrossingTime { te: usize, rho: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub label: String,
    pub target: ConstraintTarget,
    /// Target value in fit space.
    pub value: f64,
    pub left: f64,
    pub right: f64,
}

impl Constraint {
    /// Resolve a configured constraint against a model layout.
    pub fn from_spec(
        spec: &ConstraintSpec,
        model: &dyn ForwardModel,
        group_count: usize,
    ) -> Result<Self, AppError> {
        let name = spec.target.trim();
        if !(spec.value.is_finite() && spec.left.is_finite() && spec.right.is_finite()) {
            return Err(AppError::config(format!(
                "Constraint `{name}` has non-finite value or scales."
            )));
        }

        let mut value = spec.value;
        let mut left = spec.left.abs();
        let mut right = spec.right.abs();

        let target = if let Some(i) = model.parameter_index(name) {
            if model.is_log(i) {
                if value <= 0.0 {
                    return Err(AppError::config(format!(
                        "Constraint `{name}` targets a log-space parameter and needs a positive value."
                    )));
                }
                left /= value;
                right /= value;
                value = value.ln();
            }
            ConstraintTarget::Parameter(i)
        } else if let Some(i) = name.strip_prefix("log_").and_then(|n| model.parameter_index(n)) {
            if model.is_log(i) {
                value *= LN_10;
                left *= LN_10;
                right *= LN_10;
            } else {
                value = 10f64.powf(value);
                left *= value * LN_10;
                right *= value * LN_10;
            }
            ConstraintTarget::Parameter(i)
        } else if let Some(k) = name.strip_prefix("g_") {
            let group: usize = k.parse().map_err(|_| {
                AppError::config(format!("Constraint `{name}`: `{k}` is not a group index."))
            })?;
            if group >= group_count {
                return Err(AppError::config(format!(
                    "Constraint `{name}`: group {group} does not exist ({group_count} groups)."
                )));
            }
            ConstraintTarget::BlendingRatio(group)
        } else if name == "muangle" {
            let (north, east) = named_pair(model, name, "piN", "piE")?;
            ConstraintTarget::ParallaxAngle { north, east }
        } else if name == "t*" {
            let (te, rho) = named_pair(model, name, "tE", "rho")?;
            ConstraintTarget::CrossingTime { te, rho }
        } else {
            return Err(AppError::config(format!(
                "Unknown constraint target `{name}` for parameters [{}].",
                model.parameter_names().join(", ")
            )));
        };

        if !(left > 0.0 && right > 0.0 && value.is_finite()) {
            return Err(AppError::config(format!(
                "Constraint `{name}` needs positive left/right scales."
            )));
        }

        Ok(Self {
            label: name.to_string(),
            target,
            value,
            left,
            right,
        })
    }

    /// Current value of the constrained quantity.
    pub fn evaluate(&self, nonlinear: &[f64], linear: &[LinearCoefficients]) -> f64 {
        match self.target {
            ConstraintTarget::Parameter(i) => nonlinear[i],
            ConstraintTarget::BlendingRatio(g) => linear[g].blending_ratio(),
            ConstraintTarget::ParallaxAngle { north, east } => nonlinear[east].atan2(nonlinear[north]),
            ConstraintTarget::CrossingTime { te, rho } => (nonlinear[te] + nonlinear[rho]).exp(),
        }
    }

    /// Width on the side of the target where `current` lies.
    pub fn side_scale(&self, current: f64) -> f64 {
        if current - self.value > 0.0 {
            self.right
        } else {
            self.left
        }
    }

    pub fn normalized_residual(&self, current: f64) -> f64 {
        (current - self.value) / self.side_scale(current)
    }

    pub fn penalty(&self, current: f64) -> f64 {
        let r = self.normalized_residual(current);
        r * r
    }
}

fn named_pair(
    model: &dyn ForwardModel,
    target: &str,
    a: &str,
    b: &str,
) -> Result<(usize, usize), AppError> {
    match (model.parameter_index(a), model.parameter_index(b)) {
        (Some(i), Some(j)) => Ok((i, j)),
        _ => Err(AppError::config(format!(
            "Constraint `{target}` needs parameters `{a}` and `{b}`."
        ))),
    }
}
