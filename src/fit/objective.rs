//! Chi-square objective with nested nuisance solve.
//!
//! One evaluation:
//!
//! 1. forward model at every observation
//! 2. closed-form `(offset, scale)` per group
//! 3. weighted squared residuals, plus a penalty for groups whose scale
//!    exceeds twice the group's mean value
//! 4. constraint penalties
//!
//! The evaluator also retunes the tolerance handed to the forward model so its
//! numerical error stays well below the statistical one.

use tracing::debug;

use crate::data::ObservationStore;
use crate::domain::{LinearCoefficients, ToleranceOptions};
use crate::error::AppError;
use crate::fit::constraints::Constraint;
use crate::math::{ModelSums, solve_linear_pair};
use crate::models::{Auxiliary, ForwardModel};

/// Halve the tolerance when the model-precision term exceeds this share of chi².
const TIGHTEN_RATIO: f64 = 0.1;
/// Double it when the term falls below this share.
const RELAX_RATIO: f64 = 0.01;

/// Everything computed during one evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Chi-square plus all penalties.
    pub objective: f64,
    pub linear: Vec<LinearCoefficients>,
    pub model_values: Vec<f64>,
    pub constraint_values: Vec<f64>,
    /// Points in groups flagged as over-subtracted.
    pub bad_fit_points: usize,
}

pub struct Objective<'a> {
    model: &'a dyn ForwardModel,
    store: &'a ObservationStore,
    constraints: &'a [Constraint],
    calibration: Vec<f64>,
    tolerance: f64,
    tolerance_ceiling: f64,
}

impl<'a> Objective<'a> {
    /// `calibration` holds one constant per group; missing groups use 0.
    pub fn new(
        model: &'a dyn ForwardModel,
        store: &'a ObservationStore,
        constraints: &'a [Constraint],
        calibration: &[f64],
        tolerance: ToleranceOptions,
    ) -> Result<Self, AppError> {
        if !(tolerance.initial > 0.0 && tolerance.ceiling > 0.0) {
            return Err(AppError::config("Tolerance settings must be positive."));
        }
        let calibration = (0..store.group_count())
            .map(|g| calibration.get(g).copied().unwrap_or(0.0))
            .collect();
        Ok(Self {
            model,
            store,
            constraints,
            calibration,
            tolerance: tolerance.initial,
            tolerance_ceiling: tolerance.ceiling,
        })
    }

    pub fn model(&self) -> &'a dyn ForwardModel {
        self.model
    }

    pub fn store(&self) -> &'a ObservationStore {
        self.store
    }

    pub fn constraints(&self) -> &'a [Constraint] {
        self.constraints
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn point_count(&self) -> usize {
        self.store.len()
    }

    /// Forward model at every observation.
    pub fn model_values(&self, params: &[f64]) -> Vec<f64> {
        self.store
            .points()
            .iter()
            .map(|p| {
                let aux = Auxiliary {
                    tag: p.tag,
                    calibration: self.calibration[p.group],
                    tolerance: self.tolerance,
                };
                self.model.evaluate(params, p.x, &aux)
            })
            .collect()
    }

    /// Closed-form nuisance pair for every group.
    pub fn solve_linear(&self, model_values: &[f64]) -> Vec<LinearCoefficients> {
        let points = self.store.points();
        self.store
            .groups()
            .iter()
            .map(|g| {
                let mut sums = ModelSums::default();
                for i in g.start..g.end {
                    sums.add(model_values[i], points[i].y, points[i].weight);
                }
                solve_linear_pair(&g.sums, &sums)
            })
            .collect()
    }

    pub fn constraint_values(&self, params: &[f64], linear: &[LinearCoefficients]) -> Vec<f64> {
        self.constraints
            .iter()
            .map(|c| c.evaluate(params, linear))
            .collect()
    }

    /// Full objective at `params`, adapting the model tolerance afterwards.
    pub fn evaluate(&mut self, params: &[f64]) -> Evaluation {
        let model_values = self.model_values(params);
        let linear = self.solve_linear(&model_values);
        let points = self.store.points();

        let mut chi2 = 0.0;
        let mut precision = 0.0;
        for (p, f) in points.iter().zip(&model_values) {
            let lc = linear[p.group];
            let raw = p.y - lc.offset - lc.scale * f;
            let term = raw * p.weight * p.weight * lc.scale * self.tolerance;
            precision += term * term;
            let r = raw * p.weight;
            chi2 += r * r;
        }

        let mut bad_fit_points = 0;
        for (g, lc) in self.store.groups().iter().zip(&linear) {
            let limit = 2.0 * g.sums.mean();
            if lc.scale > limit {
                bad_fit_points += g.len();
                let excess = lc.scale - limit;
                chi2 += excess * excess * g.sums.w2;
            }
        }

        self.adapt_tolerance((2.0 * precision).sqrt(), chi2);

        let constraint_values = self.constraint_values(params, &linear);
        let mut objective = chi2;
        for (c, v) in self.constraints.iter().zip(&constraint_values) {
            objective += c.penalty(*v);
        }

        Evaluation {
            objective,
            linear,
            model_values,
            constraint_values,
            bad_fit_points,
        }
    }

    fn adapt_tolerance(&mut self, deviation: f64, chi2: f64) {
        let ratio = deviation / chi2;
        if ratio > TIGHTEN_RATIO {
            self.tolerance *= 0.5;
            debug!(tolerance = self.tolerance, "tightened model tolerance");
        } else if ratio < RELAX_RATIO && self.tolerance < 0.99 * self.tolerance_ceiling {
            self.tolerance *= 2.0;
            debug!(tolerance = self.tolerance, "relaxed model tolerance");
        }
    }
}
