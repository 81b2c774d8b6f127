//! Levenberg-Marquardt descents with bumper-driven restarts.
//!
//! A batch runs `nfits` descents in sequence. Each descent:
//!
//! 1. starts from the restart point of the step chain
//! 2. iterates damped Gauss-Newton steps, retrying with larger damping until
//!    the objective improves (at most 20 tries per step)
//! 3. kicks the accepted point out of any bumper it lands in
//! 4. stops on a stalled objective, runaway damping, the step ceiling or a
//!    resource limit
//!
//! The finished descent leaves a bumper behind, gets its covariance, and is
//! validated; the step chain is then cut back so the next descent starts
//! outside every known basin.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::domain::{Bounds, FitOptions, LinearCoefficients};
use crate::error::AppError;
use crate::fit::bumper::{Bumper, BumperRegistry, StepChain};
use crate::fit::covariance::Covariance;
use crate::fit::gradient::build_jacobian;
use crate::fit::objective::{Evaluation, Objective};
use crate::math::{damped_matrix, solve};

const INITIAL_LAMBDA: f64 = 3.0;
const LAMBDA_FACTOR: f64 = 3.0;
const MAX_DAMPING_TRIES: usize = 20;
const DIVERGENCE_LAMBDA: f64 = 1.0e10;
const STALL_TOLERANCE: f64 = 1.0e-3;
const STALL_LIMIT: usize = 3;
/// Weight of the bound when a step is reflected back inside.
const BOUND_PULL: f64 = 0.99;

/// Why a descent stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The objective stalled for three consecutive steps.
    Converged,
    /// Damping grew past the divergence ceiling.
    Diverged,
    /// Outer step ceiling reached.
    StepLimit,
    /// Wall-clock budget or bump ceiling reached; the batch stops after this descent.
    ResourceLimit,
}

impl Termination {
    pub fn label(self) -> &'static str {
        match self {
            Termination::Converged => "converged",
            Termination::Diverged => "diverged",
            Termination::StepLimit => "step-limit",
            Termination::ResourceLimit => "resource-limit",
        }
    }
}

/// Fixed per-run search geometry and options (fit space).
#[derive(Debug, Clone)]
pub struct FitSetup {
    pub bounds: Vec<Bounds>,
    pub step_sigma: Vec<f64>,
    pub options: FitOptions,
}

#[derive(Debug, Clone)]
pub struct DescentOutcome {
    pub index: usize,
    /// Final nonlinear parameters (fit space).
    pub params: Vec<f64>,
    pub linear: Vec<LinearCoefficients>,
    /// Reported objective: the raw value, or −1 when the result is invalid.
    pub objective: f64,
    pub raw_objective: f64,
    pub valid: bool,
    pub termination: Termination,
    pub steps: usize,
    pub bumps: usize,
    pub bad_fit_points: usize,
    pub constraint_values: Vec<f64>,
    pub covariance: Covariance,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub descents: Vec<DescentOutcome>,
    /// Number of descents asked for; lowered to the completed count when a
    /// resource limit stops the batch.
    pub requested: usize,
    /// Index into `descents` of the lowest valid objective.
    pub best: Option<usize>,
    pub stopped_early: bool,
}

impl BatchOutcome {
    pub fn best_descent(&self) -> Option<&DescentOutcome> {
        self.best.map(|i| &self.descents[i])
    }
}

/// Sink for per-step traces and per-descent results.
pub trait FitRecorder {
    fn record_step(&mut self, descent: usize, params: &[f64], eval: &Evaluation) -> Result<(), AppError>;
    fn record_descent(&mut self, outcome: &DescentOutcome) -> Result<(), AppError>;
}

/// Recorder that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecorder;

impl FitRecorder for NoRecorder {
    fn record_step(&mut self, _descent: usize, _params: &[f64], _eval: &Evaluation) -> Result<(), AppError> {
        Ok(())
    }

    fn record_descent(&mut self, _outcome: &DescentOutcome) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct Optimizer<'a> {
    objective: Objective<'a>,
    setup: &'a FitSetup,
    registry: BumperRegistry,
    chain: StepChain,
    deadline: Option<Instant>,
}

impl<'a> Optimizer<'a> {
    /// Validate the setup against the model layout and seed the step chain
    /// with `initial`, clamped into the bounds.
    pub fn new(objective: Objective<'a>, setup: &'a FitSetup, initial: &[f64]) -> Result<Self, AppError> {
        let nps = objective.model().parameter_count();
        if initial.len() != nps || setup.bounds.len() != nps || setup.step_sigma.len() != nps {
            return Err(AppError::config(format!(
                "Parameter layout mismatch: model has {nps} parameters, initial {}, bounds {}, step sigma {}.",
                initial.len(),
                setup.bounds.len(),
                setup.step_sigma.len()
            )));
        }
        for (i, b) in setup.bounds.iter().enumerate() {
            if !(b.left.is_finite() && b.right.is_finite() && b.left <= b.right) {
                return Err(AppError::config(format!(
                    "Invalid bounds [{}, {}] for parameter {i}.",
                    b.left, b.right
                )));
            }
        }
        if setup.step_sigma.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(AppError::config("Step sigmas must be positive and finite."));
        }
        let options = &setup.options;
        if !options.bumper_power.is_finite() {
            return Err(AppError::config("Bumper power must be finite."));
        }
        if options
            .time_limit_secs
            .is_some_and(|t| !(t.is_finite() && t > 0.0))
        {
            return Err(AppError::config("Time limit must be a positive number of seconds."));
        }

        let names = objective.model().parameter_names();
        let start: Vec<f64> = initial
            .iter()
            .zip(&setup.bounds)
            .enumerate()
            .map(|(i, (v, b))| {
                if b.contains(*v) {
                    *v
                } else {
                    let clamped = b.clamp(*v);
                    warn!(
                        parameter = names[i],
                        initial = *v,
                        clamped,
                        "initial value outside bounds, clamped"
                    );
                    clamped
                }
            })
            .collect();

        Ok(Self {
            objective,
            setup,
            registry: BumperRegistry::new(),
            chain: StepChain::new(start),
            deadline: None,
        })
    }

    pub fn registry(&self) -> &BumperRegistry {
        &self.registry
    }

    pub fn chain(&self) -> &StepChain {
        &self.chain
    }

    /// Run `nfits` descents, stopping early on a resource limit.
    pub fn run_batch(&mut self, recorder: &mut dyn FitRecorder) -> Result<BatchOutcome, AppError> {
        let setup = self.setup;
        let options = &setup.options;
        self.deadline = options
            .time_limit_secs
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .and_then(|d| Instant::now().checked_add(d));

        let mut descents = Vec::with_capacity(options.nfits);
        let mut stopped_early = false;
        for index in 0..options.nfits {
            let outcome = self.descend(index, recorder)?;
            recorder.record_descent(&outcome)?;
            let stop = outcome.termination == Termination::ResourceLimit;
            descents.push(outcome);
            if stop {
                warn!(
                    completed = descents.len(),
                    requested = options.nfits,
                    "resource limit reached, stopping batch"
                );
                stopped_early = true;
                break;
            }
        }

        let best = descents
            .iter()
            .enumerate()
            .filter(|(_, d)| d.valid)
            .min_by(|a, b| a.1.objective.total_cmp(&b.1.objective))
            .map(|(i, _)| i);

        let requested = if stopped_early { descents.len() } else { options.nfits };
        Ok(BatchOutcome {
            descents,
            requested,
            best,
            stopped_early,
        })
    }

    /// One descent from the current restart point.
    pub fn descend(&mut self, index: usize, recorder: &mut dyn FitRecorder) -> Result<DescentOutcome, AppError> {
        let setup = self.setup;
        let options = &setup.options;
        let bounds = &setup.bounds;
        let step_sigma = &setup.step_sigma;

        let mut pr = self.chain.restart_point().to_vec();
        let mut current = self.objective.evaluate(&pr);
        info!(descent = index, objective = current.objective, "starting descent");
        recorder.record_step(index, &pr, &current)?;

        let mut lambda = INITIAL_LAMBDA;
        let mut stall = 0usize;
        let mut steps = 0usize;
        let mut bumps = 0usize;

        let termination = loop {
            if stall >= STALL_LIMIT {
                break Termination::Converged;
            }
            if lambda >= DIVERGENCE_LAMBDA {
                break Termination::Diverged;
            }
            if steps >= options.max_steps {
                break Termination::StepLimit;
            }
            steps += 1;

            let previous = current.objective;
            let jacobian = build_jacobian(&self.objective, &pr, &current, false);

            lambda /= LAMBDA_FACTOR;
            let mut accepted: Option<(Vec<f64>, Evaluation)> = None;
            for ilam in 0..MAX_DAMPING_TRIES {
                let damped = damped_matrix(&jacobian.curvature, lambda);
                let delta = solve(damped, jacobian.linear_term.clone());
                let candidate: Vec<f64> = (0..pr.len())
                    .map(|i| {
                        let step = limit_step(delta[i], step_sigma[i]);
                        reflect_into_bounds(pr[i] + step, pr[i], bounds[i], ilam)
                    })
                    .collect();

                let trial = self.objective.evaluate(&candidate);
                debug!(
                    descent = index,
                    step = steps,
                    ilam,
                    lambda,
                    objective = trial.objective,
                    tolerance = self.objective.tolerance(),
                    "damping try"
                );
                lambda *= LAMBDA_FACTOR;
                if trial.objective < previous {
                    accepted = Some((candidate, trial));
                    break;
                }
            }
            lambda /= LAMBDA_FACTOR;

            if let Some((candidate, trial)) = accepted {
                pr = candidate;
                current = trial;
            }

            if bump_out(&self.registry, bounds, options, &mut pr, &mut bumps) {
                current = self.objective.evaluate(&pr);
                debug!(descent = index, bumps, objective = current.objective, "bumped");
            }

            self.chain.push(pr.clone());
            recorder.record_step(index, &pr, &current)?;
            debug!(descent = index, step = steps, lambda, objective = current.objective, "lm step");

            if (1.0 - current.objective / previous).abs() < STALL_TOLERANCE {
                stall += 1;
            } else {
                stall = 0;
            }

            let out_of_time = self.deadline.is_some_and(|d| Instant::now() >= d);
            if out_of_time || bumps >= options.max_bumps {
                break Termination::ResourceLimit;
            }
        };

        Ok(self.finish(index, pr, current, termination, steps, bumps))
    }

    fn finish(
        &mut self,
        index: usize,
        params: Vec<f64>,
        eval: Evaluation,
        termination: Termination,
        steps: usize,
        bumps: usize,
    ) -> DescentOutcome {
        let jacobian = build_jacobian(&self.objective, &params, &eval, true);
        let point_count = self.objective.point_count();
        let raw = eval.objective;

        match Bumper::new(&params, &jacobian.curvature, point_count, raw) {
            Some(bumper) => self.registry.push(bumper),
            None => warn!(descent = index, objective = raw, "no bumper created for this descent"),
        }
        let covariance = Covariance::from_jacobian(&jacobian);
        let pruned = self.chain.prune(&self.registry);

        let thresholds = self.setup.options.thresholds;
        let valid = raw > thresholds.min_objective
            && raw < thresholds.max_objective
            && (eval.bad_fit_points as f64) < thresholds.max_bad_fit_fraction * point_count as f64
            && params.iter().all(|p| p.is_finite());
        let objective = if valid { raw } else { -1.0 };

        info!(
            descent = index,
            objective = raw,
            valid,
            termination = termination.label(),
            steps,
            bumps,
            pruned,
            "finished descent"
        );

        DescentOutcome {
            index,
            params,
            linear: eval.linear,
            objective,
            raw_objective: raw,
            valid,
            termination,
            steps,
            bumps,
            bad_fit_points: eval.bad_fit_points,
            constraint_values: eval.constraint_values,
            covariance,
        }
    }
}

/// Zero a NaN step and cap its magnitude at `max_step`.
fn limit_step(delta: f64, max_step: f64) -> f64 {
    if !(delta > 0.0 || delta < 0.0) {
        return 0.0;
    }
    if delta.abs() > max_step {
        delta.signum() * max_step
    } else {
        delta
    }
}

/// Pull a candidate that left `bounds` back between the bound and the
/// incumbent; the pull toward the incumbent grows with the retry count.
pub fn reflect_into_bounds(candidate: f64, incumbent: f64, bounds: Bounds, ilam: usize) -> f64 {
    let k = ilam as f64;
    let reflected = if candidate > bounds.right {
        (BOUND_PULL * bounds.right + (1.0 - BOUND_PULL + k) * incumbent) / (1.0 + k)
    } else if candidate < bounds.left {
        (BOUND_PULL * bounds.left + (1.0 - BOUND_PULL + k) * incumbent) / (1.0 + k)
    } else {
        return candidate;
    };
    // Rounding can leave a convex combination a hair outside.
    bounds.clamp(reflected)
}

/// Kick `pr` out of bumpers until it is outside all of them or the bump
/// ceiling is reached. Returns whether anything moved.
fn bump_out(
    registry: &BumperRegistry,
    bounds: &[Bounds],
    options: &FitOptions,
    pr: &mut [f64],
    bumps: &mut usize,
) -> bool {
    let mut moved = false;
    while *bumps < options.max_bumps {
        let Some(bumper) = registry.first_containing(pr) else {
            break;
        };
        let push = bumper.displacement(pr, options.bumper_power);
        for (i, p) in pr.iter_mut().enumerate() {
            *p = reflect_into_bounds(*p - push[i], *p, bounds[i], 0);
        }
        *bumps += 1;
        moved = true;
    }
    moved
}
