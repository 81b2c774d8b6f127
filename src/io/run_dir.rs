//! Run-directory writer.
//!
//! Layout for a run directory `DIR` with label `L`:
//!
//! - `DIR/L-steps<k>.dat`: one line per accepted step of descent `k`
//!   (reported parameters, `offset scale` per group, objective)
//! - `DIR/<k>.txt`: result of descent `k`
//!   - line 1: reported parameters, `offset scale` per group, objective
//!   - line 2: reported parameter errors, `ratio baseline` errors per group,
//!     constraint errors
//!   - then one covariance row per line (fit space)
//! - `DIR/checkpoint.dat`: see `io::checkpoint`
//! - `DIR/L.done`: `completed total`, written when the batch ends
//! - `DIR/../best.dat`: `objective label` of the best valid descent seen by
//!   any run sharing the parent directory
//!
//! Linear coefficients that are not finite are written as `-1e300`,
//! unbounded errors and non-finite covariance entries as `1e100`; an invalid
//! descent reports objective `-1`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::{LinearCoefficients, Uncertainty};
use crate::error::AppError;
use crate::fit::{BatchOutcome, DescentOutcome, Evaluation, FitRecorder};
use crate::io::checkpoint::{Checkpoint, write_checkpoint};
use crate::models::ForwardModel;

pub const BEST_FILE: &str = "best.dat";
/// Written in place of a non-finite linear coefficient.
pub const NON_FINITE_SENTINEL: f64 = -1.0e300;

pub struct RunDirRecorder<'a> {
    model: &'a dyn ForwardModel,
    dir: PathBuf,
    label: String,
    total: usize,
}

impl<'a> RunDirRecorder<'a> {
    pub fn new(model: &'a dyn ForwardModel, dir: &Path, label: impl Into<String>, total: usize) -> Self {
        Self {
            model,
            dir: dir.to_path_buf(),
            label: label.into(),
            total,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn trace_path(&self, descent: usize) -> PathBuf {
        self.dir.join(format!("{}-steps{descent}.dat", self.label))
    }

    pub fn result_path(&self, descent: usize) -> PathBuf {
        self.dir.join(format!("{descent}.txt"))
    }

    pub fn done_path(&self) -> PathBuf {
        self.dir.join(format!("{}.done", self.label))
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join("..").join(BEST_FILE)
    }

    /// Close out a finished batch: fix up the checkpoint when a resource limit
    /// lowered the total, then write the termination marker.
    pub fn finish(&self, batch: &BatchOutcome) -> Result<(), AppError> {
        let completed = batch.descents.len();
        if batch.stopped_early && completed > 0 {
            write_checkpoint(
                &self.dir,
                Checkpoint {
                    last_completed: completed as i64 - 1,
                    total: batch.requested,
                },
            )?;
        }
        self.write_done(completed, batch.requested)
    }

    pub fn write_done(&self, completed: usize, total: usize) -> Result<(), AppError> {
        let path = self.done_path();
        fs::write(&path, format!("{completed} {total}\n")).map_err(|e| write_error(&path, e))
    }

    /// Replace `best.dat` when `objective` is strictly lower than what it
    /// holds (an unreadable file counts as empty). Returns whether it changed.
    pub fn update_best(&self, objective: f64) -> Result<bool, AppError> {
        let path = self.best_path();
        let current = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| raw.split_whitespace().next()?.parse::<f64>().ok());
        if current.is_some_and(|best| best <= objective) {
            return Ok(false);
        }
        fs::write(&path, format!("{} {}\n", fmt_value(objective), self.label)).map_err(|e| write_error(&path, e))?;
        info!(objective, label = %self.label, "new global best");
        Ok(true)
    }

    fn result_text(&self, outcome: &DescentOutcome) -> String {
        let cov = &outcome.covariance;
        let mut out = String::new();

        let mut values = self.model.reported(&outcome.params);
        values.extend(linear_values(&outcome.linear));
        values.push(outcome.objective);
        out.push_str(&join_values(&values));
        out.push('\n');

        let errors: Vec<f64> = self
            .model
            .reported_errors(&outcome.params, &cov.nonlinear_errors)
            .iter()
            .chain(&cov.linear_errors)
            .chain(&cov.constraint_errors)
            .map(Uncertainty::value_or_sentinel)
            .collect();
        out.push_str(&join_values(&errors));
        out.push('\n');

        for row in cov.matrix.row_iter() {
            let row: Vec<f64> = row
                .iter()
                .map(|v| if v.is_finite() { *v } else { Uncertainty::UNBOUNDED_SENTINEL })
                .collect();
            out.push_str(&join_values(&row));
            out.push('\n');
        }
        out
    }
}

impl FitRecorder for RunDirRecorder<'_> {
    fn record_step(&mut self, descent: usize, params: &[f64], eval: &Evaluation) -> Result<(), AppError> {
        let mut values = self.model.reported(params);
        values.extend(linear_values(&eval.linear));
        values.push(eval.objective);

        let path = self.trace_path(descent);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| write_error(&path, e))?;
        writeln!(file, "{}", join_values(&values)).map_err(|e| write_error(&path, e))
    }

    fn record_descent(&mut self, outcome: &DescentOutcome) -> Result<(), AppError> {
        let path = self.result_path(outcome.index);
        fs::write(&path, self.result_text(outcome)).map_err(|e| write_error(&path, e))?;

        write_checkpoint(
            &self.dir,
            Checkpoint {
                last_completed: outcome.index as i64,
                total: self.total,
            },
        )?;

        if outcome.valid {
            self.update_best(outcome.objective)?;
        }
        Ok(())
    }
}

fn linear_values(linear: &[LinearCoefficients]) -> Vec<f64> {
    linear
        .iter()
        .flat_map(|lc| [lc.offset, lc.scale])
        .map(|v| if v.is_finite() { v } else { NON_FINITE_SENTINEL })
        .collect()
}

fn fmt_value(v: f64) -> String {
    format!("{v:.10e}")
}

fn join_values(values: &[f64]) -> String {
    values.iter().map(|v| fmt_value(*v)).collect::<Vec<_>>().join(" ")
}

fn write_error(path: &Path, e: std::io::Error) -> AppError {
    AppError::output(format!("Failed to write '{}': {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    use crate::fit::{Covariance, Termination};
    use crate::io::checkpoint::read_checkpoint;
    use crate::models::Auxiliary;

    struct Line;

    impl ForwardModel for Line {
        fn parameter_names(&self) -> &[&'static str] {
            &["slope", "width"]
        }

        fn log_positions(&self) -> &[usize] {
            &[1]
        }

        fn evaluate(&self, params: &[f64], x: f64, _aux: &Auxiliary) -> f64 {
            params[0] * x + params[1].exp()
        }
    }

    fn run_dir(name: &str) -> PathBuf {
        let parent = std::env::temp_dir().join(format!("bfit-rundir-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&parent);
        let dir = parent.join("run");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn outcome(index: usize, objective: f64, valid: bool) -> DescentOutcome {
        DescentOutcome {
            index,
            params: vec![0.5, 0.0],
            linear: vec![LinearCoefficients {
                offset: f64::NAN,
                scale: 2.0,
            }],
            objective: if valid { objective } else { -1.0 },
            raw_objective: objective,
            valid,
            termination: Termination::Converged,
            steps: 4,
            bumps: 0,
            bad_fit_points: 0,
            constraint_values: Vec::new(),
            covariance: Covariance {
                matrix: DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.01]),
                nonlinear_errors: vec![Uncertainty::Bounded(0.2), Uncertainty::Bounded(0.1)],
                linear_errors: vec![Uncertainty::Unbounded, Uncertainty::Bounded(0.3)],
                constraint_errors: Vec::new(),
            },
        }
    }

    fn fields(line: &str) -> Vec<f64> {
        line.split_whitespace().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn result_file_layout() {
        let dir = run_dir("result");
        let mut rec = RunDirRecorder::new(&Line, &dir, "ev1", 2);
        rec.record_descent(&outcome(0, 120.0, true)).unwrap();

        let text = fs::read_to_string(dir.join("0.txt")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        // Reported width is exp(0) = 1; NaN offset becomes the sentinel.
        assert_eq!(fields(lines[0]), vec![0.5, 1.0, -1.0e300, 2.0, 120.0]);
        assert_eq!(fields(lines[1]), vec![0.2, 0.1, 1.0e100, 0.3]);
        assert_eq!(fields(lines[2]), vec![0.04, 0.0]);

        assert_eq!(
            read_checkpoint(&dir),
            Some(Checkpoint {
                last_completed: 0,
                total: 2
            })
        );
        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }

    #[test]
    fn trace_appends_one_line_per_step() {
        let dir = run_dir("trace");
        let mut rec = RunDirRecorder::new(&Line, &dir, "ev1", 1);
        let eval = Evaluation {
            objective: 10.0,
            linear: vec![LinearCoefficients { offset: 1.0, scale: 2.0 }],
            model_values: Vec::new(),
            constraint_values: Vec::new(),
            bad_fit_points: 0,
        };
        rec.record_step(3, &[1.0, 0.0], &eval).unwrap();
        rec.record_step(3, &[1.5, 0.0], &eval).unwrap();

        let text = fs::read_to_string(dir.join("ev1-steps3.dat")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(fields(lines[1]), vec![1.5, 1.0, 1.0, 2.0, 10.0]);
        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }

    #[test]
    fn best_file_only_moves_down() {
        let dir = run_dir("best");
        let mut rec = RunDirRecorder::new(&Line, &dir, "ev1", 3);
        rec.record_descent(&outcome(0, 200.0, true)).unwrap();
        rec.record_descent(&outcome(1, 50.0, false)).unwrap();
        rec.record_descent(&outcome(2, 300.0, true)).unwrap();

        let best = fs::read_to_string(rec.best_path()).unwrap();
        let mut parts = best.split_whitespace();
        assert_eq!(parts.next().unwrap().parse::<f64>().unwrap(), 200.0);
        assert_eq!(parts.next(), Some("ev1"));

        let other = RunDirRecorder::new(&Line, &dir, "ev2", 1);
        assert!(!other.update_best(200.0).unwrap());
        assert!(other.update_best(150.0).unwrap());
        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }

    #[test]
    fn early_stop_lowers_the_total() {
        let dir = run_dir("early");
        let mut rec = RunDirRecorder::new(&Line, &dir, "ev1", 5);
        let first = outcome(0, 100.0, true);
        rec.record_descent(&first).unwrap();
        let batch = BatchOutcome {
            descents: vec![first],
            requested: 1,
            best: Some(0),
            stopped_early: true,
        };
        rec.finish(&batch).unwrap();

        let cp = read_checkpoint(&dir).unwrap();
        assert!(cp.is_complete());
        assert_eq!(cp.total, 1);
        assert_eq!(fs::read_to_string(rec.done_path()).unwrap(), "1 1\n");
        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }
}
