//! Shared "fit pipeline" logic behind the CLI commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! config -> model family -> observations -> constraints -> checkpoint -> batch
//!
//! The CLI layer can then focus on presentation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::data::{ObservationStore, SampleSpec, generate_sample};
use crate::domain::{Bounds, LinearCoefficients, ModelSpec, RunConfig, SkyCoordinates};
use crate::error::AppError;
use crate::fit::{BatchOutcome, Constraint, FitSetup, NoRecorder, Objective, Optimizer};
use crate::io::{
    Checkpoint, IngestedData, Resume, RunDirRecorder, load_observations, prepare_run_dir, write_observations,
};
use crate::models::{ModelFamily, close_open_bounds};

/// Label used when no run directory (or no usable directory name) is given.
pub const DEFAULT_LABEL: &str = "run";

/// Everything needed for one `fit` run, already merged with CLI overrides.
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub data: PathBuf,
    pub config: RunConfig,
    pub run_dir: Option<PathBuf>,
    pub label: String,
}

impl FitRequest {
    /// Label defaults to the run directory's final component.
    pub fn default_label(run_dir: Option<&Path>) -> String {
        run_dir
            .and_then(|d| d.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_LABEL.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum BatchStatus {
    Completed(BatchOutcome),
    /// A finished batch of the same size was found in the run directory.
    AlreadyComplete(Checkpoint),
}

/// All computed outputs of a single `bfit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub started_at: DateTime<Local>,
    pub label: String,
    pub family: ModelFamily,
    pub ingest: IngestedData,
    pub status: BatchStatus,
}

/// Resolved fit-space geometry of a run.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    pub initial: Vec<f64>,
    pub bounds: Vec<Bounds>,
    pub step_sigma: Vec<f64>,
}

/// Convert the configured initial condition into fit space and pick bounds and
/// step sigmas (config overrides, else family defaults).
pub fn resolve_search_space(family: &ModelFamily, config: &RunConfig) -> Result<SearchSpace, AppError> {
    let initial = family.to_fit_space(&config.initial)?;
    let nps = initial.len();

    let mut bounds = match &config.bounds {
        Some(pairs) => {
            if pairs.len() != nps {
                return Err(AppError::config(format!(
                    "`bounds` has {} entries, model {} needs {nps}.",
                    pairs.len(),
                    family.code()
                )));
            }
            pairs.iter().map(|[l, r]| Bounds::new(*l, *r)).collect()
        }
        None => family.default_bounds(),
    };
    close_open_bounds(&mut bounds, &initial);

    let step_sigma = match &config.step_sigma {
        Some(s) if s.len() != nps => {
            return Err(AppError::config(format!(
                "`step_sigma` has {} entries, model {} needs {nps}.",
                s.len(),
                family.code()
            )));
        }
        Some(s) => s.clone(),
        None => family.default_step_sigma().to_vec(),
    };

    Ok(SearchSpace {
        initial,
        bounds,
        step_sigma,
    })
}

/// Execute the full fitting pipeline and return the computed outputs.
pub fn run_fit(request: &FitRequest) -> Result<RunOutput, AppError> {
    let started_at = Local::now();
    let config = &request.config;

    // 1) Model family and search space. Configuration errors surface here,
    //    before anything touches the run directory.
    let family = ModelFamily::from_config(config)?;
    let space = resolve_search_space(&family, config)?;

    // 2) Observations.
    let ingest = load_observations(&request.data, &config.normalizations)?;
    for e in &ingest.row_errors {
        warn!(line = e.line, "skipped row: {}", e.message);
    }
    info!(
        rows_read = ingest.rows_read,
        rows_used = ingest.rows_used,
        groups = ingest.group_count(),
        "loaded observations"
    );
    let store = ObservationStore::new(ingest.points.clone())?;

    // 3) Constraints, optimizer and the batch itself.
    let status = run_batch(request, &family, &store, space)?;
    if let BatchStatus::Completed(batch) = &status {
        match batch.best_descent() {
            Some(best) => info!(descent = best.index, objective = best.objective, "best descent"),
            None => warn!("no valid descent in this batch"),
        }
    }

    Ok(RunOutput {
        started_at,
        label: request.label.clone(),
        family,
        ingest,
        status,
    })
}

fn run_batch(
    request: &FitRequest,
    family: &ModelFamily,
    store: &ObservationStore,
    space: SearchSpace,
) -> Result<BatchStatus, AppError> {
    let config = &request.config;
    let constraints = config
        .constraints
        .iter()
        .map(|spec| Constraint::from_spec(spec, family, store.group_count()))
        .collect::<Result<Vec<_>, _>>()?;
    let objective = Objective::new(
        family,
        store,
        &constraints,
        &config.calibration,
        config.options.tolerance,
    )?;
    let setup = FitSetup {
        bounds: space.bounds,
        step_sigma: space.step_sigma,
        options: config.options.clone(),
    };
    let mut optimizer = Optimizer::new(objective, &setup, &space.initial)?;

    let status = match &request.run_dir {
        Some(dir) => {
            let mut recorder = RunDirRecorder::new(family, dir, request.label.clone(), setup.options.nfits);
            match prepare_run_dir(dir, setup.options.nfits)? {
                Resume::AlreadyComplete(cp) => {
                    recorder.write_done((cp.last_completed + 1) as usize, cp.total)?;
                    BatchStatus::AlreadyComplete(cp)
                }
                Resume::Start => {
                    let batch = optimizer.run_batch(&mut recorder)?;
                    recorder.finish(&batch)?;
                    BatchStatus::Completed(batch)
                }
            }
        }
        None => BatchStatus::Completed(optimizer.run_batch(&mut NoRecorder)?),
    };
    Ok(status)
}

/// What `simulate` should produce.
#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub model: ModelSpec,
    /// Natural units.
    pub params: Vec<f64>,
    pub groups: Vec<LinearCoefficients>,
    pub points_per_group: usize,
    pub x_min: f64,
    pub x_max: f64,
    pub relative_noise: f64,
    pub seed: u64,
    pub coordinates: Option<SkyCoordinates>,
    pub out: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub family: ModelFamily,
    pub fit_params: Vec<f64>,
    pub points: usize,
    pub groups: usize,
    pub out: PathBuf,
}

/// Generate a synthetic observation CSV.
pub fn run_simulate(request: &SimulationRequest) -> Result<SimulationOutput, AppError> {
    let config = RunConfig {
        model: request.model,
        coordinates: request.coordinates,
        parallax_reference: None,
        initial: request.params.clone(),
        step_sigma: None,
        bounds: None,
        constraints: Vec::new(),
        calibration: Vec::new(),
        normalizations: Vec::new(),
        options: Default::default(),
    };
    let family = ModelFamily::from_config(&config)?;
    let fit_params = family.to_fit_space(&request.params)?;

    let spec = SampleSpec {
        params: fit_params.clone(),
        groups: request.groups.clone(),
        points_per_group: request.points_per_group,
        x_min: request.x_min,
        x_max: request.x_max,
        relative_noise: request.relative_noise,
        seed: request.seed,
    };
    let points = generate_sample(&family, &spec)?;
    write_observations(&request.out, &points)?;
    info!(
        path = %request.out.display(),
        points = points.len(),
        model = family.code(),
        "wrote synthetic observations"
    );

    Ok(SimulationOutput {
        family,
        fit_params,
        points: points.len(),
        groups: request.groups.len(),
        out: request.out.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::domain::FitOptions;
    use crate::io::read_checkpoint;
    use crate::models::ForwardModel;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bfit-pipeline-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn simulate(dir: &Path) -> PathBuf {
        let out = dir.join("obs.csv");
        run_simulate(&SimulationRequest {
            model: ModelSpec::Ps,
            params: vec![0.3, 15.0, 7500.0, 1.0e-3],
            groups: vec![LinearCoefficients {
                offset: 200.0,
                scale: 1000.0,
            }],
            points_per_group: 120,
            x_min: 7440.0,
            x_max: 7560.0,
            relative_noise: 0.005,
            seed: 7,
            coordinates: None,
            out: out.clone(),
        })
        .unwrap();
        out
    }

    fn config(nfits: usize) -> RunConfig {
        RunConfig {
            model: ModelSpec::Ps,
            coordinates: None,
            parallax_reference: None,
            initial: vec![0.25, 12.0, 7499.0, 1.0e-3],
            step_sigma: None,
            bounds: None,
            constraints: Vec::new(),
            calibration: Vec::new(),
            normalizations: Vec::new(),
            options: FitOptions {
                nfits,
                max_steps: 25,
                max_bumps: 10_000,
                ..FitOptions::default()
            },
        }
    }

    #[test]
    fn default_label_comes_from_the_directory() {
        assert_eq!(FitRequest::default_label(Some(Path::new("runs/ev42"))), "ev42");
        assert_eq!(FitRequest::default_label(None), DEFAULT_LABEL);
    }

    #[test]
    fn open_bounds_are_closed_around_the_initial_value() {
        let cfg = config(1);
        let family = ModelFamily::from_config(&cfg).unwrap();
        let space = resolve_search_space(&family, &cfg).unwrap();
        let t0 = &space.bounds[2];
        assert_eq!(*t0, Bounds::new(7499.0 - 300.0, 7499.0 + 300.0));
        assert!((space.initial[1] - 12.0_f64.ln()).abs() < 1e-12);

        let mut bad = config(1);
        bad.step_sigma = Some(vec![1.0]);
        assert_eq!(resolve_search_space(&family, &bad).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn fits_synthetic_single_lens_without_run_dir() {
        let dir = temp_dir("fresh");
        let data = simulate(&dir);
        let request = FitRequest {
            data,
            config: config(1),
            run_dir: None,
            label: DEFAULT_LABEL.to_string(),
        };
        let out = run_fit(&request).unwrap();
        let BatchStatus::Completed(batch) = out.status else {
            panic!("expected a completed batch");
        };
        assert_eq!(batch.descents.len(), 1);
        let d = &batch.descents[0];
        assert!(d.valid, "objective={}", d.raw_objective);
        // Reduced chi² near one for a correct model.
        assert!(d.objective < 3.0 * out.ingest.rows_used as f64);
        let reported = out.family.reported(&d.params);
        assert!((reported[2] - 7500.0).abs() < 1.0, "t0={}", reported[2]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn stale_checkpoint_reruns_every_descent() {
        let dir = temp_dir("resume");
        let data = simulate(&dir);
        let run_dir = dir.join("ev1");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("checkpoint.dat"), "0 3\n").unwrap();
        fs::write(run_dir.join("stale.txt"), "old").unwrap();

        let request = FitRequest {
            data,
            config: config(3),
            run_dir: Some(run_dir.clone()),
            label: "ev1".to_string(),
        };
        let out = run_fit(&request).unwrap();
        assert!(matches!(out.status, BatchStatus::Completed(_)));
        assert!(!run_dir.join("stale.txt").exists());
        for k in 0..3 {
            assert!(run_dir.join(format!("{k}.txt")).exists(), "missing {k}.txt");
            assert!(run_dir.join(format!("ev1-steps{k}.dat")).exists());
        }
        let cp = read_checkpoint(&run_dir).unwrap();
        assert_eq!((cp.last_completed, cp.total), (2, 3));
        assert_eq!(fs::read_to_string(run_dir.join("ev1.done")).unwrap(), "3 3\n");
        assert!(dir.join("best.dat").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn finished_checkpoint_skips_the_batch() {
        let dir = temp_dir("skip");
        let data = simulate(&dir);
        let run_dir = dir.join("ev2");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("checkpoint.dat"), "0 1\n").unwrap();

        let request = FitRequest {
            data,
            config: config(1),
            run_dir: Some(run_dir.clone()),
            label: "ev2".to_string(),
        };
        let out = run_fit(&request).unwrap();
        assert!(matches!(out.status, BatchStatus::AlreadyComplete(_)));
        assert!(!run_dir.join("0.txt").exists());
        assert_eq!(fs::read_to_string(run_dir.join("ev2.done")).unwrap(), "1 1\n");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unknown_constraint_target_aborts_before_output() {
        let dir = temp_dir("badcons");
        let data = simulate(&dir);
        let run_dir = dir.join("ev3");
        let mut cfg = config(1);
        cfg.constraints.push(crate::domain::ConstraintSpec {
            target: "nope".to_string(),
            value: 1.0,
            left: 1.0,
            right: 1.0,
        });
        let request = FitRequest {
            data,
            config: cfg,
            run_dir: Some(run_dir.clone()),
            label: "ev3".to_string(),
        };
        let err = run_fit(&request).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(!run_dir.exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
