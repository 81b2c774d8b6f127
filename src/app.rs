//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs the log subscriber
//! - merges CLI overrides into the run configuration
//! - runs the fit or simulation pipeline
//! - prints reports

use clap::Parser;

use crate::cli::{Cli, Command, FitArgs, SimulateArgs};
use crate::domain::{RunConfig, SkyCoordinates};
use crate::error::AppError;
use crate::io::load_run_config;
use crate::models::ForwardModel;
use crate::report::{RunHeader, format_batch, format_run_header, format_skipped};

pub mod pipeline;

use pipeline::{BatchStatus, FitRequest, SimulationRequest};

/// Entry point for the `bfit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let mut config = load_run_config(&args.config)?;
    apply_overrides(&mut config, &args)?;

    let label = args
        .label
        .clone()
        .unwrap_or_else(|| FitRequest::default_label(args.run_dir.as_deref()));
    let request = FitRequest {
        data: args.data,
        config,
        run_dir: args.run_dir,
        label,
    };
    let run = pipeline::run_fit(&request)?;

    let header = RunHeader {
        started_at: run.started_at,
        label: &run.label,
        model_code: run.family.code(),
    };
    print!("{}", format_run_header(&header, &run.ingest));
    match &run.status {
        BatchStatus::Completed(batch) => print!("{}", format_batch(batch, &run.family)),
        BatchStatus::AlreadyComplete(cp) => print!("{}", format_skipped(cp)),
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let coordinates = match (args.ra, args.dec) {
        (Some(ra_deg), Some(dec_deg)) => Some(SkyCoordinates { ra_deg, dec_deg }),
        (None, None) => None,
        _ => return Err(AppError::config("`--ra` and `--dec` must be given together.")),
    };
    let request = SimulationRequest {
        model: args.model,
        params: args.params,
        groups: args.groups,
        points_per_group: args.points,
        x_min: args.x_min,
        x_max: args.x_max,
        relative_noise: args.noise,
        seed: args.seed,
        coordinates,
        out: args.out,
    };
    let sim = pipeline::run_simulate(&request)?;

    println!(
        "Wrote {} observations ({} group(s)) to {}",
        sim.points,
        sim.groups,
        sim.out.display()
    );
    println!("Model {}: {}", sim.family.code(), sim.family.format_report(&sim.fit_params));
    Ok(())
}

/// CLI flags win over the config file.
pub fn apply_overrides(config: &mut RunConfig, args: &FitArgs) -> Result<(), AppError> {
    let options = &mut config.options;
    if let Some(n) = args.nfits {
        if n == 0 {
            return Err(AppError::config("`--nfits` must be at least 1."));
        }
        options.nfits = n;
    }
    if let Some(n) = args.max_steps {
        if n == 0 {
            return Err(AppError::config("`--max-steps` must be at least 1."));
        }
        options.max_steps = n;
    }
    if let Some(p) = args.bumper_power {
        options.bumper_power = p;
    }
    if let Some(t) = args.time_limit {
        options.time_limit_secs = Some(t);
    }
    Ok(())
}
