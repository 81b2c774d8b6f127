//! Command-line parsing for the bumper fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{LinearCoefficients, ModelSpec};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "bfit",
    version,
    about = "Multi-start Levenberg-Marquardt light-curve fitter with bumper restarts"
)]
pub struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a batch of descents to an observation CSV and print a summary.
    Fit(FitArgs),
    /// Write a synthetic observation CSV from a built-in model family.
    Simulate(SimulateArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Observation CSV (`group,x,y,sigma[,tag]`).
    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,

    /// JSON run configuration.
    #[arg(long, value_name = "JSON")]
    pub config: PathBuf,

    /// Directory for checkpoint, traces and per-descent results.
    ///
    /// Without it nothing is written and every run starts fresh.
    #[arg(long, value_name = "DIR")]
    pub run_dir: Option<PathBuf>,

    /// Label used in file names and `best.dat` (defaults to the run
    /// directory's name).
    #[arg(long)]
    pub label: Option<String>,

    /// Override `options.nfits`.
    #[arg(long)]
    pub nfits: Option<usize>,

    /// Override `options.max_steps`.
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Override `options.bumper_power`.
    #[arg(long, allow_hyphen_values = true)]
    pub bumper_power: Option<f64>,

    /// Override `options.time_limit_secs`.
    #[arg(long, value_name = "SECS")]
    pub time_limit: Option<f64>,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Model family.
    #[arg(long, value_enum)]
    pub model: ModelSpec,

    /// Parameters in natural units, comma separated (family order).
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub params: Vec<f64>,

    /// One `offset:scale` pair per group, comma separated.
    #[arg(
        long,
        value_delimiter = ',',
        value_parser = parse_group,
        allow_hyphen_values = true,
        default_value = "100:1000"
    )]
    pub groups: Vec<LinearCoefficients>,

    /// Points per group.
    #[arg(long, default_value_t = 200)]
    pub points: usize,

    /// Start of the time range (HJD − 2450000).
    #[arg(long, default_value_t = 7400.0, allow_hyphen_values = true)]
    pub x_min: f64,

    /// End of the time range (HJD − 2450000).
    #[arg(long, default_value_t = 7600.0, allow_hyphen_values = true)]
    pub x_max: f64,

    /// Noise standard deviation as a fraction of each clean value.
    #[arg(long, default_value_t = 0.01)]
    pub noise: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output CSV path.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    /// Right ascension in degrees (parallax family only).
    #[arg(long, allow_hyphen_values = true)]
    pub ra: Option<f64>,

    /// Declination in degrees (parallax family only).
    #[arg(long, allow_hyphen_values = true)]
    pub dec: Option<f64>,
}

/// Parse `offset:scale`.
pub fn parse_group(s: &str) -> Result<LinearCoefficients, String> {
    let (offset, scale) = s
        .split_once(':')
        .ok_or_else(|| format!("expected `offset:scale`, got '{s}'"))?;
    let offset = offset
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid offset '{offset}'"))?;
    let scale = scale
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid scale '{scale}'"))?;
    Ok(LinearCoefficients { offset, scale })
}
