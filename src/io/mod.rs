//! Input/output helpers.
//!
//! - run configuration (`config`)
//! - observation CSV ingest + export (`ingest`)
//! - batch checkpoint (`checkpoint`)
//! - run-directory result files (`run_dir`)

pub mod checkpoint;
pub mod config;
pub mod ingest;
pub mod run_dir;

pub use checkpoint::*;
pub use config::*;
pub use ingest::*;
pub use run_dir::*;
