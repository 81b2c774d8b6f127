//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - observations (`Observation`)
//! - bounds, nuisance coefficients and propagated errors
//! - the JSON run configuration (`RunConfig`, `FitOptions`, `ConstraintSpec`)

pub mod types;

pub use types::*;
