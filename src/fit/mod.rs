//! The fitting engine.
//!
//! - `objective`: chi-square with the nested nuisance solve and penalties
//! - `constraints`: soft constraints on parameters and derived quantities
//! - `gradient`: finite-difference Jacobian and normal equations
//! - `bumper`: exclusion ellipsoids and the restart chain
//! - `covariance`: curvature inversion and error propagation
//! - `optimizer`: the Levenberg-Marquardt batch driver

pub mod bumper;
pub mod constraints;
pub mod covariance;
pub mod gradient;
pub mod objective;
pub mod optimizer;

pub use constraints::{Constraint, ConstraintTarget};
pub use covariance::Covariance;
pub use objective::{Evaluation, Objective};
pub use optimizer::{BatchOutcome, DescentOutcome, FitRecorder, FitSetup, NoRecorder, Optimizer, Termination};
