//! Numerical building blocks: the closed-form nuisance solve and Gaussian
//! elimination.

pub mod elimination;
pub mod nuisance;

pub use elimination::*;
pub use nuisance::*;
