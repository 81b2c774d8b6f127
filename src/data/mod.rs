//! Observation data: the immutable store the engine fits against, and a
//! seeded synthetic generator for demos and tests.

pub mod observations;
pub mod sample;

pub use observations::*;
pub use sample::*;
