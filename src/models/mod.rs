//! Forward models.
//!
//! - the `ForwardModel` capability the engine is generic over (`model`)
//! - the built-in microlensing families (`family`)
//! - magnification and parallax helpers they are built from

pub mod family;
pub mod magnification;
pub mod model;
pub mod parallax;

pub use family::*;
pub use model::*;
