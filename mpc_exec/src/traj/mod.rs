//! # Reference trajectory module
//!
//! The reference trajectory is built once per scenario from the planned path, and a fixed length
//! window of it is handed to the optimiser on every tick.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod reference;
pub mod window;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use reference::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while building a reference trajectory.
#[derive(Debug, thiserror::Error)]
pub enum TrajError {
    #[error("Attempted to build a reference trajectory from an empty path")]
    EmptyPath,

    #[error("The resample spacing must be positive and finite (got {0})")]
    InvalidSpacing(f64),

    #[error("The path contains a non-finite point at index {0}")]
    NonFinitePoint(usize),
}
