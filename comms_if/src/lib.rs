//! # Communications interface crate.
//!
//! Provides the communications interfaces between the controller and the
//! optimizer service it drives.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Request and response definitions for the optimizer service
pub mod optimizer;

/// Network module
pub mod net;
