//! # MPC library.
//!
//! This library allows other crates in the workspace, and the benchmarks, to access items defined
//! inside the MPC crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Controller configuration - limits, horizon, weights and solver parameters
pub mod config;

/// Dynamic obstacle model - closed form motion of moving elliptical obstacles
pub mod dyn_obs;

/// Parameter packing - encodes the controller inputs into the fixed solver layout
pub mod pack;

/// Problem formulation - cost, constraints and their derivatives over the horizon
pub mod problem;

/// Receding horizon control - the closed loop tick of window, pack, solve, apply
pub mod rh_ctrl;

/// Scene - static obstacles, boundary, scenario files and path planning
pub mod scene;

/// Solver backends - in-process ALM or an external optimizer service
pub mod solver;

/// Reference trajectory - construction from a path and horizon windowing
pub mod traj;

/// Vehicle model - unicycle kinematics
pub mod vehicle;
