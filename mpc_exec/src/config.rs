//! # Controller configuration
//!
//! A single [`Config`] value describes the vehicle limits, the horizon, the cost weights and the
//! obstacle handling of the receding horizon controller. It is loaded once per scenario, checked
//! with [`Config::validate`] and then shared by reference with every other module.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{dyn_obs::SegmentHeading, pack::VertexSelection};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of the receding horizon controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    // ---- LIMITS ----
    /// Minimum linear velocity.
    ///
    /// Units: meters/second
    pub vel_min_ms: f64,

    /// Maximum linear velocity.
    ///
    /// Units: meters/second
    pub vel_max_ms: f64,

    /// Minimum angular velocity.
    ///
    /// Units: radians/second
    pub ang_vel_min_rads: f64,

    /// Maximum angular velocity.
    ///
    /// Units: radians/second
    pub ang_vel_max_rads: f64,

    /// Minimum linear acceleration.
    ///
    /// Units: meters/second^2
    pub lin_acc_min_mss: f64,

    /// Maximum linear acceleration.
    ///
    /// Units: meters/second^2
    pub lin_acc_max_mss: f64,

    /// Minimum angular acceleration.
    ///
    /// Units: radians/second^2
    pub ang_acc_min_radss: f64,

    /// Maximum angular acceleration.
    ///
    /// Units: radians/second^2
    pub ang_acc_max_radss: f64,

    // ---- HORIZON ----
    /// Number of steps in the prediction horizon.
    pub n_horizon: usize,

    /// Length of one step.
    ///
    /// Units: seconds
    pub dt_s: f64,

    // ---- WEIGHTS ----
    /// Weight on the x and y tracking errors.
    pub pos_dev: f64,

    /// Weight on the wrapped heading error.
    pub heading_dev: f64,

    pub lin_vel_pen: f64,

    pub ang_vel_pen: f64,

    pub lin_acc_pen: f64,

    pub ang_acc_pen: f64,

    /// Terminal weight on the x and y errors.
    pub termcost_pos: f64,

    /// Terminal weight on the wrapped heading error.
    pub termcost_heading: f64,

    /// Velocity deviation weight. Not part of the cost, kept so that older
    /// parameter files still load.
    pub vel_dev: f64,

    /// Obstacle penalty weight. Obstacles are hard constraints, so this is
    /// only carried for parameter file compatibility.
    pub w_obs: f64,

    // ---- OBSTACLES ----
    /// Radius of the keep-out disc placed around every obstacle vertex.
    ///
    /// Units: meters
    pub r_safe_m: f64,

    /// Number of static obstacle vertices the problem can hold.
    pub max_vert: usize,

    /// Footprint margin added to the dynamic obstacle radii.
    ///
    /// Units: meters
    pub vehicle_margin_m: f64,

    /// Number of dynamic obstacles the problem can hold.
    pub n_dynobs: usize,

    /// How vertices are chosen when the scene holds more than `max_vert`.
    pub vertex_selection: VertexSelection,

    /// Convention for the frame in which dynamic obstacles wiggle.
    pub dynobs_heading: SegmentHeading,

    // ---- REFERENCE ----
    /// Arc length spacing used to resample the planned path.
    ///
    /// Units: meters
    pub path_sep_m: f64,

    pub solver: SolverParams,
}

/// Parameters of the numerical solver backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverParams {
    /// Tolerance on the fixed point residual of the inner problems.
    pub tolerance: f64,

    /// Tolerance on the constraint violation.
    pub delta_tolerance: f64,

    /// Inner tolerance used by the first outer iteration.
    pub initial_inner_tolerance: f64,

    /// Hard limit on the duration of a single solve.
    pub max_duration_ms: u64,

    pub max_outer_iterations: usize,

    pub max_inner_iterations: usize,

    pub initial_penalty: f64,

    pub penalty_update_factor: f64,

    pub lbfgs_memory: usize,

    pub backend: SolverBackend,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Which solver runs the optimisation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SolverBackend {
    /// Augmented Lagrangian solver running in this process.
    Alm,

    /// External optimizer service reached over TCP.
    Tcp {
        /// Address of the service, e.g. `"127.0.0.1:8333"`.
        endpoint: String,

        /// If given the service is started from this executable and killed
        /// once the controller is dropped.
        #[serde(default)]
        exec_path: Option<PathBuf>,

        /// Kill a service that was not started by us when the controller is
        /// dropped.
        #[serde(default)]
        kill_on_drop: bool,

        /// How long to wait for the service to answer a ping.
        #[serde(default = "default_startup_timeout_ms")]
        startup_timeout_ms: u64,
    },
}

/// Errors raised by an invalid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be finite")]
    NotFinite(&'static str),

    #[error("Lower bound {0} must be less than the upper bound {1}")]
    InvalidBounds(&'static str, &'static str),

    #[error("The horizon length must be greater than zero")]
    ZeroHorizon,

    #[error("The timestep must be greater than zero (got {0})")]
    NonPositiveTimestep(f64),

    #[error("{0} must not be negative (got {1})")]
    Negative(&'static str, f64),

    #[error("The path separation must be greater than zero (got {0})")]
    NonPositivePathSep(f64),

    #[error("Invalid solver parameters: {0}")]
    InvalidSolverParams(&'static str),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Config {
    /// Check the configuration can be used to build a controller.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [
            ("vel_min_ms", self.vel_min_ms, "vel_max_ms", self.vel_max_ms),
            (
                "ang_vel_min_rads",
                self.ang_vel_min_rads,
                "ang_vel_max_rads",
                self.ang_vel_max_rads,
            ),
            (
                "lin_acc_min_mss",
                self.lin_acc_min_mss,
                "lin_acc_max_mss",
                self.lin_acc_max_mss,
            ),
            (
                "ang_acc_min_radss",
                self.ang_acc_min_radss,
                "ang_acc_max_radss",
                self.ang_acc_max_radss,
            ),
        ];

        for (min_name, min, max_name, max) in bounds.iter() {
            if !min.is_finite() {
                return Err(ConfigError::NotFinite(*min_name));
            }
            if !max.is_finite() {
                return Err(ConfigError::NotFinite(*max_name));
            }
            if min >= max {
                return Err(ConfigError::InvalidBounds(*min_name, *max_name));
            }
        }

        if self.n_horizon == 0 {
            return Err(ConfigError::ZeroHorizon);
        }

        if !(self.dt_s > 0.0) || !self.dt_s.is_finite() {
            return Err(ConfigError::NonPositiveTimestep(self.dt_s));
        }

        let non_negative = [
            ("pos_dev", self.pos_dev),
            ("heading_dev", self.heading_dev),
            ("lin_vel_pen", self.lin_vel_pen),
            ("ang_vel_pen", self.ang_vel_pen),
            ("lin_acc_pen", self.lin_acc_pen),
            ("ang_acc_pen", self.ang_acc_pen),
            ("termcost_pos", self.termcost_pos),
            ("termcost_heading", self.termcost_heading),
            ("r_safe_m", self.r_safe_m),
            ("vehicle_margin_m", self.vehicle_margin_m),
        ];

        for (name, value) in non_negative.iter() {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite(*name));
            }
            if *value < 0.0 {
                return Err(ConfigError::Negative(*name, *value));
            }
        }

        if !(self.path_sep_m > 0.0) {
            return Err(ConfigError::NonPositivePathSep(self.path_sep_m));
        }

        self.solver.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vel_min_ms: -0.5,
            vel_max_ms: 1.5,
            ang_vel_min_rads: -0.5,
            ang_vel_max_rads: 0.5,
            lin_acc_min_mss: -1.0,
            lin_acc_max_mss: 1.0,
            ang_acc_min_radss: -3.0,
            ang_acc_max_radss: 3.0,
            n_horizon: 20,
            dt_s: 0.1,
            pos_dev: 1.0,
            heading_dev: 1.0,
            lin_vel_pen: 1.0,
            ang_vel_pen: 0.3,
            lin_acc_pen: 10.0,
            ang_acc_pen: 1.0,
            termcost_pos: 200.0,
            termcost_heading: 50.0,
            vel_dev: 10.0,
            w_obs: 1e6,
            r_safe_m: 0.5,
            max_vert: 20,
            vehicle_margin_m: 0.25,
            n_dynobs: 0,
            vertex_selection: VertexSelection::Nearest,
            dynobs_heading: SegmentHeading::TrueBearing,
            path_sep_m: 0.1,
            solver: SolverParams::default(),
        }
    }
}

impl SolverParams {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance > 0.0) || !(self.delta_tolerance > 0.0) {
            return Err(ConfigError::InvalidSolverParams(
                "tolerances must be greater than zero",
            ));
        }
        if self.initial_inner_tolerance < self.tolerance {
            return Err(ConfigError::InvalidSolverParams(
                "initial_inner_tolerance must not be below tolerance",
            ));
        }
        if self.max_duration_ms == 0 {
            return Err(ConfigError::InvalidSolverParams(
                "max_duration_ms must be greater than zero",
            ));
        }
        if self.max_outer_iterations == 0 || self.max_inner_iterations == 0 {
            return Err(ConfigError::InvalidSolverParams(
                "iteration limits must be greater than zero",
            ));
        }
        if !(self.initial_penalty > 0.0) || !(self.penalty_update_factor > 1.0) {
            return Err(ConfigError::InvalidSolverParams(
                "the penalty must be positive and grow between outer iterations",
            ));
        }
        if self.lbfgs_memory == 0 {
            return Err(ConfigError::InvalidSolverParams(
                "lbfgs_memory must be greater than zero",
            ));
        }

        Ok(())
    }
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            delta_tolerance: 1e-4,
            initial_inner_tolerance: 1e-2,
            max_duration_ms: 300,
            max_outer_iterations: 30,
            max_inner_iterations: 1000,
            initial_penalty: 10.0,
            penalty_update_factor: 5.0,
            lbfgs_memory: 10,
            backend: SolverBackend::Alm,
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn default_startup_timeout_ms() -> u64 {
    5000
}
