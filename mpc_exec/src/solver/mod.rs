//! # Solver module
//!
//! The controller only needs one thing from a solver: given a packed parameter vector, return the
//! optimal command sequence. The [`Solver`] trait captures that, with two implementations:
//!
//! - [`alm::AlmSolver`] - augmented Lagrangian solver running in this process,
//! - [`tcp::TcpSolver`] - client of an optimizer service running in another process.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod alm;
pub mod tcp;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::Duration;

use serde::Serialize;

pub use alm::AlmSolver;
pub use tcp::TcpSolver;

use crate::{
    config::{Config, ConfigError, SolverBackend},
    problem::Formulation,
    vehicle::Command,
};
use comms_if::net::OptimizerClientError;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A backend able to solve the optimal control problem.
pub trait Solver {
    /// Solve the problem for the given packed parameters.
    ///
    /// `Ok` with `success == false` means the solver ran but did not converge,
    /// `Err` means it could not run at all.
    fn solve(&mut self, params: &[f64]) -> Result<SolverOutcome, SolverError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Result of a single solve.
#[derive(Debug, Clone, Serialize)]
pub struct SolverOutcome {
    /// True if the solver converged.
    pub success: bool,

    /// Optimal commands, interleaved `[v_0, w_0, v_1, w_1, ...]`.
    pub solution: Vec<f64>,

    pub cost: f64,

    pub solve_time: Duration,

    /// Exit status of the solver.
    pub message: String,

    pub num_outer_iterations: usize,

    pub num_inner_iterations: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Expected {expected} parameters but got {found}")]
    WrongParameterLength { expected: usize, found: usize },

    #[error("Expected a solution of {expected} values but got {found}")]
    WrongSolutionLength { expected: usize, found: usize },

    #[error("The solver failed: {0}")]
    SolverFailed(String),

    #[error("Could not start the optimizer service: {0}")]
    SpawnError(std::io::Error),

    #[error("Could not communicate with the optimizer service: {0}")]
    ClientError(#[from] OptimizerClientError),

    #[error("The optimizer service reported error {code}: {message}")]
    ServiceError { code: i32, message: String },

    #[error("The configured backend is not a TCP optimizer service")]
    NotTcpBackend,

    #[error("Invalid solver configuration: {0}")]
    ConfigError(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SolverOutcome {
    /// The first command of the solution, the only one that is applied.
    pub fn first_command(&self) -> Option<Command> {
        match self.solution.get(0..2) {
            Some(c) => Some(Command::new(c[0], c[1])),
            None => None,
        }
    }
}

impl<S: Solver + ?Sized> Solver for Box<S> {
    fn solve(&mut self, params: &[f64]) -> Result<SolverOutcome, SolverError> {
        (**self).solve(params)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the solver backend selected in the configuration.
pub fn from_config(config: &Config) -> Result<Box<dyn Solver>, SolverError> {
    let formulation = Formulation::new(config)?;

    Ok(match config.solver.backend {
        SolverBackend::Alm => Box::new(AlmSolver::new(formulation, &config.solver)),
        SolverBackend::Tcp { .. } => Box::new(TcpSolver::new(&formulation, &config.solver)?),
    })
}
