//! # Receding horizon control module
//!
//! On every tick the controller takes the window of the reference trajectory ahead of the current
//! step, packs it with the current state, the previously applied command and the nearby
//! obstacles, and asks the solver for the optimal command sequence. Only the first command is
//! applied, and the state is propagated with the vehicle model using exactly that command.
//!
//! A tick on which the solver fails or does not converge ends the run. No stale or zero command
//! is ever applied in its place.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

pub use state::*;

use crate::{
    config::ConfigError,
    pack::PackError,
    traj::ReferenceTrajectory,
    vehicle::{Command, State},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Everything that happened during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimRecord {
    /// The initial state followed by the state after every tick.
    pub states: Vec<State>,

    /// The command applied on every tick.
    pub commands: Vec<Command>,

    pub costs: Vec<f64>,

    pub solve_times_ms: Vec<f64>,

    pub num_truncated_vertices: Vec<usize>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during RhCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum RhCtrlError {
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Could not pack the parameters: {0}")]
    PackError(#[from] PackError),

    #[error("Solve failed at step {step} from state {state:?}: {message}")]
    SolveFailed {
        step: usize,
        message: String,
        state: State,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimRecord {
    pub fn new(initial_state: State) -> Self {
        Self {
            states: vec![initial_state],
            ..Default::default()
        }
    }

    pub fn push(&mut self, output: &OutputData, report: &StatusReport) {
        self.states.push(output.state);
        self.commands.push(output.cmd);
        self.costs.push(report.cost);
        self.solve_times_ms.push(report.solve_time_ms);
        self.num_truncated_vertices
            .push(report.num_truncated_vertices);
    }

    /// The last recorded state.
    pub fn final_state(&self) -> Option<&State> {
        self.states.last()
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Number of ticks needed to run through the reference, one per sample.
pub fn default_num_steps(reference: &ReferenceTrajectory) -> usize {
    reference.len()
}

/// Number of ticks covering `sim_time_s` seconds.
pub fn num_steps_for_duration(sim_time_s: f64, dt_s: f64) -> usize {
    if sim_time_s > 0.0 && dt_s > 0.0 {
        (sim_time_s / dt_s).floor() as usize
    } else {
        0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_num_steps() {
        let traj = ReferenceTrajectory::from_states(vec![State::zeros(); 7]).unwrap();
        assert_eq!(default_num_steps(&traj), 7);

        assert_eq!(num_steps_for_duration(2.0, 0.5), 4);
        assert_eq!(num_steps_for_duration(-1.0, 0.1), 0);
    }
}
