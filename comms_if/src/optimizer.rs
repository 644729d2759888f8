//! # Optimizer Service Messages
//!
//! Messages exchanged with an optimizer service over TCP. Every request is a
//! single JSON document, answered by a single JSON document, after which the
//! service closes the connection.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of a single solve request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// The packed parameter vector.
    pub parameter: Vec<f64>,

    /// Initial guess for the decision variables. The service starts from
    /// zero if this is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_guess: Option<Vec<f64>>,

    /// Initial Lagrange multipliers of the augmented Lagrangian constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_lagrange_multipliers: Option<Vec<f64>>,

    /// Initial penalty parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_penalty: Option<f64>,
}

/// A successful reply to a [`RunRequest`].
///
/// Note that "successful" only means the service ran the solver, the
/// `exit_status` still has to be checked for convergence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SolutionResponse {
    /// Solver exit status, `"Converged"` when all tolerances were met.
    pub exit_status: String,

    pub num_outer_iterations: usize,

    pub num_inner_iterations: usize,

    /// Norm of the fixed point residual of the last inner problem.
    pub last_problem_norm_fpr: f64,

    #[serde(default)]
    pub delta_y_norm_over_c: f64,

    #[serde(default)]
    pub f2_norm: f64,

    pub solve_time_ms: f64,

    #[serde(default)]
    pub penalty: f64,

    /// The optimal decision variables.
    pub solution: Vec<f64>,

    #[serde(default)]
    pub lagrange_multipliers: Option<Vec<f64>>,

    pub cost: f64,
}

/// An error reported by the service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// Always `"Error"`.
    #[serde(rename = "type")]
    pub kind: String,

    pub code: i32,

    pub message: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A request sent to the optimizer service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum OptimizerRequest {
    /// Run the solver with the given parameters.
    Run(RunRequest),

    /// Check the service is alive. It answers with [`PongResponse`].
    Ping(i32),

    /// Ask the service to terminate.
    Kill(i32),
}

/// A reply to a [`OptimizerRequest::Run`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum OptimizerResponse {
    Error(ErrorResponse),
    Solution(SolutionResponse),
}

/// A reply to a [`OptimizerRequest::Ping`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PongResponse {
    #[serde(rename = "Pong")]
    pub pong: i32,
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl RunRequest {
    /// Request a solve from the default (zero) initial guess.
    pub fn new(parameter: Vec<f64>) -> Self {
        Self {
            parameter,
            initial_guess: None,
            initial_lagrange_multipliers: None,
            initial_penalty: None,
        }
    }
}

impl SolutionResponse {
    /// True if the solver met all of its tolerances.
    pub fn converged(&self) -> bool {
        self.exit_status == "Converged"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_format() {
        let run = OptimizerRequest::Run(RunRequest::new(vec![1.0, 2.5]));
        assert_eq!(
            serde_json::to_string(&run).unwrap(),
            r#"{"Run":{"parameter":[1.0,2.5]}}"#
        );

        assert_eq!(
            serde_json::to_string(&OptimizerRequest::Kill(1)).unwrap(),
            r#"{"Kill":1}"#
        );
        assert_eq!(
            serde_json::to_string(&OptimizerRequest::Ping(1)).unwrap(),
            r#"{"Ping":1}"#
        );
    }

    #[test]
    fn test_response_parsing() {
        let ok = r#"{
            "exit_status": "Converged",
            "num_outer_iterations": 4,
            "num_inner_iterations": 120,
            "last_problem_norm_fpr": 1.2e-5,
            "delta_y_norm_over_c": 0.0,
            "f2_norm": 0.0,
            "solve_time_ms": 3.2,
            "penalty": 50.0,
            "solution": [0.5, 0.1, 0.6, 0.1],
            "lagrange_multipliers": [0.0, 0.0],
            "cost": 12.5
        }"#;

        match serde_json::from_str::<OptimizerResponse>(ok).unwrap() {
            OptimizerResponse::Solution(s) => {
                assert!(s.converged());
                assert_eq!(s.solution, vec![0.5, 0.1, 0.6, 0.1]);
                assert_eq!(s.cost, 12.5);
            }
            r => panic!("Expected a solution, got {:?}", r),
        }

        let err = r#"{"type": "Error", "code": 3003, "message": "wrong number of parameters"}"#;
        match serde_json::from_str::<OptimizerResponse>(err).unwrap() {
            OptimizerResponse::Error(e) => {
                assert_eq!(e.code, 3003);
                assert_eq!(e.message, "wrong number of parameters");
            }
            r => panic!("Expected an error, got {:?}", r),
        }

        let pong: PongResponse = serde_json::from_str(r#"{"Pong":1}"#).unwrap();
        assert_eq!(pong.pong, 1);
    }
}
