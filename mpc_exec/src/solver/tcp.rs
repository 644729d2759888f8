//! Optimizer service client
//!
//! The service is reached over TCP with the messages in `comms_if::optimizer`. If configured with
//! an executable path the service is started here and killed when the solver is dropped, so it
//! never outlives the controller even when the run ends in an error.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    process::{Child, Command, Stdio},
    time::Duration,
};

use log::{debug, info, warn};

use super::{Solver, SolverError, SolverOutcome};
use crate::{
    config::{SolverBackend, SolverParams},
    problem::Formulation,
};
use comms_if::{
    net::{NetParams, OptimizerClient},
    optimizer::OptimizerResponse,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Time between pings while waiting for the service to start.
const STARTUP_PING_PERIOD: Duration = Duration::from_millis(50);

/// Time allowed for the service to reply beyond the solver's own limit.
const RECV_MARGIN_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Solver backed by an optimizer service.
pub struct TcpSolver {
    client: OptimizerClient,

    /// The service process, if it was started by us.
    child: Option<Child>,

    /// Send a kill request to the service on drop.
    kill_on_drop: bool,

    num_params: usize,

    num_decision_vars: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TcpSolver {
    /// Connect to the service described by the `Tcp` backend parameters,
    /// starting it first if an executable is given.
    pub fn new(formulation: &Formulation, params: &SolverParams) -> Result<Self, SolverError> {
        let (endpoint, exec_path, kill_on_drop, startup_timeout_ms) = match &params.backend {
            SolverBackend::Tcp {
                endpoint,
                exec_path,
                kill_on_drop,
                startup_timeout_ms,
            } => (endpoint, exec_path, *kill_on_drop, *startup_timeout_ms),
            SolverBackend::Alm => return Err(SolverError::NotTcpBackend),
        };

        let client = OptimizerClient::new(&NetParams {
            optimizer_endpoint: endpoint.clone(),
            connect_timeout_ms: startup_timeout_ms,
            recv_timeout_ms: params.max_duration_ms + RECV_MARGIN_MS,
        })?;

        let child = match exec_path {
            Some(path) => {
                info!("Starting optimizer service {:?}", path);
                Some(
                    Command::new(path)
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .spawn()
                        .map_err(SolverError::SpawnError)?,
                )
            }
            None => None,
        };

        // Build the solver before waiting so the child is cleaned up by
        // `Drop` if the service never comes up.
        let solver = Self {
            kill_on_drop: kill_on_drop || child.is_some(),
            client,
            child,
            num_params: formulation.layout().len(),
            num_decision_vars: formulation.num_decision_vars(),
        };

        solver.client.wait_until_available(
            Duration::from_millis(startup_timeout_ms),
            STARTUP_PING_PERIOD,
        )?;

        info!("Optimizer service available at {}", endpoint);

        Ok(solver)
    }
}

impl Solver for TcpSolver {
    fn solve(&mut self, params: &[f64]) -> Result<SolverOutcome, SolverError> {
        if params.len() != self.num_params {
            return Err(SolverError::WrongParameterLength {
                expected: self.num_params,
                found: params.len(),
            });
        }

        match self.client.run(params)? {
            OptimizerResponse::Error(e) => Err(SolverError::ServiceError {
                code: e.code,
                message: e.message,
            }),
            OptimizerResponse::Solution(s) => {
                if s.solution.len() != self.num_decision_vars {
                    return Err(SolverError::WrongSolutionLength {
                        expected: self.num_decision_vars,
                        found: s.solution.len(),
                    });
                }

                Ok(SolverOutcome {
                    success: s.converged(),
                    solve_time: Duration::from_nanos((s.solve_time_ms.max(0.0) * 1e6).round() as u64),
                    message: s.exit_status,
                    solution: s.solution,
                    cost: s.cost,
                    num_outer_iterations: s.num_outer_iterations,
                    num_inner_iterations: s.num_inner_iterations,
                })
            }
        }
    }
}

impl Drop for TcpSolver {
    fn drop(&mut self) {
        if self.kill_on_drop {
            match self.client.kill() {
                Ok(()) => debug!("Kill request sent to the optimizer service"),
                Err(e) => warn!("Could not send kill request to the optimizer service: {}", e),
            }
        }

        if let Some(mut child) = self.child.take() {
            // The service may already have exited after the kill request
            if let Err(e) = child.kill() {
                debug!("Optimizer service process already stopped: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("Could not reap the optimizer service process: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        sync::mpsc,
        thread,
    };

    /// Fake service answering every request with the reply produced by `f`,
    /// forwarding the requests it saw.
    fn fake_service<F>(listener: TcpListener, num_requests: usize, f: F) -> mpsc::Receiver<String>
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for _ in 0..num_requests {
                let (mut sock, _) = match listener.accept() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let mut request = String::new();
                sock.read_to_string(&mut request).unwrap();
                let reply = f(&request);
                sock.write_all(reply.as_bytes()).unwrap();
                tx.send(request).unwrap();
            }
        });

        rx
    }

    fn tcp_config(endpoint: String, kill_on_drop: bool) -> Config {
        let mut config = Config {
            n_horizon: 2,
            max_vert: 0,
            ..Config::default()
        };
        config.solver.backend = SolverBackend::Tcp {
            endpoint,
            exec_path: None,
            kill_on_drop,
            startup_timeout_ms: 1000,
        };
        config
    }

    #[test]
    fn test_solve_and_kill_on_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = tcp_config(listener.local_addr().unwrap().to_string(), true);

        let requests = fake_service(listener, 4, |req| {
            if req.starts_with("{\"Ping\"") {
                r#"{"Pong":1}"#.into()
            } else if req.starts_with("{\"Run\"") {
                r#"{"exit_status":"Converged","num_outer_iterations":3,
                    "num_inner_iterations":40,"last_problem_norm_fpr":1e-6,
                    "solve_time_ms":2.5,"solution":[0.1,0.0,0.2,0.05],"cost":1.25}"#
                    .into()
            } else if req.starts_with("{\"Kill\"") {
                String::new()
            } else {
                r#"{"type":"Error","code":1000,"message":"bad request"}"#.into()
            }
        });

        let formulation = Formulation::new(&config).unwrap();
        let mut solver = TcpSolver::new(&formulation, &config.solver).unwrap();
        assert_eq!(requests.recv().unwrap(), r#"{"Ping":1}"#);

        let outcome = solver.solve(&vec![0.0; formulation.layout().len()]).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.solution, vec![0.1, 0.0, 0.2, 0.05]);
        assert_eq!(outcome.first_command().unwrap()[0], 0.1);
        assert_eq!(outcome.cost, 1.25);
        assert_eq!(outcome.solve_time, Duration::from_micros(2500));
        assert!(requests.recv().unwrap().starts_with("{\"Run\""));

        // Wrong parameter length is caught before sending
        assert!(matches!(
            solver.solve(&[0.0]),
            Err(SolverError::WrongParameterLength { .. })
        ));

        drop(solver);
        assert_eq!(requests.recv().unwrap(), r#"{"Kill":1}"#);
    }

    #[test]
    fn test_service_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = tcp_config(listener.local_addr().unwrap().to_string(), false);

        let _requests = fake_service(listener, 2, |req| {
            if req.starts_with("{\"Ping\"") {
                r#"{"Pong":1}"#.into()
            } else {
                r#"{"type":"Error","code":2000,"message":"problem solution failed"}"#.into()
            }
        });

        let formulation = Formulation::new(&config).unwrap();
        let mut solver = TcpSolver::new(&formulation, &config.solver).unwrap();

        match solver.solve(&vec![0.0; formulation.layout().len()]) {
            Err(SolverError::ServiceError { code, .. }) => assert_eq!(code, 2000),
            r => panic!("Expected a service error, got {:?}", r),
        }
    }

    #[test]
    fn test_not_tcp_backend() {
        let config = Config::default();
        let formulation = Formulation::new(&config).unwrap();
        assert!(matches!(
            TcpSolver::new(&formulation, &config.solver),
            Err(SolverError::NotTcpBackend)
        ));
    }
}
