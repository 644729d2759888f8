//! In-process augmented Lagrangian solver
//!
//! Wraps the PANOC/ALM solver of `optimization_engine`. The command limits are the simple box
//! constraint handled by PANOC's projection, the acceleration and obstacle constraints form the
//! ALM mapping `F1(u) in C`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::Duration;

use log::{debug, trace};
use optimization_engine::{
    alm::{AlmCache, AlmFactory, AlmOptimizer, AlmProblem, NO_JACOBIAN_MAPPING, NO_MAPPING},
    constraints::Rectangle,
    core::ExitStatus,
    panoc::PANOCCache,
    FunctionCallResult,
};

use super::{Solver, SolverError, SolverOutcome};
use crate::{config::SolverParams, problem::Formulation};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Augmented Lagrangian solver.
///
/// The solver cache is allocated once and reused by every solve.
pub struct AlmSolver {
    formulation: Formulation,

    params: SolverParams,

    cache: AlmCache,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl AlmSolver {
    pub fn new(formulation: Formulation, params: &SolverParams) -> Self {
        let panoc_cache = PANOCCache::new(
            formulation.num_decision_vars(),
            params.tolerance,
            params.lbfgs_memory,
        );
        let cache = AlmCache::new(panoc_cache, formulation.num_constraints(), 0);

        debug!(
            "AlmSolver created with {} decision variables and {} constraints",
            formulation.num_decision_vars(),
            formulation.num_constraints()
        );

        Self {
            formulation,
            params: params.clone(),
            cache,
        }
    }

    pub fn formulation(&self) -> &Formulation {
        &self.formulation
    }
}

impl Solver for AlmSolver {
    fn solve(&mut self, p: &[f64]) -> Result<SolverOutcome, SolverError> {
        let Self {
            formulation,
            params,
            cache,
        } = self;
        let formulation = &*formulation;

        let expected = formulation.layout().len();
        if p.len() != expected {
            return Err(SolverError::WrongParameterLength {
                expected,
                found: p.len(),
            });
        }

        let n1 = formulation.num_constraints();

        let (u_min, u_max) = formulation.command_bounds();
        let bounds = Rectangle::new(Some(u_min), Some(u_max));
        let (c_min, c_max) = formulation.f1_bounds();
        let set_c = Rectangle::new(Some(c_min), Some(c_max));
        let (y_min, y_max) = formulation.multiplier_bounds();
        let set_y = Rectangle::new(Some(y_min), Some(y_max));

        let f = |u: &[f64], cost: &mut f64| -> FunctionCallResult {
            *cost = formulation.cost(u, p);
            Ok(())
        };
        let df = |u: &[f64], grad: &mut [f64]| -> FunctionCallResult {
            formulation.grad(u, p, grad);
            Ok(())
        };
        let f1 = |u: &[f64], out: &mut [f64]| -> FunctionCallResult {
            formulation.f1(u, p, out);
            Ok(())
        };
        let f1_jac_t = |u: &[f64], d: &[f64], out: &mut [f64]| -> FunctionCallResult {
            formulation.f1_jacobian_trans(u, p, d, out);
            Ok(())
        };

        let factory = AlmFactory::new(
            f,
            df,
            Some(f1),
            Some(f1_jac_t),
            NO_MAPPING,
            NO_JACOBIAN_MAPPING,
            Some(set_c.clone()),
            0,
        );

        let problem = AlmProblem::new(
            bounds,
            Some(set_c),
            Some(set_y),
            |u: &[f64], xi: &[f64], cost: &mut f64| -> FunctionCallResult {
                factory.psi(u, xi, cost)
            },
            |u: &[f64], xi: &[f64], grad: &mut [f64]| -> FunctionCallResult {
                factory.d_psi(u, xi, grad)
            },
            Some(f1),
            NO_MAPPING,
            n1,
            0,
        );

        let mut optimizer = AlmOptimizer::new(cache, problem)
            .with_delta_tolerance(params.delta_tolerance)
            .with_epsilon_tolerance(params.tolerance)
            .with_initial_inner_tolerance(params.initial_inner_tolerance.max(params.tolerance))
            .with_max_outer_iterations(params.max_outer_iterations)
            .with_max_inner_iterations(params.max_inner_iterations)
            .with_max_duration(Duration::from_millis(params.max_duration_ms))
            .with_initial_penalty(params.initial_penalty)
            .with_penalty_update_factor(params.penalty_update_factor)
            .with_initial_lagrange_multipliers(&vec![0.0; n1]);

        // Cold start on every tick
        let mut u = vec![0.0; formulation.num_decision_vars()];

        let status = optimizer
            .solve(&mut u)
            .map_err(|e| SolverError::SolverFailed(format!("{:?}", e)))?;

        let exit_status = status.exit_status();
        let outcome = SolverOutcome {
            success: exit_status == ExitStatus::Converged,
            cost: formulation.cost(&u, p),
            solution: u,
            solve_time: status.solve_time(),
            message: format!("{:?}", exit_status),
            num_outer_iterations: status.num_outer_iterations(),
            num_inner_iterations: status.num_inner_iterations(),
        };

        trace!(
            "ALM solve: {} in {} outer/{} inner iterations",
            outcome.message,
            outcome.num_outer_iterations,
            outcome.num_inner_iterations
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::Config,
        dyn_obs::ObstaclePose,
        pack::{pack, ParamLayout, SENTINEL},
        vehicle::{Command, State},
    };
    use nalgebra::Vector2;

    fn test_solver(config: &Config) -> AlmSolver {
        AlmSolver::new(Formulation::new(config).unwrap(), &config.solver)
    }

    fn test_config() -> Config {
        let mut config = Config {
            n_horizon: 10,
            max_vert: 4,
            ..Config::default()
        };
        config.solver.max_duration_ms = 5000;
        config.solver.max_outer_iterations = 100;
        config.solver.max_inner_iterations = 2000;
        config
    }

    #[test]
    fn test_wrong_parameter_length() {
        let mut solver = test_solver(&test_config());
        assert!(matches!(
            solver.solve(&[0.0; 3]),
            Err(SolverError::WrongParameterLength { found: 3, .. })
        ));
    }

    #[test]
    fn test_solution_respects_constraints() {
        let config = test_config();
        let mut solver = test_solver(&config);

        // Reference running ahead along x, faster than the vehicle may go
        let segment: Vec<State> = (0..=10)
            .map(|k| State::new(0.3 * k as f64, 0.0, 0.0))
            .collect();
        let (p, _) = pack(
            &ParamLayout::new(&config),
            &State::zeros(),
            &Command::zeros(),
            &segment,
            &[Vector2::new(5.0, 5.0)],
            config.r_safe_m,
            &[],
        )
        .unwrap();

        let outcome = solver.solve(&p).unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.solution.len(), 20);

        let tol = 1e-3;
        let mut prev = Command::zeros();
        for u in outcome.solution.chunks(2) {
            assert!(u[0] >= config.vel_min_ms - 1e-9 && u[0] <= config.vel_max_ms + 1e-9);
            assert!(
                u[1] >= config.ang_vel_min_rads - 1e-9 && u[1] <= config.ang_vel_max_rads + 1e-9
            );

            let acc = (u[0] - prev[0]) / config.dt_s;
            assert!(acc <= config.lin_acc_max_mss + tol && acc >= config.lin_acc_min_mss - tol);
            prev = Command::new(u[0], u[1]);
        }

        // Moving forward towards the reference
        let first = outcome.first_command().unwrap();
        assert!(first[0] > 0.0);
        assert!(outcome.cost.is_finite());
    }

    #[test]
    fn test_solution_clears_ellipse() {
        let mut config = Config {
            n_horizon: 10,
            max_vert: 0,
            n_dynobs: 1,
            ..Config::default()
        };
        config.solver.max_duration_ms = 5000;
        config.solver.max_outer_iterations = 100;
        config.solver.max_inner_iterations = 2000;
        let layout = ParamLayout::new(&config);
        let mut solver = test_solver(&config);

        let segment: Vec<State> = (0..=10)
            .map(|k| State::new(0.3 * k as f64, 0.0, 0.0))
            .collect();
        let ellipse = ObstaclePose {
            x_m: 0.3,
            y_m: 0.0,
            x_radius_m: 0.12,
            y_radius_m: 0.12,
            heading_rad: 0.0,
        };
        let far = ObstaclePose {
            x_m: SENTINEL,
            y_m: SENTINEL,
            x_radius_m: 1.0,
            y_radius_m: 1.0,
            heading_rad: 0.0,
        };
        let packed = |pose: &ObstaclePose| {
            pack(
                &layout,
                &State::zeros(),
                &Command::zeros(),
                &segment,
                &[],
                config.r_safe_m,
                &[vec![*pose; 10]],
            )
            .unwrap()
            .0
        };

        // Without the obstacle the vehicle drives straight through the ellipse
        let p_free = packed(&far);
        let free = solver.solve(&p_free).unwrap();
        assert!(free.success, "{}", free.message);
        let free_states = solver.formulation().rollout(&free.solution, &p_free);
        assert!(free_states[1..]
            .iter()
            .any(|s| ellipse.inside_measure(s[0], s[1]) > 0.0));

        let p = packed(&ellipse);
        let outcome = solver.solve(&p).unwrap();
        assert!(outcome.success, "{}", outcome.message);

        let states = solver.formulation().rollout(&outcome.solution, &p);
        for (k, s) in states.iter().enumerate().skip(1) {
            let m = ellipse.inside_measure(s[0], s[1]);
            assert!(m <= 1e-9, "state {} at {:?} is inside the ellipse ({})", k, s, m);
        }
    }
}
