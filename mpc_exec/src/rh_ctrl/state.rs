//! Implementations for the RhCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, error, info, log, warn, Level};
use nalgebra::Vector2;
use serde::Serialize;

use super::{RhCtrlError, SimRecord};
use crate::{
    config::Config,
    dyn_obs::{DynamicObstacle, ObstaclePose, SegmentHeading},
    pack::{pack, select_vertices, ParamLayout, VertexSelection},
    solver::Solver,
    traj::ReferenceTrajectory,
    vehicle::{self, Command, State},
};
use util::{maths::wrap_angle, module, time};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Receding horizon controller state.
///
/// Owns the solver for the whole run, so a solver holding an external
/// resource releases it when the controller is dropped, whether the run
/// finished or failed.
pub struct RhCtrl<S: Solver> {
    config: Config,

    layout: ParamLayout,

    reference: ReferenceTrajectory,

    solver: S,

    state: State,

    /// The command applied on the previous tick.
    prev_cmd: Command,

    step: usize,
}

/// Input data to RhCtrl.
#[derive(Debug, Clone, Default)]
pub struct InputData {
    /// Static obstacle vertices in the scene. Those actually used are chosen
    /// every tick.
    pub static_vertices: Vec<Vector2<f64>>,

    pub dynamic_obstacles: Vec<DynamicObstacle>,
}

/// Output of one tick.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OutputData {
    /// The step this output was computed on.
    pub step: usize,

    /// The command applied on this step.
    pub cmd: Command,

    /// The state after applying the command.
    pub state: State,
}

/// Status report for RhCtrl processing.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusReport {
    pub step: usize,

    pub cost: f64,

    pub solve_time_ms: f64,

    pub num_outer_iterations: usize,

    pub num_inner_iterations: usize,

    /// Static vertices that were not passed to the solver.
    pub num_truncated_vertices: usize,

    /// Distance to the goal before the command was applied.
    pub goal_dist_m: f64,

    /// Wrapped heading error against the current reference sample.
    pub head_err_rad: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<S: Solver> RhCtrl<S> {
    /// Create a new controller starting from `initial_state`.
    pub fn new(
        config: Config,
        reference: ReferenceTrajectory,
        initial_state: State,
        solver: S,
    ) -> Result<Self, RhCtrlError> {
        config.validate()?;

        if config.dynobs_heading == SegmentHeading::Legacy {
            warn!(
                "Dynamic obstacles use the legacy segment heading, their wiggle will not be \
                perpendicular to their segment"
            );
        }

        info!(
            "RhCtrl created: N = {}, dt = {} s, {} reference states",
            config.n_horizon,
            config.dt_s,
            reference.len()
        );

        Ok(Self {
            layout: ParamLayout::new(&config),
            config,
            reference,
            solver,
            state: initial_state,
            prev_cmd: Command::zeros(),
            step: 0,
        })
    }

    /// Run `steps` ticks with the same obstacle input.
    pub fn run(&mut self, input: &InputData, steps: usize) -> Result<SimRecord, RhCtrlError> {
        let mut record = SimRecord::new(self.state);
        self.run_with(input, steps, &mut record, |_, _| ())?;
        Ok(record)
    }

    /// Run `steps` ticks, pushing each one into `record` and handing it to
    /// `on_tick`.
    ///
    /// Ticks completed before a failure stay in `record`.
    pub fn run_with<F>(
        &mut self,
        input: &InputData,
        steps: usize,
        record: &mut SimRecord,
        mut on_tick: F,
    ) -> Result<(), RhCtrlError>
    where
        F: FnMut(&OutputData, &StatusReport),
    {
        for _ in 0..steps {
            let (output, report) = module::State::proc(self, input)?;
            on_tick(&output, &report);
            record.push(&output, &report);
        }

        info!(
            "Run complete after {} steps, final state ({:.3}, {:.3}, {:.3})",
            steps, self.state[0], self.state[1], self.state[2]
        );

        Ok(())
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn prev_cmd(&self) -> &Command {
        &self.prev_cmd
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn reference(&self) -> &ReferenceTrajectory {
        &self.reference
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Predicted poses of the dynamic obstacles over the horizon starting at
    /// the current step.
    fn predict_dynobs(&self, obstacles: &[DynamicObstacle]) -> Vec<Vec<ObstaclePose>> {
        let c = &self.config;

        if obstacles.len() > c.n_dynobs {
            warn!(
                "{} dynamic obstacles given but only {} are considered",
                obstacles.len(),
                c.n_dynobs
            );
        }

        let t0 = self.step as f64 * c.dt_s;

        obstacles
            .iter()
            .take(c.n_dynobs)
            .map(|o| {
                o.poses_over(
                    t0,
                    c.n_horizon,
                    c.dt_s,
                    c.r_safe_m,
                    c.vehicle_margin_m,
                    c.dynobs_heading,
                )
            })
            .collect()
    }

    fn fail(&self, message: String) -> RhCtrlError {
        error!("Solve failed at step {}: {}", self.step, message);

        RhCtrlError::SolveFailed {
            step: self.step,
            message,
            state: self.state,
        }
    }
}

impl<S: Solver> module::State for RhCtrl<S> {
    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = RhCtrlError;

    /// Perform one tick of receding horizon control.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let step = self.step;
        let n = self.config.n_horizon;

        // ---- WINDOW ----

        let segment = self.reference.window(step, n);

        // ---- PACK ----

        let position = self.state.xy();
        let (vertices, num_dropped) = select_vertices(
            self.config.vertex_selection,
            &input_data.static_vertices,
            &position,
            self.config.max_vert,
        );

        if let Some((level, message)) =
            truncation_log(self.config.vertex_selection, vertices.len(), num_dropped)
        {
            log!(level, "{}", message);
        }

        let dynobs = self.predict_dynobs(&input_data.dynamic_obstacles);

        let (params, pack_report) = pack(
            &self.layout,
            &self.state,
            &self.prev_cmd,
            &segment,
            &vertices,
            self.config.r_safe_m,
            &dynobs,
        )?;

        // ---- SOLVE ----

        let outcome = match self.solver.solve(&params) {
            Ok(o) => o,
            Err(e) => return Err(self.fail(e.to_string())),
        };

        if !outcome.success {
            return Err(self.fail(format!("solver did not converge ({})", outcome.message)));
        }

        let cmd = match outcome.first_command() {
            Some(c) => c,
            None => return Err(self.fail("solver returned an empty solution".into())),
        };

        // ---- APPLY ----

        let report = StatusReport {
            step,
            cost: outcome.cost,
            solve_time_ms: time::std_duration_to_millis(outcome.solve_time),
            num_outer_iterations: outcome.num_outer_iterations,
            num_inner_iterations: outcome.num_inner_iterations,
            num_truncated_vertices: num_dropped + pack_report.num_truncated,
            goal_dist_m: (self.reference.last().xy() - position).norm(),
            head_err_rad: wrap_angle(self.state[2] - segment[0][2]),
        };

        info!(
            "Step {}: cmd = ({:.3} m/s, {:.3} rad/s), cost = {:.4}",
            step, cmd[0], cmd[1], outcome.cost
        );
        debug!(
            "Step {}: {} outer/{} inner iterations in {:.2} ms",
            step, report.num_outer_iterations, report.num_inner_iterations, report.solve_time_ms
        );

        self.state = vehicle::propagate(&self.state, &cmd, self.config.dt_s);
        self.prev_cmd = cmd;
        self.step += 1;

        Ok((
            OutputData {
                step,
                cmd,
                state: self.state,
            },
            report,
        ))
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Log level and message reporting vertices which did not fit in the problem.
fn truncation_log(
    selection: VertexSelection,
    num_kept: usize,
    num_dropped: usize,
) -> Option<(Level, String)> {
    if num_dropped == 0 {
        return None;
    }

    let message = match selection {
        VertexSelection::Nearest => format!(
            "Kept the {} nearest static obstacle vertices, dropped the {} farthest",
            num_kept, num_dropped
        ),
        VertexSelection::First => format!(
            "{} static obstacle vertices did not fit in the problem and were dropped",
            num_dropped
        ),
    };

    Some((Level::Warn, message))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        problem::Formulation,
        rh_ctrl::default_num_steps,
        scene::{DirectPlanner, PathPlanner, Scenario, Scene},
        solver::{AlmSolver, SolverError, SolverOutcome},
    };
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    // ---- MOCK SOLVER ----

    enum Failure {
        Error,
        NotConverged,
    }

    /// Solver returning a fixed command, failing from a given call onwards.
    struct MockSolver {
        cmd: Command,
        n: usize,
        fail_at: Option<(usize, Failure)>,
        calls: usize,
        params: Arc<Mutex<Vec<Vec<f64>>>>,
        dropped: Arc<AtomicBool>,
    }

    impl MockSolver {
        fn new(cmd: Command, n: usize, fail_at: Option<(usize, Failure)>) -> Self {
            Self {
                cmd,
                n,
                fail_at,
                calls: 0,
                params: Arc::new(Mutex::new(Vec::new())),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Solver for MockSolver {
        fn solve(&mut self, params: &[f64]) -> Result<SolverOutcome, SolverError> {
            self.params.lock().unwrap().push(params.to_vec());
            let call = self.calls;
            self.calls += 1;

            let mut outcome = SolverOutcome {
                success: true,
                solution: (0..self.n).flat_map(|_| vec![self.cmd[0], self.cmd[1]]).collect(),
                cost: 1.0,
                solve_time: Duration::from_millis(1),
                message: "Converged".into(),
                num_outer_iterations: 1,
                num_inner_iterations: 1,
            };

            match &self.fail_at {
                Some((k, Failure::Error)) if call >= *k => {
                    Err(SolverError::SolverFailed("mock failure".into()))
                }
                Some((k, Failure::NotConverged)) if call >= *k => {
                    outcome.success = false;
                    outcome.message = "NotConvergedOutOfTime".into();
                    Ok(outcome)
                }
                _ => Ok(outcome),
            }
        }
    }

    impl Drop for MockSolver {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn line_reference(len: usize) -> ReferenceTrajectory {
        ReferenceTrajectory::from_states(
            (0..len)
                .map(|i| State::new(0.1 * i as f64, 0.0, 0.0))
                .collect(),
        )
        .unwrap()
    }

    fn small_config() -> Config {
        Config {
            n_horizon: 5,
            max_vert: 2,
            ..Config::default()
        }
    }

    /// Configuration for closed loop runs with the ALM solver, with limits
    /// generous enough for an unoptimised build.
    fn alm_config() -> Config {
        let mut config = Config::default();
        config.solver.max_duration_ms = 10_000;
        config.solver.max_outer_iterations = 100;
        config.solver.max_inner_iterations = 5000;
        config
    }

    // ---- LOOP BEHAVIOUR ----

    #[test]
    fn test_truncation_logged_as_warning() {
        assert!(truncation_log(VertexSelection::Nearest, 4, 0).is_none());

        let (level, message) = truncation_log(VertexSelection::Nearest, 4, 3).unwrap();
        assert_eq!(level, Level::Warn);
        assert!(message.contains("farthest"));

        let (level, _) = truncation_log(VertexSelection::First, 4, 3).unwrap();
        assert_eq!(level, Level::Warn);
    }

    #[test]
    fn test_first_command_applied_and_carried() {
        let config = small_config();
        let solver = MockSolver::new(Command::new(0.5, 0.1), 5, None);
        let seen = solver.params.clone();
        let x0 = State::new(0.0, 0.0, 0.0);

        let mut ctrl = RhCtrl::new(config.clone(), line_reference(10), x0, solver).unwrap();
        let input = InputData {
            static_vertices: vec![
                Vector2::new(5.0, 5.0),
                Vector2::new(0.5, 0.5),
                Vector2::new(-3.0, 0.0),
            ],
            dynamic_obstacles: Vec::new(),
        };

        let record = ctrl.run(&input, 3).unwrap();

        let s1 = vehicle::propagate(&x0, &Command::new(0.5, 0.1), config.dt_s);
        assert_eq!(record.states.len(), 4);
        assert_eq!(record.states[1], s1);
        assert_eq!(ctrl.step(), 3);
        assert_eq!(*ctrl.prev_cmd(), Command::new(0.5, 0.1));
        assert_eq!(record.num_truncated_vertices, vec![1, 1, 1]);

        let seen = seen.lock().unwrap();
        let layout = ParamLayout::new(&config);
        assert_eq!(seen.len(), 3);

        // Previous command starts at zero then carries the applied command
        assert_eq!(&seen[0][layout.u_prev()], &[0.0, 0.0]);
        assert_eq!(&seen[1][layout.u_prev()], &[0.5, 0.1]);
        assert_eq!(&seen[1][layout.x0()], s1.as_slice());

        // Nearest two vertices, closest first
        assert_eq!(&seen[0][layout.vertices()], &[0.5, 0.5, -3.0, 0.0]);

        // Reference window advances by one sample per tick
        assert_eq!(seen[2][layout.reference().start], 0.2);
    }

    #[test]
    fn test_solver_error_is_fatal() {
        let solver = MockSolver::new(Command::new(0.3, 0.0), 5, Some((4, Failure::Error)));
        let dropped = solver.dropped.clone();

        let mut ctrl =
            RhCtrl::new(small_config(), line_reference(20), State::zeros(), solver).unwrap();

        match ctrl.run(&InputData::default(), 10) {
            Err(RhCtrlError::SolveFailed { step, state, .. }) => {
                assert_eq!(step, 4);
                assert_eq!(state, *ctrl.state());
            }
            r => panic!("Expected a solve failure, got {:?}", r.map(|_| ())),
        }

        // No command was applied on the failed tick
        assert_eq!(ctrl.step(), 4);

        // Dropping the controller releases the solver
        assert!(!dropped.load(Ordering::SeqCst));
        drop(ctrl);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_partial_record_kept_on_failure() {
        let solver = MockSolver::new(Command::new(0.3, 0.0), 5, Some((2, Failure::Error)));
        let mut ctrl =
            RhCtrl::new(small_config(), line_reference(20), State::zeros(), solver).unwrap();

        let mut record = SimRecord::new(*ctrl.state());
        let mut ticks = Vec::new();
        let result = ctrl.run_with(&InputData::default(), 10, &mut record, |output, _| {
            ticks.push(output.step)
        });

        assert!(matches!(result, Err(RhCtrlError::SolveFailed { step: 2, .. })));
        assert_eq!(ticks, vec![0, 1]);
        assert_eq!(record.commands.len(), 2);
        assert_eq!(record.states.len(), 3);
        assert_eq!(record.final_state(), Some(ctrl.state()));
    }

    #[test]
    fn test_non_convergence_is_fatal() {
        let solver = MockSolver::new(
            Command::new(0.3, 0.0),
            5,
            Some((0, Failure::NotConverged)),
        );

        let mut ctrl =
            RhCtrl::new(small_config(), line_reference(20), State::zeros(), solver).unwrap();

        match module::State::proc(&mut ctrl, &InputData::default()) {
            Err(RhCtrlError::SolveFailed { step, message, .. }) => {
                assert_eq!(step, 0);
                assert!(message.contains("NotConvergedOutOfTime"));
            }
            _ => panic!("Expected a solve failure"),
        }
        assert_eq!(*ctrl.state(), State::zeros());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            dt_s: -0.1,
            ..small_config()
        };
        let solver = MockSolver::new(Command::zeros(), 5, None);
        assert!(matches!(
            RhCtrl::new(config, line_reference(5), State::zeros(), solver),
            Err(RhCtrlError::ConfigError(_))
        ));
    }

    #[test]
    fn test_dynamic_obstacles_packed() {
        let config = Config {
            n_dynobs: 1,
            ..small_config()
        };
        let solver = MockSolver::new(Command::new(0.1, 0.0), 5, None);
        let seen = solver.params.clone();

        let obs = DynamicObstacle {
            p1: [1.0, 4.0],
            p2: [2.0, 7.0],
            frequency_rads: 0.1,
            x_radius_m: 0.2,
            y_radius_m: 0.5,
            heading_rad: 0.1,
            amplitude_m: 1.5,
        };

        let mut ctrl =
            RhCtrl::new(config.clone(), line_reference(10), State::zeros(), solver).unwrap();
        ctrl.run(
            &InputData {
                static_vertices: Vec::new(),
                dynamic_obstacles: vec![obs, obs],
            },
            2,
        )
        .unwrap();

        let layout = ParamLayout::new(&config);
        let seen = seen.lock().unwrap();

        // Second tick predicts from t0 = dt, first predicted time is 2 dt
        let expected = obs.pose_at(2.0 * config.dt_s, config.dynobs_heading);
        let start = layout.dynobs_at(0, 1);
        assert_eq!(seen[1][start], expected[0]);
        assert_eq!(seen[1][start + 1], expected[1]);
        assert!((seen[1][start + 2] - 0.7).abs() < 1e-12);
        assert_eq!(seen[1].len(), layout.len());
    }

    // ---- CLOSED LOOP ----

    fn unit_square_scene(obstacles: Vec<Vec<[f64; 2]>>) -> Scene {
        Scene::from_scenario(&Scenario {
            boundary: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
            obstacles,
            dynamic_obstacles: Vec::new(),
            start: [1.0, 1.0],
            goal: [9.0, 9.0],
            path: None,
        })
        .unwrap()
    }

    fn alm_controller(config: &Config, path: &[Vector2<f64>]) -> RhCtrl<AlmSolver> {
        let reference = ReferenceTrajectory::from_path(path, Some(config.path_sep_m)).unwrap();
        let solver = AlmSolver::new(Formulation::new(config).unwrap(), &config.solver);
        let x0 = reference.first();

        RhCtrl::new(config.clone(), reference, x0, solver).unwrap()
    }

    #[test]
    fn test_reaches_goal_in_empty_square() {
        let config = alm_config();
        let scene = unit_square_scene(Vec::new());
        let path = scene.path(&DirectPlanner { point_sep_m: 0.5 }).unwrap();

        let mut ctrl = alm_controller(&config, &path);
        let steps = default_num_steps(ctrl.reference());

        let record = ctrl
            .run(
                &InputData {
                    static_vertices: scene.obstacle_vertices(),
                    dynamic_obstacles: Vec::new(),
                },
                steps,
            )
            .unwrap();

        assert_eq!(record.commands.len(), steps);

        let goal = scene.goal;
        let final_state = record.final_state().unwrap();
        let dist = (final_state.xy() - goal).norm();
        assert!(dist < 0.5, "final state {:?} is {} m from the goal", final_state, dist);

        // Every applied command respects the limits
        for c in record.commands.iter() {
            assert!(c[0] >= config.vel_min_ms - 1e-9 && c[0] <= config.vel_max_ms + 1e-9);
            assert!(c[1] >= config.ang_vel_min_rads - 1e-9 && c[1] <= config.ang_vel_max_rads + 1e-9);
        }
    }

    #[test]
    fn test_avoids_vertex_on_reference() {
        let config = Config {
            max_vert: 4,
            ..alm_config()
        };
        let scene = unit_square_scene(Vec::new());
        let path = DirectPlanner { point_sep_m: 0.5 }.plan(&scene).unwrap();
        let vertex = Vector2::new(5.0, 5.0);

        let mut ctrl = alm_controller(&config, &path);
        let steps = default_num_steps(ctrl.reference());

        let record = ctrl
            .run(
                &InputData {
                    static_vertices: vec![vertex],
                    dynamic_obstacles: Vec::new(),
                },
                steps,
            )
            .unwrap();

        let min_dist = record
            .states
            .iter()
            .map(|s| (s.xy() - vertex).norm())
            .fold(f64::INFINITY, f64::min);
        assert!(
            min_dist >= config.r_safe_m,
            "came within {} m of the vertex",
            min_dist
        );

        // Distance from the straight line y = x
        let max_dev = record
            .states
            .iter()
            .map(|s| (s[0] - s[1]).abs() / 2f64.sqrt())
            .fold(0.0, f64::max);
        assert!(max_dev > 0.2, "maximum deviation was only {} m", max_dev);
    }
}
