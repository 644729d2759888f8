//! # Problem formulation
//!
//! The finite horizon optimal control problem solved on every tick. The decision variables are the
//! `N` commands `u_0 .. u_{N-1}` stored interleaved, `[v_0, w_0, v_1, w_1, ...]`. States are not
//! decision variables, they are obtained by rolling the vehicle model forward from the packed
//! initial state, so the dynamics hold by construction.
//!
//! The cost is
//!
//! ```text
//! J = sum_{k=0}^{N-1} ( e_k' Q e_k + u_k' R u_k + a_k' Ra a_k ) + e_N' QN e_N
//! ```
//!
//! where `e_k` is the state error against the reference with the heading error wrapped to
//! `(-pi, pi]`, and `a_k = (u_k - u_{k-1}) / dt` with `u_{-1}` the previously applied command.
//!
//! Constraints are split in two. Command limits form a box on the decision variables, everything
//! else is the mapping `F1(u) in C`:
//!
//! - `a_k` for every step, bounded by the acceleration limits,
//! - `r_safe^2 - |p_k - v_j|^2 <= 0` for every step `k = 1..N` and vertex slot `j`,
//! - `1 - (e_x/r_x)^2 - (e_y/r_y)^2 <= 0` for every dynamic obstacle and step `k = 1..N`.
//!
//! The obstacle rows of `C` are bounded above by `-delta_tolerance` rather than zero.
//!
//! Gradients of the cost and of `F1' d` are computed with a single reverse pass through the
//! rolled out states.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Vector2, Vector3};

use crate::{
    config::{Config, ConfigError},
    dyn_obs::ObstaclePose,
    pack::{ParamLayout, DYNOBS_STRIDE},
    vehicle::{self, Command, State},
};
use util::maths::wrap_angle;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Bound on the magnitude of the Lagrange multipliers.
pub const MULTIPLIER_BOUND: f64 = 1e12;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The optimal control problem for a given configuration.
///
/// Built once, then evaluated against a different packed parameter vector on
/// every tick.
#[derive(Debug, Clone)]
pub struct Formulation {
    layout: ParamLayout,

    dt: f64,

    /// Stage state weights.
    q: Vector3<f64>,

    /// Command weights.
    r: Vector2<f64>,

    /// Rate weights.
    ra: Vector2<f64>,

    /// Terminal state weights.
    qn: Vector3<f64>,

    u_min: Vec<f64>,
    u_max: Vec<f64>,

    c_min: Vec<f64>,
    c_max: Vec<f64>,

    y_min: Vec<f64>,
    y_max: Vec<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Formulation {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let layout = ParamLayout::new(config);
        let n = config.n_horizon;
        let num_obs_rows = n * (config.max_vert + config.n_dynobs);

        let mut u_min = Vec::with_capacity(2 * n);
        let mut u_max = Vec::with_capacity(2 * n);
        let mut c_min = Vec::with_capacity(2 * n + num_obs_rows);
        let mut c_max = Vec::with_capacity(2 * n + num_obs_rows);

        for _ in 0..n {
            u_min.extend_from_slice(&[config.vel_min_ms, config.ang_vel_min_rads]);
            u_max.extend_from_slice(&[config.vel_max_ms, config.ang_vel_max_rads]);
            c_min.extend_from_slice(&[config.lin_acc_min_mss, config.ang_acc_min_radss]);
            c_max.extend_from_slice(&[config.lin_acc_max_mss, config.ang_acc_max_radss]);
        }

        // Obstacle rows are only met to within the infeasibility tolerance
        c_min.resize(2 * n + num_obs_rows, f64::NEG_INFINITY);
        c_max.resize(2 * n + num_obs_rows, -config.solver.delta_tolerance);

        let mut y_min = vec![-MULTIPLIER_BOUND; 2 * n];
        y_min.resize(2 * n + num_obs_rows, 0.0);
        let y_max = vec![MULTIPLIER_BOUND; 2 * n + num_obs_rows];

        Ok(Self {
            layout,
            dt: config.dt_s,
            q: Vector3::new(config.pos_dev, config.pos_dev, config.heading_dev),
            r: Vector2::new(config.lin_vel_pen, config.ang_vel_pen),
            ra: Vector2::new(config.lin_acc_pen, config.ang_acc_pen),
            qn: Vector3::new(
                config.termcost_pos,
                config.termcost_pos,
                config.termcost_heading,
            ),
            u_min,
            u_max,
            c_min,
            c_max,
            y_min,
            y_max,
        })
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Number of decision variables, `2N`.
    pub fn num_decision_vars(&self) -> usize {
        2 * self.layout.n_horizon
    }

    /// Number of rows of `F1`.
    pub fn num_constraints(&self) -> usize {
        self.c_min.len()
    }

    /// Lower and upper bounds on the decision variables.
    pub fn command_bounds(&self) -> (&[f64], &[f64]) {
        (&self.u_min, &self.u_max)
    }

    /// Lower and upper bounds of the set `C` that `F1(u)` must lie in.
    pub fn f1_bounds(&self) -> (&[f64], &[f64]) {
        (&self.c_min, &self.c_max)
    }

    /// Box the Lagrange multipliers of `F1` are kept in.
    pub fn multiplier_bounds(&self) -> (&[f64], &[f64]) {
        (&self.y_min, &self.y_max)
    }

    /// States `s_0 .. s_N` predicted by applying `u` from the packed initial state.
    pub fn rollout(&self, u: &[f64], p: &[f64]) -> Vec<State> {
        let n = self.layout.n_horizon;
        let mut states = Vec::with_capacity(n + 1);
        states.push(self.x0(p));

        for k in 0..n {
            let next = vehicle::propagate(&states[k], &command(u, k), self.dt);
            states.push(next);
        }

        states
    }

    /// Cost of the command sequence `u`.
    pub fn cost(&self, u: &[f64], p: &[f64]) -> f64 {
        let n = self.layout.n_horizon;
        let states = self.rollout(u, p);

        let mut cost = 0.0;

        for k in 0..n {
            let e = state_error(&states[k], &self.reference(p, k));
            let uk = command(u, k);
            let ak = self.rate(u, p, k);

            cost += e.component_mul(&e).dot(&self.q)
                + uk.component_mul(&uk).dot(&self.r)
                + ak.component_mul(&ak).dot(&self.ra);
        }

        let e = state_error(&states[n], &self.reference(p, n));
        cost + e.component_mul(&e).dot(&self.qn)
    }

    /// Gradient of [`Formulation::cost`] with respect to `u`.
    pub fn grad(&self, u: &[f64], p: &[f64], out: &mut [f64]) {
        let n = self.layout.n_horizon;
        let states = self.rollout(u, p);

        out.iter_mut().for_each(|g| *g = 0.0);

        let mut state_grads = vec![Vector3::zeros(); n + 1];

        for k in 0..n {
            let e = state_error(&states[k], &self.reference(p, k));
            state_grads[k] = 2.0 * self.q.component_mul(&e);

            let uk = command(u, k);
            let du = 2.0 * self.r.component_mul(&uk);
            let da = 2.0 * self.ra.component_mul(&self.rate(u, p, k)) / self.dt;

            for i in 0..2 {
                out[2 * k + i] += du[i] + da[i];
                if k > 0 {
                    out[2 * (k - 1) + i] -= da[i];
                }
            }
        }

        let e = state_error(&states[n], &self.reference(p, n));
        state_grads[n] = 2.0 * self.qn.component_mul(&e);

        self.backprop(&states, u, &state_grads, out);
    }

    /// Evaluate the constraint mapping `F1(u)`.
    pub fn f1(&self, u: &[f64], p: &[f64], out: &mut [f64]) {
        let n = self.layout.n_horizon;

        for k in 0..n {
            let a = self.rate(u, p, k);
            out[2 * k] = a[0];
            out[2 * k + 1] = a[1];
        }

        if !self.layout.has_obstacles() {
            return;
        }

        let states = self.rollout(u, p);
        let mut row = 2 * n;

        let r_safe_sq = self.r_safe(p).powi(2);
        let verts = &p[self.layout.vertices()];
        for s in states[1..].iter() {
            for v in verts.chunks(2) {
                out[row] = r_safe_sq - (s[0] - v[0]).powi(2) - (s[1] - v[1]).powi(2);
                row += 1;
            }
        }

        for i in 0..self.layout.n_dynobs {
            for k in 1..=n {
                out[row] = self.dynobs_pose(p, i, k).inside_measure(states[k][0], states[k][1]);
                row += 1;
            }
        }
    }

    /// Evaluate `JF1(u)' d`.
    pub fn f1_jacobian_trans(&self, u: &[f64], p: &[f64], d: &[f64], out: &mut [f64]) {
        let n = self.layout.n_horizon;

        out.iter_mut().for_each(|g| *g = 0.0);

        for k in 0..n {
            for i in 0..2 {
                let di = d[2 * k + i] / self.dt;
                out[2 * k + i] += di;
                if k > 0 {
                    out[2 * (k - 1) + i] -= di;
                }
            }
        }

        if !self.layout.has_obstacles() {
            return;
        }

        let states = self.rollout(u, p);
        let mut state_grads = vec![Vector3::zeros(); n + 1];
        let mut row = 2 * n;

        let verts = &p[self.layout.vertices()];
        for k in 1..=n {
            let s = &states[k];
            for v in verts.chunks(2) {
                state_grads[k][0] -= 2.0 * d[row] * (s[0] - v[0]);
                state_grads[k][1] -= 2.0 * d[row] * (s[1] - v[1]);
                row += 1;
            }
        }

        for i in 0..self.layout.n_dynobs {
            for k in 1..=n {
                let pose = self.dynobs_pose(p, i, k);
                let (sin, cos) = pose.heading_rad.sin_cos();
                let dx = states[k][0] - pose.x_m;
                let dy = states[k][1] - pose.y_m;
                let ex = cos * dx + sin * dy;
                let ey = -sin * dx + cos * dy;
                let rx2 = pose.x_radius_m.powi(2);
                let ry2 = pose.y_radius_m.powi(2);

                state_grads[k][0] -= 2.0 * d[row] * (ex * cos / rx2 - ey * sin / ry2);
                state_grads[k][1] -= 2.0 * d[row] * (ex * sin / rx2 + ey * cos / ry2);
                row += 1;
            }
        }

        self.backprop(&states, u, &state_grads, out);
    }

    /// Accumulate into `out` the gradient with respect to `u` of a function
    /// whose partial derivatives with respect to each predicted state are
    /// `state_grads`.
    fn backprop(&self, states: &[State], u: &[f64], state_grads: &[Vector3<f64>], out: &mut [f64]) {
        let n = self.layout.n_horizon;
        let mut adjoint = state_grads[n];

        for k in (0..n).rev() {
            let uk = command(u, k);

            let du = vehicle::command_jacobian(&states[k], self.dt).transpose() * adjoint;
            out[2 * k] += du[0];
            out[2 * k + 1] += du[1];

            adjoint = state_grads[k]
                + vehicle::state_jacobian(&states[k], &uk, self.dt).transpose() * adjoint;
        }
    }

    fn x0(&self, p: &[f64]) -> State {
        State::from_column_slice(&p[self.layout.x0()])
    }

    fn u_prev(&self, p: &[f64]) -> Command {
        Command::from_column_slice(&p[self.layout.u_prev()])
    }

    fn reference(&self, p: &[f64], k: usize) -> State {
        let start = self.layout.reference().start + 3 * k;
        State::from_column_slice(&p[start..start + 3])
    }

    fn r_safe(&self, p: &[f64]) -> f64 {
        self.layout.r_safe().map(|i| p[i]).unwrap_or(0.0)
    }

    fn dynobs_pose(&self, p: &[f64], index: usize, k: usize) -> ObstaclePose {
        let start = self.layout.dynobs_at(index, k);
        let v = &p[start..start + DYNOBS_STRIDE];

        ObstaclePose {
            x_m: v[0],
            y_m: v[1],
            x_radius_m: v[2],
            y_radius_m: v[3],
            heading_rad: v[4],
        }
    }

    /// Finite difference acceleration `(u_k - u_{k-1}) / dt`.
    fn rate(&self, u: &[f64], p: &[f64], k: usize) -> Vector2<f64> {
        let prev = if k == 0 {
            self.u_prev(p)
        } else {
            command(u, k - 1)
        };

        (command(u, k) - prev) / self.dt
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Command `k` of the interleaved decision vector.
fn command(u: &[f64], k: usize) -> Command {
    Command::new(u[2 * k], u[2 * k + 1])
}

/// State error against the reference, heading error wrapped to `(-pi, pi]`.
pub fn state_error(state: &State, reference: &State) -> Vector3<f64> {
    Vector3::new(
        state[0] - reference[0],
        state[1] - reference[1],
        wrap_angle(state[2] - reference[2]),
    )
}
