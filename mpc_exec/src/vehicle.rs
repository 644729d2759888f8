//! # Vehicle model
//!
//! Unicycle kinematics discretised with forward Euler. The same functions are used to predict
//! states inside the optimisation problem and to propagate the executed state, so the predicted
//! and executed dynamics never differ.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, Matrix3x2, Vector2, Vector3};

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Vehicle state `(x, y, heading)`.
///
/// The heading is not wrapped, it may grow without bound.
pub type State = Vector3<f64>;

/// Vehicle command `(linear_velocity, angular_velocity)`.
pub type Command = Vector2<f64>;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Propagate the state over one timestep of length `dt` under the given command.
pub fn propagate(state: &State, cmd: &Command, dt: f64) -> State {
    let (sin, cos) = state[2].sin_cos();

    Vector3::new(
        state[0] + dt * cmd[0] * cos,
        state[1] + dt * cmd[0] * sin,
        state[2] + dt * cmd[1],
    )
}

/// Jacobian of [`propagate`] with respect to the state.
#[rustfmt::skip]
pub fn state_jacobian(state: &State, cmd: &Command, dt: f64) -> Matrix3<f64> {
    let (sin, cos) = state[2].sin_cos();

    Matrix3::new(
        1.0, 0.0, -dt * cmd[0] * sin,
        0.0, 1.0, dt * cmd[0] * cos,
        0.0, 0.0, 1.0,
    )
}

/// Jacobian of [`propagate`] with respect to the command.
#[rustfmt::skip]
pub fn command_jacobian(state: &State, dt: f64) -> Matrix3x2<f64> {
    let (sin, cos) = state[2].sin_cos();

    Matrix3x2::new(
        dt * cos, 0.0,
        dt * sin, 0.0,
        0.0, dt,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_propagate() {
        let s = propagate(&State::new(1.0, 2.0, FRAC_PI_2), &Command::new(2.0, 0.5), 0.1);
        assert!((s[0] - 1.0).abs() < 1e-12);
        assert!((s[1] - 2.2).abs() < 1e-12);
        assert!((s[2] - (FRAC_PI_2 + 0.05)).abs() < 1e-12);

        // Heading is never wrapped
        let s = propagate(&State::new(0.0, 0.0, 3.1), &Command::new(0.0, 1.0), 0.1);
        assert!(s[2] > std::f64::consts::PI);
    }

    #[test]
    fn test_half_steps_match_full_step() {
        let dt = 0.01;
        let states = [
            State::new(0.0, 0.0, 0.0),
            State::new(1.0, -2.0, 2.5),
            State::new(-3.0, 4.0, -7.0),
        ];
        let cmds = [
            Command::new(1.0, 0.5),
            Command::new(-0.5, -0.3),
            Command::new(1.5, 0.0),
        ];

        for s in states.iter() {
            for u in cmds.iter() {
                let full = propagate(s, u, dt);
                let half = propagate(&propagate(s, u, dt / 2.0), u, dt / 2.0);

                // Error is second order in dt
                assert!((full - half).norm() < dt * dt * 2.0);
            }
        }
    }

    #[test]
    fn test_jacobians() {
        let s = State::new(0.3, -0.2, 0.7);
        let u = Command::new(1.2, -0.4);
        let dt = 0.1;
        let h = 1e-6;

        let a = state_jacobian(&s, &u, dt);
        let b = command_jacobian(&s, dt);

        for i in 0..3 {
            let mut sp = s;
            sp[i] += h;
            let col = (propagate(&sp, &u, dt) - propagate(&s, &u, dt)) / h;
            assert!((col - a.column(i)).norm() < 1e-5);
        }

        for i in 0..2 {
            let mut up = u;
            up[i] += h;
            let col = (propagate(&s, &up, dt) - propagate(&s, &u, dt)) / h;
            assert!((col - b.column(i)).norm() < 1e-5);
        }
    }
}
