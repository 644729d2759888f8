//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Wrap an angle into the range `(-pi, pi]`.
///
/// Computed as `atan2(sin(a), cos(a))` so that it stays differentiable
/// everywhere except at the cut, where `-pi` is folded onto `+pi`.
pub fn wrap_angle<T>(angle: T) -> T
where
    T: Float,
{
    let pi_t = T::from(std::f64::consts::PI).unwrap_or_else(T::zero);
    let tau_t = pi_t + pi_t;

    let wrapped = angle.sin().atan2(angle.cos());

    if wrapped <= -pi_t {
        wrapped + tau_t
    } else {
        wrapped
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Unwrap a sequence of phase angles so that consecutive values never jump
/// by more than pi.
///
/// Jumps larger than pi are corrected by the multiple of 2pi that brings
/// them back into `[-pi, pi]`, and the correction is carried forward to all
/// later samples.
pub fn unwrap_phase(phases: &[f64]) -> Vec<f64> {
    use std::f64::consts::{PI, TAU};

    let mut unwrapped = Vec::with_capacity(phases.len());
    let mut correction = 0f64;

    for (i, phase) in phases.iter().enumerate() {
        if i > 0 {
            let diff = phase - phases[i - 1];
            let mut diff_mod = rem_euclid(diff + PI, TAU) - PI;

            // Keep the sign of the original step when it lands on the cut
            if diff_mod == -PI && diff > 0.0 {
                diff_mod = PI;
            }

            if diff.abs() >= PI {
                correction += diff_mod - diff;
            }
        }

        unwrapped.push(phase + correction);
    }

    unwrapped
}

/// One dimensional piecewise-linear interpolation.
///
/// `xp` must be increasing. Values of `x` outside `xp` are clamped to the
/// first or last value of `fp`. Returns `None` if the inputs are empty or of
/// differing lengths.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> Option<f64> {
    if xp.is_empty() || xp.len() != fp.len() {
        return None;
    }

    let last = xp.len() - 1;

    if x <= xp[0] {
        return Some(fp[0]);
    }
    if x >= xp[last] {
        return Some(fp[last]);
    }

    // Index of the first knot strictly greater than x, at least 1 here
    let upper = xp.partition_point(|&k| k <= x);
    let lower = upper - 1;

    let span = xp[upper] - xp[lower];
    if span <= 0.0 {
        return Some(fp[lower]);
    }

    let frac = (x - xp[lower]) / span;
    Some(fp[lower] + frac * (fp[upper] - fp[lower]))
}
