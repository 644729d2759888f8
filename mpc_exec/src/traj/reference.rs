//! Reference trajectory construction

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::debug;
use nalgebra::Vector2;
use serde::Serialize;

use super::TrajError;
use crate::vehicle::State;
use util::maths::{interp, unwrap_phase};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A sequence of states, one per control tick, that the vehicle should follow.
///
/// Never empty.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReferenceTrajectory {
    states: Vec<State>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ReferenceTrajectory {
    /// Build a reference trajectory from a planned path.
    ///
    /// Consecutive duplicate points are removed. If `spacing_m` is given the
    /// path is then resampled at uniform arc length intervals starting from
    /// the first point, the final point itself is only included if it lands
    /// on a sample. Headings are the unwrapped bearing between consecutive
    /// samples, with the first sample's heading being zero.
    ///
    /// If fewer than two distinct points remain the single point is returned
    /// as the whole trajectory.
    pub fn from_path(path: &[Vector2<f64>], spacing_m: Option<f64>) -> Result<Self, TrajError> {
        if path.is_empty() {
            return Err(TrajError::EmptyPath);
        }

        if let Some(i) = path.iter().position(|p| !(p[0].is_finite() && p[1].is_finite())) {
            return Err(TrajError::NonFinitePoint(i));
        }

        if let Some(ds) = spacing_m {
            if !(ds > 0.0) || !ds.is_finite() {
                return Err(TrajError::InvalidSpacing(ds));
            }
        }

        // Remove consecutive duplicates
        let mut points: Vec<Vector2<f64>> = Vec::with_capacity(path.len());
        for p in path {
            if points.last() != Some(p) {
                points.push(*p);
            }
        }

        if points.len() < 2 {
            return Ok(Self {
                states: vec![State::new(points[0][0], points[0][1], 0.0)],
            });
        }

        if let Some(ds) = spacing_m {
            points = resample(&points, ds);
        }

        // Differences against the previous point, with the first point
        // duplicated so the first difference is zero.
        let bearings: Vec<f64> = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let d = p - points[i.saturating_sub(1)];
                d[1].atan2(d[0])
            })
            .collect();
        let headings = unwrap_phase(&bearings);

        let states: Vec<State> = points
            .iter()
            .zip(headings.iter())
            .map(|(p, h)| State::new(p[0], p[1], *h))
            .collect();

        debug!(
            "Built reference trajectory of {} states from a {} point path",
            states.len(),
            path.len()
        );

        Ok(Self { states })
    }

    /// Build a reference trajectory directly from a list of states.
    pub fn from_states(states: Vec<State>) -> Result<Self, TrajError> {
        if states.is_empty() {
            return Err(TrajError::EmptyPath);
        }

        Ok(Self { states })
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false, a reference trajectory holds at least one state.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The first state of the trajectory.
    pub fn first(&self) -> State {
        self.states[0]
    }

    /// The goal state, i.e. the last state of the trajectory.
    pub fn last(&self) -> State {
        self.states[self.states.len() - 1]
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Linearly interpolate the path at arc lengths `0, ds, 2ds, ...` below the
/// total length. `points` must not contain consecutive duplicates.
fn resample(points: &[Vector2<f64>], ds: f64) -> Vec<Vector2<f64>> {
    let mut cum_length = Vec::with_capacity(points.len());
    cum_length.push(0.0);
    for w in points.windows(2) {
        let last = cum_length[cum_length.len() - 1];
        cum_length.push(last + (w[1] - w[0]).norm());
    }
    let total = cum_length[cum_length.len() - 1];

    let xs: Vec<f64> = points.iter().map(|p| p[0]).collect();
    let ys: Vec<f64> = points.iter().map(|p| p[1]).collect();

    let mut samples = Vec::new();
    let mut i = 0usize;
    loop {
        let s = i as f64 * ds;
        if s >= total {
            break;
        }

        // Both interpolations are over non-empty equal length slices
        if let (Some(x), Some(y)) = (interp(s, &cum_length, &xs), interp(s, &cum_length, &ys)) {
            samples.push(Vector2::new(x, y));
        }

        i += 1;
    }

    samples
}
