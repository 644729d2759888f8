//! # Parameter packing
//!
//! The optimisation problem has a fixed size, but the number of obstacle vertices near the vehicle
//! changes from tick to tick. Vertices are written into a fixed number of slots and the unused
//! slots are filled with [`SENTINEL`], a point so far outside any scene that its keep-out disc
//! never reaches the vehicle.
//!
//! Packed layout:
//!
//! ```text
//! [ x0 (3) | u_prev (2) | reference ((N+1) x 3) | vertices (max_vert x 2) | r_safe (1) | dynobs ]
//! ```
//!
//! where `dynobs` is `n_dynobs x N x 5` values `(x, y, x_radius, y_radius, heading)`, obstacle
//! major. With neither vertices nor dynamic obstacles the trailing blocks, including `r_safe`,
//! are dropped.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::ops::Range;

use log::warn;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    dyn_obs::ObstaclePose,
    vehicle::{Command, State},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Coordinate written into unused obstacle slots.
pub const SENTINEL: f64 = 1e3;

/// Number of values describing one dynamic obstacle at one time.
pub const DYNOBS_STRIDE: usize = 5;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Offsets of each block in the packed parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamLayout {
    pub n_horizon: usize,
    pub max_vert: usize,
    pub n_dynobs: usize,
}

/// Information about a single packing.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PackReport {
    /// Number of static vertices that did not fit in the problem.
    pub num_truncated: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How static vertices are chosen when there are more than fit in the problem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VertexSelection {
    /// Keep the vertices closest to the vehicle.
    Nearest,

    /// Keep the first vertices in the order given.
    First,
}

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("Expected a reference segment of {expected} states but got {found}")]
    WrongSegmentLength { expected: usize, found: usize },

    #[error("Expected at most {max} dynamic obstacles but got {found}")]
    TooManyDynamicObstacles { max: usize, found: usize },

    #[error("Expected {expected} predicted poses for dynamic obstacle {index} but got {found}")]
    WrongPredictionLength {
        index: usize,
        expected: usize,
        found: usize,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ParamLayout {
    pub fn new(config: &Config) -> Self {
        Self {
            n_horizon: config.n_horizon,
            max_vert: config.max_vert,
            n_dynobs: config.n_dynobs,
        }
    }

    /// True if the layout carries any obstacle blocks (and therefore `r_safe`).
    pub fn has_obstacles(&self) -> bool {
        self.max_vert > 0 || self.n_dynobs > 0
    }

    pub fn x0(&self) -> Range<usize> {
        0..3
    }

    pub fn u_prev(&self) -> Range<usize> {
        3..5
    }

    pub fn reference(&self) -> Range<usize> {
        5..5 + 3 * (self.n_horizon + 1)
    }

    pub fn vertices(&self) -> Range<usize> {
        let start = self.reference().end;
        start..start + 2 * self.max_vert
    }

    /// Index of `r_safe`, if the layout has one.
    pub fn r_safe(&self) -> Option<usize> {
        if self.has_obstacles() {
            Some(self.vertices().end)
        } else {
            None
        }
    }

    /// Dynamic obstacle block, empty if the layout has none.
    pub fn dynobs(&self) -> Range<usize> {
        let start = self.vertices().end + 1;
        start..start + self.n_dynobs * self.n_horizon * DYNOBS_STRIDE
    }

    /// Total length of the packed vector.
    pub fn len(&self) -> usize {
        if self.has_obstacles() {
            self.dynobs().end
        } else {
            self.reference().end
        }
    }

    /// Offset of dynamic obstacle `index` at horizon step `k` (`1..=N`).
    pub fn dynobs_at(&self, index: usize, k: usize) -> usize {
        self.dynobs().start + (index * self.n_horizon + (k - 1)) * DYNOBS_STRIDE
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Pack the controller inputs into the fixed layout.
///
/// `vertices` beyond `max_vert` are dropped and counted in the report, callers should use
/// [`select_nearest`] first. `dynobs` holds one `N` long prediction per obstacle, missing
/// obstacles are padded with far away unit ellipses.
pub fn pack(
    layout: &ParamLayout,
    state: &State,
    prev_cmd: &Command,
    segment: &[State],
    vertices: &[Vector2<f64>],
    r_safe: f64,
    dynobs: &[Vec<ObstaclePose>],
) -> Result<(Vec<f64>, PackReport), PackError> {
    let n = layout.n_horizon;

    if segment.len() != n + 1 {
        return Err(PackError::WrongSegmentLength {
            expected: n + 1,
            found: segment.len(),
        });
    }
    if dynobs.len() > layout.n_dynobs {
        return Err(PackError::TooManyDynamicObstacles {
            max: layout.n_dynobs,
            found: dynobs.len(),
        });
    }
    if let Some((index, p)) = dynobs.iter().enumerate().find(|(_, p)| p.len() != n) {
        return Err(PackError::WrongPredictionLength {
            index,
            expected: n,
            found: p.len(),
        });
    }

    let mut params = Vec::with_capacity(layout.len());

    params.extend(state.iter());
    params.extend(prev_cmd.iter());
    for s in segment {
        params.extend(s.iter());
    }

    let report = PackReport {
        num_truncated: vertices.len().saturating_sub(layout.max_vert),
    };

    if report.num_truncated > 0 {
        warn!(
            "{} static obstacle vertices did not fit in the problem and were dropped",
            report.num_truncated
        );
    }

    if !layout.has_obstacles() {
        return Ok((params, report));
    }

    for slot in 0..layout.max_vert {
        match vertices.get(slot) {
            Some(v) => params.extend(v.iter()),
            None => params.extend_from_slice(&[SENTINEL, SENTINEL]),
        }
    }

    params.push(r_safe);

    for index in 0..layout.n_dynobs {
        match dynobs.get(index) {
            Some(poses) => {
                for p in poses {
                    params.extend_from_slice(&[
                        p.x_m,
                        p.y_m,
                        p.x_radius_m,
                        p.y_radius_m,
                        p.heading_rad,
                    ]);
                }
            }
            None => {
                for _ in 0..n {
                    params.extend_from_slice(&[SENTINEL, SENTINEL, 1.0, 1.0, 0.0]);
                }
            }
        }
    }

    Ok((params, report))
}

/// The `k` vertices closest to `position`, closest first.
///
/// Vertices at equal distance keep their input order.
pub fn select_nearest(
    vertices: &[Vector2<f64>],
    position: &Vector2<f64>,
    k: usize,
) -> Vec<Vector2<f64>> {
    let mut sorted: Vec<(f64, Vector2<f64>)> = vertices
        .iter()
        .map(|v| ((v - position).norm_squared(), *v))
        .collect();

    // Stable sort, NaN distances go last
    sorted.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or_else(|| a.0.is_nan().cmp(&b.0.is_nan()))
    });

    sorted.into_iter().take(k).map(|(_, v)| v).collect()
}

/// Choose the vertices to pack according to the selection policy.
pub fn select_vertices(
    selection: VertexSelection,
    vertices: &[Vector2<f64>],
    position: &Vector2<f64>,
    max_vert: usize,
) -> (Vec<Vector2<f64>>, usize) {
    let num_dropped = vertices.len().saturating_sub(max_vert);

    let selected = match selection {
        VertexSelection::Nearest => select_nearest(vertices, position, max_vert),
        VertexSelection::First => vertices.iter().take(max_vert).cloned().collect(),
    };

    (selected, num_dropped)
}
