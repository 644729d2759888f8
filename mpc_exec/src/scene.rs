//! # Scene module
//!
//! A scene is the static environment the vehicle moves through: a boundary polygon it must stay
//! inside, obstacle polygons it must stay out of, and the dynamic obstacles. Scenarios are loaded
//! from TOML files with obstacles already inflated by the vehicle footprint.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::dyn_obs::DynamicObstacle;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Produces a collision free path from the scene's start to its goal.
pub trait PathPlanner {
    fn plan(&self, scene: &Scene) -> Result<Vec<Vector2<f64>>, SceneError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A closed polygon. The closing edge from the last vertex back to the first
/// is implicit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon {
    vertices: Vec<Vector2<f64>>,
}

/// Scenario description as found in a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub boundary: Vec<[f64; 2]>,

    #[serde(default)]
    pub obstacles: Vec<Vec<[f64; 2]>>,

    #[serde(default)]
    pub dynamic_obstacles: Vec<DynamicObstacle>,

    pub start: [f64; 2],

    pub goal: [f64; 2],

    /// Externally planned path. If not given a planner is used.
    #[serde(default)]
    pub path: Option<Vec<[f64; 2]>>,
}

/// A validated scene.
#[derive(Debug, Clone, Serialize)]
pub struct Scene {
    /// Counter-clockwise.
    pub boundary: Polygon,

    /// Clockwise.
    pub obstacles: Vec<Polygon>,

    pub dynamic_obstacles: Vec<DynamicObstacle>,

    pub start: Vector2<f64>,

    pub goal: Vector2<f64>,

    pub path: Option<Vec<Vector2<f64>>>,
}

/// Plans the straight segment from start to goal.
#[derive(Debug, Clone, Copy)]
pub struct DirectPlanner {
    /// Maximum distance between consecutive points.
    ///
    /// Units: meters
    pub point_sep_m: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Invalid geometry: {0}")]
    Geometry(String),

    #[error("Planning failed: {0}")]
    Planning(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Polygon {
    /// Create a polygon, rejecting ones with fewer than 3 vertices or no area.
    pub fn new(vertices: Vec<Vector2<f64>>) -> Result<Self, SceneError> {
        if vertices.len() < 3 {
            return Err(SceneError::Geometry(format!(
                "a polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().any(|v| !(v[0].is_finite() && v[1].is_finite())) {
            return Err(SceneError::Geometry(
                "polygon has a non-finite vertex".into(),
            ));
        }

        let poly = Self { vertices };

        if poly.signed_area().abs() < f64::EPSILON {
            return Err(SceneError::Geometry("polygon has zero area".into()));
        }

        Ok(poly)
    }

    pub fn from_points(points: &[[f64; 2]]) -> Result<Self, SceneError> {
        Self::new(points.iter().map(|p| Vector2::new(p[0], p[1])).collect())
    }

    pub fn vertices(&self) -> &[Vector2<f64>] {
        &self.vertices
    }

    /// Shoelace area, positive for counter-clockwise polygons.
    pub fn signed_area(&self) -> f64 {
        self.edges()
            .map(|(a, b)| a[0] * b[1] - b[0] * a[1])
            .sum::<f64>()
            / 2.0
    }

    pub fn is_ccw(&self) -> bool {
        self.signed_area() > 0.0
    }

    pub fn make_ccw(&mut self) {
        if !self.is_ccw() {
            self.vertices.reverse();
        }
    }

    pub fn make_cw(&mut self) {
        if self.is_ccw() {
            self.vertices.reverse();
        }
    }

    /// Even-odd point in polygon test. Points exactly on an edge may be
    /// reported either way.
    pub fn contains(&self, point: &Vector2<f64>) -> bool {
        let mut inside = false;

        for (a, b) in self.edges() {
            if (a[1] > point[1]) != (b[1] > point[1]) {
                let x_cross = a[0] + (point[1] - a[1]) / (b[1] - a[1]) * (b[0] - a[0]);
                if point[0] < x_cross {
                    inside = !inside;
                }
            }
        }

        inside
    }

    /// True if the segment `p -> q` properly crosses any edge.
    pub fn intersects_segment(&self, p: &Vector2<f64>, q: &Vector2<f64>) -> bool {
        self.edges().any(|(a, b)| segments_intersect(p, q, a, b))
    }

    fn edges(&self) -> impl Iterator<Item = (&Vector2<f64>, &Vector2<f64>)> {
        self.vertices
            .iter()
            .zip(self.vertices.iter().cycle().skip(1))
    }
}

impl Scene {
    /// Validate a scenario and normalise polygon orientations.
    pub fn from_scenario(scenario: &Scenario) -> Result<Self, SceneError> {
        let mut boundary = Polygon::from_points(&scenario.boundary)?;
        boundary.make_ccw();

        let obstacles = scenario
            .obstacles
            .iter()
            .map(|o| {
                let mut poly = Polygon::from_points(o)?;
                poly.make_cw();
                Ok(poly)
            })
            .collect::<Result<Vec<_>, SceneError>>()?;

        let path = scenario
            .path
            .as_ref()
            .map(|p| p.iter().map(|v| Vector2::new(v[0], v[1])).collect());

        debug!(
            "Scene has {} obstacles with {} vertices and {} dynamic obstacles",
            obstacles.len(),
            obstacles.iter().map(|o| o.vertices().len()).sum::<usize>(),
            scenario.dynamic_obstacles.len()
        );

        Ok(Self {
            boundary,
            obstacles,
            dynamic_obstacles: scenario.dynamic_obstacles.clone(),
            start: Vector2::from(scenario.start),
            goal: Vector2::from(scenario.goal),
            path,
        })
    }

    /// Every vertex of the obstacles and of the boundary.
    pub fn obstacle_vertices(&self) -> Vec<Vector2<f64>> {
        self.obstacles
            .iter()
            .chain(std::iter::once(&self.boundary))
            .flat_map(|p| p.vertices().iter().cloned())
            .collect()
    }

    /// True if the point is inside the boundary and outside every obstacle.
    pub fn is_free(&self, point: &Vector2<f64>) -> bool {
        self.boundary.contains(point) && !self.obstacles.iter().any(|o| o.contains(point))
    }

    /// The path to follow, the scenario's own one if it has one, otherwise
    /// the one produced by the planner.
    pub fn path<P: PathPlanner>(&self, planner: &P) -> Result<Vec<Vector2<f64>>, SceneError> {
        match &self.path {
            Some(p) if !p.is_empty() => Ok(p.clone()),
            Some(_) => Err(SceneError::Planning("the scenario path is empty".into())),
            None => planner.plan(self),
        }
    }
}

impl PathPlanner for DirectPlanner {
    fn plan(&self, scene: &Scene) -> Result<Vec<Vector2<f64>>, SceneError> {
        if !(self.point_sep_m > 0.0) {
            return Err(SceneError::Planning(format!(
                "point separation must be positive, got {}",
                self.point_sep_m
            )));
        }

        let (from, to) = (scene.start, scene.goal);

        if !scene.is_free(&from) {
            return Err(SceneError::Planning(format!(
                "start ({}, {}) is not in free space",
                from[0], from[1]
            )));
        }
        if !scene.is_free(&to) {
            return Err(SceneError::Planning(format!(
                "goal ({}, {}) is not in free space",
                to[0], to[1]
            )));
        }
        if let Some(i) = scene
            .obstacles
            .iter()
            .position(|o| o.intersects_segment(&from, &to))
        {
            return Err(SceneError::Planning(format!(
                "the direct path crosses obstacle {}",
                i
            )));
        }

        let diff = to - from;
        let dist = diff.norm();

        if dist <= self.point_sep_m {
            return Ok(vec![from, to]);
        }

        // Equal segments no longer than the separation
        let num_segments = (dist / self.point_sep_m).ceil() as usize;
        let delta = diff / num_segments as f64;

        let mut path = Vec::with_capacity(num_segments + 1);
        path.push(from);
        for i in 1..num_segments {
            path.push(from + delta * i as f64);
        }
        path.push(to);

        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Twice the signed area of the triangle `a, b, c`.
fn orient(a: &Vector2<f64>, b: &Vector2<f64>, c: &Vector2<f64>) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Proper intersection of the segments `p1 -> p2` and `q1 -> q2`. Touching
/// at an end point does not count.
pub fn segments_intersect(
    p1: &Vector2<f64>,
    p2: &Vector2<f64>,
    q1: &Vector2<f64>,
    q2: &Vector2<f64>,
) -> bool {
    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);

    d1 * d2 < 0.0 && d3 * d4 < 0.0
}
