//! # Dynamic obstacle model
//!
//! A dynamic obstacle is an ellipse whose centre ping-pongs along the segment `p1 -> p2` while
//! wiggling perpendicular to it. Its position is a closed form function of time, which lets the
//! controller predict the obstacle over the whole horizon without any tracking.
//!
//! The along-segment parameter is `|sin(f t)|`, so the centre moves from `p2` towards `p1` and
//! back again rather than looping. The perpendicular offset is `amp cos(10 f t)`, applied in a
//! frame rotated by the segment heading about `p1`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A moving elliptical obstacle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DynamicObstacle {
    /// First end of the segment.
    pub p1: [f64; 2],

    /// Second end of the segment, where the obstacle is at `t = 0`.
    pub p2: [f64; 2],

    /// Units: radians/second
    pub frequency_rads: f64,

    /// Semi-axis along the ellipse's local x axis, before expansion.
    ///
    /// Units: meters
    pub x_radius_m: f64,

    /// Semi-axis along the ellipse's local y axis, before expansion.
    ///
    /// Units: meters
    pub y_radius_m: f64,

    /// Orientation of the ellipse.
    ///
    /// Units: radians
    pub heading_rad: f64,

    /// Amplitude of the perpendicular wiggle.
    ///
    /// Units: meters
    #[serde(default = "default_amplitude_m")]
    pub amplitude_m: f64,
}

/// Pose and extent of a dynamic obstacle at a given time, as used by the
/// collision constraints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ObstaclePose {
    pub x_m: f64,
    pub y_m: f64,

    /// Expanded semi-axes.
    pub x_radius_m: f64,
    pub y_radius_m: f64,

    pub heading_rad: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How the heading of the segment frame is computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SegmentHeading {
    /// `atan2(p2.y - p1.y, p2.x - p1.x)`, the actual bearing of the segment.
    TrueBearing,

    /// `atan2(p1.y, p2.x)`. Reproduces obstacle motion recorded with older
    /// versions of the model, the wiggle is not perpendicular to the segment.
    Legacy,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DynamicObstacle {
    /// Heading of the segment frame.
    pub fn segment_heading(&self, convention: SegmentHeading) -> f64 {
        match convention {
            SegmentHeading::TrueBearing => {
                (self.p2[1] - self.p1[1]).atan2(self.p2[0] - self.p1[0])
            }
            SegmentHeading::Legacy => self.p1[1].atan2(self.p2[0]),
        }
    }

    /// Position of the obstacle centre at time `t`.
    pub fn pose_at(&self, t: f64, convention: SegmentHeading) -> Vector2<f64> {
        self.position(t, &Rotation2::new(self.segment_heading(convention)))
    }

    /// Position of the obstacle centre at each of the given times.
    pub fn poses_at(&self, times: &[f64], convention: SegmentHeading) -> Vec<Vector2<f64>> {
        let rot = Rotation2::new(self.segment_heading(convention));

        times.iter().map(|&t| self.position(t, &rot)).collect()
    }

    /// Predicted poses over a horizon of `n` steps of length `dt`, starting
    /// one step after `t0`.
    ///
    /// The radii are expanded by `r_safe / 2 + margin`.
    pub fn poses_over(
        &self,
        t0: f64,
        n: usize,
        dt: f64,
        r_safe: f64,
        margin: f64,
        convention: SegmentHeading,
    ) -> Vec<ObstaclePose> {
        let expansion = r_safe / 2.0 + margin;
        let times: Vec<f64> = (1..=n).map(|k| t0 + k as f64 * dt).collect();

        self.poses_at(&times, convention)
            .into_iter()
            .map(|c| ObstaclePose {
                x_m: c[0],
                y_m: c[1],
                x_radius_m: self.x_radius_m + expansion,
                y_radius_m: self.y_radius_m + expansion,
                heading_rad: self.heading_rad,
            })
            .collect()
    }

    fn position(&self, t: f64, rot: &Rotation2<f64>) -> Vector2<f64> {
        let p1 = Vector2::from(self.p1);
        let p2 = Vector2::from(self.p2);

        let t_param = (self.frequency_rads * t).sin().abs();
        let p3 = t_param * p1 + (1.0 - t_param) * p2;

        let mut local = rot.inverse() * (p3 - p1);
        local[1] += self.amplitude_m * (10.0 * self.frequency_rads * t).cos();

        rot * local + p1
    }
}

impl ObstaclePose {
    /// Value of the ellipse constraint `1 - (ex/rx)^2 - (ey/ry)^2` at the
    /// given point. Positive inside the ellipse.
    pub fn inside_measure(&self, x: f64, y: f64) -> f64 {
        let (sin, cos) = self.heading_rad.sin_cos();
        let (dx, dy) = (x - self.x_m, y - self.y_m);
        let ex = cos * dx + sin * dy;
        let ey = -sin * dx + cos * dy;

        1.0 - (ex / self.x_radius_m).powi(2) - (ey / self.y_radius_m).powi(2)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn default_amplitude_m() -> f64 {
    1.5
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn obstacle(amplitude_m: f64) -> DynamicObstacle {
        DynamicObstacle {
            p1: [1.0, 4.0],
            p2: [2.0, 7.0],
            frequency_rads: 0.1,
            x_radius_m: 0.2,
            y_radius_m: 0.5,
            heading_rad: 0.1,
            amplitude_m,
        }
    }

    #[test]
    fn test_segment_endpoints() {
        let obs = obstacle(0.0);

        for conv in [SegmentHeading::TrueBearing, SegmentHeading::Legacy].iter() {
            // |sin(f t)| = 0
            let p = obs.pose_at(0.0, *conv);
            assert!((p - Vector2::new(2.0, 7.0)).norm() < 1e-9);
            let p = obs.pose_at(PI / 0.1, *conv);
            assert!((p - Vector2::new(2.0, 7.0)).norm() < 1e-9);

            // |sin(f t)| = 1
            let p = obs.pose_at(FRAC_PI_2 / 0.1, *conv);
            assert!((p - Vector2::new(1.0, 4.0)).norm() < 1e-9);
        }
    }

    #[test]
    fn test_wiggle_is_perpendicular() {
        let obs = obstacle(1.5);
        let still = obstacle(0.0);
        let dir = (Vector2::from(obs.p2) - Vector2::from(obs.p1)).normalize();

        for &t in [0.0, 0.7, 3.0, 12.5].iter() {
            let offset = obs.pose_at(t, SegmentHeading::TrueBearing)
                - still.pose_at(t, SegmentHeading::TrueBearing);

            assert!(offset.dot(&dir).abs() < 1e-9);
            assert!((offset.norm() - (1.5 * (10.0 * 0.1 * t).cos()).abs()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_legacy_heading() {
        let obs = obstacle(1.5);
        assert!((obs.segment_heading(SegmentHeading::Legacy) - 4f64.atan2(2.0)).abs() < 1e-12);
        assert!(
            (obs.segment_heading(SegmentHeading::TrueBearing) - 3f64.atan2(1.0)).abs() < 1e-12
        );
    }

    #[test]
    fn test_poses_over() {
        let obs = obstacle(1.5);
        let poses = obs.poses_over(2.0, 5, 0.1, 0.5, 0.25, SegmentHeading::TrueBearing);

        assert_eq!(poses.len(), 5);
        for (k, pose) in poses.iter().enumerate() {
            let expected = obs.pose_at(2.0 + (k + 1) as f64 * 0.1, SegmentHeading::TrueBearing);
            assert!((pose.x_m - expected[0]).abs() < 1e-12);
            assert!((pose.y_m - expected[1]).abs() < 1e-12);
            assert!((pose.x_radius_m - 0.7).abs() < 1e-12);
            assert!((pose.y_radius_m - 1.0).abs() < 1e-12);
            assert_eq!(pose.heading_rad, 0.1);
        }

        // Vectorised and scalar evaluation agree
        let times = [0.0, 1.0, 2.0];
        let many = obs.poses_at(&times, SegmentHeading::Legacy);
        for (t, p) in times.iter().zip(many.iter()) {
            assert_eq!(*p, obs.pose_at(*t, SegmentHeading::Legacy));
        }
    }

    #[test]
    fn test_inside_measure() {
        let pose = ObstaclePose {
            x_m: 1.0,
            y_m: 1.0,
            x_radius_m: 2.0,
            y_radius_m: 1.0,
            heading_rad: FRAC_PI_2,
        };

        assert!((pose.inside_measure(1.0, 1.0) - 1.0).abs() < 1e-12);
        // Long axis points along global y
        assert!(pose.inside_measure(1.0, 2.9) > 0.0);
        assert!(pose.inside_measure(2.1, 1.0) < 0.0);
        assert!(pose.inside_measure(1.0, 3.0).abs() < 1e-9);
    }
}
