//! Horizon windowing

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use super::ReferenceTrajectory;
use crate::vehicle::State;

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ReferenceTrajectory {
    /// The `n + 1` reference states the horizon starting at `step` should
    /// track.
    ///
    /// Beyond the end of the trajectory the final state is repeated, so the
    /// vehicle is asked to hold position at the goal.
    pub fn window(&self, step: usize, n: usize) -> Vec<State> {
        let states = self.states();
        let last = states.len() - 1;

        let start = step.min(last);
        let end = step.saturating_add(n).min(last);

        let mut segment = Vec::with_capacity(n + 1);
        segment.extend_from_slice(&states[start..=end]);
        segment.resize(n + 1, states[last]);

        segment
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn line(len: usize) -> ReferenceTrajectory {
        ReferenceTrajectory::from_states(
            (0..len).map(|i| State::new(i as f64, 0.0, 0.0)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_window_padding() {
        let traj = line(5);
        let seg = traj.window(0, 10);

        assert_eq!(seg.len(), 11);
        assert_eq!(&seg[..5], traj.states());
        for s in seg[5..].iter() {
            assert_eq!(*s, traj.last());
        }
        // Last six entries are the final state
        assert!(seg[5..].iter().all(|s| *s == traj.states()[4]));
        assert_eq!(seg[5..].len(), 6);
    }

    #[test]
    fn test_window_interior_and_past_end() {
        let traj = line(50);

        let seg = traj.window(10, 10);
        assert_eq!(seg.len(), 11);
        assert_eq!(&seg[..], &traj.states()[10..21]);

        // Exactly reaching the end needs no padding
        let seg = traj.window(39, 10);
        assert_eq!(&seg[..], &traj.states()[39..50]);

        // Beyond the end everything is the goal
        let seg = traj.window(100, 3);
        assert_eq!(seg, vec![traj.last(); 4]);
    }
}
