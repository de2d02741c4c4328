//! Interpolation.
//!
//! The server sends discrete snapshots at tick boundaries.
//! The client renders at its own rate and interpolates the car between the
//! two most recent ones.

use std::collections::VecDeque;

use gcars_shared::{math::Vec2, net::Snapshot};

/// Buffered snapshot history for interpolation.
#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    history: VecDeque<Snapshot>,
    max: usize,
}

impl SnapshotBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max),
            max,
        }
    }

    pub fn push(&mut self, snap: Snapshot) {
        self.history.push_back(snap);
        while self.history.len() > self.max {
            self.history.pop_front();
        }
    }

    /// Returns the number of buffered snapshots.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Returns true if no snapshots are buffered.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Interpolated position and angle between the last two snapshots.
    ///
    /// `alpha` should be in $[0,1]$ where 0 = older snapshot, 1 = newer.
    pub fn interp(&self, alpha: f64) -> Option<(Vec2, f64)> {
        if self.history.len() < 2 {
            return None;
        }
        let a = &self.history[self.history.len() - 2];
        let b = &self.history[self.history.len() - 1];
        let t = alpha.clamp(0.0, 1.0);
        Some((
            a.position().lerp(b.position(), t),
            a.angle + (b.angle - a.angle) * t,
        ))
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.history.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(x: f64, angle: f64) -> Snapshot {
        Snapshot {
            x,
            y: 0.0,
            angle,
            engine_force: None,
            force_point: None,
        }
    }

    #[test]
    fn keeps_only_the_newest() {
        let mut buf = SnapshotBuffer::new(2);
        buf.push(snap(1.0, 0.0));
        buf.push(snap(2.0, 0.0));
        buf.push(snap(3.0, 0.0));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.last_snapshot().map(|s| s.x), Some(3.0));
    }

    #[test]
    fn interpolates_between_last_two() {
        let mut buf = SnapshotBuffer::new(8);
        assert!(buf.interp(0.5).is_none());
        buf.push(snap(0.0, 0.0));
        buf.push(snap(10.0, 1.0));
        let (pos, angle) = buf.interp(0.25).unwrap();
        assert_eq!(pos, Vec2::new(2.5, 0.0));
        assert_eq!(angle, 0.25);
    }
}
