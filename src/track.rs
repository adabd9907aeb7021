//! # PTZ Tracking Boundary
//!
//! Contract for the pan/tilt collaborator. The core hands it coordinate
//! hints (centre the camera, or move towards a motion centroid) and gets
//! back a cooldown in frames during which detection is suppressed so the
//! camera does not chase its own motion.

use crate::image::Location;

/// Tracker collaborator interface. Both calls return the number of frames
/// the pipeline must treat as camera-moved (zero diffs).
pub trait Tracker: Send {
    /// Centre the camera, optionally with a manual offset.
    fn center(&mut self, xoff: i32, yoff: i32, manual: bool) -> i32;

    /// Move towards the motion centroid.
    fn move_to(&mut self, location: &Location, width: usize, height: usize, manual: bool) -> i32;

    /// True when automatic tracking should follow detected motion.
    fn auto_enabled(&self) -> bool;
}

/// Tracker used when no PTZ hardware is configured.
#[derive(Debug, Default)]
pub struct NullTracker;

impl Tracker for NullTracker {
    fn center(&mut self, _xoff: i32, _yoff: i32, _manual: bool) -> i32 {
        0
    }

    fn move_to(&mut self, _location: &Location, _width: usize, _height: usize, _manual: bool) -> i32 {
        0
    }

    fn auto_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_tracker_never_cools_down() {
        let mut t = NullTracker;
        assert_eq!(t.center(0, 0, false), 0);
        assert_eq!(t.move_to(&Location::default(), 640, 480, false), 0);
        assert!(!t.auto_enabled());
    }
}
