//! # Pipeline Control State
//!
//! The shared handle between a camera pipeline thread and its observers
//! (supervisor, control surface). All fields are atomics: observers flip
//! intents at any time, the pipeline reads them at well-defined points of
//! its loop, and nothing here can block the detection path.

use crate::config::CameraConfig;
use crate::stream::StreamHub;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Control intents and liveness state of one camera pipeline.
#[derive(Debug)]
pub struct CameraControl {
    /// Take a snapshot on the next loop.
    pub snapshot: AtomicBool,
    /// End the current event.
    pub event_stop: AtomicBool,
    /// User-triggered event start.
    pub event_user: AtomicBool,
    /// Finish the thread after draining the current event.
    pub finish: AtomicBool,
    /// Restart the thread after it ends.
    pub restart: AtomicBool,
    /// Suspend detection (capture continues).
    pub pause: AtomicBool,
    /// Set by the thread while its loop runs.
    pub running: AtomicBool,
    /// Pipeline currently sees no usable camera signal.
    pub lost_connection: AtomicBool,
    /// Pipeline is inside an event.
    pub detecting: AtomicBool,
    /// Watchdog countdown, reset by the pipeline each loop, decremented by
    /// the supervisor each second.
    pub watchdog: AtomicI32,
    /// Frames seen in the last wall-clock second, for status reporting.
    pub last_fps: AtomicI64,
}

impl CameraControl {
    pub fn new(watchdog_timeout: i32) -> Self {
        Self {
            snapshot: AtomicBool::new(false),
            event_stop: AtomicBool::new(false),
            event_user: AtomicBool::new(false),
            finish: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            running: AtomicBool::new(false),
            lost_connection: AtomicBool::new(false),
            detecting: AtomicBool::new(false),
            watchdog: AtomicI32::new(watchdog_timeout),
            last_fps: AtomicI64::new(0),
        }
    }

    /// Take-and-clear for one-shot intents.
    pub fn take(&self, flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::AcqRel)
    }

    pub fn get(&self, flag: &AtomicBool) -> bool {
        flag.load(Ordering::Acquire)
    }

    pub fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::Release);
    }

    /// Reset the watchdog, called once per pipeline loop.
    pub fn pet_watchdog(&self, timeout: i32) {
        self.watchdog.store(timeout, Ordering::Release);
    }
}

/// Supervisor-side handle for one camera: identity, shared control state,
/// live configuration and the stream buffers.
#[derive(Debug, Clone)]
pub struct CameraSlot {
    pub id: i32,
    pub name: String,
    pub control: Arc<CameraControl>,
    /// Live configuration. The control surface writes it; the pipeline
    /// snapshots it once per second at the parms-update stage.
    pub config: Arc<Mutex<CameraConfig>>,
    pub stream: Arc<StreamHub>,
}

impl CameraSlot {
    pub fn new(config: CameraConfig, watchdog_timeout: i32) -> Self {
        Self {
            id: config.camera_id,
            name: config.camera_name.clone(),
            control: Arc::new(CameraControl::new(watchdog_timeout)),
            config: Arc::new(Mutex::new(config)),
            stream: Arc::new(StreamHub::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears_intent() {
        let c = CameraControl::new(30);
        c.set(&c.snapshot, true);
        assert!(c.take(&c.snapshot));
        assert!(!c.take(&c.snapshot));
    }

    #[test]
    fn test_watchdog_pet() {
        let c = CameraControl::new(30);
        c.watchdog.store(3, Ordering::Relaxed);
        c.pet_watchdog(30);
        assert_eq!(c.watchdog.load(Ordering::Relaxed), 30);
    }
}
