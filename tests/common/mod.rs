//! Shared helpers for the integration tests: a collecting recorder, a
//! manually clocked camera builder and frame generators.

use chrono::{Local, TimeZone};
use std::sync::{Arc, Mutex};
use vigil::capture::ScriptedSource;
use vigil::config::CameraConfig;
use vigil::control::CameraSlot;
use vigil::image::Location;
use vigil::pipeline::{Camera, ManualClock};
use vigil::recorder::{EventKind, Recorder, RecorderEvent};
use vigil::track::NullTracker;

pub const W: usize = 320;
pub const H: usize = 240;

/// One observed recorder event.
#[derive(Debug, Clone)]
pub struct SeenEvent {
    pub kind: EventKind,
    pub event_nr: i32,
    pub shot: i32,
    pub second: i64,
    pub location: Location,
}

/// Recorder that remembers every event for later assertions.
#[derive(Clone, Default)]
pub struct CollectingRecorder {
    pub events: Arc<Mutex<Vec<SeenEvent>>>,
}

impl CollectingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<SeenEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.of_kind(kind).len()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

impl Recorder for CollectingRecorder {
    fn record(&mut self, event: RecorderEvent<'_>) {
        self.events.lock().unwrap().push(SeenEvent {
            kind: event.kind,
            event_nr: event.event_nr,
            shot: event.image.map_or(-1, |i| i.shot),
            second: event.time.timestamp(),
            location: event.image.map_or_else(Location::default, |i| i.location),
        });
    }
}

/// A camera config tuned for fast, deterministic tests: low frame rate so
/// every frame is processed, no auto-tuning surprises.
pub fn test_config() -> CameraConfig {
    CameraConfig {
        camera_id: 1,
        camera_name: "testcam".to_string(),
        width: W,
        height: H,
        framerate: 5,
        threshold: 500,
        noise_tune: false,
        threshold_tune: false,
        text_right: String::new(),
        ..Default::default()
    }
}

pub struct TestRig {
    pub camera: Camera,
    pub recorder: CollectingRecorder,
    pub clock: ManualClock,
    ticks: usize,
}

/// Build a camera around a scripted source. The source's first frame is
/// consumed at init to prime the reference frame.
pub fn build_camera(config: CameraConfig, source: ScriptedSource) -> TestRig {
    let recorder = CollectingRecorder::new();
    let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap());
    let slot = CameraSlot::new(config, 30);
    let camera = Camera::new(
        slot,
        Box::new(source),
        Box::new(recorder.clone()),
        Box::new(NullTracker),
        Box::new(clock.clone()),
    )
    .expect("camera init");
    TestRig {
        camera,
        recorder,
        clock,
        ticks: 0,
    }
}

impl TestRig {
    /// Run `n` loop iterations, advancing the wall clock one second per
    /// `fps` frames so shot numbering matches real pacing. The cadence
    /// continues across calls.
    pub fn run_frames(&mut self, n: usize) {
        let fps = self.camera.conf.framerate.max(1) as usize;
        for _ in 0..n {
            if self.ticks > 0 && self.ticks % fps == 0 {
                self.clock.advance_secs(1);
            }
            self.ticks += 1;
            self.camera.tick();
        }
    }

    /// Let the startup settle window pass with quiet frames.
    pub fn run_past_startup(&mut self) {
        // startup_frames = framerate * 2 + pre_capture + minimum_motion_frames
        self.run_frames(3 * self.camera.conf.framerate as usize + 8);
    }
}

/// Frame with a 40x40 patch at (200, 120) offset from `base` by `delta`.
pub fn patch_frame(base: u8, delta: u8) -> Vec<u8> {
    ScriptedSource::patch_buffer(W, H, base, 200, 120, 40, 40, base.wrapping_add(delta))
}
