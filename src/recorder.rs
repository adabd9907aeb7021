//! # Recorder Boundary
//!
//! The pipeline narrates everything that happens to a recorder
//! collaborator as a stream of tagged events: event lifecycle markers,
//! frames to store, snapshot and timelapse triggers, connection changes.
//! The contract is strictly fire-and-forget; a recorder must accept or
//! drop internally and may never apply back-pressure to the detection
//! loop.
//!
//! The in-tree [`ChannelRecorder`] fans events out over a bounded
//! crossbeam channel and counts drops; the actual JPEG/movie writers sit
//! on the consuming side, outside the core.

use crate::image::{Image, Location};
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Filetype bitmap used in SQL logging.
pub mod filetype {
    pub const IMAGE: i32 = 1;
    pub const IMAGE_SNAPSHOT: i32 = 2;
    pub const IMAGE_MOTION: i32 = 4;
    pub const MPEG: i32 = 8;
    pub const MPEG_MOTION: i32 = 16;
    pub const MPEG_TIMELAPSE: i32 = 32;
}

/// The event alphabet of the recorder contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First frame of a new event; the recorder opens its files with this
    /// frame's timestamp.
    FirstMotion,
    /// Motion continues; fires the user's on-motion hooks.
    Motion,
    /// A frame to store as part of the event.
    ImageDetected,
    /// The motion (debug) image counterpart.
    ImageMDetected,
    ImageSnapshot,
    /// The buffered preview image, emitted once at event end.
    ImagePreview,
    Timelapse,
    TimelapseEnd,
    /// Filler frame to keep the encoded movie real-time.
    FfmpegPut,
    Stream,
    /// Loopback feed of the current frame.
    Image,
    /// Loopback feed of the motion frame.
    ImageM,
    CameraLost,
    CameraFound,
    AreaDetected,
    EndMotion,
}

impl EventKind {
    /// SQL filetype for events that produce files; 0 otherwise.
    pub fn sql_filetype(self) -> i32 {
        match self {
            EventKind::ImageDetected | EventKind::ImagePreview => filetype::IMAGE,
            EventKind::ImageSnapshot => filetype::IMAGE_SNAPSHOT,
            EventKind::ImageMDetected => filetype::IMAGE_MOTION,
            EventKind::FirstMotion => filetype::MPEG,
            EventKind::Timelapse | EventKind::TimelapseEnd => filetype::MPEG_TIMELAPSE,
            _ => 0,
        }
    }
}

/// One event as seen by a recorder, borrowing the frame it refers to.
#[derive(Debug)]
pub struct RecorderEvent<'a> {
    pub kind: EventKind,
    pub camera_id: i32,
    pub event_nr: i32,
    pub time: DateTime<Local>,
    pub image: Option<&'a Image>,
}

/// Recorder collaborator interface. Implementations must return quickly;
/// anything slow belongs on the far side of a channel.
pub trait Recorder: Send {
    fn record(&mut self, event: RecorderEvent<'_>);
}

/// Recorder that drops everything. Used when no outputs are configured.
#[derive(Debug, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn record(&mut self, _event: RecorderEvent<'_>) {}
}

/// Owned copy of an event's metadata, shipped across the channel. Frame
/// pixels travel only for the kinds that store images.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub kind: EventKind,
    pub camera_id: i32,
    pub event_nr: i32,
    pub time: DateTime<Local>,
    pub shot: i32,
    pub diffs: i32,
    pub location: Location,
    pub total_labels: i32,
    pub pixels: Option<Vec<u8>>,
}

fn wants_pixels(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::ImageDetected
            | EventKind::ImageMDetected
            | EventKind::ImageSnapshot
            | EventKind::ImagePreview
            | EventKind::Timelapse
            | EventKind::FfmpegPut
    )
}

/// Channel-backed recorder. `try_send` keeps the pipeline non-blocking; a
/// full channel drops the event and bumps the drop counter.
pub struct ChannelRecorder {
    tx: Sender<RecordedEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelRecorder {
    pub fn new(capacity: usize) -> (Self, Receiver<RecordedEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl Recorder for ChannelRecorder {
    fn record(&mut self, event: RecorderEvent<'_>) {
        let owned = RecordedEvent {
            kind: event.kind,
            camera_id: event.camera_id,
            event_nr: event.event_nr,
            time: event.time,
            shot: event.image.map_or(0, |i| i.shot),
            diffs: event.image.map_or(0, |i| i.diffs),
            location: event.image.map_or_else(Location::default, |i| i.location),
            total_labels: event.image.map_or(0, |i| i.total_labels),
            pixels: event
                .image
                .filter(|_| wants_pixels(event.kind))
                .map(|i| i.image_norm.clone()),
        };

        match self.tx.try_send(owned) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    warn!(
                        "Camera {}: recorder queue full, dropped {} events (last: {:?})",
                        ev.camera_id, n, ev.kind
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Spawn a drain thread that logs the event stream at debug level. Stands
/// in for the movie/picture writers when none are attached.
pub fn spawn_log_drain(rx: Receiver<RecordedEvent>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("recorder-drain".to_string())
        .spawn(move || {
            for ev in rx.iter() {
                debug!(
                    "camera {} event {} {:?} shot {} diffs {}",
                    ev.camera_id, ev.event_nr, ev.kind, ev.shot, ev.diffs
                );
            }
        })
        .expect("spawn recorder drain thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::yuv420_size;

    fn event(kind: EventKind, image: Option<&Image>) -> RecorderEvent<'_> {
        RecorderEvent {
            kind,
            camera_id: 1,
            event_nr: 3,
            time: Local::now(),
            image,
        }
    }

    #[test]
    fn test_channel_recorder_forwards_metadata() {
        let (mut rec, rx) = ChannelRecorder::new(4);
        let mut img = Image::alloc(yuv420_size(64, 64), 0);
        img.shot = 2;
        img.diffs = 700;

        rec.record(event(EventKind::ImageDetected, Some(&img)));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.kind, EventKind::ImageDetected);
        assert_eq!(got.shot, 2);
        assert_eq!(got.diffs, 700);
        assert!(got.pixels.is_some());
    }

    #[test]
    fn test_lifecycle_events_skip_pixels() {
        let (mut rec, rx) = ChannelRecorder::new(4);
        let img = Image::alloc(yuv420_size(64, 64), 0);
        rec.record(event(EventKind::FirstMotion, Some(&img)));
        assert!(rx.try_recv().unwrap().pixels.is_none());
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (mut rec, _rx) = ChannelRecorder::new(1);
        let img = Image::alloc(yuv420_size(64, 64), 0);
        rec.record(event(EventKind::ImageDetected, Some(&img)));
        rec.record(event(EventKind::ImageDetected, Some(&img)));
        rec.record(event(EventKind::ImageDetected, Some(&img)));
        assert_eq!(rec.dropped(), 2);
    }

    #[test]
    fn test_sql_filetypes() {
        assert_eq!(EventKind::ImageDetected.sql_filetype(), filetype::IMAGE);
        assert_eq!(
            EventKind::ImageSnapshot.sql_filetype(),
            filetype::IMAGE_SNAPSHOT
        );
        assert_eq!(EventKind::Motion.sql_filetype(), 0);
    }
}
