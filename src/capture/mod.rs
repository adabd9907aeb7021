//! # Capture Boundary
//!
//! Abstract interface between the camera pipeline and whatever produces
//! frames: a V4L2 device, a network camera, an RTSP reader or a still
//! image. The pipeline only sees this trait; backend details (ioctls,
//! decoder recovery, socket handling) stay behind it.
//!
//! `next` reports one of four outcomes rather than an error type, because
//! most capture failures are not errors to the pipeline: a missed frame is
//! substituted, a dimension change triggers a pipeline rebuild, and only a
//! fatal outcome closes the device.

use crate::config::CameraConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::image::Image;

pub mod scripted;
pub mod still;

pub use scripted::{ScriptFrame, ScriptedSource};
pub use still::StillSource;

/// Dimensions negotiated by `open`. Width and height must be multiples of
/// 8 and at least 64; the pipeline enforces this after open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
    /// Optional high-resolution stream dimensions.
    pub high: Option<(usize, usize)>,
}

impl Geometry {
    pub fn norm(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            high: None,
        }
    }
}

/// Result of one frame fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Slot filled with a valid frame.
    Ok,
    /// No frame this time; the pipeline substitutes the held frame and,
    /// after `MISSING_FRAMES_TIMEOUT`, a grey connection-lost image.
    NonFatal,
    /// Device is gone; the pipeline closes it and retries every 10 s.
    Fatal,
    /// The source changed dimensions mid-run; the pipeline must be
    /// rebuilt with fresh buffers.
    SizeChanged,
}

/// A frame source driven by one camera pipeline thread.
pub trait CaptureSource: Send + std::fmt::Debug {
    fn open(&mut self) -> DaemonResult<Geometry>;

    /// Fetch the next frame into the slot's pixel buffers. Blocking is
    /// allowed; the supervisor's watchdog breaks protracted blocks with a
    /// wakeup signal.
    fn next(&mut self, slot: &mut Image) -> CaptureOutcome;

    fn close(&mut self);
}

/// Build the capture source for a camera configuration.
///
/// In-tree sources: `still:<path>` serves a decoded image file and
/// `test:grey` a synthetic grey frame (useful with `emulate_motion`).
/// Device paths and network URLs belong to external capture backends; a
/// configuration naming one that is not compiled in is an init error for
/// this pipeline only.
pub fn open_source(config: &CameraConfig) -> DaemonResult<Box<dyn CaptureSource>> {
    if let Some(path) = config.video_device.strip_prefix("still:") {
        return Ok(Box::new(StillSource::new(path, config.width, config.height)));
    }
    if config.video_device == "test:grey" {
        return Ok(Box::new(ScriptedSource::uniform(
            config.width,
            config.height,
            0x80,
        )));
    }
    if !config.netcam_url.is_empty() {
        return Err(DaemonError::capture_init(
            &config.netcam_url,
            "no network camera backend compiled in",
        ));
    }
    Err(DaemonError::capture_init(
        &config.video_device,
        "no capture backend for this device",
    ))
}

/// Validate geometry returned by a capture source.
pub fn validate_geometry(geometry: &Geometry) -> DaemonResult<()> {
    let (w, h) = (geometry.width, geometry.height);
    if w % 8 != 0 || h % 8 != 0 {
        return Err(DaemonError::geometry(w, h, "dimensions must be modulo 8"));
    }
    if w < 64 || h < 64 {
        return Err(DaemonError::geometry(
            w,
            h,
            "dimensions must be at least 64",
        ));
    }
    Ok(())
}
