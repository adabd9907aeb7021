//! # Frame Data
//!
//! A captured frame and the detection metadata that travels with it through
//! the ring buffer: timestamps, sub-second shot index, changed-pixel count,
//! motion bounding box and the save/emit state flags.
//!
//! Pixel layout is planar YUV 4:2:0 throughout: `w*h` luma bytes followed by
//! `w*h/4` U and `w*h/4` V bytes. Neutral grey is `0x80` on all three planes.

use bitflags::bitflags;
use chrono::{DateTime, Local};
use std::time::Instant;

/// Neutral grey fill for freshly allocated or substituted frames.
pub const GREY: u8 = 0x80;

/// Bytes of a planar YUV 4:2:0 image for the given luma dimensions.
pub fn yuv420_size(width: usize, height: usize) -> usize {
    width * height * 3 / 2
}

bitflags! {
    /// Per-frame state flags.
    ///
    /// A frame can carry MOTION without triggering an event when
    /// `minimum_motion_frames` has not been reached yet. SAVE marks a frame
    /// the ring consumer must emit; SAVED is set once it has been emitted and
    /// stays set until the slot is reused.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImageFlags: u32 {
        const MOTION  = 1;
        const TRIGGER = 2;
        const SAVE    = 4;
        const SAVED   = 8;
        const PRECAP  = 16;
        const POSTCAP = 32;
    }
}

/// Monotonic plus wall-clock capture time. The monotonic half drives frame
/// pacing; the wall-clock half is only used for filenames and overlays.
#[derive(Debug, Clone, Copy)]
pub struct FrameTime {
    pub monotonic: Instant,
    pub wall: DateTime<Local>,
}

impl FrameTime {
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            wall: Local::now(),
        }
    }

    pub fn at(wall: DateTime<Local>) -> Self {
        Self {
            monotonic: Instant::now(),
            wall,
        }
    }
}

/// Motion bounding box with centroid.
///
/// Invariants kept by the locate pass: `minx <= x <= maxx`,
/// `miny <= y <= maxy`, all four sides within `[0, dim-1]` and snapped to
/// even coordinates so box edges land on the chroma grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub x: i32,
    pub y: i32,
    pub minx: i32,
    pub miny: i32,
    pub maxx: i32,
    pub maxy: i32,
    pub width: i32,
    pub height: i32,
}

/// Detection metadata of one frame, detached from its pixel storage so it
/// can be carried between ring slots without touching the planes.
#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    pub diffs: i32,
    pub timestamp: FrameTime,
    pub shot: i32,
    pub cent_dist: u64,
    pub flags: ImageFlags,
    pub location: Location,
    pub total_labels: i32,
}

/// One frame: pixel storage plus detection metadata.
///
/// An `Image` owns its pixel memory for the lifetime of its ring slot. The
/// normal-resolution buffer never shrinks; the high-resolution buffer is
/// empty when the camera has no high-resolution stream.
#[derive(Debug, Clone)]
pub struct Image {
    pub image_norm: Vec<u8>,
    pub image_high: Vec<u8>,
    pub timestamp: FrameTime,
    /// Sub-second frame index, 0-based within the current wall-clock second.
    pub shot: i32,
    /// Changed-pixel count from the diff stage.
    pub diffs: i32,
    /// Squared distance from image centre to motion centroid, for the
    /// "center" preview-image selection.
    pub cent_dist: u64,
    pub flags: ImageFlags,
    pub location: Location,
    /// Connected components found by the last labeling pass.
    pub total_labels: i32,
}

impl Image {
    /// Allocate a frame with grey-neutral pixels. `size_high` of 0 means no
    /// high-resolution stream. All allocation happens here, at init; the
    /// capture loop never allocates.
    pub fn alloc(size_norm: usize, size_high: usize) -> Self {
        Self {
            image_norm: vec![GREY; size_norm],
            image_high: vec![GREY; size_high],
            timestamp: FrameTime::now(),
            shot: 0,
            diffs: 0,
            cent_dist: 0,
            flags: ImageFlags::empty(),
            location: Location::default(),
            total_labels: 0,
        }
    }

    /// Clear the detection metadata for a frame that will be processed.
    pub fn reset_metadata(&mut self) {
        self.diffs = 0;
        self.flags = ImageFlags::empty();
        self.cent_dist = 0;
        self.location = Location::default();
        self.total_labels = 0;
    }

    /// Cheap copy of the detection metadata, without the pixel planes.
    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            diffs: self.diffs,
            timestamp: self.timestamp,
            shot: self.shot,
            cent_dist: self.cent_dist,
            flags: self.flags,
            location: self.location,
            total_labels: self.total_labels,
        }
    }

    /// Carry metadata forward from the previous frame for a frame that skips
    /// detection, so the ring consumer sees continuity. SAVED must not be
    /// inherited or the consumer would skip the new frame.
    pub fn carry_metadata(&mut self, prev: FrameMetadata) {
        self.diffs = prev.diffs;
        self.timestamp = prev.timestamp;
        self.shot = prev.shot;
        self.cent_dist = prev.cent_dist;
        self.flags = prev.flags & !ImageFlags::SAVED;
        self.location = prev.location;
        self.total_labels = prev.total_labels;
    }

    /// Copy pixels and metadata from another frame of the same geometry.
    pub fn copy_from(&mut self, other: &Image) {
        self.image_norm.copy_from_slice(&other.image_norm);
        if !self.image_high.is_empty() && self.image_high.len() == other.image_high.len() {
            self.image_high.copy_from_slice(&other.image_high);
        }
        self.timestamp = other.timestamp;
        self.shot = other.shot;
        self.diffs = other.diffs;
        self.cent_dist = other.cent_dist;
        self.flags = other.flags;
        self.location = other.location;
        self.total_labels = other.total_labels;
    }

    /// Fill the normal-resolution pixels with neutral grey.
    pub fn fill_grey(&mut self) {
        self.image_norm.fill(GREY);
        self.image_high.fill(GREY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_grey() {
        let img = Image::alloc(yuv420_size(64, 64), 0);
        assert_eq!(img.image_norm.len(), 64 * 64 * 3 / 2);
        assert!(img.image_norm.iter().all(|&p| p == GREY));
        assert!(img.image_high.is_empty());
    }

    #[test]
    fn test_carry_metadata_clears_saved() {
        let mut prev = Image::alloc(yuv420_size(64, 64), 0);
        prev.diffs = 123;
        prev.flags = ImageFlags::MOTION | ImageFlags::SAVE | ImageFlags::SAVED;

        let mut next = Image::alloc(yuv420_size(64, 64), 0);
        next.carry_metadata(prev.metadata());

        assert_eq!(next.diffs, 123);
        assert!(next.flags.contains(ImageFlags::MOTION | ImageFlags::SAVE));
        assert!(!next.flags.contains(ImageFlags::SAVED));
    }
}
