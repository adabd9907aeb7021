//! # Stream Share Buffers
//!
//! The only data path out of a pipeline thread: latest-frame copies for the
//! webcontrol's stream endpoints, published under a per-camera mutex and
//! copied on read so consumers always observe a consistent frame. JPEG
//! encoding happens on the consumer side of this boundary.
//!
//! Connection counts let the pipeline skip work nobody is watching: the
//! motion-image overlays are only composed while `motion_viewers` is
//! non-zero (or setup mode is on).

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Shared {
    frame: Vec<u8>,
    sequence: u64,
}

/// One stream output with its viewer count.
#[derive(Debug, Default)]
pub struct StreamSlot {
    shared: Mutex<Shared>,
    viewers: AtomicUsize,
}

impl StreamSlot {
    /// Publish the latest frame. Copies into the slot's own storage;
    /// allocation only happens until the buffer reaches frame size.
    pub fn publish(&self, frame: &[u8]) {
        let mut shared = self.shared.lock().unwrap();
        shared.frame.clear();
        shared.frame.extend_from_slice(frame);
        shared.sequence += 1;
    }

    /// Copy the latest frame out, with its publish sequence number. An
    /// empty result means nothing was published yet.
    pub fn snapshot(&self) -> (Vec<u8>, u64) {
        let shared = self.shared.lock().unwrap();
        (shared.frame.clone(), shared.sequence)
    }

    pub fn viewer_connected(&self) {
        self.viewers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn viewer_disconnected(&self) {
        let _ = self
            .viewers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                v.checked_sub(1)
            });
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }
}

/// The per-camera set of stream outputs.
#[derive(Debug, Default)]
pub struct StreamHub {
    /// Output frame with overlays.
    pub norm: StreamSlot,
    /// Half-resolution output frame.
    pub sub: StreamSlot,
    /// Motion/debug frame.
    pub motion: StreamSlot,
    /// Virgin frame before masks and overlays.
    pub source: StreamSlot,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when anything is watching the motion stream.
    pub fn motion_viewers(&self) -> bool {
        self.motion.viewer_count() > 0
    }
}

/// Downsample a planar YUV 4:2:0 frame to half width and height by point
/// sampling. `dst` is resized once and reused afterwards.
pub fn downsample_half(src: &[u8], width: usize, height: usize, dst: &mut Vec<u8>) {
    let (hw, hh) = (width / 2, height / 2);
    dst.resize(hw * hh * 3 / 2, 0);

    for y in 0..hh {
        for x in 0..hw {
            dst[y * hw + x] = src[(2 * y) * width + 2 * x];
        }
    }

    let (src_u, src_v) = (width * height, width * height + width * height / 4);
    let (dst_u, dst_v) = (hw * hh, hw * hh + hw * hh / 4);
    let (src_cw, dst_cw) = (width / 2, hw / 2);
    for y in 0..hh / 2 {
        for x in 0..dst_cw {
            dst[dst_u + y * dst_cw + x] = src[src_u + (2 * y) * src_cw + 2 * x];
            dst[dst_v + y * dst_cw + x] = src[src_v + (2 * y) * src_cw + 2 * x];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_snapshot_roundtrip() {
        let slot = StreamSlot::default();
        assert_eq!(slot.snapshot().0.len(), 0);
        slot.publish(&[1, 2, 3]);
        let (frame, seq) = slot.snapshot();
        assert_eq!(frame, vec![1, 2, 3]);
        assert_eq!(seq, 1);
        slot.publish(&[4, 5, 6]);
        assert_eq!(slot.snapshot(), (vec![4, 5, 6], 2));
    }

    #[test]
    fn test_downsample_half_geometry() {
        let (w, h) = (64usize, 64usize);
        let mut src = vec![0u8; w * h * 3 / 2];
        src[..w * h].fill(200);
        src[w * h..].fill(0x80);

        let mut dst = Vec::new();
        downsample_half(&src, w, h, &mut dst);
        assert_eq!(dst.len(), (w / 2) * (h / 2) * 3 / 2);
        assert_eq!(dst[0], 200);
        assert_eq!(dst[(w / 2) * (h / 2)], 0x80);
    }

    #[test]
    fn test_viewer_counting_saturates() {
        let slot = StreamSlot::default();
        slot.viewer_disconnected();
        assert_eq!(slot.viewer_count(), 0);
        slot.viewer_connected();
        slot.viewer_connected();
        assert_eq!(slot.viewer_count(), 2);
        slot.viewer_disconnected();
        assert_eq!(slot.viewer_count(), 1);
    }
}
