//! # Precapture Ring Buffer
//!
//! Fixed-capacity FIFO of [`Image`] slots sized `pre_capture +
//! minimum_motion_frames`. The pipeline thread owns the ring exclusively:
//! the write cursor advances once per captured frame, and the consumer walks
//! SAVE-flagged slots behind it. When the write cursor catches the read
//! cursor the oldest unsaved frame is silently dropped; unsaved precapture
//! frames are discardable by design of the precapture feature.
//!
//! Resizing (the user changed `pre_capture` at runtime) is restricted to a
//! quiescent boundary: outside an event, with the write cursor at the last
//! slot of the smaller of the old and new sizes. Anywhere else the request
//! defers until the next frame-prepare pass finds the ring idle.

use crate::image::{Image, ImageFlags};
use log::info;

/// Ring of image slots with `in`/`out` cursors.
#[derive(Debug)]
pub struct ImageRing {
    slots: Vec<Image>,
    size_norm: usize,
    size_high: usize,
    /// Next write position.
    pos_in: usize,
    /// Next consume position.
    pos_out: usize,
}

impl ImageRing {
    /// Create an empty ring. Slots are added by the first `resize` call so
    /// that initial creation and runtime growth share one code path.
    pub fn new(size_norm: usize, size_high: usize) -> Self {
        Self {
            slots: Vec::new(),
            size_norm,
            size_high,
            pos_in: 0,
            pos_out: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn pos_in(&self) -> usize {
        self.pos_in
    }

    pub fn pos_out(&self) -> usize {
        self.pos_out
    }

    pub fn slot(&self, idx: usize) -> &Image {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut Image {
        &mut self.slots[idx]
    }

    /// The slot most recently written.
    pub fn current(&self) -> &Image {
        &self.slots[self.pos_in]
    }

    pub fn current_mut(&mut self) -> &mut Image {
        &mut self.slots[self.pos_in]
    }

    /// Flag every slot, used to recruit the whole precapture into an event.
    pub fn flag_all(&mut self, flags: ImageFlags) {
        for slot in &mut self.slots {
            slot.flags |= flags;
        }
    }

    /// Advance the write cursor to the next slot. If it collides with the
    /// read cursor, the read cursor advances too and the oldest unsaved
    /// frame is dropped.
    ///
    /// Returns the index of the new write slot.
    pub fn advance_in(&mut self) -> usize {
        self.pos_in += 1;
        if self.pos_in >= self.slots.len() {
            self.pos_in = 0;
        }
        if self.pos_in == self.pos_out {
            self.pos_out += 1;
            if self.pos_out >= self.slots.len() {
                self.pos_out = 0;
            }
        }
        self.pos_in
    }

    /// Advance the read cursor past a consumed slot. Returns true when the
    /// ring is drained (`out` caught up with `in`).
    pub fn advance_out(&mut self) -> bool {
        self.pos_out += 1;
        if self.pos_out >= self.slots.len() {
            self.pos_out = 0;
        }
        self.pos_out == self.pos_in
    }

    /// Resize the ring to `new_size` slots, permitted only at a quiescent
    /// boundary:
    /// - not inside an event (`in_event` false), and
    /// - the write cursor sits at the last slot of the smaller of the old
    ///   and new sizes (or the ring is still empty).
    ///
    /// Unread slots are preserved up to `min(old, new)`; new slots get
    /// grey-neutral pixels. Returns true when the resize happened; a false
    /// return means the caller retries on a later frame.
    pub fn resize(&mut self, new_size: usize, in_event: bool) -> bool {
        if in_event {
            return false;
        }
        let smallest = new_size.min(self.slots.len());
        if !(smallest == 0 || self.pos_in == smallest - 1) {
            return false;
        }

        info!("Resizing pre_capture buffer to {} items", new_size);

        let mut slots = Vec::with_capacity(new_size);
        if smallest > 0 {
            for slot in self.slots.drain(..).take(smallest) {
                slots.push(slot);
            }
        }
        while slots.len() < new_size {
            slots.push(Image::alloc(self.size_norm, self.size_high));
        }

        self.slots = slots;
        self.pos_in = 0;
        self.pos_out = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::yuv420_size;

    fn ring(n: usize) -> ImageRing {
        let mut r = ImageRing::new(yuv420_size(64, 64), 0);
        assert!(r.resize(n, false));
        r
    }

    #[test]
    fn test_new_slots_are_grey() {
        let r = ring(3);
        assert_eq!(r.size(), 3);
        assert!(r.slot(2).image_norm.iter().all(|&p| p == 0x80));
    }

    #[test]
    fn test_advance_drops_oldest_when_full() {
        let mut r = ring(3);
        assert_eq!(r.pos_out(), 0);
        r.advance_in(); // in=1
        r.advance_in(); // in=2
        r.advance_in(); // in=0, collides with out=0 -> out=1
        assert_eq!(r.pos_in(), 0);
        assert_eq!(r.pos_out(), 1);
    }

    #[test]
    fn test_resize_deferred_during_event() {
        let mut r = ring(3);
        assert!(!r.resize(5, true));
        assert_eq!(r.size(), 3);
    }

    #[test]
    fn test_resize_requires_cursor_at_join() {
        let mut r = ring(4);
        // Write cursor at 0, smaller size is 2: boundary would be slot 1.
        assert!(!r.resize(2, false));
        r.advance_in(); // in=1
        assert!(r.resize(2, false));
        assert_eq!(r.size(), 2);
        assert_eq!(r.pos_in(), 0);
        assert_eq!(r.pos_out(), 0);
    }

    #[test]
    fn test_resize_preserves_existing_slots() {
        let mut r = ring(2);
        r.current_mut().diffs = 77;
        r.advance_in();
        assert!(r.resize(4, false));
        assert_eq!(r.slot(0).diffs, 77);
        assert!(r.slot(3).image_norm.iter().all(|&p| p == 0x80));
    }
}
