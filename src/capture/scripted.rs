//! Programmable frame source. Serves a scripted sequence of frames and
//! capture outcomes, then repeats its last frame. Backs the `test:` device
//! scheme and the integration tests, and doubles as a signal generator for
//! `emulate_motion` demos.

use super::{CaptureOutcome, CaptureSource, Geometry};
use crate::error::DaemonResult;
use crate::image::{Image, yuv420_size};

/// One scripted step.
#[derive(Debug, Clone)]
pub enum ScriptFrame {
    /// Full YUV 4:2:0 buffer to copy into the slot.
    Pixels(Vec<u8>),
    /// Report a transient failure.
    NonFatal,
    /// Report a fatal failure.
    Fatal,
    /// Report a dimension change.
    SizeChanged,
}

#[derive(Debug)]
pub struct ScriptedSource {
    geometry: Geometry,
    frames: Vec<ScriptFrame>,
    pos: usize,
    opened: bool,
}

impl ScriptedSource {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            geometry: Geometry::norm(width, height),
            frames: Vec::new(),
            pos: 0,
            opened: false,
        }
    }

    /// A source that serves one uniform-luma frame forever.
    pub fn uniform(width: usize, height: usize, luma: u8) -> Self {
        let mut s = Self::new(width, height);
        s.push_uniform(luma);
        s
    }

    pub fn push(&mut self, frame: ScriptFrame) -> &mut Self {
        self.frames.push(frame);
        self
    }

    /// Push a frame with uniform luma and neutral chroma.
    pub fn push_uniform(&mut self, luma: u8) -> &mut Self {
        self.frames.push(ScriptFrame::Pixels(Self::uniform_buffer(
            self.geometry.width,
            self.geometry.height,
            luma,
        )));
        self
    }

    /// Push `count` copies of a frame buffer.
    pub fn push_repeated(&mut self, buf: Vec<u8>, count: usize) -> &mut Self {
        for _ in 0..count {
            self.frames.push(ScriptFrame::Pixels(buf.clone()));
        }
        self
    }

    /// Build a uniform YUV buffer for this source's geometry.
    pub fn uniform_buffer(width: usize, height: usize, luma: u8) -> Vec<u8> {
        let mut buf = vec![0x80u8; yuv420_size(width, height)];
        buf[..width * height].fill(luma);
        buf
    }

    /// Build a uniform buffer with a rectangular luma patch.
    pub fn patch_buffer(
        width: usize,
        height: usize,
        base: u8,
        x0: usize,
        y0: usize,
        pw: usize,
        ph: usize,
        value: u8,
    ) -> Vec<u8> {
        let mut buf = Self::uniform_buffer(width, height, base);
        for y in y0..(y0 + ph).min(height) {
            for x in x0..(x0 + pw).min(width) {
                buf[y * width + x] = value;
            }
        }
        buf
    }
}

impl CaptureSource for ScriptedSource {
    fn open(&mut self) -> DaemonResult<Geometry> {
        self.opened = true;
        self.pos = 0;
        Ok(self.geometry)
    }

    fn next(&mut self, slot: &mut Image) -> CaptureOutcome {
        if self.frames.is_empty() {
            return CaptureOutcome::NonFatal;
        }
        // Serve the script, then hold the last frame.
        let idx = self.pos.min(self.frames.len() - 1);
        if self.pos < self.frames.len() {
            self.pos += 1;
        }
        match &self.frames[idx] {
            ScriptFrame::Pixels(buf) => {
                let n = buf.len().min(slot.image_norm.len());
                slot.image_norm[..n].copy_from_slice(&buf[..n]);
                CaptureOutcome::Ok
            }
            ScriptFrame::NonFatal => CaptureOutcome::NonFatal,
            ScriptFrame::Fatal => CaptureOutcome::Fatal,
            ScriptFrame::SizeChanged => CaptureOutcome::SizeChanged,
        }
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_plays_then_holds_last() {
        let mut src = ScriptedSource::new(64, 64);
        src.push_uniform(10).push_uniform(20);
        src.open().unwrap();

        let mut slot = Image::alloc(yuv420_size(64, 64), 0);
        assert_eq!(src.next(&mut slot), CaptureOutcome::Ok);
        assert_eq!(slot.image_norm[0], 10);
        assert_eq!(src.next(&mut slot), CaptureOutcome::Ok);
        assert_eq!(slot.image_norm[0], 20);
        // Script exhausted: last frame repeats.
        assert_eq!(src.next(&mut slot), CaptureOutcome::Ok);
        assert_eq!(slot.image_norm[0], 20);
    }

    #[test]
    fn test_outcome_frames() {
        let mut src = ScriptedSource::new(64, 64);
        src.push(ScriptFrame::NonFatal).push(ScriptFrame::Fatal);
        src.open().unwrap();
        let mut slot = Image::alloc(yuv420_size(64, 64), 0);
        assert_eq!(src.next(&mut slot), CaptureOutcome::NonFatal);
        assert_eq!(src.next(&mut slot), CaptureOutcome::Fatal);
    }

    #[test]
    fn test_patch_buffer_places_patch() {
        let buf = ScriptedSource::patch_buffer(64, 64, 100, 10, 10, 4, 4, 200);
        assert_eq!(buf[10 * 64 + 10], 200);
        assert_eq!(buf[10 * 64 + 14], 100);
        assert_eq!(buf[64 * 64], 0x80);
    }
}
