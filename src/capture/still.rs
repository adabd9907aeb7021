//! Still-image capture source. Decodes an image file once at open and
//! serves it as every frame, converted to planar YUV 4:2:0. Used for
//! watching a periodically rewritten snapshot file and for demos where no
//! camera hardware exists.

use super::{CaptureOutcome, CaptureSource, Geometry};
use crate::error::{DaemonError, DaemonResult};
use crate::image::Image;
use std::path::PathBuf;

#[derive(Debug)]
pub struct StillSource {
    path: PathBuf,
    /// Preferred dimensions from the configuration; the decoded image wins
    /// if they disagree (rounded down to the chroma grid).
    want_width: usize,
    want_height: usize,
    frame: Vec<u8>,
    geometry: Geometry,
}

impl StillSource {
    pub fn new(path: impl Into<PathBuf>, want_width: usize, want_height: usize) -> Self {
        Self {
            path: path.into(),
            want_width,
            want_height,
            frame: Vec::new(),
            geometry: Geometry::norm(0, 0),
        }
    }
}

/// Convert packed RGB to planar YUV 4:2:0 (BT.601 full range), averaging
/// each 2x2 block for the chroma samples. Dimensions are floored to
/// multiples of 8 so the result always satisfies the pipeline's geometry
/// contract.
pub fn rgb_to_yuv420(rgb: &[u8], src_width: usize, src_height: usize) -> (Vec<u8>, usize, usize) {
    let width = src_width / 8 * 8;
    let height = src_height / 8 * 8;
    let mut out = vec![0u8; width * height * 3 / 2];

    let luma = |r: i32, g: i32, b: i32| ((77 * r + 150 * g + 29 * b) >> 8).clamp(0, 255);

    for y in 0..height {
        for x in 0..width {
            let p = (y * src_width + x) * 3;
            let (r, g, b) = (rgb[p] as i32, rgb[p + 1] as i32, rgb[p + 2] as i32);
            out[y * width + x] = luma(r, g, b) as u8;
        }
    }

    let (u_base, v_base) = (width * height, width * height + width * height / 4);
    for cy in 0..height / 2 {
        for cx in 0..width / 2 {
            let (mut sr, mut sg, mut sb) = (0i32, 0i32, 0i32);
            for dy in 0..2 {
                for dx in 0..2 {
                    let p = ((cy * 2 + dy) * src_width + cx * 2 + dx) * 3;
                    sr += rgb[p] as i32;
                    sg += rgb[p + 1] as i32;
                    sb += rgb[p + 2] as i32;
                }
            }
            let (r, g, b) = (sr / 4, sg / 4, sb / 4);
            let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
            let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
            let c = cy * (width / 2) + cx;
            out[u_base + c] = u.clamp(0, 255) as u8;
            out[v_base + c] = v.clamp(0, 255) as u8;
        }
    }

    (out, width, height)
}

impl CaptureSource for StillSource {
    fn open(&mut self) -> DaemonResult<Geometry> {
        let img = image::open(&self.path)
            .map_err(|e| DaemonError::capture_init(self.path.display().to_string(), e.to_string()))?;

        // Scale to the configured dimensions when they are usable,
        // otherwise serve the file's own (floored) geometry.
        let img = if self.want_width >= 64 && self.want_height >= 64 {
            img.resize_exact(
                self.want_width as u32,
                self.want_height as u32,
                image::imageops::FilterType::Triangle,
            )
        } else {
            img
        };

        let rgb = img.to_rgb8();
        let (frame, width, height) =
            rgb_to_yuv420(rgb.as_raw(), rgb.width() as usize, rgb.height() as usize);

        if width < 64 || height < 64 {
            return Err(DaemonError::geometry(
                width,
                height,
                "still image too small for detection",
            ));
        }

        self.frame = frame;
        self.geometry = Geometry::norm(width, height);
        Ok(self.geometry)
    }

    fn next(&mut self, slot: &mut Image) -> CaptureOutcome {
        if self.frame.is_empty() {
            return CaptureOutcome::NonFatal;
        }
        if slot.image_norm.len() != self.frame.len() {
            return CaptureOutcome::SizeChanged;
        }
        slot.image_norm.copy_from_slice(&self.frame);
        CaptureOutcome::Ok
    }

    fn close(&mut self) {
        self.frame.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::yuv420_size;

    #[test]
    fn test_rgb_conversion_geometry() {
        let rgb = vec![128u8; 70 * 70 * 3];
        let (yuv, w, h) = rgb_to_yuv420(&rgb, 70, 70);
        assert_eq!((w, h), (64, 64));
        assert_eq!(yuv.len(), yuv420_size(64, 64));
    }

    #[test]
    fn test_grey_rgb_gives_neutral_chroma() {
        let rgb = vec![100u8; 64 * 64 * 3];
        let (yuv, w, h) = rgb_to_yuv420(&rgb, 64, 64);
        let u = yuv[w * h];
        let v = yuv[w * h + w * h / 4];
        assert!((u as i32 - 128).abs() <= 1);
        assert!((v as i32 - 128).abs() <= 1);
    }

    #[test]
    fn test_still_source_serves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let buf = vec![200u8; 64 * 64 * 3];
        image::save_buffer(&path, &buf, 64, 64, image::ExtendedColorType::Rgb8).unwrap();

        let mut src = StillSource::new(&path, 64, 64);
        let g = src.open().unwrap();
        assert_eq!((g.width, g.height), (64, 64));

        let mut slot = Image::alloc(yuv420_size(64, 64), 0);
        assert_eq!(src.next(&mut slot), CaptureOutcome::Ok);
        assert!(slot.image_norm[0] > 180);
    }
}
