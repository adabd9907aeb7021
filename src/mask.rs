//! # Mask Files
//!
//! Greyscale PGM bitmaps applied per pixel. Two kinds:
//!
//! - the **fixed motion mask** weights the diff of each pixel by
//!   `mask / 255`, so black areas never contribute motion;
//! - the **privacy mask** blanks areas of the captured image before
//!   anything else sees it. Masked luma goes to 0 and masked chroma to
//!   neutral grey.
//!
//! The privacy mask precomputes an AND mask over the whole YUV buffer plus
//! an OR mask for the chroma planes, so applying it is one wide-word AND
//! and one OR per 8 bytes rather than a branch per pixel.
//!
//! A missing mask file is not fatal: the caller logs the error, an empty
//! all-white mask is written for the user to edit, and the feature is
//! disabled.

use crate::error::{DaemonError, DaemonResult};
use crate::image::yuv420_size;
use std::path::Path;

fn load_luma(path: &Path, width: usize, height: usize) -> DaemonResult<Vec<u8>> {
    let img = image::open(path)
        .map_err(|e| DaemonError::mask(path.display().to_string(), e.to_string()))?
        .to_luma8();

    if img.width() as usize != width || img.height() as usize != height {
        return Err(DaemonError::mask(
            path.display().to_string(),
            format!(
                "mask is {}x{} but the image is {}x{}",
                img.width(),
                img.height(),
                width,
                height
            ),
        ));
    }
    Ok(img.into_raw())
}

/// Load the fixed motion mask: per-pixel diff weights 0..=255.
pub fn load_fixed_mask(path: &Path, width: usize, height: usize) -> DaemonResult<Vec<u8>> {
    load_luma(path, width, height)
}

/// Write an all-white (pass-everything) mask the user can edit.
pub fn write_empty_mask(path: &Path, width: usize, height: usize) -> DaemonResult<()> {
    let buf = vec![0xffu8; width * height];
    image::save_buffer_with_format(
        path,
        &buf,
        width as u32,
        height as u32,
        image::ExtendedColorType::L8,
        image::ImageFormat::Pnm,
    )
    .map_err(|e| DaemonError::mask(path.display().to_string(), e.to_string()))
}

/// Privacy mask with precomputed wide-word helpers.
#[derive(Debug, Clone)]
pub struct PrivacyMask {
    /// AND mask covering the full YUV buffer: 0xff keeps a byte, 0x00
    /// clears it.
    and_mask: Vec<u8>,
    /// OR mask for the chroma planes only: 0x80 where masked, forcing
    /// cleared chroma to neutral grey.
    or_mask_uv: Vec<u8>,
}

impl PrivacyMask {
    pub fn load(path: &Path, width: usize, height: usize) -> DaemonResult<Self> {
        let luma = load_luma(path, width, height)?;
        Ok(Self::from_luma(&luma, width, height))
    }

    /// Build the helpers from a luma bitmap: white keeps, anything else
    /// masks.
    pub fn from_luma(luma: &[u8], width: usize, height: usize) -> Self {
        let y_size = width * height;
        let mut and_mask = vec![0u8; yuv420_size(width, height)];
        let mut or_mask_uv = vec![0u8; y_size / 2];
        let start_cr = y_size;
        let start_cb = y_size + y_size / 4;
        let offset_cb = y_size / 4;

        for row in 0..height {
            for col in 0..width {
                let keep = luma[row * width + col] > 0x7f;
                and_mask[row * width + col] = if keep { 0xff } else { 0x00 };

                if col % 2 == 0 && row % 2 == 0 {
                    let uv = col / 2 + (row * width) / 4;
                    if keep {
                        and_mask[start_cr + uv] = 0xff;
                        and_mask[start_cb + uv] = 0xff;
                    } else {
                        or_mask_uv[uv] = 0x80;
                        or_mask_uv[offset_cb + uv] = 0x80;
                    }
                }
            }
        }

        Self {
            and_mask,
            or_mask_uv,
        }
    }

    /// Apply the mask in place to a full YUV buffer. Processes 8 bytes per
    /// operation with a trailer loop for the remainder.
    pub fn apply(&self, image: &mut [u8]) {
        let len = image.len().min(self.and_mask.len());
        let uv_start = len - self.or_mask_uv.len().min(len);

        and_bytes(&mut image[..len], &self.and_mask[..len]);
        or_bytes(&mut image[uv_start..len], &self.or_mask_uv);
    }
}

fn and_bytes(dst: &mut [u8], src: &[u8]) {
    let mut dst_chunks = dst.chunks_exact_mut(8);
    let mut src_chunks = src.chunks_exact(8);
    for (d, s) in dst_chunks.by_ref().zip(src_chunks.by_ref()) {
        let v = u64::from_ne_bytes((&*d).try_into().unwrap())
            & u64::from_ne_bytes(s.try_into().unwrap());
        d.copy_from_slice(&v.to_ne_bytes());
    }
    for (d, s) in dst_chunks
        .into_remainder()
        .iter_mut()
        .zip(src_chunks.remainder())
    {
        *d &= s;
    }
}

fn or_bytes(dst: &mut [u8], src: &[u8]) {
    let mut dst_chunks = dst.chunks_exact_mut(8);
    let mut src_chunks = src.chunks_exact(8);
    for (d, s) in dst_chunks.by_ref().zip(src_chunks.by_ref()) {
        let v = u64::from_ne_bytes((&*d).try_into().unwrap())
            | u64::from_ne_bytes(s.try_into().unwrap());
        d.copy_from_slice(&v.to_ne_bytes());
    }
    for (d, s) in dst_chunks
        .into_remainder()
        .iter_mut()
        .zip(src_chunks.remainder())
    {
        *d |= s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 64;
    const H: usize = 64;

    #[test]
    fn test_privacy_mask_blanks_region() {
        let mut luma = vec![0xffu8; W * H];
        // Mask out the top-left 16x16 corner.
        for y in 0..16 {
            for x in 0..16 {
                luma[y * W + x] = 0;
            }
        }
        let mask = PrivacyMask::from_luma(&luma, W, H);

        let mut image = vec![200u8; yuv420_size(W, H)];
        mask.apply(&mut image);

        // Masked luma cleared, unmasked untouched.
        assert_eq!(image[0], 0);
        assert_eq!(image[5 * W + 5], 0);
        assert_eq!(image[20 * W + 20], 200);

        // Masked chroma forced to neutral grey.
        let u_base = W * H;
        assert_eq!(image[u_base], 0x80);
        assert_eq!(image[u_base + (10 * W) / 4 + 10], 200);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut luma = vec![0xffu8; W * H];
        for i in 0..W {
            luma[i] = 0;
        }
        let mask = PrivacyMask::from_luma(&luma, W, H);
        let mut image = vec![150u8; yuv420_size(W, H)];
        mask.apply(&mut image);
        let once = image.clone();
        mask.apply(&mut image);
        assert_eq!(image, once);
    }

    #[test]
    fn test_mask_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.pgm");
        write_empty_mask(&path, W, H).unwrap();

        let fixed = load_fixed_mask(&path, W, H).unwrap();
        assert!(fixed.iter().all(|&p| p == 0xff));

        let privacy = PrivacyMask::load(&path, W, H).unwrap();
        let mut image = vec![99u8; yuv420_size(W, H)];
        privacy.apply(&mut image);
        assert!(image.iter().all(|&p| p == 99));
    }

    #[test]
    fn test_wrong_dimensions_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.pgm");
        write_empty_mask(&path, 32, 32).unwrap();
        assert!(load_fixed_mask(&path, W, H).is_err());
    }
}
