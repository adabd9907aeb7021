//! # Motion Centroid and Bounding Box
//!
//! Two passes over the motion pixels (or, when labeling ran, over the
//! pixels of the significant label groups): the first averages x and y for
//! the centroid, the second averages the absolute distances from it. The
//! box spans twice the mean distance horizontally and 3x above / 2x below
//! vertically; the extra headroom above keeps a person's head inside the
//! box. All four sides are clamped to the frame and snapped to even
//! coordinates so overlays land on the chroma grid.

use super::DetectionState;
use super::label::ABOVE_THRESHOLD_BIT;
use crate::image::Location;

impl DetectionState {
    /// Locate the centre and size of the movement in the motion image.
    pub fn locate_center_size(&self, out: &[u8]) -> Location {
        let width = self.width as i32;
        let height = self.height as i32;
        let use_labels = self.labelsize_max != 0;

        let mut cent = Location {
            minx: width,
            miny: height,
            ..Default::default()
        };

        let active = |idx: usize| {
            if use_labels {
                self.labels[idx] & ABOVE_THRESHOLD_BIT != 0
            } else {
                out[idx] != 0
            }
        };

        let mut centc: i64 = 0;
        let (mut sum_x, mut sum_y): (i64, i64) = (0, 0);
        for y in 0..height {
            for x in 0..width {
                if active((y * width + x) as usize) {
                    sum_x += x as i64;
                    sum_y += y as i64;
                    centc += 1;
                }
            }
        }

        if centc != 0 {
            cent.x = (sum_x / centc) as i32;
            cent.y = (sum_y / centc) as i32;
        }

        let (mut xdist, mut ydist): (i64, i64) = (0, 0);
        let mut centc2: i64 = 0;
        for y in 0..height {
            for x in 0..width {
                if active((y * width + x) as usize) {
                    xdist += (x - cent.x).abs() as i64;
                    ydist += (y - cent.y).abs() as i64;
                    centc2 += 1;
                }
            }
        }

        if centc2 != 0 {
            cent.minx = cent.x - (xdist / centc2) as i32 * 2;
            cent.maxx = cent.x + (xdist / centc2) as i32 * 2;
            // Enlarge the box upward so heads fit in; 3x the mean distance
            // works well in practice.
            cent.miny = cent.y - (ydist / centc2) as i32 * 3;
            cent.maxy = cent.y + (ydist / centc2) as i32 * 2;
        }

        cent.maxx = cent.maxx.clamp(0, width - 1);
        cent.maxy = cent.maxy.clamp(0, height - 1);
        cent.minx = cent.minx.clamp(0, width - 1);
        cent.miny = cent.miny.clamp(0, height - 1);

        // Align to even coordinates for the locate-box overlay.
        cent.minx += cent.minx % 2;
        cent.miny += cent.miny % 2;
        cent.maxx -= cent.maxx % 2;
        cent.maxy -= cent.maxy % 2;

        cent.width = cent.maxx - cent.minx;
        cent.height = cent.maxy - cent.miny;

        // Recentre y on the box so the asymmetric head allowance above is
        // reflected in the reported centre.
        cent.y = (cent.miny + cent.maxy) / 2;

        cent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 320;
    const H: usize = 240;

    #[test]
    fn test_box_contains_centroid_and_is_even() {
        let mut s = DetectionState::new(W, H);
        s.labelsize_max = 0;
        let mut out = vec![0u8; W * H];
        for y in 100..140 {
            for x in 200..240 {
                out[y * W + x] = 255;
            }
        }

        let loc = s.locate_center_size(&out);
        assert!(loc.minx <= loc.x && loc.x <= loc.maxx);
        assert!(loc.miny <= loc.y && loc.y <= loc.maxy);
        assert!(loc.minx >= 0 && loc.maxx <= W as i32 - 1);
        assert!(loc.miny >= 0 && loc.maxy <= H as i32 - 1);
        assert_eq!(loc.minx % 2, 0);
        assert_eq!(loc.miny % 2, 0);
        assert_eq!(loc.maxx % 2, 0);
        assert_eq!(loc.maxy % 2, 0);
        // Centroid of a symmetric blob sits at its middle.
        assert!((loc.x - 219).abs() <= 2);
    }

    #[test]
    fn test_box_clamps_at_frame_edge() {
        let mut s = DetectionState::new(W, H);
        let mut out = vec![0u8; W * H];
        // Blob hugging the top-left corner.
        for y in 0..40 {
            for x in 0..40 {
                out[y * W + x] = 255;
            }
        }
        let loc = s.locate_center_size(&out);
        assert!(loc.minx >= 0 && loc.miny >= 0);
        assert!(loc.maxx <= W as i32 - 1 && loc.maxy <= H as i32 - 1);
    }

    #[test]
    fn test_labels_restrict_to_significant_groups() {
        let mut s = DetectionState::new(W, H);
        s.threshold = 100;
        let mut out = vec![0u8; W * H];
        // Significant blob on the left, speckle far right.
        for y in 100..120 {
            for x in 20..40 {
                out[y * W + x] = 255;
            }
        }
        out[10 * W + 300] = 255;
        s.labeling(&out);

        let loc = s.locate_center_size(&out);
        // Centroid stays on the significant group, unaffected by speckle.
        assert!(loc.x < 60);
    }

    #[test]
    fn test_wide_blob_box_tracks_aspect() {
        let mut s = DetectionState::new(W, H);
        let mut out = vec![0u8; W * H];
        for y in 110..130 {
            for x in 60..260 {
                out[y * W + x] = 255;
            }
        }
        let loc = s.locate_center_size(&out);
        assert!(loc.width > loc.height);
    }
}
