//! # Despeckle Morphology
//!
//! Erode and dilate passes that remove isolated-pixel noise from the motion
//! image before the event logic sees the diff count. The filter is a string
//! over the alphabet `{E, e, D, d, l}` applied left to right:
//!
//! - `E` / `e` - erode with a 3x3 box / 4-neighbour cross
//! - `D` / `d` - dilate with a 3x3 box / 4-neighbour cross
//! - `l` - connected-component labeling; must be last, replaces the diff
//!   count with the summed area of above-threshold components
//!
//! An erode that reduces the diff count to zero cuts the filter short. All
//! passes share one `3 * width` scratch buffer and never allocate.

use super::DetectionState;

fn max2(a: u8, b: u8) -> u8 {
    a.max(b)
}

fn max3(a: u8, b: u8, c: u8) -> u8 {
    a.max(b).max(c)
}

/// Dilate with a 3x3 box using a sliding window of column maxima.
pub fn dilate9(img: &mut [u8], width: usize, height: usize, buffer: &mut [u8]) -> i32 {
    // r1..r3 are row offsets into the scratch buffer; `window` holds the
    // max of each column in the current 3x3 matrix and `blob` the running
    // max, so each pixel costs one column max plus a compare.
    let (mut r1, mut r2, mut r3) = (0usize, width, 2 * width);
    buffer[r2..r2 + width].fill(0);
    buffer[r3..r3 + width].copy_from_slice(&img[..width]);

    let mut sum = 0;
    for y in 0..height {
        // Move down one step; row 1 becomes the previous row 2 and so on.
        let t = r1;
        r1 = r2;
        r2 = r3;
        r3 = t;

        if y == height - 1 {
            buffer[r3..r3 + width].fill(0);
        } else {
            buffer[r3..r3 + width].copy_from_slice(&img[(y + 1) * width..(y + 2) * width]);
        }

        let mut window = [0u8; 3];
        window[0] = max3(buffer[r1], buffer[r2], buffer[r3]);
        window[1] = max3(buffer[r1 + 1], buffer[r2 + 1], buffer[r3 + 1]);
        let mut blob = max2(window[0], window[1]);
        let mut widx = 2;

        for i in 2..width {
            let latest = max3(buffer[r1 + i], buffer[r2 + i], buffer[r3 + i]);
            window[widx] = latest;

            // A larger value extends the blob; otherwise the max may have
            // slid out of the window and must be recomputed.
            if latest >= blob {
                blob = latest;
            } else {
                blob = max3(window[0], window[1], window[2]);
            }

            if blob != 0 {
                img[y * width + i - 1] = blob;
                sum += 1;
            }

            widx += 1;
            if widx == 3 {
                widx = 0;
            }
        }

        img[y * width] = 0;
        img[y * width + width - 1] = 0;
    }
    sum
}

/// Dilate with a + shape.
pub fn dilate5(img: &mut [u8], width: usize, height: usize, buffer: &mut [u8]) -> i32 {
    let (mut r1, mut r2, mut r3) = (0usize, width, 2 * width);
    buffer[r2..r2 + width].fill(0);
    buffer[r3..r3 + width].copy_from_slice(&img[..width]);

    let mut sum = 0;
    for y in 0..height {
        let t = r1;
        r1 = r2;
        r2 = r3;
        r3 = t;

        if y == height - 1 {
            buffer[r3..r3 + width].fill(0);
        } else {
            buffer[r3..r3 + width].copy_from_slice(&img[(y + 1) * width..(y + 2) * width]);
        }

        // `mem` holds the max of the overlapping part of two + shapes.
        let mut mem = max2(buffer[r2], buffer[r2 + 1]);
        let mut blob = 1u8; // dummy, must be > 0 to force a first evaluation

        for i in 1..width - 1 {
            let latest = max3(buffer[r1 + i], buffer[r2 + i + 1], buffer[r3 + i]);

            if blob == 0 {
                blob = latest;
                mem = buffer[r2 + i + 1];
            } else {
                blob = max2(mem, latest);
                mem = max2(buffer[r2 + i], buffer[r2 + i + 1]);
            }

            if blob != 0 {
                img[y * width + i] = blob;
                sum += 1;
            }
        }

        img[y * width] = 0;
        img[y * width + width - 1] = 0;
    }
    sum
}

/// Erode with a 3x3 box. `flag` is the value written to the frame border
/// (zero for the motion image, 255 when eroding the inverted smart mask).
pub fn erode9(img: &mut [u8], width: usize, height: usize, buffer: &mut [u8], flag: u8) -> i32 {
    let (r1, r2, r3) = (0usize, width, 2 * width);
    buffer[r2..r2 + width].fill(flag);
    buffer[r3..r3 + width].copy_from_slice(&img[..width]);

    let mut sum = 0;
    for y in 0..height {
        buffer.copy_within(r2..r2 + width, r1);
        buffer.copy_within(r3..r3 + width, r2);

        if y == height - 1 {
            buffer[r3..r3 + width].fill(flag);
        } else {
            buffer[r3..r3 + width].copy_from_slice(&img[(y + 1) * width..(y + 2) * width]);
        }

        for i in (1..width - 1).rev() {
            if buffer[r1 + i - 1] == 0
                || buffer[r1 + i] == 0
                || buffer[r1 + i + 1] == 0
                || buffer[r2 + i - 1] == 0
                || buffer[r2 + i] == 0
                || buffer[r2 + i + 1] == 0
                || buffer[r3 + i - 1] == 0
                || buffer[r3 + i] == 0
                || buffer[r3 + i + 1] == 0
            {
                img[y * width + i] = 0;
            } else {
                sum += 1;
            }
        }

        img[y * width] = flag;
        img[y * width + width - 1] = flag;
    }
    sum
}

/// Erode with a + shape.
pub fn erode5(img: &mut [u8], width: usize, height: usize, buffer: &mut [u8], flag: u8) -> i32 {
    let (r1, r2, r3) = (0usize, width, 2 * width);
    buffer[r2..r2 + width].fill(flag);
    buffer[r3..r3 + width].copy_from_slice(&img[..width]);

    let mut sum = 0;
    for y in 0..height {
        buffer.copy_within(r2..r2 + width, r1);
        buffer.copy_within(r3..r3 + width, r2);

        if y == height - 1 {
            buffer[r3..r3 + width].fill(flag);
        } else {
            buffer[r3..r3 + width].copy_from_slice(&img[(y + 1) * width..(y + 2) * width]);
        }

        for i in (1..width - 1).rev() {
            if buffer[r1 + i] == 0
                || buffer[r2 + i - 1] == 0
                || buffer[r2 + i] == 0
                || buffer[r2 + i + 1] == 0
                || buffer[r3 + i] == 0
            {
                img[y * width + i] = 0;
            } else {
                sum += 1;
            }
        }

        img[y * width] = flag;
        img[y * width + width - 1] = flag;
    }
    sum
}

/// Result of a despeckle pass over the motion image.
#[derive(Debug, Clone, Copy, Default)]
pub struct DespeckleOutcome {
    /// Diff count after the filter; `olddiffs` if the filter was empty.
    pub diffs: i32,
    /// True when a labeling pass ran and its output is authoritative for
    /// this frame.
    pub labeling: bool,
    /// Connected components counted by the labeling pass.
    pub total_labels: i32,
    /// True when the flood-fill segment stack hit its bound; the affected
    /// component was only partially filled.
    pub stack_overflow: bool,
}

impl DetectionState {
    /// Apply the despeckle filter string to the motion image.
    pub fn despeckle(&mut self, out: &mut [u8], filter: &str, olddiffs: i32) -> DespeckleOutcome {
        let mut outcome = DespeckleOutcome {
            diffs: olddiffs,
            ..Default::default()
        };
        let mut done = 0u8;
        let width = self.width;
        let height = self.height;

        for op in filter.bytes() {
            match op {
                b'E' => {
                    outcome.diffs = erode9(out, width, height, &mut self.common_buffer, 0);
                    done = 1;
                    if outcome.diffs == 0 {
                        break;
                    }
                }
                b'e' => {
                    outcome.diffs = erode5(out, width, height, &mut self.common_buffer, 0);
                    done = 1;
                    if outcome.diffs == 0 {
                        break;
                    }
                }
                b'D' => {
                    outcome.diffs = dilate9(out, width, height, &mut self.common_buffer);
                    done = 1;
                }
                b'd' => {
                    outcome.diffs = dilate5(out, width, height, &mut self.common_buffer);
                    done = 1;
                }
                // No further despeckle after labeling.
                b'l' => {
                    let labeled = self.labeling(out);
                    outcome.diffs = labeled.diffs;
                    outcome.total_labels = labeled.total_labels;
                    outcome.stack_overflow = labeled.stack_overflow;
                    outcome.labeling = true;
                    done = 2;
                    break;
                }
                _ => {}
            }
        }

        if done == 0 {
            // Nothing valid in the filter string: identity.
            self.labelsize_max = 0;
            return DespeckleOutcome {
                diffs: olddiffs,
                ..Default::default()
            };
        }
        if done != 2 {
            self.labelsize_max = 0;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 64;
    const H: usize = 64;

    fn state() -> DetectionState {
        let mut s = DetectionState::new(W, H);
        s.threshold = 10;
        s
    }

    #[test]
    fn test_empty_filter_is_identity() {
        let mut s = state();
        let mut out = vec![0u8; W * H];
        out[10 * W + 10] = 255;
        let before = out.clone();
        let r = s.despeckle(&mut out, "", 42);
        assert_eq!(r.diffs, 42);
        assert!(!r.labeling);
        assert_eq!(out, before);
    }

    #[test]
    fn test_erode_removes_isolated_pixel() {
        let mut s = state();
        let mut out = vec![0u8; W * H];
        out[20 * W + 20] = 255;
        let r = s.despeckle(&mut out, "Ee", 1);
        assert_eq!(r.diffs, 0);
        assert!(out.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_erode_keeps_solid_block() {
        let mut s = state();
        let mut out = vec![0u8; W * H];
        for y in 10..30 {
            for x in 10..30 {
                out[y * W + x] = 255;
            }
        }
        let r = s.despeckle(&mut out, "E", 400);
        // A 20x20 block erodes to 18x18.
        assert_eq!(r.diffs, 18 * 18);
    }

    #[test]
    fn test_dilate_grows_block() {
        let mut s = state();
        let mut out = vec![0u8; W * H];
        for y in 10..20 {
            for x in 10..20 {
                out[y * W + x] = 255;
            }
        }
        let r = s.despeckle(&mut out, "D", 100);
        // A 10x10 block dilates to 12x12.
        assert_eq!(r.diffs, 12 * 12);
    }

    #[test]
    fn test_erode_then_dilate_restores_block_size() {
        let mut s = state();
        let mut out = vec![0u8; W * H];
        for y in 10..30 {
            for x in 10..30 {
                out[y * W + x] = 255;
            }
        }
        let r = s.despeckle(&mut out, "ED", 400);
        assert_eq!(r.diffs, 400);
    }
}
