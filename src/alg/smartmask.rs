//! # Smart Mask Learner
//!
//! Learns which pixels trigger motion over and over (wind in trees, a
//! flickering sign) and suppresses them. The diff stage feeds per-pixel
//! increments into `smartmask_buffer` while events are active; every
//! `5 * (11 - smart_mask_speed)` seconds this pass folds the buffer into
//! the raw mask, decays it by one and derives the binary gate.

use super::DetectionState;
use super::despeckle::{erode5, erode9};

impl DetectionState {
    /// Fold the buffered increments into the smart mask and refresh the
    /// final gate. `sensitivity` is `lastrate * (11 - smart_mask_speed)`.
    pub fn tune_smartmask(&mut self, sensitivity: i32) {
        let sensitivity = sensitivity.max(1);

        for i in 0..self.motionsize {
            // Decay by one per tune pass.
            if self.smartmask[i] > 0 {
                self.smartmask[i] -= 1;
            }

            let diff = self.smartmask_buffer[i] / sensitivity;
            if diff != 0 {
                if (self.smartmask[i] as i32) <= diff + 80 {
                    self.smartmask[i] = (self.smartmask[i] as i32 + diff).min(255) as u8;
                } else {
                    self.smartmask[i] = 80;
                }
                self.smartmask_buffer[i] %= sensitivity;
            }

            // Transfer to the final gate above the trigger value.
            self.smartmask_final[i] = if self.smartmask[i] > 20 { 0 } else { 255 };
        }

        // Bleed the suppressed region outward. The gate is inverted (0 =
        // suppress), so eroding the 255 area grows the 0 area.
        erode9(
            &mut self.smartmask_final,
            self.width,
            self.height,
            &mut self.common_buffer,
            255,
        );
        erode5(
            &mut self.smartmask_final,
            self.width,
            self.height,
            &mut self.common_buffer,
            255,
        );
    }

    /// Drop all learned state, used when the feature is switched off at
    /// runtime.
    pub fn clear_smartmask(&mut self) {
        self.smartmask.fill(0);
        self.smartmask_final.fill(255);
        self.smartmask_buffer.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 64;
    const H: usize = 64;

    #[test]
    fn test_persistent_trigger_gets_masked() {
        let mut s = DetectionState::new(W, H);
        let idx = 30 * W + 30;

        // A pixel that keeps firing accumulates buffer increments between
        // tune passes.
        for _ in 0..10 {
            s.smartmask_buffer[idx] += 5 * 30; // heavy activity
            s.tune_smartmask(30);
        }
        assert_eq!(s.smartmask_final[idx], 0);
        // The suppression bled outward past the pixel itself.
        assert_eq!(s.smartmask_final[idx + 1], 0);
        assert_eq!(s.smartmask_final[idx + W], 0);
    }

    #[test]
    fn test_idle_pixels_stay_enabled() {
        let mut s = DetectionState::new(W, H);
        for _ in 0..5 {
            s.tune_smartmask(30);
        }
        // Interior pixels remain enabled (frame border is owned by the
        // erode flag value).
        assert_eq!(s.smartmask_final[10 * W + 10], 255);
    }

    #[test]
    fn test_mask_decays_when_activity_stops() {
        let mut s = DetectionState::new(W, H);
        let idx = 30 * W + 30;
        s.smartmask[idx] = 25;
        for _ in 0..10 {
            s.tune_smartmask(30);
        }
        assert!(s.smartmask[idx] < 25);
        assert_eq!(s.smartmask_final[idx], 255);
    }
}
