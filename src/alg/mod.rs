//! # Motion Detection Algorithms
//!
//! The per-camera detection primitives: sampled fast diff, full-frame diff
//! with fixed and smart masks, adaptive noise and threshold tuning,
//! lightswitch and switchfilter heuristics, and the adaptive reference
//! frame. Morphology and connected-component labeling live in the
//! submodules.
//!
//! All algorithms operate on the Y plane (the first `w*h` bytes of a planar
//! YUV 4:2:0 buffer) unless stated otherwise. Pipeline init guarantees that
//! width and height are multiples of 8, so no loop here needs a remainder
//! path.
//!
//! State that persists across frames lives in [`DetectionState`]; the
//! functions take the current frame as a slice and never allocate.

pub mod despeckle;
pub mod label;
pub mod location;
pub mod smartmask;

pub use despeckle::DespeckleOutcome;
pub use label::Labeling;

/// Length of the diff history ring used by the threshold auto-tune.
pub const THRESHOLD_TUNE_LENGTH: usize = 256;

/// Seconds before a static object is accepted into the reference frame.
const ACCEPT_STATIC_OBJECT_TIME: i32 = 10;

/// Pixels deviating less than this percentage of the noise level are copied
/// straight into the reference frame.
const EXCLUDE_LEVEL_PERCENT: i32 = 20;

/// Increment applied to the smart-mask buffer for each above-noise pixel
/// seen while an event is active.
const SMARTMASK_SENSITIVITY_INCR: i32 = 5;

/// Reference frame maintenance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefFrame {
    /// Ease the reference towards the current frame, excluding moving
    /// pixels until they have been static long enough.
    Update,
    /// Replace the reference with the current frame and clear the static
    /// object counters. Also used at startup.
    Reset,
}

/// Per-camera detection state: reference model, adaptive thresholds, smart
/// mask and labeling buffers. Allocated once at pipeline init and recreated
/// when the capture geometry changes.
#[derive(Debug)]
pub struct DetectionState {
    pub width: usize,
    pub height: usize,
    /// `width * height`, cached because every loop below runs over it.
    pub motionsize: usize,

    /// Adaptive reference frame (Y plane only).
    pub ref_frame: Vec<u8>,
    /// Per-pixel counters of how long a pixel has deviated from the
    /// reference; drives static-object acceptance.
    pub ref_dyn: Vec<i32>,

    /// Adaptive noise threshold in [0, 255].
    pub noise: i32,
    /// Current motion sensitivity (changed-pixel count).
    pub threshold: i32,
    /// Upper bound; diffs above it are treated as non-motion.
    pub threshold_maximum: i32,
    /// Short diff history for the threshold auto-tune.
    pub diffs_last: [i32; THRESHOLD_TUNE_LENGTH],
    /// Averaging divisor for the threshold tune. The historical value is
    /// `THRESHOLD_TUNE_LENGTH / 4`; exposed as a tunable.
    pub tune_divisor: i32,

    /// Raw smart-mask accumulator per pixel.
    pub smartmask: Vec<u8>,
    /// Derived gate: 0 suppresses the pixel, 255 passes it.
    pub smartmask_final: Vec<u8>,
    /// Sub-frame increments folded into `smartmask` on each tune pass.
    pub smartmask_buffer: Vec<i32>,
    /// 0 disables the smart mask; 1..=10 sets the learner speed.
    pub smartmask_speed: i32,

    /// Connected-component labels from the last labeling pass.
    pub labels: Vec<i32>,
    pub labelsize_max: i32,
    pub labelgroup_max: i32,
    pub labels_above: i32,
    pub largest_label: i32,

    /// Shared 3-row scratch used by the morphology passes.
    pub common_buffer: Vec<u8>,

    /// Reusable flood-fill segment stack; labeling never allocates on the
    /// hot path after init.
    pub(crate) flood_stack: Vec<label::Segment>,

    /// Optional fixed motion mask (0 = ignore pixel, 255 = full weight).
    pub mask: Option<Vec<u8>>,
}

impl DetectionState {
    pub fn new(width: usize, height: usize) -> Self {
        let motionsize = width * height;
        Self {
            width,
            height,
            motionsize,
            ref_frame: vec![0; motionsize],
            ref_dyn: vec![0; motionsize],
            noise: 255,
            threshold: 0,
            threshold_maximum: 0,
            diffs_last: [0; THRESHOLD_TUNE_LENGTH],
            tune_divisor: (THRESHOLD_TUNE_LENGTH / 4) as i32,
            smartmask: vec![0; motionsize],
            smartmask_final: vec![255; motionsize],
            smartmask_buffer: vec![0; motionsize],
            smartmask_speed: 0,
            labels: vec![0; motionsize],
            labelsize_max: 0,
            labelgroup_max: 0,
            labels_above: 0,
            largest_label: 0,
            common_buffer: vec![0; 3 * width],
            flood_stack: Vec::with_capacity(1024),
            mask: None,
        }
    }

    /// Sampled diff for the no-motion fast path. Checks roughly one pixel in
    /// `motionsize / 10000` and reports true once enough of them exceed the
    /// noise level. Never mutates state, and never misses a frame that the
    /// full diff would trigger on (the caller passes `threshold / 2`).
    pub fn diff_fast(&self, new: &[u8], max_n_changes: i32) -> bool {
        let mut step = self.motionsize / 10_000;
        if step % 2 == 0 {
            step += 1;
        }
        // Only 1 of every `step` pixels is checked.
        let max_n_changes = max_n_changes / step as i32;

        let mut diffs = 0;
        let mut i = 0;
        while i < self.motionsize {
            let curdiff = (self.ref_frame[i] as i32 - new[i] as i32).abs();
            if curdiff > self.noise {
                diffs += 1;
                if diffs > max_n_changes {
                    return true;
                }
            }
            i += step;
        }
        false
    }

    /// Full-frame diff. Builds the motion image in `out` (Y plane carries
    /// the changed pixels, chroma is preset to neutral grey) and returns the
    /// changed-pixel count after fixed-mask scaling and smart-mask gating.
    ///
    /// `event_active` gates the smart-mask buffer increments so the learner
    /// only trains on pixels that changed during a detected event.
    pub fn diff_standard(&mut self, new: &[u8], out: &mut [u8], event_active: bool) -> i32 {
        let size = self.motionsize;
        out[size..size + size / 2].fill(0x80);
        out[..size].fill(0);

        let mut diffs = 0;
        let noise = self.noise;
        let mask = self.mask.as_deref();

        for i in 0..size {
            let mut curdiff = (self.ref_frame[i] as i32 - new[i] as i32).abs();

            if let Some(mask) = mask {
                curdiff = curdiff * mask[i] as i32 / 255;
            }

            if self.smartmask_speed != 0 && curdiff > noise {
                // Raise sensitivity every frame the pixel keeps changing
                // during an event; with speed 10 the raw mask grows by 5
                // per second instead of 1.
                if event_active {
                    self.smartmask_buffer[i] += SMARTMASK_SENSITIVITY_INCR;
                }
                if self.smartmask_final[i] == 0 {
                    curdiff = 0;
                }
            }

            if curdiff > noise {
                out[i] = new[i];
                diffs += 1;
            }
        }
        diffs
    }

    /// Composed diff: run the sampled fast path first and only pay for the
    /// full diff when it reports possible motion.
    pub fn diff(&mut self, new: &[u8], out: &mut [u8], event_active: bool) -> i32 {
        if self.diff_fast(new, self.threshold / 2) {
            self.diff_standard(new, out, event_active)
        } else {
            0
        }
    }

    /// Adapt the noise level to the current scene. Called at most once per
    /// wall-clock second, and only while nothing is being detected.
    pub fn noise_tune(&mut self, new: &[u8]) {
        let mut sum: i64 = 0;
        let mut count: i64 = 0;
        let mask = self.mask.as_deref();

        for i in 0..self.motionsize {
            let mut diff = (self.ref_frame[i] as i32 - new[i] as i32).abs();

            if let Some(mask) = mask {
                diff = diff * mask[i] as i32 / 255;
            }

            if self.smartmask_final[i] != 0 {
                sum += diff as i64 + 1;
                count += 1;
            }
        }

        if count > 3 {
            sum /= count / 3;
        }

        // 5: safe, 4: regular, 3: more sensitive
        self.noise = 4 + (self.noise + sum as i32) / 2;
    }

    /// Adapt the threshold towards the recent diff history. When the frame
    /// was already flagged as motion the history is seeded with
    /// `threshold / 4` instead of the raw diff count so the tune does not
    /// chase the motion itself.
    pub fn threshold_tune(&mut self, diffs: i32, motion: bool, configured_threshold: i32) {
        if diffs == 0 {
            return;
        }

        let diffs = if motion { self.threshold / 4 } else { diffs };
        let mut sum: i64 = 0;
        let mut top = diffs;

        for i in 0..THRESHOLD_TUNE_LENGTH - 1 {
            sum += self.diffs_last[i] as i64;

            if self.diffs_last[i + 1] != 0 && !motion {
                self.diffs_last[i] = self.diffs_last[i + 1];
            } else {
                self.diffs_last[i] = self.threshold / 4;
            }

            if self.diffs_last[i] > top {
                top = self.diffs_last[i];
            }
        }

        sum += self.diffs_last[THRESHOLD_TUNE_LENGTH - 1] as i64;
        self.diffs_last[THRESHOLD_TUNE_LENGTH - 1] = diffs;

        let mut sum = (sum / self.tune_divisor.max(1) as i64) as i32;

        if sum < top * 2 {
            sum = top * 2;
        }

        if sum < configured_threshold {
            self.threshold = (self.threshold + sum) / 2;
        }
    }

    /// Detect a sudden scene-wide change: the light switched on, or the
    /// camera was displaced. Either way it is not worth capturing.
    pub fn lightswitch(&self, diffs: i32, percent: i32) -> bool {
        let percent = percent.clamp(0, 100);
        diffs > (self.motionsize as i32 * percent / 100)
    }

    /// Suppress the stripe pattern produced when an analogue multiplexer
    /// switches between cameras. Counts rows with markedly more changed
    /// pixels than the average row; returns 0 when the stripe pattern
    /// dominates, otherwise the incoming diff count.
    pub fn switchfilter(&self, diffs: i32, out: &[u8]) -> i32 {
        let linediff = diffs / self.height as i32;
        let mut lines = 0i32;
        let mut vertlines = 0i32;

        for y in 0..self.height {
            let row = &out[y * self.width..(y + 1) * self.width];
            let line = row.iter().filter(|&&p| p != 0).count() as i32;

            if line > self.width as i32 / 18 {
                vertlines += 1;
            }
            if line > linediff * 2 {
                lines += 1;
            }
        }

        let striped = vertlines > self.height as i32 / 10
            && lines < vertlines / 3
            && (vertlines > self.height as i32 / 4 || lines - vertlines > lines / 2);

        if striped { 0 } else { diffs }
    }

    /// Maintain the reference frame.
    ///
    /// `Update` walks every pixel: deviating pixels are counted in `ref_dyn`
    /// and accepted into the reference once static for
    /// `ACCEPT_STATIC_OBJECT_TIME` seconds (sped up 3x above 5 fps);
    /// non-motion pixels ease the reference towards the current frame.
    /// `Reset` replaces the reference wholesale.
    ///
    /// `virgin` is the privacy-masked capture, `out` the motion image from
    /// the diff pass, `lastrate` the frames counted in the last second.
    pub fn update_reference(&mut self, action: RefFrame, virgin: &[u8], out: &[u8], lastrate: i32) {
        match action {
            RefFrame::Reset => {
                self.ref_frame.copy_from_slice(&virgin[..self.motionsize]);
                self.ref_dyn.fill(0);
            }
            RefFrame::Update => {
                let mut accept_timer = lastrate * ACCEPT_STATIC_OBJECT_TIME;
                if lastrate > 5 {
                    // Detection above 5 fps is rate-limited to a third, so
                    // the timer must shrink to match.
                    accept_timer /= lastrate / 3;
                }
                let threshold_ref = self.noise * EXCLUDE_LEVEL_PERCENT / 100;

                for i in 0..self.motionsize {
                    let deviating = (self.ref_frame[i] as i32 - virgin[i] as i32).abs()
                        > threshold_ref
                        && self.smartmask_final[i] != 0;

                    if deviating {
                        if self.ref_dyn[i] == 0 {
                            // Always give new pixels a chance.
                            self.ref_dyn[i] = 1;
                        } else if self.ref_dyn[i] > accept_timer {
                            // Static object: accept it into the reference.
                            self.ref_dyn[i] = 0;
                            self.ref_frame[i] = virgin[i];
                        } else if out[i] != 0 {
                            // Motion pixel: keep excluding it.
                            self.ref_dyn[i] += 1;
                        } else {
                            self.ref_dyn[i] = 0;
                            self.ref_frame[i] =
                                ((self.ref_frame[i] as u16 + virgin[i] as u16) / 2) as u8;
                        }
                    } else {
                        self.ref_dyn[i] = 0;
                        self.ref_frame[i] = virgin[i];
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 320;
    const H: usize = 240;

    fn state() -> DetectionState {
        let mut s = DetectionState::new(W, H);
        s.noise = 32;
        s.threshold = 1500;
        s.threshold_maximum = (W * H * 3 / 2) as i32;
        s
    }

    fn motion_buf() -> Vec<u8> {
        vec![0u8; W * H * 3 / 2]
    }

    #[test]
    fn test_diff_zero_for_identical_frames() {
        let mut s = state();
        let frame = vec![100u8; W * H];
        s.ref_frame.copy_from_slice(&frame);
        let mut out = motion_buf();
        assert_eq!(s.diff(&frame, &mut out, false), 0);
    }

    #[test]
    fn test_diff_standard_counts_changed_pixels() {
        let mut s = state();
        s.ref_frame.fill(100);
        let mut frame = vec![100u8; W * H];
        for i in 0..500 {
            frame[i] = 200;
        }
        let mut out = motion_buf();
        assert_eq!(s.diff_standard(&frame, &mut out, false), 500);
        assert_eq!(out[0], 200);
        assert_eq!(out[500], 0);
        // Chroma of the motion image is neutral grey.
        assert_eq!(out[W * H], 0x80);
    }

    #[test]
    fn test_fast_path_never_loses_a_trigger() {
        // diff_fast(threshold / 2) returning false implies diff_standard
        // stays at or below threshold / 2.
        let mut s = state();
        s.ref_frame.fill(100);
        let mut frame = vec![100u8; W * H];
        // A large contiguous change the sampler cannot step over.
        for px in frame.iter_mut().take(20_000) {
            *px = 250;
        }
        let mut out = motion_buf();
        let fast = s.diff_fast(&frame, s.threshold / 2);
        let full = s.diff_standard(&frame, &mut out, false);
        assert!(fast || full <= s.threshold / 2);
        assert!(fast);
    }

    #[test]
    fn test_fixed_mask_suppresses_diffs() {
        let mut s = state();
        s.ref_frame.fill(100);
        s.mask = Some(vec![0u8; W * H]);
        let frame = vec![200u8; W * H];
        let mut out = motion_buf();
        assert_eq!(s.diff_standard(&frame, &mut out, false), 0);
    }

    #[test]
    fn test_noise_tune_converges_on_uniform_delta() {
        let mut s = state();
        s.noise = 32;
        s.ref_frame.fill(100);
        let frame = vec![112u8; W * H]; // |ref - new| = 12 everywhere
        s.noise_tune(&frame);
        // sum/(count/3) ~= (12+1)*3 = 39; noise = 4 + (32 + 39) / 2 = 39
        let expected = 4 + (32 + 39) / 2;
        assert!((s.noise - expected).abs() <= 1, "noise = {}", s.noise);
    }

    #[test]
    fn test_lightswitch_percent() {
        let s = state();
        let half = (W * H / 2) as i32;
        assert!(s.lightswitch(half + 1, 50));
        assert!(!s.lightswitch(half - 1, 50));
        // Out-of-range percent is clamped, not an error.
        assert!(!s.lightswitch(half, 200));
    }

    #[test]
    fn test_reference_reset_is_idempotent() {
        let mut s = state();
        let virgin: Vec<u8> = (0..W * H).map(|i| (i % 251) as u8).collect();
        let out = vec![0u8; W * H];
        s.update_reference(RefFrame::Reset, &virgin, &out, 15);
        let first = s.ref_frame.clone();
        s.update_reference(RefFrame::Reset, &virgin, &out, 15);
        assert_eq!(s.ref_frame, first);
        assert!(s.ref_dyn.iter().all(|&d| d == 0));
    }

    #[test]
    fn test_reference_update_tracks_quiet_pixels() {
        let mut s = state();
        s.noise = 32;
        s.ref_frame.fill(100);
        let virgin = vec![103u8; W * H]; // deviation 3, below noise * 20%
        let out = vec![0u8; W * H];
        s.update_reference(RefFrame::Update, &virgin, &out, 15);
        assert!(s.ref_frame.iter().all(|&p| p == 103));
    }

    #[test]
    fn test_reference_excludes_motion_pixels() {
        let mut s = state();
        s.noise = 32;
        s.ref_frame.fill(100);
        let virgin = vec![200u8; W * H];
        let mut out = vec![0u8; W * H];
        out.fill(200); // every pixel is a motion pixel
        s.update_reference(RefFrame::Update, &virgin, &out, 15);
        // First pass arms the counters, reference unchanged.
        assert!(s.ref_frame.iter().all(|&p| p == 100));
        assert!(s.ref_dyn.iter().all(|&d| d == 1));
    }

    #[test]
    fn test_switchfilter_passes_blob_motion() {
        let mut s = state();
        s.ref_frame.fill(100);
        let mut frame = vec![100u8; W * H];
        // Compact 40x40 blob: no stripe pattern.
        for y in 100..140 {
            for x in 100..140 {
                frame[y * W + x] = 200;
            }
        }
        let mut out = motion_buf();
        let diffs = s.diff_standard(&frame, &mut out, false);
        assert_eq!(s.switchfilter(diffs, &out), diffs);
    }

    #[test]
    fn test_switchfilter_suppresses_stripes() {
        let s = state();
        let mut out = vec![0u8; W * H];
        // Interlace-style artifact: every other row fully changed.
        for y in (0..H).step_by(2) {
            for x in 0..W {
                out[y * W + x] = 200;
            }
        }
        let diffs = (W * H / 2) as i32;
        assert_eq!(s.switchfilter(diffs, &out), 0);
    }

    #[test]
    fn test_threshold_tune_moves_towards_history() {
        let mut s = state();
        s.threshold = 1500;
        for _ in 0..THRESHOLD_TUNE_LENGTH {
            s.threshold_tune(10, false, 1500);
        }
        assert!(s.threshold < 1500);
        assert!(s.threshold > 0);
    }
}
