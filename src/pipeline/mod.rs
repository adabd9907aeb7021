//! # Camera Pipeline
//!
//! The per-camera state machine, executed by one OS thread. Each loop
//! iteration runs the same fixed stage sequence:
//!
//! 1. prepare (timing, watchdog, detection rate limit)
//! 2. reset images (ring cursor, metadata carry-over)
//! 3. retry (reopen a closed device every 10 s)
//! 4. capture (with held-frame / grey substitution on failure)
//! 5. detection (diff, lightswitch, switchfilter, despeckle)
//! 6. tuning (noise, threshold, location, reference frame)
//! 7. overlay (masks, labels, text)
//! 8. actions (the event state machine, see [`events`])
//! 9. setup-mode log line
//! 10. snapshot and timelapse triggers
//! 11. loopback / stream feed
//! 12. parameter re-read (once per wall-clock second)
//! 13. frame pacing
//!
//! The stages deliberately mirror the loop order of the classic motion
//! daemons: every piece of state written by one stage is read by a later
//! one in the same iteration, so the order is load-bearing.

pub mod events;

use crate::alg::{DetectionState, RefFrame};
use crate::capture::{CaptureOutcome, CaptureSource};
use crate::config::CameraConfig;
use crate::control::CameraSlot;
use crate::draw;
use crate::error::DaemonResult;
use crate::filename::{self, ExpansionContext};
use crate::image::{GREY, Image, yuv420_size};
use crate::mask::{self, PrivacyMask};
use crate::recorder::{EventKind, Recorder, RecorderEvent};
use crate::ring::ImageRing;
use crate::track::Tracker;
use chrono::{DateTime, Local};
use log::{error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Consecutive missing-frame seconds before the grey substitute image.
pub const MISSING_FRAMES_TIMEOUT: i32 = 30;

/// Preview image selection, decoded from `picture_output`.
pub mod newimg {
    pub const OFF: u8 = 0;
    pub const ON: u8 = 1;
    pub const FIRST: u8 = 2;
    pub const BEST: u8 = 4;
    pub const CENTER: u8 = 8;
}

/// Wall-clock source. The system clock in production; tests drive a
/// manual clock so second-boundary logic (noise tune, event gap,
/// snapshots) is deterministic.
pub trait Clock: Send {
    fn wall(&self) -> DateTime<Local>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually advanced clock, shared between the test and the pipeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now = *now + chrono::Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn wall(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }
}

/// Why the loop stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    Continue,
    /// Leave the loop; the supervisor restarts the thread if `restart` is
    /// set (geometry change) or lets it die (finish).
    Break,
}

/// Locate overlay configuration decoded once per second.
#[derive(Debug, Clone, Copy, Default)]
struct LocateConf {
    mode: draw::LocateMode,
    style: draw::LocateStyle,
}

pub struct Camera {
    pub slot: CameraSlot,
    /// Working configuration snapshot, refreshed at the parms-update
    /// stage. Stages never read the live (shared) config directly.
    pub conf: CameraConfig,

    width: usize,
    height: usize,
    size_norm: usize,

    pub ring: ImageRing,
    /// Captured frame before any mask or overlay.
    virgin: Image,
    /// Virgin with the privacy mask applied; input to detection.
    vprvcy: Image,
    /// Motion/debug image built by the diff stage.
    img_motion: Image,
    /// Best-so-far event preview.
    preview: Image,

    pub det: DetectionState,
    privacy: Option<PrivacyMask>,

    source: Box<dyn CaptureSource>,
    pub recorder: Box<dyn Recorder>,
    pub tracker: Box<dyn Tracker>,
    clock: Box<dyn Clock>,

    // Event state
    pub event_nr: i32,
    pub prev_event: i32,
    event_time: i64,
    last_save_time: i64,
    event_text: String,
    detecting: bool,
    postcap: i32,
    moved: i32,
    lightswitch_framecounter: i32,
    previous_diffs: i32,
    previous_loc_x: i32,
    previous_loc_y: i32,

    // Frame counters
    shots: i32,
    lastrate: i32,
    current_sec: i64,
    last_frame_sec: i64,
    startup_frames: i32,
    process_thisframe: bool,
    rate_limit: i32,

    // Capture failure state
    device_open: bool,
    missing_frame_counter: i32,
    connection_lost_sec: i64,

    // Derived parameters (stage 12)
    new_img: u8,
    locate: LocateConf,
    text_scale: i32,
    smartmask_speed: i32,
    smartmask_ratio: i32,
    smartmask_count: i32,
    smartmask_lastrate: i32,

    // Snapshot / timelapse
    time_last_frame: i64,
    time_current_frame: i64,
    timelapse_running: bool,

    // Movie filler accounting
    movie_last_shot: i32,
    movie_fps: i32,

    // Area detection (3x3 grid)
    area_minx: [i32; 9],
    area_miny: [i32; 9],
    area_maxx: [i32; 9],
    area_maxy: [i32; 9],
    areadetect_eventnbr: i32,

    // Frame pacing
    rolling_average_data: Vec<i64>,
    rolling_frame: usize,
    passflag: bool,
    epoch: Instant,
    time_now_us: i64,
    time_before_us: i64,

    olddiffs: i32,
    /// Reusable half-resolution buffer for the substream output.
    substream_buf: Vec<u8>,
    host: String,
}

impl Camera {
    /// Build a camera pipeline: open the source, allocate every buffer,
    /// load masks and prime the reference frame. Nothing on the hot path
    /// allocates after this returns.
    pub fn new(
        slot: CameraSlot,
        mut source: Box<dyn CaptureSource>,
        recorder: Box<dyn Recorder>,
        tracker: Box<dyn Tracker>,
        clock: Box<dyn Clock>,
    ) -> DaemonResult<Self> {
        let mut conf = slot.config.lock().unwrap().clone();
        conf.validate()?;

        let (device_open, width, height, size_high) = match source.open() {
            Ok(geometry) => {
                crate::capture::validate_geometry(&geometry)?;
                let size_high = geometry.high.map_or(0, |(w, h)| yuv420_size(w, h));
                (true, geometry.width, geometry.height, size_high)
            }
            Err(e) => {
                warn!(
                    "Camera {}: could not fetch initial image ({}); continuing with configured dimensions",
                    conf.camera_id, e
                );
                (false, conf.width, conf.height, 0)
            }
        };

        if width != conf.width || height != conf.height {
            info!(
                "Camera {}: source delivers {}x{}, overriding configured {}x{}",
                conf.camera_id, width, height, conf.width, conf.height
            );
            conf.width = width;
            conf.height = height;
            let mut live = slot.config.lock().unwrap();
            live.width = width;
            live.height = height;
        }

        let size_norm = yuv420_size(width, height);
        let mut ring = ImageRing::new(size_norm, size_high);
        ring.resize(conf.ring_size(), false);

        let mut det = DetectionState::new(width, height);
        det.noise = conf.noise_level;
        det.threshold = conf.threshold;
        det.threshold_maximum = if conf.threshold_maximum > conf.threshold {
            conf.threshold_maximum
        } else {
            (height * width * 3 / 2) as i32
        };

        // Fixed motion mask; a missing file disables the feature and
        // leaves an empty mask for the user to edit.
        if !conf.mask_file.is_empty() {
            let path = std::path::Path::new(&conf.mask_file);
            match mask::load_fixed_mask(path, width, height) {
                Ok(m) => {
                    info!("Maskfile \"{}\" loaded", conf.mask_file);
                    det.mask = Some(m);
                }
                Err(e) => {
                    error!("{}; mask feature disabled", e);
                    if !path.exists() {
                        let _ = mask::write_empty_mask(path, width, height);
                    }
                }
            }
        }

        let privacy = if conf.mask_privacy.is_empty() {
            None
        } else {
            let path = std::path::Path::new(&conf.mask_privacy);
            match PrivacyMask::load(path, width, height) {
                Ok(m) => {
                    info!("Privacy mask \"{}\" loaded", conf.mask_privacy);
                    Some(m)
                }
                Err(e) => {
                    error!("{}; privacy mask feature disabled", e);
                    if !path.exists() {
                        let _ = mask::write_empty_mask(path, width, height);
                    }
                    None
                }
            }
        };

        let framerate = conf.framerate.max(2) as i64;
        let required_frame_time = 1_000_000 / framerate;
        let rolling_limit = (10 * framerate) as usize;

        let mut area_minx = [0i32; 9];
        let mut area_miny = [0i32; 9];
        let mut area_maxx = [0i32; 9];
        let mut area_maxy = [0i32; 9];
        for i in 0..9 {
            let (col, row) = (i as i32 % 3, i as i32 / 3);
            area_minx[i] = (width as i32 / 3) * col;
            area_maxx[i] = (width as i32 / 3) * (col + 1);
            area_miny[i] = (height as i32 / 3) * row;
            area_maxy[i] = (height as i32 / 3) * (row + 1);
        }

        let startup_frames = conf.framerate * 2 + conf.pre_capture + conf.minimum_motion_frames;
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let start_wall = clock.wall();

        let mut cam = Self {
            conf: conf.clone(),
            width,
            height,
            size_norm,
            ring,
            virgin: Image::alloc(size_norm, size_high),
            vprvcy: Image::alloc(size_norm, size_high),
            img_motion: Image::alloc(size_norm, 0),
            preview: Image::alloc(size_norm, size_high),
            det,
            privacy,
            source,
            recorder,
            tracker,
            clock,
            event_nr: 1,
            prev_event: 0,
            event_time: 0,
            last_save_time: start_wall.timestamp(),
            event_text: String::new(),
            detecting: false,
            postcap: 0,
            moved: 0,
            lightswitch_framecounter: 0,
            previous_diffs: 0,
            previous_loc_x: 0,
            previous_loc_y: 0,
            shots: -1,
            lastrate: conf.framerate.max(2),
            current_sec: start_wall.timestamp(),
            last_frame_sec: start_wall.timestamp(),
            startup_frames,
            process_thisframe: true,
            rate_limit: 0,
            device_open,
            missing_frame_counter: 0,
            connection_lost_sec: 0,
            new_img: newimg::ON,
            locate: LocateConf::default(),
            text_scale: 1,
            smartmask_speed: 0,
            smartmask_ratio: 0,
            smartmask_count: 0,
            smartmask_lastrate: 0,
            time_last_frame: start_wall.timestamp(),
            time_current_frame: start_wall.timestamp(),
            timelapse_running: false,
            movie_last_shot: -1,
            movie_fps: conf.framerate,
            area_minx,
            area_miny,
            area_maxx,
            area_maxy,
            areadetect_eventnbr: 0,
            rolling_average_data: vec![required_frame_time; rolling_limit],
            rolling_frame: 0,
            passflag: false,
            epoch: Instant::now(),
            time_now_us: 0,
            time_before_us: 0,
            olddiffs: 0,
            substream_buf: vec![0; yuv420_size(width / 2, height / 2)],
            slot,
            host,
        };

        // Prime the reference frame from the first capture so startup does
        // not read as one giant light switch.
        if cam.device_open {
            let mut first = Image::alloc(cam.size_norm, size_high);
            if cam.source.next(&mut first) == CaptureOutcome::Ok {
                cam.virgin.image_norm.copy_from_slice(&first.image_norm);
                if let Some(privacy) = &cam.privacy {
                    privacy.apply(&mut first.image_norm);
                }
                cam.vprvcy.image_norm.copy_from_slice(&first.image_norm);
                let (det, vprvcy, motion) = (&mut cam.det, &cam.vprvcy, &cam.img_motion);
                det.update_reference(
                    RefFrame::Reset,
                    &vprvcy.image_norm,
                    &motion.image_norm,
                    cam.lastrate,
                );
            }
        }

        cam.apply_parms();
        Ok(cam)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn in_event(&self) -> bool {
        self.event_nr == self.prev_event
    }

    fn wall_now(&self) -> DateTime<Local> {
        self.clock.wall()
    }

    fn monotonic_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    /// Emit an event that carries a ring slot.
    fn emit_ring(&mut self, kind: EventKind, idx: usize, time: DateTime<Local>) {
        let image = self.ring.slot(idx);
        self.recorder.record(RecorderEvent {
            kind,
            camera_id: self.conf.camera_id,
            event_nr: self.event_nr,
            time,
            image: Some(image),
        });
    }

    /// Emit an event without frame data.
    fn emit(&mut self, kind: EventKind, time: DateTime<Local>) {
        self.recorder.record(RecorderEvent {
            kind,
            camera_id: self.conf.camera_id,
            event_nr: self.event_nr,
            time,
            image: None,
        });
    }

    fn emit_motion_img(&mut self, kind: EventKind, time: DateTime<Local>) {
        self.recorder.record(RecorderEvent {
            kind,
            camera_id: self.conf.camera_id,
            event_nr: self.event_nr,
            time,
            image: Some(&self.img_motion),
        });
    }

    /// Run one full loop iteration (stages 1-12; pacing is separate so
    /// tests can drive iterations without sleeping).
    pub fn tick(&mut self) -> LoopOutcome {
        self.prepare();
        self.reset_images();
        if self.retry() == LoopOutcome::Break {
            return LoopOutcome::Break;
        }
        if self.capture() == LoopOutcome::Break {
            return LoopOutcome::Break;
        }
        self.detection();
        self.tuning();
        self.overlay();
        self.actions();
        self.setup_log();
        self.snapshot_stage();
        self.timelapse_stage();
        self.loopback();
        self.parms_update();
        LoopOutcome::Continue
    }

    /// The thread entry: loop until asked to finish (draining a running
    /// event first), then release the device.
    pub fn run(&mut self) {
        let control = Arc::clone(&self.slot.control);
        control.set(&control.running, true);

        loop {
            let finish = control.get(&control.finish);
            let event_stop = control.get(&control.event_stop);
            if finish && !event_stop {
                break;
            }
            if self.tick() == LoopOutcome::Break {
                break;
            }
            let delay = self.frame_delay();
            if delay > Duration::ZERO {
                std::thread::sleep(delay);
            }
        }

        control.set(&control.lost_connection, true);
        info!("Camera {}: thread exiting", self.conf.camera_id);
        self.source.close();
        control.set(&control.running, false);
        control.set(&control.finish, false);
    }

    // ----- stage 1 ------------------------------------------------------

    fn prepare(&mut self) {
        let control = &self.slot.control;
        control.pet_watchdog(crate::supervisor::WATCHDOG_TMO);

        self.time_before_us = self.time_now_us;
        self.time_now_us = self.monotonic_us();

        // Limit detection to 1/3 of the capture rate above 5 fps.
        self.process_thisframe = false;
        self.rate_limit += 1;
        if self.rate_limit >= self.lastrate / 3 {
            self.rate_limit = 0;
            self.process_thisframe = true;
        }

        if self.conf.minimum_motion_frames < 1 {
            self.conf.minimum_motion_frames = 1;
        }
        if self.conf.pre_capture < 0 {
            self.conf.pre_capture = 0;
        }

        // Precapture settings may have changed at runtime; resize waits
        // for the quiescent boundary.
        let wanted = self.conf.ring_size();
        if self.ring.size() != wanted {
            self.ring.resize(wanted, self.in_event());
        }

        let now = self.wall_now();
        self.current_sec = now.timestamp();

        if self.last_frame_sec != self.current_sec {
            self.lastrate = self.shots + 1;
            self.shots = -1;
            self.last_frame_sec = self.current_sec;
            self.slot
                .control
                .last_fps
                .store(self.lastrate as i64, Ordering::Relaxed);
        }
        self.shots += 1;

        if self.startup_frames > 0 {
            self.startup_frames -= 1;
        }
    }

    // ----- stage 2 ------------------------------------------------------

    fn reset_images(&mut self) {
        let prev_idx = self.ring.pos_in();
        self.ring.advance_in();

        if self.process_thisframe {
            self.ring.current_mut().reset_metadata();
        } else {
            let prev = self.ring.slot(prev_idx).metadata();
            self.ring.current_mut().carry_metadata(prev);
        }

        let now = self.wall_now();
        let current = self.ring.current_mut();
        current.timestamp = crate::image::FrameTime::at(now);
        current.shot = self.shots;
    }

    // ----- stage 3 ------------------------------------------------------

    fn retry(&mut self) -> LoopOutcome {
        if self.device_open || self.current_sec % 10 != 0 || self.shots != 0 {
            return LoopOutcome::Continue;
        }
        warn!(
            "Camera {}: retrying until successful connection with camera",
            self.conf.camera_id
        );
        match self.source.open() {
            Ok(geometry) => {
                if crate::capture::validate_geometry(&geometry).is_err() {
                    return LoopOutcome::Continue;
                }
                if geometry.width != self.width || geometry.height != self.height {
                    info!(
                        "Camera {}: camera became available with new dimensions; restarting pipeline",
                        self.conf.camera_id
                    );
                    let mut live = self.slot.config.lock().unwrap();
                    live.width = geometry.width;
                    live.height = geometry.height;
                    self.slot.control.set(&self.slot.control.restart, true);
                    return LoopOutcome::Break;
                }
                self.device_open = true;
                LoopOutcome::Continue
            }
            Err(_) => LoopOutcome::Continue,
        }
    }

    // ----- stage 4 ------------------------------------------------------

    fn capture(&mut self) -> LoopOutcome {
        let outcome = if self.device_open {
            let current = self.ring.current_mut();
            self.source.next(current)
        } else {
            CaptureOutcome::NonFatal
        };

        match outcome {
            CaptureOutcome::Ok => {
                self.slot
                    .control
                    .set(&self.slot.control.lost_connection, false);
                self.connection_lost_sec = 0;

                if self.missing_frame_counter
                    >= MISSING_FRAMES_TIMEOUT * self.conf.framerate
                {
                    info!("Camera {}: video signal re-acquired", self.conf.camera_id);
                    let t = self.wall_now();
                    self.emit(EventKind::CameraFound, t);
                }
                self.missing_frame_counter = 0;

                // Keep the untouched frame, apply the privacy mask to the
                // ring slot, and keep the masked copy for detection.
                self.virgin
                    .image_norm
                    .copy_from_slice(&self.ring.current().image_norm);
                if let Some(privacy) = &self.privacy {
                    privacy.apply(&mut self.ring.current_mut().image_norm);
                    if !self.ring.current().image_high.is_empty() {
                        privacy.apply(&mut self.ring.current_mut().image_high);
                    }
                }
                self.vprvcy
                    .image_norm
                    .copy_from_slice(&self.ring.current().image_norm);
                LoopOutcome::Continue
            }
            CaptureOutcome::Fatal => {
                error!(
                    "Camera {}: video device fatal error - closing video device",
                    self.conf.camera_id
                );
                self.source.close();
                self.device_open = false;
                let (ring, virgin) = (&mut self.ring, &self.virgin);
                ring.current_mut()
                    .image_norm
                    .copy_from_slice(&virgin.image_norm);
                self.slot
                    .control
                    .set(&self.slot.control.lost_connection, true);
                LoopOutcome::Continue
            }
            CaptureOutcome::SizeChanged => {
                info!(
                    "Camera {}: source changed dimensions; restarting pipeline to rebuild buffers",
                    self.conf.camera_id
                );
                self.slot
                    .control
                    .set(&self.slot.control.lost_connection, true);
                self.slot.control.set(&self.slot.control.restart, true);
                LoopOutcome::Break
            }
            CaptureOutcome::NonFatal => {
                if self.connection_lost_sec == 0 {
                    self.connection_lost_sec = self.current_sec;
                }
                self.missing_frame_counter += 1;

                let timeout_frames = MISSING_FRAMES_TIMEOUT * self.conf.framerate;
                if self.device_open && self.missing_frame_counter < timeout_frames {
                    // Hold the last good (masked) frame.
                    let (ring, vprvcy) = (&mut self.ring, &self.vprvcy);
                    ring.current_mut()
                        .image_norm
                        .copy_from_slice(&vprvcy.image_norm);
                } else {
                    self.slot
                        .control
                        .set(&self.slot.control.lost_connection, true);

                    let format = if self.device_open {
                        "CONNECTION TO CAMERA LOST\\nSINCE %Y-%m-%d %T"
                    } else {
                        "UNABLE TO OPEN VIDEO DEVICE\\nSINCE %Y-%m-%d %T"
                    };
                    let since = DateTime::from_timestamp(self.connection_lost_sec, 0)
                        .map(|t| t.with_timezone(&Local))
                        .unwrap_or_else(|| self.wall_now());
                    let text = filename::expand(format, since, &self.expansion_context());

                    let current = self.ring.current_mut();
                    current.image_norm.fill(GREY);
                    draw::draw_text(
                        &mut current.image_norm,
                        self.width,
                        self.height,
                        10,
                        20 * self.text_scale as usize,
                        &text,
                        self.text_scale as usize,
                    );

                    if self.missing_frame_counter == timeout_frames {
                        info!(
                            "Camera {}: video signal lost - adding grey image",
                            self.conf.camera_id
                        );
                        let t = self.wall_now();
                        self.emit(EventKind::CameraLost, t);
                    }

                    if self.device_open && self.missing_frame_counter == 4 * timeout_frames {
                        error!(
                            "Camera {}: video signal still lost - closing video device",
                            self.conf.camera_id
                        );
                        self.source.close();
                        self.device_open = false;
                    }
                }
                LoopOutcome::Continue
            }
        }
    }

    // ----- stage 5 ------------------------------------------------------

    fn detection(&mut self) {
        let paused = self.slot.control.get(&self.slot.control.pause);

        // While the camera is moving (PTZ cooldown or lightswitch settle)
        // any motion is the camera's own doing; this frame's diffs are
        // discarded at the end of the stage. Decrementing up front keeps a
        // lightswitch from eating into its own settle window.
        let camera_moving = self.moved > 0;
        if camera_moving {
            self.moved -= 1;
        }

        if self.process_thisframe {
            if self.det.threshold > 0 && !paused {
                let event_active = self.in_event();
                let (det, vprvcy, motion) = (
                    &mut self.det,
                    &self.vprvcy.image_norm,
                    &mut self.img_motion.image_norm,
                );
                // Inside an event (or setup mode) skip the fast path;
                // latency matters more than CPU then.
                let diffs = if self.detecting || self.conf.setup_mode {
                    det.diff_standard(vprvcy, motion, event_active)
                } else {
                    det.diff(vprvcy, motion, event_active)
                };
                self.ring.current_mut().diffs = diffs;

                let lost = self.slot.control.get(&self.slot.control.lost_connection);
                if self.conf.lightswitch_percent > 1 && !lost {
                    let diffs = self.ring.current().diffs;
                    if self.det.lightswitch(diffs, self.conf.lightswitch_percent) {
                        info!("Camera {}: lightswitch detected", self.conf.camera_id);
                        let frames = self.conf.lightswitch_frames.clamp(1, 1000);
                        if self.moved < frames {
                            self.moved = frames;
                        }
                        self.ring.current_mut().diffs = 0;
                        let (det, vprvcy, motion) = (
                            &mut self.det,
                            &self.vprvcy.image_norm,
                            &self.img_motion.image_norm,
                        );
                        det.update_reference(RefFrame::Reset, vprvcy, motion, self.lastrate);
                    }
                }

                if self.conf.roundrobin_switchfilter
                    && self.ring.current().diffs > self.det.threshold
                {
                    let filtered = self
                        .det
                        .switchfilter(self.ring.current().diffs, &self.img_motion.image_norm);
                    if filtered <= self.det.threshold || filtered > self.det.threshold_maximum {
                        self.ring.current_mut().diffs = 0;
                        info!("Camera {}: switchfilter detected", self.conf.camera_id);
                    } else {
                        self.ring.current_mut().diffs = filtered;
                    }
                }

                self.ring.current_mut().total_labels = 0;
                self.det.largest_label = 0;
                self.olddiffs = 0;

                if !self.conf.despeckle_filter.is_empty() && self.ring.current().diffs > 0 {
                    self.olddiffs = self.ring.current().diffs;
                    let (det, motion, filter) = (
                        &mut self.det,
                        &mut self.img_motion.image_norm,
                        self.conf.despeckle_filter.as_str(),
                    );
                    let outcome = det.despeckle(motion, filter, self.olddiffs);
                    if outcome.stack_overflow {
                        warn!(
                            "Camera {}: labeling segment stack full; component truncated",
                            self.conf.camera_id
                        );
                    }
                    let current = self.ring.current_mut();
                    current.diffs = outcome.diffs;
                    current.total_labels = outcome.total_labels;
                } else if self.det.labelsize_max != 0 {
                    self.det.labelsize_max = 0;
                }
            } else if !self.conf.setup_mode {
                self.ring.current_mut().diffs = 0;
            }
        }

        // Smart mask learning runs only while no event is active, every
        // `smartmask_ratio` frames.
        if self.smartmask_speed != 0 && !self.in_event() {
            self.smartmask_count -= 1;
            if self.smartmask_count <= 0 {
                let sensitivity = self.lastrate * (11 - self.smartmask_speed);
                self.det.tune_smartmask(sensitivity);
                self.smartmask_count = self.smartmask_ratio;
            }
        }

        if camera_moving {
            self.ring.current_mut().diffs = 0;
        }
    }

    // ----- stage 6 ------------------------------------------------------

    fn tuning(&mut self) {
        let diffs = self.ring.current().diffs;

        if self.conf.noise_tune
            && self.shots == 0
            && !self.detecting
            && diffs <= self.det.threshold
        {
            let (det, vprvcy) = (&mut self.det, &self.vprvcy.image_norm);
            det.noise_tune(vprvcy);
        }

        if !self.process_thisframe {
            return;
        }

        if self.conf.threshold_tune {
            self.det
                .threshold_tune(diffs, self.detecting, self.conf.threshold);
        }

        let in_range = diffs > self.det.threshold && diffs < self.det.threshold_maximum;
        if in_range {
            let loc = self.det.locate_center_size(&self.img_motion.image_norm);
            self.ring.current_mut().location = loc;
        }

        // Micro-lightswitch: two consecutive frames with near-identical
        // diff counts and a centroid that barely moved is a porch light,
        // not an intruder.
        let loc = self.ring.current().location;
        let micro = in_range
            && self.conf.lightswitch_percent >= 1
            && self.lightswitch_framecounter < self.lastrate * 2
            && (self.previous_diffs - diffs).abs() < self.previous_diffs / 15
            && (loc.x - self.previous_loc_x).abs() <= self.width as i32 / 150
            && (loc.y - self.previous_loc_y).abs() <= self.height as i32 / 150;

        let (det, vprvcy, motion) = (
            &mut self.det,
            &self.vprvcy.image_norm,
            &self.img_motion.image_norm,
        );
        if micro {
            det.update_reference(RefFrame::Reset, vprvcy, motion, self.lastrate);
            self.ring.current_mut().diffs = 0;
            self.lightswitch_framecounter = 0;
            info!("Camera {}: micro-lightswitch", self.conf.camera_id);
        } else {
            det.update_reference(RefFrame::Update, vprvcy, motion, self.lastrate);
        }

        self.previous_diffs = self.ring.current().diffs;
        self.previous_loc_x = self.ring.current().location.x;
        self.previous_loc_y = self.ring.current().location.y;
    }

    // ----- stage 7 ------------------------------------------------------

    fn motion_output_active(&self) -> bool {
        self.conf.picture_output_motion || self.conf.setup_mode || self.slot.stream.motion_viewers()
    }

    fn overlay(&mut self) {
        if self.smartmask_speed != 0 && self.motion_output_active() {
            draw::overlay_smartmask(
                &self.det.smartmask_final,
                &mut self.img_motion.image_norm,
                self.width,
                self.height,
            );
        }

        if self.det.largest_label != 0 && self.motion_output_active() {
            draw::overlay_largest_label(
                &self.det.labels,
                &mut self.img_motion.image_norm,
                self.width,
                self.height,
            );
        }

        if self.motion_output_active() {
            if let Some(mask) = &self.det.mask {
                draw::overlay_fixed_mask(mask, &mut self.img_motion.image_norm, self.width, self.height);
            }
        }

        let scale = self.text_scale as usize;
        if self.conf.text_changes {
            let text = if self.slot.control.get(&self.slot.control.pause) {
                "-".to_string()
            } else {
                self.ring.current().diffs.to_string()
            };
            let current = self.ring.current_mut();
            draw::draw_text(
                &mut current.image_norm,
                self.width,
                self.height,
                self.width - 10,
                10,
                &text,
                scale,
            );
        }

        if self.conf.setup_mode || self.slot.stream.motion_viewers() {
            let line = format!(
                "D:{:5} L:{:3} N:{:3}",
                self.ring.current().diffs,
                self.ring.current().total_labels,
                self.det.noise
            );
            draw::draw_text(
                &mut self.img_motion.image_norm,
                self.width,
                self.height,
                self.width - 10,
                self.height - 30 * scale,
                &line,
                scale,
            );
            let id_line = format!("CAMERA {} SETUP", self.conf.camera_id);
            draw::draw_text(
                &mut self.img_motion.image_norm,
                self.width,
                self.height,
                self.width - 10,
                self.height - 10 * scale,
                &id_line,
                scale,
            );
        }

        if !self.conf.text_left.is_empty() {
            let text = filename::expand(
                &self.conf.text_left,
                self.ring.current().timestamp.wall,
                &self.expansion_context(),
            );
            let current = self.ring.current_mut();
            draw::draw_text(
                &mut current.image_norm,
                self.width,
                self.height,
                10,
                self.height - 10 * scale,
                &text,
                scale,
            );
        }

        if !self.conf.text_right.is_empty() {
            let text = filename::expand(
                &self.conf.text_right,
                self.ring.current().timestamp.wall,
                &self.expansion_context(),
            );
            let current = self.ring.current_mut();
            draw::draw_text(
                &mut current.image_norm,
                self.width,
                self.height,
                self.width - 10,
                self.height - 10 * scale,
                &text,
                scale,
            );
        }
    }

    // ----- stage 9 ------------------------------------------------------

    fn setup_log(&mut self) {
        if !self.conf.setup_mode {
            return;
        }
        let current = self.ring.current();
        let mut msg = if !self.conf.despeckle_filter.is_empty() {
            let mut m = format!(
                "Raw changes: {:5} - changes after '{}': {:5}",
                self.olddiffs, self.conf.despeckle_filter, current.diffs
            );
            if self.conf.despeckle_filter.contains('l') {
                m.push_str(&format!(" - labels: {:3}", current.total_labels));
            }
            m
        } else {
            format!("Changes: {:5}", current.diffs)
        };
        if self.conf.noise_tune {
            msg.push_str(&format!(" - noise level: {:2}", self.det.noise));
        }
        if self.conf.threshold_tune {
            msg.push_str(&format!(" - threshold: {}", self.det.threshold));
        }
        info!("Camera {}: {}", self.conf.camera_id, msg);
    }

    // ----- stage 10 -----------------------------------------------------

    fn snapshot_stage(&mut self) {
        self.time_current_frame = self.current_sec;

        let interval = self.conf.snapshot_interval as i64;
        let timer_fired = interval > 0
            && self.shots == 0
            && self.time_current_frame % interval <= self.time_last_frame % interval;

        let control = &self.slot.control;
        let requested = control.take(&control.snapshot);
        if timer_fired || requested {
            let t = self.ring.current().timestamp.wall;
            self.emit_ring(EventKind::ImageSnapshot, self.ring.pos_in(), t);
        }
    }

    // ----- stage 11 -----------------------------------------------------

    fn timelapse_stage(&mut self) {
        use chrono::{Datelike, Timelike};

        if self.conf.timelapse_interval > 0 {
            let ts = self.ring.current().timestamp.wall;

            // Rollover checks run once a minute, on the first shot.
            if ts.minute() == 0
                && self.time_current_frame % 60 < self.time_last_frame % 60
                && self.shots == 0
            {
                let end = match self.conf.timelapse_mode.to_ascii_lowercase().as_str() {
                    "manual" => false,
                    "daily" => ts.hour() == 0,
                    "hourly" => true,
                    "weekly-sunday" => ts.weekday().num_days_from_sunday() == 0 && ts.hour() == 0,
                    "weekly-monday" => ts.weekday().num_days_from_monday() == 0 && ts.hour() == 0,
                    "monthly" => ts.day() == 1 && ts.hour() == 0,
                    other => {
                        error!(
                            "Camera {}: invalid timelapse_mode '{}', defaulting to manual timelapse mode",
                            self.conf.camera_id, other
                        );
                        self.conf.timelapse_mode = "manual".to_string();
                        let mut live = self.slot.config.lock().unwrap();
                        live.timelapse_mode = "manual".to_string();
                        false
                    }
                };
                if end {
                    self.emit(EventKind::TimelapseEnd, ts);
                    self.timelapse_running = false;
                }
            }

            let interval = self.conf.timelapse_interval as i64;
            if self.shots == 0
                && self.time_current_frame % interval <= self.time_last_frame % interval
            {
                self.emit_ring(EventKind::Timelapse, self.ring.pos_in(), ts);
                self.timelapse_running = true;
            }
        } else if self.timelapse_running {
            // Interval cleared at runtime: roll the timelapse file over.
            let ts = self.ring.current().timestamp.wall;
            self.emit(EventKind::TimelapseEnd, ts);
            self.timelapse_running = false;
        }

        self.time_last_frame = self.time_current_frame;
    }

    // ----- stage 11b ----------------------------------------------------

    fn loopback(&mut self) {
        let t = self.ring.current().timestamp.wall;
        if self.conf.setup_mode {
            self.emit_motion_img(EventKind::Image, t);
            self.emit_motion_img(EventKind::Stream, t);
            let motion = &self.img_motion.image_norm;
            self.slot.stream.norm.publish(motion);
        } else {
            self.emit_ring(EventKind::Image, self.ring.pos_in(), t);
            if !self.conf.stream_motion || self.shots == 1 {
                self.emit_ring(EventKind::Stream, self.ring.pos_in(), t);
                self.slot.stream.norm.publish(&self.ring.current().image_norm);
            }
        }
        self.emit_motion_img(EventKind::ImageM, t);
        if self.slot.stream.motion_viewers() {
            self.slot.stream.motion.publish(&self.img_motion.image_norm);
        }
        if self.slot.stream.source.viewer_count() > 0 {
            self.slot.stream.source.publish(&self.virgin.image_norm);
        }
        if self.slot.stream.sub.viewer_count() > 0 {
            crate::stream::downsample_half(
                &self.ring.current().image_norm,
                self.width,
                self.height,
                &mut self.substream_buf,
            );
            self.slot.stream.sub.publish(&self.substream_buf);
        }
    }

    // ----- stage 12 -----------------------------------------------------

    fn parms_update(&mut self) {
        if self.shots != 0 {
            return;
        }
        self.conf = self.slot.config.lock().unwrap().clone();
        self.apply_parms();
    }

    /// Decode string parameters and refresh derived state. Called at init
    /// and then once per second.
    fn apply_parms(&mut self) {
        self.text_scale = draw::validate_text_scale(self.conf.text_scale, self.width, self.height);

        self.new_img = match self.conf.picture_output.as_str() {
            "on" => newimg::ON,
            "first" => newimg::FIRST,
            "best" => newimg::BEST,
            "center" => newimg::CENTER,
            _ => newimg::OFF,
        };

        self.locate.mode = match self.conf.locate_motion_mode.as_str() {
            "on" => draw::LocateMode::On,
            "preview" => draw::LocateMode::Preview,
            _ => draw::LocateMode::Off,
        };
        self.locate.style = match self.conf.locate_motion_style.as_str() {
            "redbox" => draw::LocateStyle::RedBox,
            "cross" => draw::LocateStyle::Cross,
            "redcross" => draw::LocateStyle::RedCross,
            _ => draw::LocateStyle::Box,
        };

        if !(0..=10).contains(&self.conf.smart_mask_speed) {
            self.conf.smart_mask_speed = 0;
        }
        if self.conf.smart_mask_speed != self.smartmask_speed
            || self.smartmask_lastrate != self.lastrate
        {
            if self.conf.smart_mask_speed == 0 {
                self.det.clear_smartmask();
            }
            self.smartmask_lastrate = self.lastrate;
            self.smartmask_speed = self.conf.smart_mask_speed;
            self.det.smartmask_speed = self.smartmask_speed;
            // Decay runs every 5*(11-speed) seconds, framerate independent.
            self.smartmask_ratio = 5 * self.lastrate * (11 - self.smartmask_speed);
            self.smartmask_count = self.smartmask_ratio;
        }

        self.det.threshold = self.conf.threshold;
        self.det.threshold_maximum = if self.conf.threshold_maximum > self.conf.threshold {
            self.conf.threshold_maximum
        } else {
            (self.height * self.width * 3 / 2) as i32
        };

        if !self.conf.noise_tune {
            self.det.noise = self.conf.noise_level;
        }

        self.movie_fps = self.lastrate.clamp(2, self.conf.framerate.max(2));
    }

    // ----- stage 13 -----------------------------------------------------

    /// Sleep needed to hold the configured frame rate, corrected by the
    /// rolling average of recent frame intervals.
    pub fn frame_delay(&mut self) -> Duration {
        let required = if self.conf.framerate > 0 {
            1_000_000 / self.conf.framerate as i64
        } else {
            0
        };

        let elapsed = self.monotonic_us() - self.time_now_us;

        // First pass has a meaningless previous timestamp.
        if self.passflag {
            let limit = self.rolling_average_data.len();
            self.rolling_average_data[self.rolling_frame] = self.time_now_us - self.time_before_us;
            self.rolling_frame = (self.rolling_frame + 1) % limit;
        } else {
            self.passflag = true;
        }

        let rolling_average =
            self.rolling_average_data.iter().sum::<i64>() / self.rolling_average_data.len() as i64;

        let mut delay = required - elapsed - (rolling_average - required);
        if delay > 0 {
            if delay > required {
                delay = required;
            }
            Duration::from_micros(delay.min(999_999) as u64)
        } else {
            Duration::ZERO
        }
    }

    // ----- helpers ------------------------------------------------------

    fn expansion_context(&self) -> ExpansionContext<'_> {
        let current = self.ring.current();
        ExpansionContext {
            camera_id: self.conf.camera_id,
            camera_name: &self.conf.camera_name,
            host: &self.host,
            event_nr: self.event_nr,
            shot: current.shot,
            diffs: current.diffs,
            noise: self.det.noise,
            threshold: self.det.threshold,
            box_width: current.location.width,
            box_height: current.location.height,
            box_x: current.location.x,
            box_y: current.location.y,
            total_labels: current.total_labels,
            width: self.width,
            height: self.height,
            event_text: &self.event_text,
            filename: None,
            sqltype: 0,
            fps: self.movie_fps,
            dbeventid: 0,
        }
    }
}
