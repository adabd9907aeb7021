//! # Event Control
//!
//! Stage 8 of the pipeline loop: decide whether the current frame starts,
//! sustains or ends an event, recruit the precapture ring into new events,
//! and drain SAVE-flagged frames to the recorder.
//!
//! The event lifecycle guarantees observed by the recorder:
//! - exactly one `FirstMotion` precedes every `ImageDetected` of an event,
//!   stamped with the earliest recruited frame so files open at the right
//!   time;
//! - exactly one `EndMotion` follows the last `ImageDetected`;
//! - no ring slot is emitted twice (SAVE is cleared into SAVED once
//!   consumed);
//! - `event_nr` increments exactly once per completed event.

use super::{Camera, newimg};
use crate::draw::{self, LocateMode, LocateStyle};
use crate::filename;
use crate::image::ImageFlags;
use crate::recorder::EventKind;
use log::{debug, info};

/// Per-iteration cap on ring consumption outside the event-end flush.
const RING_DRAIN_PER_LOOP: u32 = 2;

impl Camera {
    /// Stage 8: the event state machine.
    pub(super) fn actions(&mut self) {
        let threshold = self.det.threshold;
        let threshold_maximum = self.det.threshold_maximum;
        let diffs = self.ring.current().diffs;
        let in_range = diffs > threshold && diffs < threshold_maximum;

        if in_range {
            self.ring.current_mut().flags |= ImageFlags::MOTION;
            self.lightswitch_framecounter += 1;
        } else {
            self.lightswitch_framecounter = 0;
        }

        let control = &self.slot.control;
        let emulate = self.conf.emulate_motion || control.get(&control.event_user);

        if emulate && self.startup_frames == 0 {
            self.detecting = true;
            if self.conf.post_capture > 0 {
                self.postcap = self.conf.post_capture;
            }
            self.ring.current_mut().flags |= ImageFlags::TRIGGER | ImageFlags::SAVE;
            self.ring.flag_all(ImageFlags::SAVE);
            self.motion_detected();
        } else if self.ring.current().flags.contains(ImageFlags::MOTION)
            && self.startup_frames == 0
        {
            // Require minimum_motion_frames of sustained motion among the
            // most recent ring positions before triggering.
            let mut frame_count = 0;
            let mut pos = self.ring.pos_in();
            for _ in 0..self.conf.minimum_motion_frames {
                if self.ring.slot(pos).flags.contains(ImageFlags::MOTION) {
                    frame_count += 1;
                }
                pos = if pos == 0 {
                    self.ring.size() - 1
                } else {
                    pos - 1
                };
            }

            if frame_count >= self.conf.minimum_motion_frames {
                self.ring.current_mut().flags |= ImageFlags::TRIGGER | ImageFlags::SAVE;
                self.detecting = true;
                self.postcap = self.conf.post_capture;
                // Recruit the whole precapture into the event.
                self.ring.flag_all(ImageFlags::SAVE);
            } else if self.postcap > 0 {
                // Motion, but not yet enough frames: extend the postcap.
                self.ring.current_mut().flags |= ImageFlags::POSTCAP | ImageFlags::SAVE;
                self.postcap -= 1;
            } else {
                self.ring.current_mut().flags |= ImageFlags::PRECAP;
            }
            self.motion_detected();
        } else if self.postcap > 0 {
            self.ring.current_mut().flags |= ImageFlags::POSTCAP | ImageFlags::SAVE;
            self.postcap -= 1;
        } else {
            self.ring.current_mut().flags |= ImageFlags::PRECAP;
            // Gapless recording: event_gap 0 ends the event the moment
            // motion stops.
            if self.conf.event_gap == 0 && self.detecting {
                let control = &self.slot.control;
                control.set(&control.event_stop, true);
            }
            self.detecting = false;
        }

        let control = &self.slot.control;
        control.set(&control.detecting, self.detecting);

        if self.ring.current().flags.contains(ImageFlags::SAVE) {
            self.last_save_time = self.ring.current().timestamp.wall.timestamp();
        }

        self.area_detect();

        if self.conf.movie_max_time > 0
            && self.in_event()
            && self.current_sec - self.event_time >= self.conf.movie_max_time as i64
        {
            let control = &self.slot.control;
            control.set(&control.event_stop, true);
        }

        let event_stop = {
            let control = &self.slot.control;
            control.get(&control.event_stop)
        };
        let gap_expired = self.conf.event_gap > 0
            && self.current_sec - self.last_save_time >= self.conf.event_gap as i64;

        if (gap_expired || event_stop) && (self.in_event() || event_stop) {
            self.end_event();
        }

        self.process_image_ring(Some(RING_DRAIN_PER_LOOP));
    }

    /// Called for every frame carrying motion (and for emulated motion):
    /// overlays, event start bookkeeping, per-frame motion events.
    fn motion_detected(&mut self) {
        // Locate overlay on the live output.
        if self.locate.mode == LocateMode::On {
            let loc = self.ring.current().location;
            let style = self.locate.style;
            let (width, height) = (self.width, self.height);
            let process = self.process_thisframe;
            let current_idx = self.ring.pos_in();
            let (ring, motion_img) = (&mut self.ring, &mut self.img_motion);
            let image = &mut ring.slot_mut(current_idx).image_norm;
            let motion = process.then_some(&mut motion_img.image_norm[..]);
            match style {
                LocateStyle::RedBox | LocateStyle::RedCross => {
                    draw::draw_red_location(&loc, width, height, image, motion, style);
                }
                LocateStyle::Box | LocateStyle::Cross => {
                    draw::draw_location(&loc, width, height, image, motion, style);
                }
            }
        }

        // Centre distance for preview selection.
        if self.new_img & newimg::CENTER != 0 {
            let loc = self.ring.current().location;
            let dx = (self.width as i64 / 2 - loc.x as i64).abs();
            let dy = (self.height as i64 / 2 - loc.y as i64).abs();
            self.ring.current_mut().cent_dist = (dx * dx + dy * dy) as u64;
        }

        if self.ring.current().flags.contains(ImageFlags::TRIGGER) {
            if !self.in_event() {
                self.prev_event = self.event_nr;
                let frame_time = self.ring.current().timestamp.wall;
                self.event_time = frame_time.timestamp();
                // The %C text is fixed at event start; hooks may need it
                // before the first file is written.
                self.event_text =
                    filename::expand(&self.conf.text_event, frame_time, &self.expansion_context());

                // Open the event against the earliest recruited frame so
                // the recorder's files start at the precapture boundary.
                let size = self.ring.size();
                let mut idx = self.ring.pos_out();
                loop {
                    let flags = self.ring.slot(idx).flags;
                    if flags.contains(ImageFlags::SAVE) && !flags.contains(ImageFlags::SAVED) {
                        let t = self.ring.slot(idx).timestamp.wall;
                        self.emit_ring(EventKind::FirstMotion, idx, t);
                        break;
                    }
                    if idx == self.ring.pos_in() {
                        break;
                    }
                    idx = (idx + 1) % size;
                }

                info!(
                    "Camera {}: motion detected - starting event {}",
                    self.conf.camera_id, self.event_nr
                );

                if self.new_img & (newimg::FIRST | newimg::BEST | newimg::CENTER) != 0 {
                    self.save_preview(self.ring.pos_in());
                }
            }

            let t = self.ring.current().timestamp.wall;
            self.emit(EventKind::Motion, t);
        }

        // Rate limit per-shot outputs to the configured frame rate.
        let (shot, t) = {
            let current = self.ring.current();
            (current.shot, current.timestamp.wall)
        };
        if shot < self.conf.framerate {
            // Skip the first shot within a second: the loopback stage has
            // already pushed it to the stream.
            if self.conf.stream_motion && !self.conf.setup_mode && shot != 1 {
                self.emit_ring(EventKind::Stream, self.ring.pos_in(), t);
            }
            if self.conf.picture_output_motion {
                self.emit_motion_img(EventKind::ImageMDetected, t);
            }
        }

        if self.tracker.auto_enabled() {
            let loc = self.ring.current().location;
            let cooldown = self
                .tracker
                .move_to(&loc, self.width, self.height, false);
            if cooldown > self.moved {
                self.moved = cooldown;
            }
        }
    }

    /// Flush the ring, emit the preview and EndMotion, advance the event
    /// counter and reset per-event state.
    fn end_event(&mut self) {
        self.process_image_ring(None);

        let t = self.ring.current().timestamp.wall;
        if self.preview.diffs != 0 {
            self.recorder.record(crate::recorder::RecorderEvent {
                kind: EventKind::ImagePreview,
                camera_id: self.conf.camera_id,
                event_nr: self.event_nr,
                time: t,
                image: Some(&self.preview),
            });
            self.preview.diffs = 0;
        }

        self.emit(EventKind::EndMotion, t);

        // Re-centre the camera so the next action is not off-frame.
        let cooldown = self.tracker.center(0, 0, false);
        if cooldown > self.moved {
            self.moved = cooldown;
        }

        info!("Camera {}: end of event {}", self.conf.camera_id, self.event_nr);

        let control = &self.slot.control;
        control.set(&control.event_stop, false);
        control.set(&control.event_user, false);

        self.postcap = 0;
        self.event_nr += 1;
        self.lightswitch_framecounter = 0;
        self.event_text.clear();
    }

    /// Drain SAVE-flagged, not yet SAVED frames from the ring to the
    /// recorder. `max_images` of None flushes everything (event end).
    pub(super) fn process_image_ring(&mut self, max_images: Option<u32>) {
        let mut remaining = max_images;

        loop {
            let out = self.ring.pos_out();
            let flags = self.ring.slot(out).flags;
            if !flags.contains(ImageFlags::SAVE) || flags.contains(ImageFlags::SAVED) {
                break;
            }

            let (shot, t) = {
                let slot = self.ring.slot(out);
                (slot.shot, slot.timestamp.wall)
            };

            if shot < self.conf.framerate {
                if log::log_enabled!(log::Level::Debug) {
                    self.annotate_ring_frame(out);
                }

                self.emit_ring(EventKind::ImageDetected, out, t);

                // Filler frames keep the encoded movie real-time when the
                // camera delivered fewer frames than the movie fps.
                if !self.conf.movie_duplicate_frames {
                    // Frame duplication disabled.
                } else if shot == 0 && self.in_event() {
                    if self.movie_last_shot >= 0 {
                        let fillers = self.movie_fps - (self.movie_last_shot + 1);
                        if fillers > 0 {
                            debug!(
                                "Camera {}: added {} filler frames into movie",
                                self.conf.camera_id, fillers
                            );
                        }
                        while self.movie_last_shot + 1 < self.movie_fps {
                            self.emit_ring(EventKind::FfmpegPut, out, t);
                            self.movie_last_shot += 1;
                        }
                    }
                    self.movie_last_shot = 0;
                } else if shot != self.movie_last_shot + 1 {
                    // Out of sync: motion - no motion - motion.
                    self.movie_last_shot = -1;
                }

                if self.movie_last_shot >= 0 {
                    self.movie_last_shot = shot;
                }
            }

            self.ring.slot_mut(out).flags |= ImageFlags::SAVED;

            // Track the best preview candidate among motion frames.
            if flags.contains(ImageFlags::MOTION) {
                if self.new_img & newimg::BEST != 0
                    && self.ring.slot(out).diffs > self.preview.diffs
                {
                    self.save_preview(out);
                }
                if self.new_img & newimg::CENTER != 0
                    && self.ring.slot(out).cent_dist < self.preview.cent_dist
                {
                    self.save_preview(out);
                }
            }

            let drained = self.ring.advance_out();

            if let Some(m) = remaining.as_mut() {
                *m -= 1;
                if *m == 0 {
                    break;
                }
            }
            if drained {
                break;
            }
        }
    }

    /// Copy a ring slot into the preview buffer, keeping the preview's own
    /// pixel storage.
    fn save_preview(&mut self, idx: usize) {
        let (preview, ring) = (&mut self.preview, &self.ring);
        preview.copy_from(ring.slot(idx));

        // An all-quiet emulated event would otherwise never emit its
        // preview at event end.
        if self.preview.diffs == 0 {
            self.preview.diffs = 1;
        }

        if self.locate.mode == LocateMode::Preview {
            let loc = self.preview.location;
            let style = self.locate.style;
            match style {
                LocateStyle::RedBox | LocateStyle::RedCross => {
                    draw::draw_red_location(
                        &loc,
                        self.width,
                        self.height,
                        &mut self.preview.image_norm,
                        None,
                        style,
                    );
                }
                LocateStyle::Box | LocateStyle::Cross => {
                    draw::draw_location(
                        &loc,
                        self.width,
                        self.height,
                        &mut self.preview.image_norm,
                        None,
                        style,
                    );
                }
            }
        }
    }

    /// Debug annotation on stored frames: capture time and frame class.
    fn annotate_ring_frame(&mut self, idx: usize) {
        let slot = self.ring.slot(idx);
        let label = if slot.flags.contains(ImageFlags::TRIGGER) {
            "Trigger"
        } else if slot.flags.contains(ImageFlags::MOTION) {
            "Motion"
        } else if slot.flags.contains(ImageFlags::PRECAP) {
            "Precap"
        } else if slot.flags.contains(ImageFlags::POSTCAP) {
            "Postcap"
        } else {
            "Other"
        };
        let stamp = format!(
            "{}-{:02}",
            slot.timestamp.wall.format("%H%M%S"),
            slot.shot
        );
        let scale = self.text_scale as usize;
        let (width, height) = (self.width, self.height);
        let image = &mut self.ring.slot_mut(idx).image_norm;
        draw::draw_text(image, width, height, 10, 20, &stamp, scale);
        draw::draw_text(image, width, height, 10, 30, label, scale);
    }

    /// Nine-zone area detection: fire `AreaDetected` once per event when
    /// the centroid enters a configured zone.
    fn area_detect(&mut self) {
        if self.conf.area_detect.is_empty()
            || self.event_nr == self.areadetect_eventnbr
            || !self.ring.current().flags.contains(ImageFlags::TRIGGER)
        {
            return;
        }
        let loc = self.ring.current().location;
        let t = self.ring.current().timestamp.wall;
        let zones: Vec<usize> = self
            .conf
            .area_detect
            .bytes()
            .filter_map(|b| (b as i32 - 49).try_into().ok())
            .filter(|&z: &usize| z < 9)
            .collect();
        for z in zones {
            if loc.x > self.area_minx[z]
                && loc.x < self.area_maxx[z]
                && loc.y > self.area_miny[z]
                && loc.y < self.area_maxy[z]
            {
                self.emit(EventKind::AreaDetected, t);
                self.areadetect_eventnbr = self.event_nr;
                debug!("Camera {}: motion in area {} detected", self.conf.camera_id, z + 1);
                break;
            }
        }
    }
}
