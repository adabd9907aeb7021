//! # Configuration
//!
//! Camera and daemon parameter structs, their defaults and validation, and
//! the descriptor table the control surface walks to read or change
//! parameters by name at runtime.
//!
//! The pipeline never reads configuration mid-frame: it snapshots the
//! values it needs once per wall-clock second at the parms-update stage, so
//! a runtime `config/set` becomes visible at a well-defined loop boundary.
//!
//! Each parameter carries a web-UI access level. A `config/set` for an
//! unknown parameter returns an error to the control surface; a set above
//! the surface's configured level is silently ignored. Neither can crash
//! the daemon.
//!
//! The file format is the classic `name value` per line with `#` comments.
//! A `camera <file>` line in the daemon config pulls in one camera section
//! per file.

use crate::error::{DaemonError, DaemonResult};
use log::warn;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Web-UI access levels, ordered from always-editable to never.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum WebuiLevel {
    Always = 0,
    Limited = 1,
    Advanced = 2,
    Restricted = 3,
    Never = 99,
}

/// Largest user-assignable camera id; larger values fall back to the
/// thread index.
pub const MAX_CAMERA_ID: i32 = 32_000;

/// Per-camera configuration with the upstream defaults.
#[derive(Debug, Clone, Serialize)]
pub struct CameraConfig {
    pub camera_id: i32,
    pub camera_name: String,
    /// Capture source: a still image path (`still:<file>`), a scripted
    /// test source (`test:<spec>`), or a device/URL handled by an external
    /// capture backend.
    pub video_device: String,
    pub netcam_url: String,

    pub width: usize,
    pub height: usize,
    pub framerate: i32,

    pub threshold: i32,
    pub threshold_maximum: i32,
    pub threshold_tune: bool,
    pub noise_level: i32,
    pub noise_tune: bool,
    pub despeckle_filter: String,
    pub smart_mask_speed: i32,
    pub lightswitch_percent: i32,
    pub lightswitch_frames: i32,
    pub minimum_motion_frames: i32,

    pub event_gap: i32,
    pub pre_capture: i32,
    pub post_capture: i32,
    pub emulate_motion: bool,
    pub area_detect: String,

    pub mask_file: String,
    pub mask_privacy: String,

    pub picture_output: String,
    pub picture_output_motion: bool,
    pub picture_filename: String,
    pub snapshot_interval: i32,
    pub snapshot_filename: String,

    pub movie_max_time: i32,
    pub movie_duplicate_frames: bool,
    pub movie_filename: String,

    pub timelapse_interval: i32,
    pub timelapse_mode: String,
    pub timelapse_filename: String,

    pub locate_motion_mode: String,
    pub locate_motion_style: String,
    pub text_left: String,
    pub text_right: String,
    pub text_changes: bool,
    pub text_event: String,
    pub text_scale: i32,

    pub stream_motion: bool,
    pub setup_mode: bool,
    pub roundrobin_switchfilter: bool,
    pub track_auto: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_id: 0,
            camera_name: String::new(),
            video_device: "/dev/video0".to_string(),
            netcam_url: String::new(),
            width: 640,
            height: 480,
            framerate: 15,
            threshold: 1500,
            threshold_maximum: 0,
            threshold_tune: false,
            noise_level: 32,
            noise_tune: true,
            despeckle_filter: String::new(),
            smart_mask_speed: 0,
            lightswitch_percent: 0,
            lightswitch_frames: 5,
            minimum_motion_frames: 1,
            event_gap: 60,
            pre_capture: 0,
            post_capture: 0,
            emulate_motion: false,
            area_detect: String::new(),
            mask_file: String::new(),
            mask_privacy: String::new(),
            picture_output: "on".to_string(),
            picture_output_motion: false,
            picture_filename: "%v-%Y%m%d%H%M%S-%q".to_string(),
            snapshot_interval: 0,
            snapshot_filename: "%v-%Y%m%d%H%M%S-snapshot".to_string(),
            movie_max_time: 0,
            movie_duplicate_frames: true,
            movie_filename: "%v-%Y%m%d%H%M%S".to_string(),
            timelapse_interval: 0,
            timelapse_mode: "daily".to_string(),
            timelapse_filename: "%Y%m%d-timelapse".to_string(),
            locate_motion_mode: "off".to_string(),
            locate_motion_style: "box".to_string(),
            text_left: String::new(),
            text_right: "%Y-%m-%d\\n%T".to_string(),
            text_changes: false,
            text_event: "%Y%m%d%H%M%S".to_string(),
            text_scale: 1,
            stream_motion: false,
            setup_mode: false,
            roundrobin_switchfilter: false,
            track_auto: false,
        }
    }
}

impl CameraConfig {
    /// Validate and normalise geometry and counters. Dimensions are
    /// adjusted up to the next multiple of 8; anything below 64 is an
    /// error, not an adjustment.
    pub fn validate(&mut self) -> DaemonResult<()> {
        if self.width < 64 || self.height < 64 {
            return Err(DaemonError::geometry(
                self.width,
                self.height,
                "width and height must be at least 64",
            ));
        }
        if self.width % 8 != 0 {
            let adjusted = (self.width / 8 + 1) * 8;
            warn!(
                "Image width {} is not modulo 8, adjusting to {}",
                self.width, adjusted
            );
            self.width = adjusted;
        }
        if self.height % 8 != 0 {
            let adjusted = (self.height / 8 + 1) * 8;
            warn!(
                "Image height {} is not modulo 8, adjusting to {}",
                self.height, adjusted
            );
            self.height = adjusted;
        }
        if self.framerate < 2 {
            self.framerate = 2;
        }
        if self.framerate > 100 {
            self.framerate = 100;
        }
        if self.minimum_motion_frames < 1 {
            self.minimum_motion_frames = 1;
        }
        if self.pre_capture < 0 {
            self.pre_capture = 0;
        }
        Ok(())
    }

    /// Ring buffer size for the current precapture settings.
    pub fn ring_size(&self) -> usize {
        (self.pre_capture + self.minimum_motion_frames).max(1) as usize
    }
}

/// Daemon-level configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaemonConfig {
    pub pid_file: String,
    pub cameras: Vec<CameraConfig>,
}

fn parse_bool(name: &str, value: &str) -> DaemonResult<bool> {
    match value {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(DaemonError::config(name, value, "expected on or off")),
    }
}

/// Runtime parameter access used by the control surface and file loader.
pub struct ParamDescriptor {
    pub name: &'static str,
    pub webui_level: WebuiLevel,
    /// True for parameters only the daemon section may set.
    pub main_thread_only: bool,
    pub get: fn(&CameraConfig) -> String,
    pub set: fn(&mut CameraConfig, &str) -> DaemonResult<()>,
}

macro_rules! param_num {
    ($field:ident, $level:expr) => {
        ParamDescriptor {
            name: stringify!($field),
            webui_level: $level,
            main_thread_only: false,
            get: |c| c.$field.to_string(),
            set: |c, v| {
                c.$field = v
                    .parse()
                    .map_err(|_| DaemonError::config(stringify!($field), v, "invalid number"))?;
                Ok(())
            },
        }
    };
}

macro_rules! param_bool {
    ($field:ident, $level:expr) => {
        ParamDescriptor {
            name: stringify!($field),
            webui_level: $level,
            main_thread_only: false,
            get: |c| if c.$field { "on" } else { "off" }.to_string(),
            set: |c, v| {
                c.$field = parse_bool(stringify!($field), v)?;
                Ok(())
            },
        }
    };
}

macro_rules! param_str {
    ($field:ident, $level:expr) => {
        ParamDescriptor {
            name: stringify!($field),
            webui_level: $level,
            main_thread_only: false,
            get: |c| c.$field.clone(),
            set: |c, v| {
                c.$field = v.to_string();
                Ok(())
            },
        }
    };
}

/// The camera parameter table, walked by the control surface for
/// `config/list`, `config/get` and `config/set`.
pub static CAMERA_PARAMS: &[ParamDescriptor] = &[
    param_num!(camera_id, WebuiLevel::Restricted),
    param_str!(camera_name, WebuiLevel::Restricted),
    param_str!(video_device, WebuiLevel::Advanced),
    param_str!(netcam_url, WebuiLevel::Advanced),
    param_num!(width, WebuiLevel::Restricted),
    param_num!(height, WebuiLevel::Restricted),
    param_num!(framerate, WebuiLevel::Limited),
    param_num!(threshold, WebuiLevel::Limited),
    param_num!(threshold_maximum, WebuiLevel::Limited),
    param_bool!(threshold_tune, WebuiLevel::Limited),
    param_num!(noise_level, WebuiLevel::Limited),
    param_bool!(noise_tune, WebuiLevel::Limited),
    param_str!(despeckle_filter, WebuiLevel::Limited),
    param_num!(smart_mask_speed, WebuiLevel::Limited),
    param_num!(lightswitch_percent, WebuiLevel::Limited),
    param_num!(lightswitch_frames, WebuiLevel::Limited),
    param_num!(minimum_motion_frames, WebuiLevel::Limited),
    param_num!(event_gap, WebuiLevel::Limited),
    param_num!(pre_capture, WebuiLevel::Limited),
    param_num!(post_capture, WebuiLevel::Limited),
    param_bool!(emulate_motion, WebuiLevel::Limited),
    param_str!(area_detect, WebuiLevel::Limited),
    param_str!(mask_file, WebuiLevel::Advanced),
    param_str!(mask_privacy, WebuiLevel::Advanced),
    param_str!(picture_output, WebuiLevel::Limited),
    param_bool!(picture_output_motion, WebuiLevel::Limited),
    param_str!(picture_filename, WebuiLevel::Advanced),
    param_num!(snapshot_interval, WebuiLevel::Limited),
    param_str!(snapshot_filename, WebuiLevel::Advanced),
    param_num!(movie_max_time, WebuiLevel::Limited),
    param_bool!(movie_duplicate_frames, WebuiLevel::Limited),
    param_str!(movie_filename, WebuiLevel::Advanced),
    param_num!(timelapse_interval, WebuiLevel::Limited),
    param_str!(timelapse_mode, WebuiLevel::Limited),
    param_str!(timelapse_filename, WebuiLevel::Advanced),
    param_str!(locate_motion_mode, WebuiLevel::Limited),
    param_str!(locate_motion_style, WebuiLevel::Limited),
    param_str!(text_left, WebuiLevel::Limited),
    param_str!(text_right, WebuiLevel::Limited),
    param_bool!(text_changes, WebuiLevel::Limited),
    param_str!(text_event, WebuiLevel::Limited),
    param_num!(text_scale, WebuiLevel::Limited),
    param_bool!(stream_motion, WebuiLevel::Limited),
    param_bool!(setup_mode, WebuiLevel::Limited),
    param_bool!(roundrobin_switchfilter, WebuiLevel::Limited),
    param_bool!(track_auto, WebuiLevel::Limited),
];

pub fn find_param(name: &str) -> Option<&'static ParamDescriptor> {
    CAMERA_PARAMS.iter().find(|p| p.name == name)
}

/// Set a parameter by name. Unknown names are an error for the caller to
/// report; they never crash the daemon.
pub fn set_param(config: &mut CameraConfig, name: &str, value: &str) -> DaemonResult<()> {
    match find_param(name) {
        Some(p) => (p.set)(config, value),
        None => Err(DaemonError::config(name, value, "unknown parameter")),
    }
}

pub fn get_param(config: &CameraConfig, name: &str) -> Option<String> {
    find_param(name).map(|p| (p.get)(config))
}

fn apply_line(config: &mut CameraConfig, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return;
    }
    let (name, value) = match line.split_once(char::is_whitespace) {
        Some((n, v)) => (n.trim(), v.trim()),
        None => (line, ""),
    };
    if let Err(e) = set_param(config, name, value) {
        warn!("Ignoring config line '{}': {}", line, e);
    }
}

impl DaemonConfig {
    /// Load the daemon configuration file. Camera-level parameters before
    /// the first `camera` directive form the template every camera file
    /// starts from; a file without any `camera` directive defines a single
    /// camera inline.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DaemonError::io_path("read config", path.display().to_string(), e))?;

        let mut daemon = DaemonConfig::default();
        let mut template = CameraConfig::default();
        let mut camera_files = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("camera ") {
                camera_files.push(rest.trim().to_string());
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("pid_file ") {
                daemon.pid_file = rest.trim().to_string();
                continue;
            }
            apply_line(&mut template, line);
        }

        if camera_files.is_empty() {
            daemon.cameras.push(template);
        } else {
            let base_dir = path.parent().unwrap_or(Path::new("."));
            for file in camera_files {
                let cam_path = base_dir.join(&file);
                let cam_text = fs::read_to_string(&cam_path).map_err(|e| {
                    DaemonError::io_path("read camera config", cam_path.display().to_string(), e)
                })?;
                let mut cam = template.clone();
                for line in cam_text.lines() {
                    apply_line(&mut cam, line);
                }
                daemon.cameras.push(cam);
            }
        }

        for cam in &mut daemon.cameras {
            cam.validate()?;
        }
        Ok(daemon)
    }
}
