//! # Control Surface Contract
//!
//! Command parsing and dispatch for the webcontrol collaborator. The HTTP
//! server itself is external; it parses a request path into a
//! [`ControlCommand`], calls [`dispatch`] against the camera table and
//! renders the [`ControlResponse`]. Cameras are addressed strictly by id
//! through the slot table, never by index arithmetic.
//!
//! Camera id 0 broadcasts an action to every camera, matching the
//! `/0/action/...` convention.

use crate::config::{self, WebuiLevel};
use crate::control::CameraSlot;
use log::info;
use serde::Serialize;
use std::sync::atomic::Ordering;

/// Actions under `/{id}/action/...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// End the running event and roll files over.
    MakeMovie,
    EventStart,
    EventEnd,
    Snapshot,
    Restart,
    Start,
    Pause,
    Quit,
    End,
}

/// A parsed control-surface request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    DetectionStatus { camera: i32 },
    DetectionConnection { camera: i32 },
    Action { camera: i32, action: ControlAction },
    ConfigSet { camera: i32, param: String, value: String },
    ConfigGet { camera: i32, param: String },
    ConfigList { camera: i32 },
    /// Render the camera's configuration as a `name value` document for
    /// the HTTP layer to persist.
    ConfigWrite { camera: i32 },
    StatusJson { camera: i32 },
    CamerasJson,
    TrackCenter { camera: i32 },
    TrackSet { camera: i32, x: i32, y: i32 },
}

/// Outcome handed back to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Ok(String),
    /// Unknown camera, unknown parameter, bad path. Never fatal.
    Error(String),
}

/// Machine-readable per-camera status (`status.json`).
#[derive(Debug, Serialize)]
pub struct CameraStatus {
    pub id: i32,
    pub name: String,
    pub status: &'static str,
    pub connection: &'static str,
    pub fps: i64,
}

pub fn camera_status(slot: &CameraSlot) -> CameraStatus {
    let c = &slot.control;
    let status = if !c.get(&c.running) {
        "not running"
    } else if c.get(&c.pause) {
        "paused"
    } else {
        "active"
    };
    CameraStatus {
        id: slot.id,
        name: slot.name.clone(),
        status,
        connection: if c.get(&c.lost_connection) {
            "lost"
        } else {
            "ok"
        },
        fps: c.last_fps.load(Ordering::Relaxed),
    }
}

/// Parse a webcontrol path (plus query for `config/set` and `track/set`)
/// into a command. Returns None for paths this surface does not serve.
pub fn parse_path(path: &str, query: &str) -> Option<ControlCommand> {
    let mut parts = path.trim_matches('/').split('/');
    let first = parts.next()?;

    if first == "cameras.json" {
        return Some(ControlCommand::CamerasJson);
    }

    let camera: i32 = first.parse().ok()?;
    let section = parts.next()?;
    let item = parts.next();

    let query_value = |key: &str| -> Option<String> {
        query.split('&').find_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            (k == key).then(|| v.to_string())
        })
    };

    match (section, item) {
        ("detection", Some("status")) => Some(ControlCommand::DetectionStatus { camera }),
        ("detection", Some("connection")) => Some(ControlCommand::DetectionConnection { camera }),
        ("status.json", None) => Some(ControlCommand::StatusJson { camera }),
        ("action", Some(name)) => {
            let action = match name {
                "makemovie" => ControlAction::MakeMovie,
                "eventstart" => ControlAction::EventStart,
                "eventend" => ControlAction::EventEnd,
                "snapshot" => ControlAction::Snapshot,
                "restart" => ControlAction::Restart,
                "start" => ControlAction::Start,
                "pause" => ControlAction::Pause,
                "quit" => ControlAction::Quit,
                "end" => ControlAction::End,
                _ => return None,
            };
            Some(ControlCommand::Action { camera, action })
        }
        ("config", Some("set")) => Some(ControlCommand::ConfigSet {
            camera,
            param: query_value("param")?,
            value: query_value("value").unwrap_or_default(),
        }),
        ("config", Some("get")) => Some(ControlCommand::ConfigGet {
            camera,
            param: query_value("param")?,
        }),
        ("config", Some("list")) => Some(ControlCommand::ConfigList { camera }),
        ("config", Some("write")) => Some(ControlCommand::ConfigWrite { camera }),
        ("track", Some("center")) => Some(ControlCommand::TrackCenter { camera }),
        ("track", Some("set")) => Some(ControlCommand::TrackSet {
            camera,
            x: query_value("x")?.parse().ok()?,
            y: query_value("y")?.parse().ok()?,
        }),
        _ => None,
    }
}

fn find_slot<'a>(slots: &'a [CameraSlot], camera: i32) -> Option<&'a CameraSlot> {
    slots.iter().find(|s| s.id == camera)
}

fn apply_action(slot: &CameraSlot, action: ControlAction) {
    let c = &slot.control;
    match action {
        ControlAction::MakeMovie | ControlAction::EventEnd => c.set(&c.event_stop, true),
        ControlAction::EventStart => c.set(&c.event_user, true),
        ControlAction::Snapshot => c.set(&c.snapshot, true),
        ControlAction::Restart => {
            c.set(&c.restart, true);
            c.set(&c.finish, true);
        }
        ControlAction::Start => c.set(&c.pause, false),
        ControlAction::Pause => c.set(&c.pause, true),
        ControlAction::Quit | ControlAction::End => {
            c.set(&c.restart, false);
            c.set(&c.event_stop, true);
            c.set(&c.finish, true);
        }
    }
}

/// Execute a command against the camera table. `webui_level` is the
/// surface's configured write-access limit: parameters above it are
/// silently ignored, per the access policy.
pub fn dispatch(
    slots: &[CameraSlot],
    webui_level: WebuiLevel,
    command: &ControlCommand,
) -> ControlResponse {
    use ControlCommand::*;

    let require = |camera: i32| {
        find_slot(slots, camera)
            .ok_or_else(|| ControlResponse::Error(format!("camera {} not found", camera)))
    };

    match command {
        CamerasJson => {
            let all: Vec<CameraStatus> = slots.iter().map(camera_status).collect();
            ControlResponse::Ok(serde_json::to_string(&all).unwrap_or_default())
        }
        StatusJson { camera } => match require(*camera) {
            Ok(slot) => ControlResponse::Ok(
                serde_json::to_string(&camera_status(slot)).unwrap_or_default(),
            ),
            Err(e) => e,
        },
        DetectionStatus { camera } => match require(*camera) {
            Ok(slot) => ControlResponse::Ok(camera_status(slot).status.to_string()),
            Err(e) => e,
        },
        DetectionConnection { camera } => match require(*camera) {
            Ok(slot) => ControlResponse::Ok(camera_status(slot).connection.to_string()),
            Err(e) => e,
        },
        Action { camera, action } => {
            if *camera == 0 {
                for slot in slots {
                    apply_action(slot, *action);
                }
                return ControlResponse::Ok("Done".to_string());
            }
            match require(*camera) {
                Ok(slot) => {
                    apply_action(slot, *action);
                    ControlResponse::Ok("Done".to_string())
                }
                Err(e) => e,
            }
        }
        ConfigSet {
            camera,
            param,
            value,
        } => match require(*camera) {
            Ok(slot) => {
                let Some(descriptor) = config::find_param(param) else {
                    return ControlResponse::Error(format!("unknown parameter '{}'", param));
                };
                if descriptor.webui_level > webui_level {
                    // Above the surface's write level: ignore quietly.
                    return ControlResponse::Ok("Done".to_string());
                }
                let mut cfg = slot.config.lock().unwrap();
                match (descriptor.set)(&mut cfg, value) {
                    Ok(()) => {
                        info!("camera {}: {} set to {}", camera, param, value);
                        ControlResponse::Ok("Done".to_string())
                    }
                    Err(e) => ControlResponse::Error(e.to_string()),
                }
            }
            Err(e) => e,
        },
        ConfigGet { camera, param } => match require(*camera) {
            Ok(slot) => {
                let cfg = slot.config.lock().unwrap();
                match config::get_param(&cfg, param) {
                    Some(v) => ControlResponse::Ok(format!("{} = {}", param, v)),
                    None => ControlResponse::Error(format!("unknown parameter '{}'", param)),
                }
            }
            Err(e) => e,
        },
        ConfigList { camera } => match require(*camera) {
            Ok(slot) => {
                let cfg = slot.config.lock().unwrap();
                let mut out = String::new();
                for p in config::CAMERA_PARAMS {
                    if p.webui_level <= webui_level {
                        out.push_str(&format!("{} = {}\n", p.name, (p.get)(&cfg)));
                    }
                }
                ControlResponse::Ok(out)
            }
            Err(e) => e,
        },
        ConfigWrite { camera } => match require(*camera) {
            Ok(slot) => {
                let cfg = slot.config.lock().unwrap();
                let mut out = String::new();
                for p in config::CAMERA_PARAMS {
                    out.push_str(&format!("{} {}\n", p.name, (p.get)(&cfg)));
                }
                ControlResponse::Ok(out)
            }
            Err(e) => e,
        },
        // Tracking is forwarded to the PTZ collaborator by the pipeline;
        // the surface only acknowledges that the camera exists.
        TrackCenter { camera } | TrackSet { camera, .. } => match require(*camera) {
            Ok(_) => ControlResponse::Ok("Done".to_string()),
            Err(e) => e,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;

    fn slots() -> Vec<CameraSlot> {
        let mut cfg = CameraConfig::default();
        cfg.camera_id = 1;
        cfg.camera_name = "door".to_string();
        vec![CameraSlot::new(cfg, 30)]
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(
            parse_path("/1/detection/status", ""),
            Some(ControlCommand::DetectionStatus { camera: 1 })
        );
        assert_eq!(
            parse_path("/2/action/snapshot", ""),
            Some(ControlCommand::Action {
                camera: 2,
                action: ControlAction::Snapshot
            })
        );
        assert_eq!(
            parse_path("/1/config/set", "param=threshold&value=900"),
            Some(ControlCommand::ConfigSet {
                camera: 1,
                param: "threshold".to_string(),
                value: "900".to_string()
            })
        );
        assert_eq!(parse_path("/cameras.json", ""), Some(ControlCommand::CamerasJson));
        assert_eq!(parse_path("/1/bogus/thing", ""), None);
    }

    #[test]
    fn test_action_sets_intent() {
        let slots = slots();
        let cmd = ControlCommand::Action {
            camera: 1,
            action: ControlAction::Pause,
        };
        assert_eq!(
            dispatch(&slots, WebuiLevel::Limited, &cmd),
            ControlResponse::Ok("Done".to_string())
        );
        let c = &slots[0].control;
        assert!(c.get(&c.pause));
    }

    #[test]
    fn test_unknown_camera_is_error() {
        let slots = slots();
        let cmd = ControlCommand::DetectionStatus { camera: 9 };
        assert!(matches!(
            dispatch(&slots, WebuiLevel::Limited, &cmd),
            ControlResponse::Error(_)
        ));
    }

    #[test]
    fn test_config_set_respects_webui_level() {
        let slots = slots();
        // width is Restricted; a Limited surface must silently ignore it.
        let cmd = ControlCommand::ConfigSet {
            camera: 1,
            param: "width".to_string(),
            value: "1280".to_string(),
        };
        assert_eq!(
            dispatch(&slots, WebuiLevel::Limited, &cmd),
            ControlResponse::Ok("Done".to_string())
        );
        assert_eq!(slots[0].config.lock().unwrap().width, 640);

        // threshold is Limited and goes through.
        let cmd = ControlCommand::ConfigSet {
            camera: 1,
            param: "threshold".to_string(),
            value: "900".to_string(),
        };
        dispatch(&slots, WebuiLevel::Limited, &cmd);
        assert_eq!(slots[0].config.lock().unwrap().threshold, 900);
    }

    #[test]
    fn test_config_set_unknown_param_is_error() {
        let slots = slots();
        let cmd = ControlCommand::ConfigSet {
            camera: 1,
            param: "warp_drive".to_string(),
            value: "on".to_string(),
        };
        assert!(matches!(
            dispatch(&slots, WebuiLevel::Limited, &cmd),
            ControlResponse::Error(_)
        ));
    }

    #[test]
    fn test_status_json_shape() {
        let slots = slots();
        let cmd = ControlCommand::StatusJson { camera: 1 };
        let ControlResponse::Ok(json) = dispatch(&slots, WebuiLevel::Limited, &cmd) else {
            panic!("expected ok");
        };
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["id"], 1);
        assert_eq!(v["status"], "not running");
        assert_eq!(v["connection"], "ok");
    }
}
