//! Detection-stage scenarios at pipeline level: lightswitch suppression,
//! despeckle filtering, pause, and runtime parameter changes.

mod common;

use common::*;
use vigil::capture::ScriptedSource;
use vigil::recorder::EventKind;
use vigil::webcontrol::{ControlCommand, ControlResponse, dispatch};

#[test]
fn test_lightswitch_suppresses_and_resets_reference() {
    let mut config = test_config();
    config.lightswitch_percent = 50;
    config.lightswitch_frames = 5;
    config.minimum_motion_frames = 1;

    let mut src = ScriptedSource::new(W, H);
    // Prime + settle on luma 100.
    for _ in 0..40 {
        src.push_uniform(100);
    }
    // Scene-wide jump to luma 200: every pixel changes by 100.
    src.push_uniform(200);
    // Real motion against the new scene, one frame per suppressed slot
    // and then some.
    src.push_repeated(patch_frame(200, 80), 8);

    let mut rig = build_camera(config, src);
    rig.run_frames(39);

    // The lightswitch frame: no event, diffs forced to zero, reference
    // replaced by the new scene.
    rig.run_frames(1);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 0);
    assert_eq!(rig.camera.ring.current().diffs, 0);
    assert!(rig.camera.det.ref_frame.iter().all(|&p| p == 200));

    // The next lightswitch_frames frames carry real motion but detection
    // is settling; nothing triggers.
    rig.run_frames(5);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 0);

    // First frame after the settle window detects again.
    rig.run_frames(1);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 1);
}

#[test]
fn test_despeckle_removes_speckle_noise() {
    let mut config = test_config();
    config.despeckle_filter = "Ee".to_string();
    config.threshold = 2;
    config.minimum_motion_frames = 1;
    // Setup mode takes the full-diff path so scattered single pixels are
    // seen at all.
    config.setup_mode = true;

    let mut frame = ScriptedSource::uniform_buffer(W, H, 100);
    // Five isolated bright pixels, far apart.
    for &(x, y) in &[(10, 10), (60, 40), (120, 90), (200, 150), (280, 200)] {
        frame[y * W + x] = 250;
    }

    let mut src = ScriptedSource::new(W, H);
    for _ in 0..40 {
        src.push_uniform(100);
    }
    src.push_repeated(frame, 5);

    let mut rig = build_camera(config, src);
    rig.run_frames(40);
    rig.run_frames(5);

    // Without despeckle five changed pixels would beat the threshold of
    // two; the erode passes eliminate them instead.
    assert_eq!(rig.camera.ring.current().diffs, 0);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 0);
}

#[test]
fn test_labeling_filter_reports_significant_area() {
    let mut config = test_config();
    config.despeckle_filter = "l".to_string();
    config.threshold = 500;
    config.minimum_motion_frames = 1;

    let mut src = ScriptedSource::new(W, H);
    for _ in 0..40 {
        src.push_uniform(100);
    }
    // One 40x40 component (1600 px, above threshold).
    src.push_repeated(patch_frame(100, 80), 3);

    let mut rig = build_camera(config, src);
    rig.run_frames(40);
    rig.run_frames(3);

    let current = rig.camera.ring.current();
    assert_eq!(current.total_labels, 1);
    assert_eq!(current.diffs, 1600);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 1);
}

#[test]
fn test_pause_suspends_detection() {
    let mut config = test_config();
    config.minimum_motion_frames = 1;

    let mut src = ScriptedSource::new(W, H);
    for _ in 0..41 {
        src.push_uniform(100);
    }
    src.push_repeated(patch_frame(100, 80), 10);

    let mut rig = build_camera(config, src);
    rig.run_frames(40);

    let control = std::sync::Arc::clone(&rig.camera.slot.control);
    control.set(&control.pause, true);
    rig.run_frames(3);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 0);

    control.set(&control.pause, false);
    rig.run_frames(5);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 1);
}

#[test]
fn test_runtime_threshold_change_applies_at_parms_update() {
    let config = test_config();
    let mut src = ScriptedSource::new(W, H);
    for _ in 0..60 {
        src.push_uniform(100);
    }
    src.push_repeated(patch_frame(100, 80), 10);

    let mut rig = build_camera(config, src);
    rig.run_frames(40);

    // Raise the threshold above the patch's 1600 changed pixels through
    // the control surface.
    let slots = vec![rig.camera.slot.clone()];
    let response = dispatch(
        &slots,
        vigil::config::WebuiLevel::Limited,
        &ControlCommand::ConfigSet {
            camera: 1,
            param: "threshold".to_string(),
            value: "5000".to_string(),
        },
    );
    assert_eq!(response, ControlResponse::Ok("Done".to_string()));

    // The pipeline picks the change up at the next second boundary and
    // the patch no longer triggers.
    rig.run_frames(20);
    rig.run_frames(10);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 0);
    assert_eq!(rig.camera.det.threshold, 5000);
}

#[test]
fn test_ring_resize_waits_for_idle() {
    let mut config = test_config();
    config.pre_capture = 2;
    config.minimum_motion_frames = 1;
    config.event_gap = 60;

    let mut src = ScriptedSource::new(W, H);
    for _ in 0..40 {
        src.push_uniform(100);
    }
    src.push_repeated(patch_frame(100, 80), 30);
    for _ in 0..20 {
        src.push_uniform(100);
    }

    let mut rig = build_camera(config, src);
    rig.run_frames(40);
    assert_eq!(rig.camera.ring.size(), 3);

    // Enter an event, then grow the precapture at runtime.
    rig.run_frames(10);
    assert_eq!(rig.recorder.count(EventKind::FirstMotion), 1);
    rig.camera.slot.config.lock().unwrap().pre_capture = 5;

    // Mid-event the ring must keep its size.
    rig.run_frames(10);
    assert_eq!(rig.camera.ring.size(), 3);

    // After the event closes the resize goes through.
    rig.run_frames(20);
    rig.clock.advance_secs(61);
    rig.run_frames(10);
    assert_eq!(rig.recorder.count(EventKind::EndMotion), 1);
    assert_eq!(rig.camera.ring.size(), 6);
}
