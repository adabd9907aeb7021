//! Supervisor scenarios with real worker threads: graceful shutdown and
//! snapshot routing, driven through the shared control state the way the
//! signal handlers and webcontrol do it.

use std::time::{Duration, Instant};
use vigil::config::{CameraConfig, DaemonConfig};
use vigil::supervisor::Supervisor;
use vigil::webcontrol::{ControlAction, ControlCommand, dispatch};

fn daemon_config(cameras: usize) -> DaemonConfig {
    DaemonConfig {
        pid_file: String::new(),
        cameras: (0..cameras)
            .map(|i| CameraConfig {
                camera_id: i as i32 + 1,
                video_device: "test:grey".to_string(),
                framerate: 10,
                ..Default::default()
            })
            .collect(),
    }
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn test_graceful_shutdown_stops_all_pipelines() {
    let mut supervisor = Supervisor::new(daemon_config(2));
    let slots = supervisor.slots();

    let runner = std::thread::spawn(move || supervisor.run());

    // Both pipelines come up.
    assert!(wait_until(Duration::from_secs(10), || {
        slots.iter().all(|s| s.control.get(&s.control.running))
    }));

    // Quit everything through the control surface.
    let response = dispatch(
        &slots,
        vigil::config::WebuiLevel::Limited,
        &ControlCommand::Action {
            camera: 0,
            action: ControlAction::Quit,
        },
    );
    assert!(matches!(response, vigil::webcontrol::ControlResponse::Ok(_)));

    let restart = runner.join().expect("supervisor thread").expect("run");
    assert!(!restart);
    for slot in &slots {
        assert!(!slot.control.get(&slot.control.running));
    }
}

#[test]
fn test_one_camera_quit_leaves_others_running() {
    let mut supervisor = Supervisor::new(daemon_config(2));
    let slots = supervisor.slots();

    let runner = std::thread::spawn(move || supervisor.run());

    assert!(wait_until(Duration::from_secs(10), || {
        slots.iter().all(|s| s.control.get(&s.control.running))
    }));

    dispatch(
        &slots,
        vigil::config::WebuiLevel::Limited,
        &ControlCommand::Action {
            camera: 1,
            action: ControlAction::Quit,
        },
    );

    assert!(wait_until(Duration::from_secs(10), || {
        !slots[0].control.get(&slots[0].control.running)
    }));
    assert!(slots[1].control.get(&slots[1].control.running));

    // Shut the rest down.
    dispatch(
        &slots,
        vigil::config::WebuiLevel::Limited,
        &ControlCommand::Action {
            camera: 0,
            action: ControlAction::Quit,
        },
    );
    runner.join().expect("supervisor thread").expect("run");
}

#[test]
fn test_snapshot_intent_reaches_pipeline() {
    let mut supervisor = Supervisor::new(daemon_config(1));
    let slots = supervisor.slots();

    let runner = std::thread::spawn(move || supervisor.run());

    assert!(wait_until(Duration::from_secs(10), || {
        slots[0].control.get(&slots[0].control.running)
    }));

    let c = &slots[0].control;
    c.set(&c.snapshot, true);

    // The pipeline consumes the intent within a loop or two.
    assert!(wait_until(Duration::from_secs(5), || {
        !c.get(&c.snapshot)
    }));

    dispatch(
        &slots,
        vigil::config::WebuiLevel::Limited,
        &ControlCommand::Action {
            camera: 0,
            action: ControlAction::Quit,
        },
    );
    runner.join().expect("supervisor thread").expect("run");
}
