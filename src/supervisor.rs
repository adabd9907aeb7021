//! # Supervisor
//!
//! Owns the set of camera pipelines: starts one detached worker thread per
//! camera, runs the once-per-second watchdog loop, routes process signals
//! to per-camera control intents, and coordinates shutdown and restart.
//!
//! ## Watchdog contract
//!
//! Every pipeline iteration resets its watchdog counter to
//! [`WATCHDOG_TMO`]; the supervisor decrements it once per second. At zero
//! the pipeline is asked to stop gracefully (`event_stop` + `finish`). If
//! it keeps counting down to [`WATCHDOG_KILL`] the thread is cancelled,
//! and below that the supervisor keeps sending a benign wakeup signal to
//! break the thread (or its capture helper) out of a blocking call until
//! the thread is confirmed dead, at which point its state is cleaned and
//! `running` cleared. A hung camera never takes the others down with it.
//!
//! ## Signals
//!
//! - `SIGALRM` - snapshot on every camera with a snapshot interval
//! - `SIGUSR1` - end the running event on every camera
//! - `SIGHUP` - full restart (config re-read); pid file is kept
//! - `SIGINT` / `SIGQUIT` / `SIGTERM` - graceful shutdown
//! - `SIGCHLD` / `SIGPIPE` - reaped / ignored
//! - `SIGVTALRM` - no-op handler, installed so watchdog wakeups make
//!   blocking syscalls return `EINTR`

use crate::capture;
use crate::config::{DaemonConfig, MAX_CAMERA_ID, WebuiLevel};
use crate::control::CameraSlot;
use crate::error::DaemonResult;
use crate::pipeline::{Camera, SystemClock};
use crate::recorder::{ChannelRecorder, spawn_log_drain};
use crate::track::NullTracker;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Seconds a pipeline may go without petting its watchdog.
pub const WATCHDOG_TMO: i32 = 30;

/// Watchdog value at which the thread is forcibly cancelled.
pub const WATCHDOG_KILL: i32 = -10;

/// Process-wide signal flags. Signal handlers only flip these; all real
/// work happens in the supervisor loop.
static SIG_SNAPSHOT: AtomicBool = AtomicBool::new(false);
static SIG_EVENT_STOP: AtomicBool = AtomicBool::new(false);
static SIG_FINISH: AtomicBool = AtomicBool::new(false);
static SIG_RESTART: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(signo: libc::c_int) {
    match signo {
        libc::SIGALRM => SIG_SNAPSHOT.store(true, Ordering::Relaxed),
        libc::SIGUSR1 => SIG_EVENT_STOP.store(true, Ordering::Relaxed),
        libc::SIGHUP => {
            SIG_RESTART.store(true, Ordering::Relaxed);
            SIG_FINISH.store(true, Ordering::Relaxed);
        }
        libc::SIGINT | libc::SIGQUIT | libc::SIGTERM => {
            SIG_FINISH.store(true, Ordering::Relaxed);
        }
        _ => {}
    }
}

extern "C" fn handle_wakeup(_signo: libc::c_int) {
    // Installed for SIGVTALRM so pthread_kill interrupts blocking calls.
}

extern "C" fn handle_sigchld(_signo: libc::c_int) {
    unsafe {
        while libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) > 0 {}
    }
}

/// Install the daemon's signal handlers.
pub fn setup_signals() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        action.sa_sigaction = handle_signal as libc::sighandler_t;
        for sig in [
            libc::SIGALRM,
            libc::SIGUSR1,
            libc::SIGHUP,
            libc::SIGINT,
            libc::SIGQUIT,
            libc::SIGTERM,
        ] {
            libc::sigaction(sig, &action, std::ptr::null_mut());
        }

        action.sa_sigaction = handle_sigchld as libc::sighandler_t;
        libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGPIPE, &action, std::ptr::null_mut());

        // The wakeup signal must interrupt syscalls, so no SA_RESTART.
        action.sa_flags = 0;
        action.sa_sigaction = handle_wakeup as libc::sighandler_t;
        libc::sigaction(libc::SIGVTALRM, &action, std::ptr::null_mut());
    }
}

struct Worker {
    slot: CameraSlot,
    handle: Option<JoinHandle<()>>,
    /// Raw pthread id for wakeup signals while the thread runs.
    pthread: Option<libc::pthread_t>,
}

/// The daemon supervisor: camera table, worker threads, watchdog.
pub struct Supervisor {
    workers: Vec<Worker>,
    pid_file: String,
    pub webui_level: WebuiLevel,
}

impl Supervisor {
    /// Build the camera table from configuration, resolving duplicate or
    /// out-of-range camera ids to the thread index.
    pub fn new(mut config: DaemonConfig) -> Self {
        let mut seen = HashSet::new();
        for (index, cam) in config.cameras.iter_mut().enumerate() {
            let fallback = index as i32 + 1;
            if cam.camera_id <= 0
                || cam.camera_id > MAX_CAMERA_ID
                || !seen.insert(cam.camera_id)
            {
                if cam.camera_id != 0 {
                    warn!(
                        "Camera id {} invalid or already in use; using {}",
                        cam.camera_id, fallback
                    );
                }
                cam.camera_id = fallback;
                seen.insert(fallback);
            }
            if cam.camera_name.is_empty() {
                cam.camera_name = format!("camera{}", cam.camera_id);
            }
        }

        let workers = config
            .cameras
            .into_iter()
            .map(|cam| Worker {
                slot: CameraSlot::new(cam, WATCHDOG_TMO),
                handle: None,
                pthread: None,
            })
            .collect();

        Self {
            workers,
            pid_file: config.pid_file,
            webui_level: WebuiLevel::Limited,
        }
    }

    /// Control-surface view of the camera table.
    pub fn slots(&self) -> Vec<CameraSlot> {
        self.workers.iter().map(|w| w.slot.clone()).collect()
    }

    fn start_worker(worker: &mut Worker) {
        let slot = worker.slot.clone();
        let control = &slot.control;
        control.set(&control.restart, true);
        control.pet_watchdog(WATCHDOG_TMO);
        // Flag running before the thread does, so the supervisor loop
        // cannot double-start the camera.
        control.set(&control.running, true);

        let thread_slot = slot.clone();
        let builder =
            std::thread::Builder::new().name(format!("camera-{}", slot.id));
        let spawned = builder.spawn(move || {
            let conf = thread_slot.config.lock().unwrap().clone();
            let source = match capture::open_source(&conf) {
                Ok(s) => s,
                Err(e) => {
                    error!("Camera {}: {}", thread_slot.id, e);
                    let c = &thread_slot.control;
                    // Init failures don't restart until config changes.
                    c.set(&c.restart, false);
                    c.set(&c.running, false);
                    return;
                }
            };
            let (recorder, rx) = ChannelRecorder::new(256);
            let _drain = spawn_log_drain(rx);

            match Camera::new(
                thread_slot.clone(),
                source,
                Box::new(recorder),
                Box::new(NullTracker),
                Box::new(SystemClock),
            ) {
                Ok(mut camera) => camera.run(),
                Err(e) => {
                    error!("Camera {}: init failed: {}", thread_slot.id, e);
                    let c = &thread_slot.control;
                    c.set(&c.restart, false);
                    c.set(&c.running, false);
                }
            }
        });

        match spawned {
            Ok(handle) => {
                use std::os::unix::thread::JoinHandleExt;
                worker.pthread = Some(handle.as_pthread_t());
                worker.handle = Some(handle);
            }
            Err(e) => {
                error!("Camera {}: could not start thread: {}", slot.id, e);
                control.set(&control.running, false);
            }
        }
    }

    /// One watchdog pass for one worker. Exposed for tests; the run loop
    /// calls it once per second per camera.
    fn watchdog(worker: &mut Worker) {
        let control = &worker.slot.control;
        if !control.get(&control.running) {
            return;
        }

        let value = control.watchdog.fetch_sub(1, Ordering::AcqRel) - 1;

        if value == 0 {
            error!(
                "Camera {}: watchdog timeout, trying a graceful restart",
                worker.slot.id
            );
            control.set(&control.event_stop, true);
            control.set(&control.finish, true);
        }

        if value == WATCHDOG_KILL {
            error!(
                "Camera {}: watchdog timeout did not stop the thread, killing it",
                worker.slot.id
            );
            if let Some(pthread) = worker.pthread {
                unsafe {
                    libc::pthread_cancel(pthread);
                }
            }
        }

        if value < WATCHDOG_KILL {
            let finished = worker.handle.as_ref().is_none_or(|h| h.is_finished());
            if finished {
                info!("Camera {}: cleaning cancelled thread", worker.slot.id);
                worker.handle = None;
                worker.pthread = None;
                control.set(&control.running, false);
                control.set(&control.finish, false);
            } else if let Some(pthread) = worker.pthread {
                // Keep poking until the blocking call returns.
                unsafe {
                    libc::pthread_kill(pthread, libc::SIGVTALRM);
                }
            }
        }
    }

    fn route_signal_flags(&self) {
        if SIG_SNAPSHOT.swap(false, Ordering::Relaxed) {
            for w in &self.workers {
                let interval = w.slot.config.lock().unwrap().snapshot_interval;
                if interval != 0 {
                    let c = &w.slot.control;
                    c.set(&c.snapshot, true);
                }
            }
        }
        if SIG_EVENT_STOP.swap(false, Ordering::Relaxed) {
            for w in &self.workers {
                let c = &w.slot.control;
                c.set(&c.event_stop, true);
            }
        }
        if SIG_FINISH.swap(false, Ordering::Relaxed) {
            let restart = SIG_RESTART.load(Ordering::Relaxed);
            for w in &self.workers {
                let c = &w.slot.control;
                c.set(&c.event_stop, true);
                c.set(&c.finish, true);
                // Individual threads restart only on a global restart.
                c.set(&c.restart, restart);
            }
        }
    }

    fn any_running(&self) -> bool {
        self.workers.iter().any(|w| {
            let c = &w.slot.control;
            c.get(&c.running) || c.get(&c.restart)
        })
    }

    fn write_pid_file(&self) {
        if self.pid_file.is_empty() {
            return;
        }
        match std::fs::write(&self.pid_file, format!("{}\n", std::process::id())) {
            Ok(()) => info!("Created process id file {}", self.pid_file),
            Err(e) => error!("Cannot create process id file {}: {}", self.pid_file, e),
        }
    }

    fn remove_pid_file(&self) {
        if self.pid_file.is_empty() || SIG_RESTART.load(Ordering::Relaxed) {
            return;
        }
        match std::fs::remove_file(&self.pid_file) {
            Ok(()) => info!("Removed process id file"),
            Err(e) => error!("Error removing pid file: {}", e),
        }
    }

    /// Run the daemon until every pipeline has stopped. Returns true when
    /// a SIGHUP restart was requested so the caller can re-read
    /// configuration and run again.
    pub fn run(&mut self) -> DaemonResult<bool> {
        SIG_RESTART.store(false, Ordering::Relaxed);
        self.write_pid_file();

        for worker in &mut self.workers {
            info!(
                "Camera id {} name '{}' device '{}'",
                worker.slot.id,
                worker.slot.name,
                worker.slot.config.lock().unwrap().video_device
            );
            Self::start_worker(worker);
        }

        info!(
            "Waiting for threads to finish, pid: {}",
            std::process::id()
        );

        loop {
            std::thread::sleep(Duration::from_secs(1));
            self.route_signal_flags();

            if !self.any_running() {
                break;
            }

            for worker in &mut self.workers {
                let control = &worker.slot.control;
                let running = control.get(&control.running);
                let restart = control.get(&control.restart);
                if !running && restart && !SIG_FINISH.load(Ordering::Relaxed) {
                    info!("Camera {} restart", worker.slot.id);
                    Self::start_worker(worker);
                }
                Self::watchdog(worker);
            }
        }

        info!("Threads finished");
        self.remove_pid_file();
        Ok(SIG_RESTART.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;

    fn config_with_ids(ids: &[i32]) -> DaemonConfig {
        DaemonConfig {
            pid_file: String::new(),
            cameras: ids
                .iter()
                .map(|&id| CameraConfig {
                    camera_id: id,
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_duplicate_camera_ids_fall_back_to_index() {
        let sup = Supervisor::new(config_with_ids(&[5, 5, 40_000]));
        let ids: Vec<i32> = sup.slots().iter().map(|s| s.id).collect();
        assert_eq!(ids[0], 5);
        assert_eq!(ids[1], 2);
        assert_eq!(ids[2], 3);
    }

    #[test]
    fn test_default_names_assigned() {
        let sup = Supervisor::new(config_with_ids(&[7]));
        assert_eq!(sup.slots()[0].name, "camera7");
    }

    #[test]
    fn test_watchdog_escalation_path() {
        let mut config = config_with_ids(&[1]);
        config.cameras[0].video_device = "test:grey".to_string();
        let sup = Supervisor::new(config);
        let mut worker = Worker {
            slot: sup.slots()[0].clone(),
            handle: None,
            pthread: None,
        };
        let control = std::sync::Arc::clone(&worker.slot.control);
        control.set(&control.running, true);
        control.watchdog.store(1, Ordering::Relaxed);

        // First tick reaches zero: graceful stop requested.
        Supervisor::watchdog(&mut worker);
        assert!(control.get(&control.event_stop));
        assert!(control.get(&control.finish));
        assert!(control.get(&control.running));

        // Count down through the kill threshold; with no live thread the
        // cleanup pass clears the running flag.
        for _ in 0..(-WATCHDOG_KILL + 1) {
            Supervisor::watchdog(&mut worker);
        }
        assert!(!control.get(&control.running));
        assert!(!control.get(&control.finish));
    }
}
