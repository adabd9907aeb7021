//! # vigil
//!
//! A multi-camera motion-detection daemon. For each configured video
//! source it captures frames continuously, detects pixel-level motion
//! against an adaptive reference frame, and - when motion is confirmed -
//! emits still images, video frames and timelapse ticks to a recorder
//! collaborator while keeping a webcontrol surface informed.
//!
//! ## Architecture
//!
//! One process supervises N independent camera pipelines:
//!
//! ```text
//! ┌────────────┐   frames   ┌──────────────────┐   events   ┌──────────┐
//! │ Capture    │──────────▶│ CameraPipeline    │──────────▶│ Recorder │
//! │ (V4L2/net/ │           │  ring buffer      │           │ (movies, │
//! │  still)    │           │  diff + masks     │           │  stills, │
//! └────────────┘           │  event machine    │           │  scripts)│
//!                          └──────────────────┘           └──────────┘
//!                                  ▲    │ status/stream
//!                          intents │    ▼
//!                          ┌──────────────────┐
//!                          │ Supervisor +     │
//!                          │ control surface  │
//!                          └──────────────────┘
//! ```
//!
//! - Each camera runs on its own OS thread; pipelines share nothing but
//!   the process. The detection path is strictly CPU-bound between
//!   capture and the pacing sleep.
//! - The supervisor starts the threads, decrements per-camera watchdogs
//!   once per second, escalates hung pipelines from graceful stop to
//!   thread cancellation, and routes process signals.
//! - The control surface flips atomic intents (snapshot, pause, event
//!   stop, ...) that each pipeline reads at fixed points in its loop;
//!   configuration writes become visible at the once-per-second
//!   parameter re-read.
//!
//! ## Detection model
//!
//! Frames are differenced against an adaptive reference frame that slowly
//! absorbs scene changes but excludes moving objects until they have been
//! static for a configurable time. Noise and threshold levels auto-tune;
//! a smart mask learns chronically restless pixels (wind in trees) and
//! suppresses them; despeckle morphology and connected-component labeling
//! remove speckle noise. Sudden scene-wide changes (lights switching on)
//! cancel detection instead of triggering it.
//!
//! Confirmed motion opens an *event*: the precapture ring is recruited so
//! recordings start before the trigger, frames stream to the recorder
//! while motion lasts plus a postcapture tail, and the event closes after
//! a configurable quiet gap.

pub mod alg;
pub mod capture;
pub mod config;
pub mod control;
pub mod draw;
pub mod error;
pub mod filename;
pub mod image;
pub mod mask;
pub mod pipeline;
pub mod recorder;
pub mod ring;
pub mod stream;
pub mod supervisor;
pub mod track;
pub mod webcontrol;

pub use config::{CameraConfig, DaemonConfig};
pub use error::{DaemonError, DaemonResult};
pub use pipeline::Camera;
pub use supervisor::Supervisor;
