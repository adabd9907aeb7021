use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use vigil::config::DaemonConfig;
use vigil::supervisor::{self, Supervisor};

/// Multi-camera motion detection daemon.
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Watch video sources and record motion events")]
struct Args {
    /// Configuration file (daemon parameters plus `camera` directives)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture source when running without a config file
    /// (e.g. still:frame.jpg or test:grey)
    #[arg(short, long)]
    device: Option<String>,

    /// Log filter, overrides RUST_LOG (e.g. info, vigil=debug)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run detection in setup mode with per-frame counters
    #[arg(short, long)]
    setup: bool,
}

fn load_config(args: &Args) -> Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            let mut config = DaemonConfig::default();
            config.cameras.push(vigil::CameraConfig::default());
            config
        }
    };

    if let Some(device) = &args.device {
        for cam in &mut config.cameras {
            cam.video_device = device.clone();
        }
    }
    if args.setup {
        for cam in &mut config.cameras {
            cam.setup_mode = true;
        }
    }
    if config.cameras.is_empty() {
        anyhow::bail!("no cameras configured");
    }
    Ok(config)
}

fn main() {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(filter) = &args.log_level {
        builder.parse_filters(filter);
    }
    builder.init();

    supervisor::setup_signals();

    loop {
        let config = match load_config(&args) {
            Ok(c) => c,
            Err(e) => {
                error!("{:#}", e);
                std::process::exit(1);
            }
        };

        let mut supervisor = Supervisor::new(config);
        match supervisor.run() {
            Ok(true) => {
                warn!("Restarting");
                std::thread::sleep(std::time::Duration::from_secs(2));
            }
            Ok(false) => break,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    info!("Terminating");
}
