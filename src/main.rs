// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use scanner::Config;
use scanner::backends::{CaptureBackendType, DetectionType};
use scanner::session::VideoGravity;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "scanner")]
#[command(about = "Scan QR codes from a camera or image files")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the scanning commands
#[derive(clap::Args)]
struct ScanArgs {
    /// Exit after the first batch with detections
    #[arg(long)]
    once: bool,

    /// Stop scanning after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Symbologies to scan for (comma separated, e.g. "qr,micro_qr")
    #[arg(long, value_delimiter = ',')]
    types: Vec<DetectionType>,

    /// Scan the whole frame instead of the centered interest square
    #[arg(long)]
    full_frame: bool,

    /// Preview scaling used to map the interest square (fill, fit, stretch)
    #[arg(long)]
    gravity: Option<VideoGravity>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available capture devices
    List,

    /// Scan from a V4L2 camera
    Scan {
        /// Device path (default: first capture device)
        #[arg(short, long)]
        device: Option<String>,

        /// Switch the torch on while scanning
        #[arg(long)]
        torch: bool,

        #[command(flatten)]
        args: ScanArgs,
    },

    /// Scan image files through the virtual camera
    Files {
        /// Image files or directories of images
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Milliseconds between frames
        #[arg(long)]
        interval: Option<u64>,

        #[command(flatten)]
        args: ScanArgs,
    },
}

impl ScanArgs {
    fn into_options(self, config: &Config, torch: bool) -> cli::ScanOptions {
        cli::ScanOptions {
            once: self.once,
            timeout: self.timeout.map(std::time::Duration::from_secs),
            detection_types: if self.types.is_empty() {
                config.detection_types.clone()
            } else {
                self.types
            },
            full_frame: self.full_frame,
            gravity: self.gravity.unwrap_or(config.video_gravity),
            torch,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=scanner=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load();

    match cli.command {
        Commands::List => cli::list_devices(&config),
        Commands::Scan {
            device,
            torch,
            args,
        } => {
            if config.backend == CaptureBackendType::Virtual {
                return Err("the virtual backend replays files, use `scanner files`".into());
            }
            if device.is_some() {
                config.preferred_device = device;
            }
            let options = args.into_options(&config, torch);
            cli::scan_camera(&config, options)
        }
        Commands::Files {
            paths,
            interval,
            args,
        } => {
            if let Some(interval) = interval {
                config.frame_interval_ms = interval;
            }
            let options = args.into_options(&config, false);
            cli::scan_files(&config, &paths, options)
        }
    }
}
