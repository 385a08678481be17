//! Camera Acquisition CLI
//!
//! Runs a self-healing camera against the simulated SDK, reads frames and
//! reports throughput and recovery activity. Use `--fault-at` to wedge the
//! simulated camera and watch the supervisor reset and reopen it.

use camera_acquisition::{
    capture::{CaptureConfig, FileConfig},
    device::{BusResetter, MockSdk},
    metrics::{MetricsRegistry, MetricsSnapshot},
    Camera,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Command-line options. Flags override values from the config file.
#[derive(Debug, Parser)]
#[command(name = "camera-acquisition", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exposure time in milliseconds.
    #[arg(long)]
    exposure_ms: Option<f64>,

    /// Gain.
    #[arg(long)]
    gain: Option<f64>,

    /// USB vendor:product in hex, e.g. 2bdf:0102.
    #[arg(long)]
    bus_identity: Option<String>,

    /// Frames to read; 0 runs until Ctrl-C.
    #[arg(short, long)]
    frames: Option<u64>,

    /// Dequeue call at which the simulated camera wedges until a bus reset.
    #[arg(long)]
    fault_at: Option<u64>,

    /// Simulated pixel format (bgr8, rgb8, bayer_rg8, bayer_gr8, bayer_gb8, bayer_bg8).
    #[arg(long)]
    format: Option<String>,
}

fn load_config(args: &Args) -> Result<FileConfig, String> {
    let mut config = match &args.config {
        Some(path) => FileConfig::from_file(path).map_err(|e| e.to_string())?,
        None => FileConfig::default(),
    };

    let capture: &mut CaptureConfig = &mut config.capture;
    if let Some(exposure_ms) = args.exposure_ms {
        capture.exposure_ms = exposure_ms;
    }
    if let Some(gain) = args.gain {
        capture.gain = gain;
    }
    if let Some(identity) = &args.bus_identity {
        capture.bus_identity = identity.clone();
    }
    if let Some(frames) = args.frames {
        config.output.frame_count = frames;
    }
    if args.fault_at.is_some() {
        config.mock.fault_at = args.fault_at;
    }
    if let Some(format) = &args.format {
        config.mock.pixel_format = format.clone();
    }

    config.capture.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[cfg(feature = "metrics")]
type MetricsHandle = Arc<tokio::sync::RwLock<camera_acquisition::metrics::MetricsState>>;

#[cfg(feature = "metrics")]
fn spawn_metrics_server(port: u16) -> Option<MetricsHandle> {
    use camera_acquisition::metrics::{MetricsServer, MetricsServerConfig};

    if port == 0 {
        return None;
    }
    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            return None;
        }
    };
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();

    let spawned = std::thread::Builder::new()
        .name("metrics".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Metrics runtime failed: {}", e);
                    return;
                }
            };
            if let Err(e) = runtime.block_on(server.run()) {
                warn!("Metrics server stopped: {}", e);
            }
        });

    match spawned {
        Ok(_) => Some(state),
        Err(e) => {
            warn!("Metrics thread failed: {}", e);
            None
        }
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    info!("Camera Acquisition v{}", camera_acquisition::VERSION);
    info!(
        format = %config.mock.pixel_format,
        width = config.mock.width,
        height = config.mock.height,
        "Using simulated camera"
    );

    let sdk = MockSdk::new(&config.mock);
    let resetter = config
        .capture
        .identity()
        .map(|identity| Arc::new(sdk.bus(identity)) as Arc<dyn BusResetter>);

    let camera = match Camera::new(config.capture.clone(), Arc::new(sdk), resetter) {
        Ok(camera) => camera,
        Err(e) => {
            eprintln!("Failed to start camera: {}", e);
            std::process::exit(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            warn!("Ctrl-C handler not installed: {}", e);
        }
    }

    #[cfg(feature = "metrics")]
    let metrics_state = spawn_metrics_server(config.output.metrics_port);

    let registry = MetricsRegistry::new().ok();
    let target = config.output.frame_count;
    let started = Instant::now();
    let mut window_start = Instant::now();
    let mut window_frames = 0u64;
    let mut frames = 0u64;

    while !stop.load(Ordering::SeqCst) && (target == 0 || frames < target) {
        // Bounded wait so Ctrl-C is honored during recovery.
        let Some(frame) = camera.read_timeout(Duration::from_millis(500)) else {
            continue;
        };
        frames += 1;
        window_frames += 1;

        if frame.image().is_empty() {
            warn!(sequence = frame.sequence(), "Empty frame");
        }

        let elapsed = window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let status = camera.status();
            info!(
                fps = window_frames as f64 / elapsed.as_secs_f64(),
                frames,
                session = ?status.session,
                recoveries = status.recoveries,
                bus_resets = status.bus_resets,
                "Streaming"
            );

            let snapshot = MetricsSnapshot::from(&status);
            if let Some(registry) = &registry {
                registry.update(&snapshot);
            }
            #[cfg(feature = "metrics")]
            if let Some(state) = &metrics_state {
                state.blocking_write().update(&snapshot);
            }

            window_start = Instant::now();
            window_frames = 0;
        }
    }

    let status = camera.status();
    info!(
        "Read {} frames in {:.1}s: {} stream faults, {} recoveries, {} bus resets",
        frames,
        started.elapsed().as_secs_f64(),
        status.stream_faults,
        status.recoveries,
        status.bus_resets
    );
    if let Some(last) = status.last_recovery {
        info!("Last recovery at {}", last.to_rfc3339());
    }
    if let Some(registry) = &registry {
        registry.update(&MetricsSnapshot::from(&status));
        if let Ok(text) = registry.encode() {
            tracing::debug!("Final metrics:\n{}", text);
        }
    }

    camera.shutdown();
    info!("Done");
}
