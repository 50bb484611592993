//! Spatial-reality multi-display runtime: entry point.
//!
//! Loads the settings record, wires the coordinator to its collaborators and
//! drives it from a tokio frame loop until Ctrl-C or the frame budget ends.
//!
//! # Usage
//!
//! ```text
//! srd-runtime [OPTIONS] [COMMAND]
//!
//! Commands:
//!   run     Bring up the configured topology and keep it synchronized (default)
//!   probe   Claim up to N devices at once, report, and release them
//!
//! Options:
//!   --config <PATH>     Settings file [env: SRD_CONFIG]
//!   --simulate          Emulate the layout on a single device
//!   --mode <MODE>       single | horizontal_row | vertical_stack | grid
//!   --devices <N>       Requested device count (clamped to the mode's bounds)
//!   --frames <N>        Stop after N frames
//! ```
//!
//! On unix, `SIGHUP` re-reads the settings file; a changed topology or device
//! count takes effect on the next frame.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load AppConfig (TOML) + CLI overrides
//!  └─ SessionAllocator ── SimulatedSessionBackend
//!  └─ MultiDisplayCoordinator ── SimulatedDisplayPlatform, GeometryTable
//!  └─ run_frame_loop (tokio interval, Ctrl-C aware)
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use srd_core::{GeometryTable, HardwareAvailability, SessionAllocator, TopologyMode};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use srd_runtime::application::coordinator::MultiDisplayCoordinator;
use srd_runtime::application::settings::DisplaySettings;
use srd_runtime::infrastructure::frame_loop::{run_frame_loop, FrameLoopOptions};
use srd_runtime::infrastructure::platform::SimulatedDisplayPlatform;
use srd_runtime::infrastructure::session_backend::SimulatedSessionBackend;
use srd_runtime::infrastructure::storage::config::{self, AppConfig, NoDeviceBehavior};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Spatial-reality multi-display runtime.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "srd-runtime",
    about = "Drives one or more spatial-reality displays as a single viewport",
    version
)]
struct Cli {
    /// Settings file.  Defaults to the platform config directory.
    #[arg(long, env = "SRD_CONFIG")]
    config: Option<PathBuf>,

    /// Emulate the configured layout on a single device.
    #[arg(long)]
    simulate: bool,

    /// Topology override.
    #[arg(long, value_parser = parse_mode)]
    mode: Option<TopologyMode>,

    /// Requested device count override.
    #[arg(long)]
    devices: Option<usize>,

    /// Stop after this many frames.
    #[arg(long, env = "SRD_FRAMES")]
    frames: Option<u64>,

    /// Yaw the primary at this many radians per second to exercise syncing.
    #[arg(long, default_value_t = 0.0)]
    orbit_speed: f32,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Bring up the configured topology and keep it synchronized.
    Run,
    /// Claim up to `max` devices in one batch, report the result, release them.
    Probe {
        #[arg(long, default_value_t = 4)]
        max: usize,
    },
}

fn parse_mode(value: &str) -> Result<TopologyMode, String> {
    TopologyMode::ALL
        .into_iter()
        .find(|mode| mode.to_string() == value)
        .ok_or_else(|| {
            format!("unknown topology `{value}` (expected single, horizontal_row, vertical_stack or grid)")
        })
}

impl Cli {
    /// Loads the settings file and applies command-line overrides.
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => config::load_config().context("loading config")?,
        };
        if self.simulate {
            cfg.runtime.simulate = true;
        }
        if let Some(mode) = self.mode {
            cfg.display.mode = mode;
        }
        if let Some(devices) = self.devices {
            cfg.display.device_count = devices;
        }
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = cli.load_config()?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.runtime.log_level)),
        )
        .init();

    info!(mode = %cfg.display.mode, simulate = cfg.runtime.simulate, "srd-runtime starting");

    let backend = Arc::new(SimulatedSessionBackend::new(cfg.simulator.clone()));
    let allocator = Arc::new(SessionAllocator::new(backend, HardwareAvailability::new()));

    match &cli.command {
        Some(Command::Probe { max }) => probe(&allocator, *max),
        Some(Command::Run) | None => run(&cli, cfg, allocator).await,
    }
}

fn probe(allocator: &SessionAllocator, max: usize) -> anyhow::Result<()> {
    let batch = allocator
        .allocate_multiple(max)
        .context("no display device could be claimed")?;
    info!(
        started = batch.sessions.len(),
        requested = batch.requested,
        unavailable = batch.unavailable_slots(),
        "device probe finished"
    );
    for session in &batch.sessions {
        info!(session = %session.id(), state = ?session.state(), "probed session");
    }
    if let Some(err) = &batch.failure {
        warn!(%err, "probe stopped early");
    }
    // Dropping the batch releases every session.
    Ok(())
}

async fn run(cli: &Cli, cfg: AppConfig, allocator: Arc<SessionAllocator>) -> anyhow::Result<()> {
    let platform = Arc::new(SimulatedDisplayPlatform::new(cfg.simulator.devices));
    let mut coordinator = MultiDisplayCoordinator::new(
        Arc::clone(&allocator),
        platform,
        Arc::new(GeometryTable::standard()),
        cfg.runtime.manager_name.clone(),
    );

    let settings = cfg.display_settings();
    coordinator.start(&settings).context("starting coordinator")?;

    if !allocator.availability().is_available() && coordinator.active_slot_count() == 0 {
        match cfg.display.no_device_behavior {
            NoDeviceBehavior::Continue => warn!("no display device available; continuing without one"),
            NoDeviceBehavior::Quit => {
                coordinator.shutdown();
                bail!("no display device available");
            }
        }
    }

    // Shutdown flag cleared by Ctrl-C.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    });

    // The loop reads the latest snapshot every frame; SIGHUP publishes a new one.
    let (settings_tx, settings_rx) = watch::channel(settings);
    spawn_settings_reload(cli.clone(), settings_tx);
    let options = FrameLoopOptions {
        frame_rate_hz: cfg.runtime.frame_rate_hz,
        max_frames: cli.frames,
        orbit_speed_rad_per_sec: cli.orbit_speed,
        ..FrameLoopOptions::default()
    };

    info!("srd-runtime ready.  Press Ctrl-C to exit.");
    let summary = run_frame_loop(&mut coordinator, settings_rx, &options, running)
        .await
        .context("frame loop failed")?;

    info!(
        frames = summary.frames,
        slots = summary.active_slots,
        state = ?summary.final_state,
        "srd-runtime stopped"
    );
    Ok(())
}

// ── Settings reload ───────────────────────────────────────────────────────────

/// Re-reads the settings file (with CLI overrides) and publishes the snapshot.
///
/// On error the previous snapshot stays in effect.
fn reload_settings(cli: &Cli, settings_tx: &watch::Sender<DisplaySettings>) -> anyhow::Result<()> {
    let cfg = cli.load_config()?;
    info!(
        mode = %cfg.display.mode,
        devices = cfg.display.device_count,
        "settings reloaded"
    );
    settings_tx.send_replace(cfg.display_settings());
    Ok(())
}

#[cfg(unix)]
fn spawn_settings_reload(cli: Cli, settings_tx: watch::Sender<DisplaySettings>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!("failed to listen for SIGHUP: {e}");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            if let Err(e) = reload_settings(&cli, &settings_tx) {
                warn!("settings reload failed, keeping previous settings: {e:#}");
            }
        }
    });
}

/// Without SIGHUP the initial snapshot stays in effect for the whole run.
#[cfg(not(unix))]
fn spawn_settings_reload(_cli: Cli, _settings_tx: watch::Sender<DisplaySettings>) {
    tracing::debug!("settings reload on signal is unavailable on this platform");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
