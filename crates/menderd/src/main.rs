//! Mender Daemon - periodic remediation runs
//!
//! Runs the workflow every `daemon.interval_secs` until Ctrl-C. Ctrl-C cancels
//! the in-flight run at its next phase boundary.

use anyhow::{Context, Result};
use clap::Parser;
use mender_common::bus::{ChannelSubscriber, JsonlSubscriber, TracingSubscriber};
use mender_common::{EventBus, MenderConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "menderd")]
#[command(about = "Mender - autonomous remediation daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (overrides $MENDER_CONFIG and /etc/mender/config.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run a single workflow and exit (non-zero if not healed)
    #[arg(long)]
    once: bool,

    /// Debug logging (RUST_LOG still wins when set)
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!("[BOOT] Mender daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = MenderConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    info!("[BOOT] Managing {} targets", config.targets.len());

    let cancel = CancellationToken::new();
    let bus = Arc::new(EventBus::new());
    bus.subscribe(Arc::new(TracingSubscriber));

    if let Some(path) = &config.daemon.event_log {
        let sink = JsonlSubscriber::open(path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;
        bus.subscribe(Arc::new(sink));
        info!("[BOOT] Event log at {}", path.display());
    }

    let forwarder = config.daemon.dashboard_url.as_deref().map(|url| {
        let (subscriber, rx) = ChannelSubscriber::channel();
        bus.subscribe(Arc::new(subscriber));
        menderd::dashboard::spawn_forwarder(url, rx, cancel.clone())
    });

    let engine = menderd::build_engine(&config, bus)?;

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current phase");
            ctrl_c.cancel();
        }
    });

    info!("[READY] Mender operational");

    let interval = Duration::from_secs(config.daemon.interval_secs);
    let mut last_healthy = true;
    loop {
        match engine.run(&cancel).await {
            Ok(report) => {
                last_healthy = report.is_healthy();
                info!(
                    "Run {} finished: {} ({}) after {} attempt(s) in {}ms",
                    report.run_id,
                    report.terminal,
                    report.status,
                    report.attempts,
                    report.duration_ms()
                );
                if let Some(note) = &report.unconfirmed {
                    warn!("Run {} ended without confirming health: {}", report.run_id, note);
                } else if !last_healthy {
                    warn!("Run {} did not heal the system", report.run_id);
                }
            }
            Err(e) => {
                last_healthy = false;
                error!("Run aborted: {}", e);
            }
        }

        if args.once || cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    cancel.cancel();
    if let Some(handle) = forwarder {
        let _ = handle.await;
    }
    info!("Shutting down gracefully");

    if args.once && !last_healthy {
        std::process::exit(1);
    }
    Ok(())
}
