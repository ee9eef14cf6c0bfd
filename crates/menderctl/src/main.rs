//! Mender Control - one-shot remediation from the command line
//!
//! Runs the same engine as the daemon against the configured targets, with
//! live event output.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mender_common::config::RetryStrategy;
use mender_common::{EventBus, MenderConfig};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "menderctl")]
#[command(about = "Mender - autonomous remediation workflow", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Config file (overrides $MENDER_CONFIG and /etc/mender/config.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Debug logging to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one remediation workflow to a terminal state
    Run {
        /// Override workflow.max_retries
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_retries: Option<u32>,

        /// Re-execute the same plan after a rollback instead of re-triaging
        #[arg(long)]
        reuse_plan: bool,

        /// Print the final report as JSON only
        #[arg(long)]
        json: bool,
    },

    /// Capture telemetry and diagnose without acting
    Triage {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Run the validation checks once, without settle delay
    Validate {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    let config = MenderConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            max_retries,
            reuse_plan,
            json,
        } => run(&config, max_retries, reuse_plan, json).await,
        Commands::Triage { json } => triage(&config, json).await,
        Commands::Validate { json } => validate(&config, json).await,
        Commands::Config { action } => match action {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
            ConfigCommands::Check => {
                // load() already validated
                println!(
                    "{} {} targets, gateway {}",
                    "[OK]".bright_green(),
                    config.targets.len(),
                    config
                        .gateway_target()
                        .map(|t| t.name.as_str())
                        .unwrap_or("-")
                );
                Ok(())
            }
        },
    }
}

async fn run(config: &MenderConfig, max_retries: Option<u32>, reuse_plan: bool, json: bool) -> Result<()> {
    let bus = Arc::new(EventBus::new());
    if !json {
        bus.subscribe_fn("console", |event| {
            println!("{}", output::event_line(event));
            Ok(())
        });
    }

    let mut engine = menderd::build_engine(config, bus)?;
    if let Some(n) = max_retries {
        engine = engine.with_max_retries(n);
    }
    if reuse_plan {
        engine = engine.with_retry_strategy(RetryStrategy::ReusePlan);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let report = engine.run(&cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        print!("{}", output::render_report(&report));
    }

    if !report.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}

async fn triage(config: &MenderConfig, json: bool) -> Result<()> {
    let engine = menderd::build_engine(config, Arc::new(EventBus::new()))?;
    let (snapshot, diagnosis) = engine.triage_only().await;

    if json {
        let value = serde_json::json!({
            "snapshot": snapshot,
            "diagnosis": diagnosis,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", output::render_triage(snapshot.as_ref(), &diagnosis));
    }
    Ok(())
}

async fn validate(config: &MenderConfig, json: bool) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.telemetry.request_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;
    let validator = menderd::build_validator(config, menderd::docker::DockerCli::new(), http);
    let verdict = validator.run_checks().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        println!("[VALIDATION] {}", if verdict.is_healthy() {
            "healthy".bright_green().to_string()
        } else {
            "degraded".bright_red().to_string()
        });
        print!("{}", output::render_verdict(&verdict));
    }

    if !verdict.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}
