//! SQL exporter service.
//!
//! Periodically executes configured SQL queries and exposes the results
//! as Prometheus metrics:
//! - scheduled collection with per-query interval and timeout
//! - gauge, counter and histogram metric families
//! - `/metrics` and `/health` HTTP endpoints
//! - one-shot collection and connectivity checks from the command line

mod connector;
mod exporter;
mod mapper;
mod routes;
mod scheduler;
mod sink;
mod state;
mod task;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use common::config::AppConfig;

use crate::exporter::Exporter;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "sql-exporter", version, about = "Execute SQL queries on a schedule and expose the results as Prometheus metrics")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "config/config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start scheduled collection and serve the metrics endpoint
    Run,
    /// Execute every query once (or one query) and report the outcomes
    Collect {
        /// Only collect the named query
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Check connectivity to every configured database
    Test,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (if present) before anything else
    load_dotenv();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.exporter.log_level.clone().into()),
        )
        .init();

    match cli.command {
        Command::Run => run(config).await,
        Command::Collect { query } => collect(config, query.as_deref()).await,
        Command::Test => test(config).await,
    }
}

/// Long-running mode: arms the schedulers and serves HTTP until Ctrl-C.
async fn run(config: AppConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.exporter.host, config.exporter.port);
    let exporter = Arc::new(Exporter::new(config)?);

    exporter.start();

    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(exporter.clone()));

    info!(address = %addr, "Serving metrics");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    exporter.stop().await;
    info!("Shutdown complete");
    Ok(())
}

/// One-shot collection. Exits non-zero when any query fails.
async fn collect(config: AppConfig, query: Option<&str>) -> anyhow::Result<()> {
    let exporter = Exporter::new(config)?;
    let outcomes = exporter.collect_once(query).await?;

    let mut failures = 0;
    for outcome in &outcomes {
        if outcome.success {
            println!(
                "  {}: ✓ {} samples from {} rows ({} ms)",
                outcome.query, outcome.samples, outcome.rows, outcome.duration_ms
            );
            if outcome.mapping_errors > 0 {
                println!(
                    "  {}: {} rows skipped during mapping",
                    outcome.query, outcome.mapping_errors
                );
            }
        } else {
            failures += 1;
            println!(
                "  {}: ✗ {}",
                outcome.query,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} queries failed", failures, outcomes.len());
    }
    Ok(())
}

/// Connectivity check for every configured database. Exits non-zero when
/// any database is unreachable.
async fn test(config: AppConfig) -> anyhow::Result<()> {
    let exporter = Exporter::new(config)?;
    let outcomes = exporter.test_connectivity().await;

    let mut failures = 0;
    for outcome in &outcomes {
        if outcome.success {
            println!(
                "  {}: ✓ PASS ({} ms)",
                outcome.database,
                outcome.latency_ms.unwrap_or(0)
            );
        } else {
            failures += 1;
            println!(
                "  {}: ✗ FAIL - {}",
                outcome.database,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} databases unreachable", failures, outcomes.len());
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

/// Load .env file from the working directory (best-effort, no error if missing).
fn load_dotenv() {
    let env_path = std::path::Path::new(".env");
    if env_path.exists() {
        if let Ok(content) = std::fs::read_to_string(env_path) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim();
                    // Only set if not already set by the environment
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                    }
                }
            }
        }
    }
}
