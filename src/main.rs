//! CLI entry point for the media crawler.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use media_crawler_core::config::Config;
use media_crawler_core::server::{self, AppState};
use media_crawler_core::store::{Backend, Mirror};
use media_crawler_core::{Overrides, TaskSupervisor, builtin_registry, logging};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config log_level
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.log_level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    logging::init(default_level, &config.log_format).context("installing log subscriber")?;
    debug!(?cli, "CLI arguments parsed");

    match cli.command {
        None => run_job(config, &cli.run.overrides()).await,
        Some(Command::Run(args)) => run_job(config, &args.overrides()).await,
        Some(Command::Serve { addr }) => serve(config, &addr).await,
        Some(Command::InitDb(store)) => init_db(config, &store.overrides()).await,
    }
}

/// Runs one job through the supervisor; Ctrl-C cancels it.
async fn run_job(config: Config, overrides: &Overrides) -> Result<ExitCode> {
    let supervisor = TaskSupervisor::new(config, Arc::new(builtin_registry()));
    let started = supervisor.run(overrides)?;
    info!(platform = %started.platform, mode = %started.crawler_type, "Media crawler starting");

    let status = tokio::select! {
        status = supervisor.wait_idle() => status,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, stopping job");
            supervisor.stop();
            supervisor.wait_idle().await
        }
    };

    info!(
        processed = status.processed,
        succeeded = status.succeeded,
        failed = status.failed,
        failure_kinds = ?status.failure_kinds,
        "Crawl complete"
    );
    if status.last_error.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            error = %status.last_error,
            kind = ?status.last_error_kind,
            url = %status.last_error_url,
            "Crawl failed"
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Serves the control plane until Ctrl-C.
async fn serve(config: Config, addr: &str) -> Result<ExitCode> {
    let supervisor = TaskSupervisor::new(config, Arc::new(builtin_registry()));
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    let running = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            running.stop();
            signal.cancel();
        }
    });

    server::serve(addr, AppState::new(supervisor.clone()), shutdown)
        .await
        .with_context(|| format!("serving control plane on {addr}"))?;
    supervisor.wait_idle().await;
    Ok(ExitCode::SUCCESS)
}

/// Creates the mirror schema for the configured backend.
async fn init_db(mut config: Config, overrides: &Overrides) -> Result<ExitCode> {
    config.apply_overrides(overrides);
    config.normalize();
    config.validate()?;
    let backend = Backend::parse(&config.store_backend)?;
    match Mirror::connect(backend, &config.mirror_settings()).await? {
        Some(_) => info!(backend = %backend, "mirror schema ready"),
        None => info!("file backend has no database schema"),
    }
    Ok(ExitCode::SUCCESS)
}
