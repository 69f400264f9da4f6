pub mod catalog;
pub mod cli;
pub mod clients;
pub mod config;
pub mod constants;
pub mod domain;
pub mod library;
pub mod logging;
pub mod models;
pub mod parser;
pub mod scheduler;
pub mod services;
pub mod state;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use cli::{Cli, Commands};
pub use config::Config;
use constants::intervals;
use domain::ServiceKind;
use library::FileTransfer;
use logging::RotatingLog;
use models::SeriesMap;
use state::SharedState;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Daemon);

    if matches!(command, Commands::Init) {
        if Config::create_default_if_missing()? {
            println!("✓ Config file created. Edit config.toml and run again.");
        } else {
            println!("config.toml already exists, leaving it untouched.");
        }
        return Ok(());
    }

    let config = Config::load()?;
    config.validate()?;
    let log = logging::init_tracing(&config.general)?;

    match command {
        Commands::Daemon => run_daemon(config, log).await,
        Commands::Check => run_single_check(config, log).await,
        Commands::Queue => cmd_queue(config).await,
        Commands::Auth { service } => cmd_auth(config, service).await,
        Commands::Init => Ok(()),
    }
}

async fn startup_checks(state: &SharedState) -> anyhow::Result<()> {
    let general = &state.config.general;
    FileTransfer::check_writable(&general.data_dir)
        .await
        .context("Data directory check failed")?;
    tokio::fs::create_dir_all(&general.temp_dir)
        .await
        .with_context(|| format!("Failed to create temp directory {}", general.temp_dir.display()))?;

    if state.services.is_empty() {
        warn!("No streaming service is enabled");
    }

    for service in &state.services {
        service
            .self_test()
            .await
            .with_context(|| format!("{} self-test failed", service.kind()))?;
    }
    Ok(())
}

async fn run_daemon(config: Config, log: RotatingLog) -> anyhow::Result<()> {
    info!(
        "mdnx-autodl v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let state = SharedState::new(config).await?;
    startup_checks(&state).await?;

    let orchestrator = state.orchestrator()?.with_log(log);
    let mut loop_handle = tokio::spawn(orchestrator.run());

    info!("Daemon running. Press Ctrl+C to stop.");

    let finished = tokio::select! {
        () = shutdown_signal() => None,
        result = &mut loop_handle => Some(result),
    };

    let result = match finished {
        Some(result) => result,
        None => {
            info!("Shutdown signal received");
            state.shutdown.cancel();
            futures::future::join_all(
                state.services.iter().map(|s| s.cancel_active_download()),
            )
            .await;

            match tokio::time::timeout(intervals::SHUTDOWN_GRACE, &mut loop_handle).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        grace_secs = intervals::SHUTDOWN_GRACE.as_secs(),
                        "Download loop did not stop in time"
                    );
                    loop_handle.abort();
                    return Ok(());
                }
            }
        }
    };

    match result {
        Ok(Ok(())) => {
            info!("Daemon stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Download loop failed");
            Err(e)
        }
        Err(e) => Err(e).context("Download loop task panicked"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error listening for shutdown: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Error listening for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn run_single_check(config: Config, log: RotatingLog) -> anyhow::Result<()> {
    info!("Running single check...");

    let state = SharedState::new(config).await?;
    startup_checks(&state).await?;

    let mut orchestrator = state.orchestrator()?.with_log(log);
    let outcome = orchestrator.run_once().await?;

    info!(?outcome, "Check complete");
    Ok(())
}

async fn cmd_queue(config: Config) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;
    state.orchestrator()?.refresh().await;

    for service in &state.services {
        let kind = service.kind();
        println!("{kind}");
        println!("{:-<60}", "");
        match state.catalog.read(kind).await {
            Some(series_map) => print_queue(&series_map),
            None => println!("  (no series monitored)"),
        }
        println!();
    }
    Ok(())
}

fn print_queue(series_map: &SeriesMap) {
    for (series_id, series) in series_map {
        println!("{} [{}]", series.name, series_id);
        for (season_key, season) in series.ordered_seasons() {
            let episodes = season.ordered_episodes();
            let done = episodes.iter().filter(|(_, e)| e.downloaded).count();
            let skipped = episodes.iter().filter(|(_, e)| e.skip).count();
            println!(
                "  {season_key} S{:02} {}: {done}/{} downloaded, {skipped} skipped",
                season.naming_number(),
                season.name,
                episodes.len()
            );
            for (_, episode) in episodes.iter().filter(|(_, e)| !e.downloaded && !e.skip) {
                println!(
                    "    E{:02} {} (dubs: {})",
                    episode.number,
                    episode.title,
                    episode.available_dubs.join(", ")
                );
            }
        }
    }
}

async fn cmd_auth(config: Config, kind: ServiceKind) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;
    let service = state
        .service(kind)
        .with_context(|| format!("{kind} is not enabled in the config"))?;

    service.auth().await?;
    println!("✓ {kind} authentication finished");
    Ok(())
}
