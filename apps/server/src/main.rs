//! Watchlist Monitor - Headless Server
//!
//! Polls the block explorer for every active watchlist address, records new
//! transactions as alerts and notifies subscribers.

mod config;
mod monitor;

use clap::Parser;
use config::{Args, MonitorConfig};
use monitor::Monitor;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use watchlist_alerts::{AlertDispatcher, Database, Notifier, TelegramNotifier};
use watchlist_feeds::EtherscanFetcher;

fn init_logging(level: &str) {
    // RUST_LOG wins over --log-level when set.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT (Ctrl+C) received"),
        _ = terminate => info!("SIGTERM received"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args.log_level);

    let config = match MonitorConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!("🚀 Watchlist Monitor starting...");
    info!("  Chain: {} ({})", config.chain(), config.chain().id());
    info!("  Database: {}", config.store.database_url);
    info!(
        "  Poll interval: {}s",
        config.loop_settings.poll_interval.as_secs()
    );
    info!("  Single cycle: {}", config.once);

    let db = match Database::connect_with(&config.store).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to open database");
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match EtherscanFetcher::new(config.etherscan.clone()) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!(error = %e, "Failed to build ledger client");
            return ExitCode::FAILURE;
        }
    };

    let transport: Option<Arc<dyn Notifier>> = match config.telegram_bot_token.as_deref() {
        Some(token) => {
            info!("  Notifications: telegram");
            Some(Arc::new(TelegramNotifier::new(token, config.chain())))
        }
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set, alerts will be stored without notification");
            None
        }
    };

    let dispatcher = AlertDispatcher::new(db.clone(), transport, config.notifier.clone());
    let monitor = Monitor::new(
        Arc::new(fetcher),
        db.clone(),
        dispatcher,
        config.loop_settings,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let code = if config.once {
        match monitor.run_cycle(&shutdown_rx).await {
            Ok(report) => {
                info!(
                    checked = report.checked,
                    new_alerts = report.new_alerts,
                    failures = report.failures,
                    "Single cycle complete"
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Cycle failed");
                ExitCode::FAILURE
            }
        }
    } else {
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        });

        info!("Press Ctrl+C to stop...");
        monitor.run(shutdown_rx).await;
        ExitCode::SUCCESS
    };

    db.close().await;
    info!("👋 Watchlist Monitor stopped");
    code
}
