//! AEI Relay - Main entry point

use aei_common::logging::{init_logging, LogConfig, LogLevel};
use aei_relay::{
    api,
    app::{self, App},
    cli::{Cli, Commands},
    config::Config,
    runtime::{DeliveryScheduler, IngestOrchestrator},
};
use anyhow::Result;
use clap::Parser;
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut log_config = LogConfig::builder()
        .log_file_prefix("aei-relay")
        .filter_directives("aei_relay=info,tower_http=info,sqlx=warn")
        .build();

    // Environment variables take precedence
    log_config = log_config.merge_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    let _guard = init_logging(&log_config)?;

    info!("Starting AEI Relay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let pool = app::connect(&config.database).await?;

    match cli.command {
        Commands::Migrate => app::migrate(&pool).await,
        Commands::IngestOnce => {
            let app = App::build(&config, pool)?;
            let summary = app.coordinator.run_once().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        },
        Commands::Run { no_api } => run(config, pool, no_api).await,
    }
}

async fn run(config: Config, pool: sqlx::PgPool, no_api: bool) -> Result<()> {
    app::migrate(&pool).await?;

    let app = App::build(&config, pool)?;

    let scheduler_handle = DeliveryScheduler::new(
        app.queue.storage(),
        app.worker.clone(),
        config.worker.concurrency,
    )
    .start()?;

    let orchestrator_handle =
        IngestOrchestrator::new(app.coordinator.clone(), config.ingest.interval()).start();

    if no_api {
        info!("Read API disabled");
        shutdown_signal(config.server.shutdown_timeout_secs).await;
    } else {
        let router = api::router(app.store.clone());

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        info!("Read API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
            .await?;
    }

    orchestrator_handle.abort();
    scheduler_handle.abort();
    app.pool.close().await;

    info!("AEI Relay shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give in-flight deliveries a moment to record their last attempt
    info!("Waiting up to {} seconds for in-flight work", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
}
