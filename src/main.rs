use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;

use pg_resilience::config::Settings;
use pg_resilience::connection::Manager;
use pg_resilience::context::Context;
use pg_resilience::migrations::{rollback_migrations, run_migrations};
use pg_resilience::postgres::ConnectTarget;
use pg_resilience::server::{create_app, AppState};
use pg_resilience::telemetry::init_telemetry;

#[derive(Debug, Parser)]
#[command(name = "pg-resilience", version, about = "Resilient PostgreSQL pool probe service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect and serve the HTTP probe endpoints
    Serve,
    /// Connect once and print a detailed health report
    Check,
    /// Connect and block until the database answers the liveness probe
    Wait {
        /// Overrides connection.ready_timeout_seconds
        #[arg(long)]
        timeout_seconds: Option<u64>,
    },
    /// Apply or revert schema migrations
    Migrate {
        #[command(subcommand)]
        direction: MigrateDirection,
    },
}

#[derive(Debug, Subcommand)]
enum MigrateDirection {
    /// Apply every pending migration
    Up,
    /// Revert the most recent migration
    Down,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.logging, &settings.otel)?;
    tracing::info!("Configuration loaded");

    match cli.command {
        Command::Serve => serve(settings).await,
        Command::Check => check(settings).await,
        Command::Wait { timeout_seconds } => {
            let timeout = timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or_else(|| settings.connection.ready_timeout());
            wait(settings, timeout).await
        }
        Command::Migrate { direction } => migrate(settings, direction).await,
    }
}

fn build_manager(settings: &Settings) -> Result<Manager> {
    Ok(Manager::from_settings(settings)?)
}

async fn serve(settings: Settings) -> Result<()> {
    let ctx = Context::background().with_cancel();
    tokio::spawn(shutdown_signal_handler(ctx.clone()));

    let manager = Arc::new(build_manager(&settings)?);
    manager.connect(&ctx).await?;

    let state = AppState::new(settings.clone(), Arc::clone(&manager));
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    let shutdown = ctx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.done().await;
        })
        .await?;

    manager.close().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn check(settings: Settings) -> Result<()> {
    let ctx = Context::background().with_cancel();
    tokio::spawn(shutdown_signal_handler(ctx.clone()));

    let manager = build_manager(&settings)?;
    manager.connect(&ctx).await?;

    let report = manager.detailed_health(&ctx).await;
    let metrics = manager.metrics();
    manager.close().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    if !report.healthy {
        anyhow::bail!("{}", report.message);
    }
    Ok(())
}

async fn wait(settings: Settings, timeout: Duration) -> Result<()> {
    let ctx = Context::background().with_cancel();
    tokio::spawn(shutdown_signal_handler(ctx.clone()));

    let manager = build_manager(&settings)?;
    manager.connect(&ctx).await?;

    let result = manager.wait_for_ready(&ctx, timeout).await;
    manager.close().await;
    result?;

    tracing::info!("Database is ready");
    Ok(())
}

async fn migrate(settings: Settings, direction: MigrateDirection) -> Result<()> {
    let database_url = ConnectTarget::from_config(&settings.database)?.database_url()?;
    let path = &settings.migrations.path;

    match direction {
        MigrateDirection::Up => run_migrations(&database_url, path).await?,
        MigrateDirection::Down => rollback_migrations(&database_url, path).await?,
    }
    Ok(())
}

async fn shutdown_signal_handler(ctx: Context) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    ctx.cancel();
}
