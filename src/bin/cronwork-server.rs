//! Main entry point for the cronwork server.
//!
//! Starts:
//! - the HTTP control API
//! - one scheduling engine per configured poll interval
//!
//! all against a shared PostgreSQL job store. SIGINT/SIGTERM trigger an
//! orderly shutdown: the control API stops accepting connections, the
//! lease loops stop leasing, and in-flight job executions drain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cronwork::config::{Config, DatabaseOptions};
use cronwork::db::Database;
use cronwork::http::{create_router, HttpState};
use cronwork::scheduler::spawn_scheduler;
use cronwork::store::JobStore;

#[derive(Parser, Debug)]
#[command(
    name = "cronwork-server",
    about = "Persistent cron-style job runner backed by PostgreSQL"
)]
struct Args {
    /// Port for the HTTP control API.
    #[arg(long, default_value_t = 8080)]
    server_port: u16,

    /// Database host.
    #[arg(long)]
    db_host: String,

    /// Database port.
    #[arg(long, default_value_t = 5432)]
    db_port: u16,

    /// Database user.
    #[arg(long)]
    db_user: String,

    /// Database name.
    #[arg(long)]
    db_name: String,

    /// Scheduler poll interval in seconds; repeat the flag to run several
    /// independent schedulers against the same store.
    #[arg(long = "interval", required = true)]
    intervals: Vec<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let password = std::env::var("POSTGRES_PASSWORD")
        .context("POSTGRES_PASSWORD environment variable is not set")?;

    let config = Config {
        http_addr: Config::http_addr_for_port(args.server_port),
        database: DatabaseOptions {
            host: args.db_host,
            port: args.db_port,
            user: args.db_user,
            name: args.db_name,
            password,
        },
        poll_intervals: args.intervals.iter().map(|&s| Duration::from_secs(s)).collect(),
    };

    let database = Database::connect_with(config.database.connect_options())
        .await
        .context("failed to connect to job store")?;
    info!("connected to database");

    let store: Arc<dyn JobStore> = Arc::new(database);

    // Recover from whatever the previous process left behind: clear stale
    // lease bits and recompute every schedule from now forward.
    store
        .reset_and_reschedule()
        .await
        .context("failed to reset job state")?;
    info!("job state reset");

    let cancel = CancellationToken::new();
    tokio::spawn(watch_shutdown_signals(cancel.clone()));

    let mut schedulers = Vec::new();
    for poll_interval in &config.poll_intervals {
        schedulers.push(spawn_scheduler(
            Arc::clone(&store),
            *poll_interval,
            cancel.clone(),
        ));
    }

    let state = HttpState {
        store: Arc::clone(&store),
    };
    let listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {}", config.http_addr))?;
    info!(addr = %config.http_addr, "control api listening");

    let shutdown = cancel.clone();
    let server = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await });

    if let Err(err) = server.await {
        error!(?err, "http server error");
    }

    // The scheduler handles resolve once their in-flight executions drain.
    for handle in schedulers {
        if let Err(err) = handle.await {
            error!(?err, "scheduler task failed");
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn watch_shutdown_signals(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(?err, "failed installing SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    cancel.cancel();
}
