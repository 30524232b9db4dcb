//! # Monitor Rotation Server
//!
//! Hands queued items to a fixed set of monitors and streams what each monitor
//! should be showing.
//!
//! ## Startup
//! 1.  Loads `.env`, then layers defaults, the JSON config file and
//!     environment/CLI options.
//! 2.  Installs logging (stdout plus a JSON log file).
//! 3.  Opens the PostgreSQL pool, or an in-memory store with `--memory-store`,
//!     creating the schema first when `--init-schema` is given.
//! 4.  Pins each monitor's high-water mark to the store's current maximum id.
//! 5.  Spawns the dispatcher and serves HTTP/WebSocket clients until Ctrl-C or
//!     SIGTERM, then stops the dispatcher and closes the pool.

use anyhow::{Context, Result};
use lib_common::loggers::{LoggerLocalOptions, init_logging};
use lib_common::{Dispatcher, ItemStore, MemoryItemStore, PgItemStore};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod monitor_logic;
use monitor_logic::{config, downstream, state};

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let settings = config.engine_settings()?;

    let _log_guard = init_logging(&LoggerLocalOptions {
        app_name: "server_monitor".to_string(),
        log_dir: config.log_dir.clone(),
        level: config.log_level.clone().unwrap_or_else(|| "info".to_string()),
        ..Default::default()
    })?;

    info!(
        monitors = settings.monitor_count.get(),
        normal_display_secs = settings.rotation.normal_display.as_secs(),
        idle_display_secs = settings.rotation.idle_display.as_secs(),
        reclaim = settings.dispatcher.reclaim_after.is_some(),
        "Configuration loaded"
    );

    let mut pool: Option<Arc<PgItemStore>> = None;
    let store: Arc<dyn ItemStore> = if config.memory_store {
        warn!("Using the in-memory item store; items are lost on exit.");
        Arc::new(MemoryItemStore::new())
    } else {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required unless --memory-store is set")?;
        let table = config.table_name.as_deref().unwrap_or("items");
        let pg = Arc::new(PgItemStore::connect(url, config.pool_max_size.unwrap_or(16), table)?);
        if config.init_schema {
            pg.ensure_schema().await?;
            info!(table, "Item schema ensured.");
        }
        info!(table, "Database connection pool created.");
        pool = Some(pg.clone());
        pg
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    let app_state = state::AppState::new(store.clone(), &settings, shutdown.clone());
    // Monitors start from the store's maximum id as of now, before anything new is assigned.
    if !app_state.capture_baseline(settings.dispatcher.claim_interval).await {
        info!("Shutdown requested before startup completed.");
        if let Some(pg) = pool {
            pg.close();
        }
        return Ok(());
    }

    let dispatcher = tokio::spawn(
        Dispatcher::new(store, settings.monitor_count, settings.dispatcher.clone())
            .run(shutdown.clone()),
    );
    info!("Background dispatcher started.");

    let served = downstream::run(config.port.unwrap_or(8000), app_state).await;
    if let Err(e) = &served {
        error!("Downstream server failed: {:#}", e);
    }

    // Stop the dispatcher whichever way the server ended.
    shutdown.cancel();
    if let Err(e) = dispatcher.await {
        error!("Dispatcher task ended abnormally: {}", e);
    }

    if let Some(pg) = pool {
        pg.close();
        info!("Database pool closed.");
    }

    info!("Shutdown complete.");
    served
}
