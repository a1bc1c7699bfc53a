//! # lifeline-server
//!
//! HTTP front end of the Lifeline emergency coordination engine.
//!
//! This binary provides:
//! - **REST API** (axum) for raising and resolving emergencies, the
//!   emergency chat, helper alerts, presence reports and emergency contacts
//! - **SQLite persistence** through `lifeline-store`
//! - **Push fan-out** to a webhook gateway, or to the log when none is set
//! - **Expiry sweep** closing chats whose lifetime has elapsed, even when the
//!   timer that was armed for them is gone

mod api;
mod config;
mod error;
mod push;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lifeline_core::notify::{LogNotifier, Notifier};
use lifeline_core::Engine;
use lifeline_store::{Database, SqliteStore};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::push::WebhookNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,lifeline_server=debug,lifeline_core=debug")
            }),
        )
        .init();

    info!("Starting Lifeline server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Database ready");
    let store = Arc::new(SqliteStore::new(db));

    let notifier: Arc<dyn Notifier> = match &config.push_webhook_url {
        Some(url) => {
            info!(url = %url, "Pushing alerts to webhook gateway");
            Arc::new(WebhookNotifier::new(url.clone())?)
        }
        None => {
            warn!("PUSH_WEBHOOK_URL not set, alerts are only logged");
            Arc::new(LogNotifier)
        }
    };

    let engine = Arc::new(Engine::new(store, notifier, config.engine_config()));

    let app_state = AppState {
        engine: engine.clone(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic expiry sweep; idempotent with the per-emergency timers.
    let sweeper = engine.clone();
    let every = config.expiry_sweep;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.sweep_expired().await {
                error!(error = %e, "Expiry sweep failed");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
