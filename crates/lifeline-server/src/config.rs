//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use lifeline_core::config::SearchRadii;
use lifeline_core::EngineConfig;

/// Smallest accepted widening step; finer steps only add store round trips.
const MIN_SEARCH_STEP_KM: f64 = 0.1;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Helper search radii in km.
    /// Env: `SEARCH_MIN_RADIUS_KM`, `SEARCH_STEP_KM`, `SEARCH_MAX_RADIUS_KM`
    /// Default: 5 / 5 / 20
    pub search: SearchRadii,

    /// Lifetime of an emergency chat.
    /// Env: `CHAT_LIFETIME_SECS`
    /// Default: one hour
    pub chat_lifetime: Duration,

    /// Interval of the expired-chat sweep.
    /// Env: `EXPIRY_SWEEP_SECS`
    /// Default: `60`
    pub expiry_sweep: Duration,

    /// Push gateway receiving alert notifications. Alerts are only logged
    /// when unset.
    /// Env: `PUSH_WEBHOOK_URL`
    pub push_webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: None,
            search: engine.search,
            chat_lifetime: engine.chat_lifetime.to_std().unwrap_or(Duration::from_secs(3600)),
            expiry_sweep: Duration::from_secs(60),
            push_webhook_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        for (key, slot) in [
            ("SEARCH_MIN_RADIUS_KM", &mut config.search.min_km),
            ("SEARCH_STEP_KM", &mut config.search.step_km),
            ("SEARCH_MAX_RADIUS_KM", &mut config.search.max_km),
        ] {
            if let Some(val) = var(key) {
                match val.parse::<f64>() {
                    Ok(km) if km.is_finite() && km > 0.0 => *slot = km,
                    _ => tracing::warn!(value = %val, "Invalid {key}, using default"),
                }
            }
        }
        if config.search.step_km < MIN_SEARCH_STEP_KM {
            tracing::warn!(
                step = config.search.step_km,
                floor = MIN_SEARCH_STEP_KM,
                "Search step below floor, using default"
            );
            config.search.step_km = SearchRadii::default().step_km;
        }
        if config.search.min_km > config.search.max_km {
            tracing::warn!(
                min = config.search.min_km,
                max = config.search.max_km,
                "Search floor above ceiling, using defaults"
            );
            config.search = SearchRadii::default();
        }

        for (key, slot) in [
            ("CHAT_LIFETIME_SECS", &mut config.chat_lifetime),
            ("EXPIRY_SWEEP_SECS", &mut config.expiry_sweep),
        ] {
            if let Some(val) = var(key) {
                match val.parse::<u64>() {
                    Ok(secs) if secs > 0 => *slot = Duration::from_secs(secs),
                    _ => tracing::warn!(value = %val, "Invalid {key}, using default"),
                }
            }
        }

        if let Some(url) = var("PUSH_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                config.push_webhook_url = Some(url);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig {
            search: self.search,
            ..EngineConfig::default()
        };
        if let Ok(lifetime) = chrono::Duration::from_std(self.chat_lifetime) {
            engine.chat_lifetime = lifetime;
        }
        engine
    }
}
