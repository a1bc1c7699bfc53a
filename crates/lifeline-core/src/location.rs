//! Device positioning with a timeout, a single relaxed retry and a cache.
//!
//! The platform capability is abstracted as a [`LocationProvider`]. The
//! [`LocationService`] wraps it with the acquisition policy:
//! 1. high-accuracy fix within `first` timeout;
//! 2. on timeout only, one retry with relaxed accuracy within `retry`;
//! 3. permission denied is terminal and never retried.
//!
//! Every successful fix refreshes the last-known position, which is the
//! fallback when triggering an emergency without a live fix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use lifeline_shared::models::{Location, LocationQuality};

use crate::config::LocationTimeouts;
use crate::error::LocationError;

/// Platform positioning capability.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// `timeout` is a hint for the platform; the service enforces it anyway.
    async fn current_position(
        &self,
        high_accuracy: bool,
        timeout: Duration,
    ) -> Result<Location, LocationError>;
}

/// A provider that always answers with the same result. Used by the HTTP
/// server, where the client reports its own coordinates.
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    result: Result<Location, LocationError>,
}

impl FixedLocationProvider {
    pub fn at(location: Location) -> Self {
        Self {
            result: Ok(location),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            result: Err(LocationError::Unavailable),
        }
    }

    pub fn from_option(location: Option<Location>) -> Self {
        location.map(Self::at).unwrap_or_else(Self::unavailable)
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn current_position(
        &self,
        _high_accuracy: bool,
        _timeout: Duration,
    ) -> Result<Location, LocationError> {
        self.result
    }
}

/// Outcome of a best-effort fetch at trigger time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub location: Option<Location>,
    pub quality: LocationQuality,
    /// Why no live fix was obtained, if it wasn't.
    pub error: Option<LocationError>,
}

pub struct LocationService {
    provider: Arc<dyn LocationProvider>,
    timeouts: LocationTimeouts,
    last_known: Mutex<Option<Location>>,
    locating: AtomicBool,
}

impl LocationService {
    pub fn new(provider: Arc<dyn LocationProvider>, timeouts: LocationTimeouts) -> Self {
        Self {
            provider,
            timeouts,
            last_known: Mutex::new(None),
            locating: AtomicBool::new(false),
        }
    }

    /// Seed the cache, e.g. from a fix persisted by a previous run.
    pub fn with_last_known(self, location: Location) -> Self {
        self.remember(location);
        self
    }

    /// `true` while a fetch is in flight.
    pub fn is_locating(&self) -> bool {
        self.locating.load(Ordering::SeqCst)
    }

    pub fn last_known(&self) -> Option<Location> {
        *self.last_known.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember(&self, location: Location) {
        *self.last_known.lock().unwrap_or_else(|e| e.into_inner()) = Some(location);
    }

    /// Acquire a live fix.
    pub async fn fetch(&self) -> Result<Location, LocationError> {
        self.locating.store(true, Ordering::SeqCst);
        let result = self.acquire().await;
        self.locating.store(false, Ordering::SeqCst);

        if let Ok(location) = result {
            self.remember(location);
        }
        result
    }

    async fn acquire(&self) -> Result<Location, LocationError> {
        match self.attempt(true, self.timeouts.first).await {
            Err(LocationError::Timeout) => {
                debug!("High-accuracy fix timed out, retrying with relaxed accuracy");
                self.attempt(false, self.timeouts.retry).await
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        high_accuracy: bool,
        limit: Duration,
    ) -> Result<Location, LocationError> {
        let request = self.provider.current_position(high_accuracy, limit);
        match tokio::time::timeout(limit, request).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout),
        }
    }

    /// Live fix if possible, else the cached one, else nothing.
    pub async fn best_effort(&self) -> LocationFix {
        match self.fetch().await {
            Ok(location) => LocationFix {
                location: Some(location),
                quality: LocationQuality::Live,
                error: None,
            },
            Err(e) => {
                warn!("Live location unavailable: {}", e);
                match self.last_known() {
                    Some(location) => LocationFix {
                        location: Some(location),
                        quality: LocationQuality::Cached,
                        error: Some(e),
                    },
                    None => LocationFix {
                        location: None,
                        quality: LocationQuality::Missing,
                        error: Some(e),
                    },
                }
            }
        }
    }
}
