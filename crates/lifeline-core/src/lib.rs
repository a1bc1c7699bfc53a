//! # lifeline-core
//!
//! The emergency coordination engine.
//!
//! A gesture on the SOS button is fed to the [`sos::SosMachine`] (driven in
//! real time by [`driver::SosDriver`]); once it fires, the
//! [`session::EmergencyManager`] creates the emergency and its chat, runs
//! [`discovery::HelperDiscovery`], fans the alert out through a
//! [`notify::Notifier`], and schedules the automatic expiry with the
//! [`expiry::ExpiryScheduler`]. Helpers then coordinate through the
//! [`chat::ChatCoordinator`] until the victim resolves the emergency or it
//! expires.
//!
//! Everything a device needs is bundled in an [`engine::EmergencySession`],
//! handed out by [`engine::Engine::session`].

pub mod chat;
pub mod clock;
pub mod config;
pub mod contacts;
pub mod discovery;
pub mod driver;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod location;
pub mod notify;
pub mod session;
pub mod sos;
pub mod subscriptions;

pub use config::EngineConfig;
pub use engine::{EmergencySession, Engine, EngineContext};
pub use error::{EngineError, LocationError, NotifyError, Result};

#[cfg(test)]
pub(crate) mod testing;
