//! # lifeline-shared
//!
//! Types shared by every Lifeline crate: identifiers, the persisted domain
//! models, versioned document envelopes, and the geodesic helpers used by
//! helper discovery.

pub mod constants;
pub mod error;
pub mod geo;
pub mod identity;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::{GeoError, RecordError};
pub use identity::Profile;
pub use types::{AlertId, ChatId, ContactId, EmergencyId, MessageId, UserId};
