use thiserror::Error;

use lifeline_store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No authenticated user")]
    NoIdentity,

    /// Creating the emergency failed: nobody has been alerted.
    #[error("Emergency alert was NOT sent: {0}")]
    AlertNotSent(#[source] StoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Helper discovery failed: {0}")]
    Discovery(#[source] StoreError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Only the victim can resolve this emergency")]
    NotVictim,

    #[error("Only the alerted helper can acknowledge this alert")]
    NotAlertRecipient,

    #[error("Not a participant of this chat")]
    NotParticipant,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("System messages cannot be posted by users")]
    ReservedKind,

    #[error("Invalid contact: {0}")]
    InvalidContact(String),

    #[error("Change feed closed")]
    FeedClosed,
}

/// Failure modes of the device positioning capability.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationError {
    /// Terminal: surface to the user, never retry.
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable")]
    Unavailable,

    /// Retryable once with relaxed accuracy.
    #[error("Location request timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Recipient has no push target")]
    NoTarget,

    #[error("Push delivery failed: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Turn a store "not found" into a typed engine error naming the document.
pub(crate) trait NotFoundExt<T> {
    fn or_not_found(self, what: &'static str) -> Result<T>;
}

impl<T> NotFoundExt<T> for std::result::Result<T, StoreError> {
    fn or_not_found(self, what: &'static str) -> Result<T> {
        self.map_err(|e| match e {
            StoreError::NotFound => EngineError::NotFound(what),
            other => EngineError::Store(other),
        })
    }
}
