use thiserror::Error;

/// Failure to decode a versioned document envelope.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Unknown document kind: {0}")]
    UnknownKind(String),

    #[error("Unsupported {kind} schema version {version} (latest is {latest})")]
    UnsupportedVersion {
        kind: &'static str,
        version: u32,
        latest: u32,
    },

    #[error("Malformed {kind} document: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq)]
pub enum GeoError {
    #[error("Latitude out of range: {0}")]
    InvalidLatitude(f64),

    #[error("Longitude out of range: {0}")]
    InvalidLongitude(f64),
}
