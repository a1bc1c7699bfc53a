//! Versioned document envelopes.
//!
//! Every document leaving the engine (API responses, contact exports) is
//! wrapped as `{ "kind": .., "version": .., "data": .. }`. Decoding checks the
//! kind and rejects any version other than the one we write.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;
use crate::models::{Chat, Emergency, EmergencyContact, HelperAlert, Message, UserPresence};

/// Tagged, versioned wrapper around a serialized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    pub version: u32,
    pub data: Value,
}

/// A document type with an explicit schema version.
pub trait Versioned: Serialize + DeserializeOwned {
    const KIND: &'static str;
    const VERSION: u32;
}

/// Wrap a document in its envelope.
pub fn seal<T: Versioned>(doc: &T) -> Result<Envelope, RecordError> {
    Ok(Envelope {
        kind: T::KIND.to_string(),
        version: T::VERSION,
        data: serde_json::to_value(doc)?,
    })
}

/// Unwrap an envelope of type `T`.
pub fn open<T: Versioned>(envelope: Envelope) -> Result<T, RecordError> {
    if envelope.kind != T::KIND {
        return Err(RecordError::UnknownKind(envelope.kind));
    }
    if envelope.version != T::VERSION {
        return Err(RecordError::UnsupportedVersion {
            kind: T::KIND,
            version: envelope.version,
            latest: T::VERSION,
        });
    }
    serde_json::from_value(envelope.data).map_err(|source| RecordError::Malformed {
        kind: T::KIND,
        source,
    })
}

impl Versioned for Emergency {
    const KIND: &'static str = "emergency";
    const VERSION: u32 = 1;
}

impl Versioned for Chat {
    const KIND: &'static str = "chat";
    const VERSION: u32 = 1;
}

impl Versioned for Message {
    const KIND: &'static str = "message";
    const VERSION: u32 = 1;
}

impl Versioned for HelperAlert {
    const KIND: &'static str = "helper_alert";
    const VERSION: u32 = 1;
}

impl Versioned for EmergencyContact {
    const KIND: &'static str = "emergency_contact";
    const VERSION: u32 = 1;
}

impl Versioned for UserPresence {
    const KIND: &'static str = "presence";
    const VERSION: u32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmergencyStatus, LocationQuality, TriggerReason};
    use crate::types::{ChatId, EmergencyId, UserId};
    use chrono::Utc;
    use serde_json::json;

    fn emergency() -> Emergency {
        Emergency {
            id: EmergencyId::new(),
            victim_id: UserId::new("victim"),
            victim_name: "Victim".into(),
            victim_contact: None,
            location: None,
            location_quality: LocationQuality::Missing,
            status: EmergencyStatus::Active,
            trigger_reason: TriggerReason::Auto,
            created_at: Utc::now(),
            chat_id: Some(ChatId::new()),
        }
    }

    #[test]
    fn test_seal_and_open() {
        let e = emergency();
        let env = seal(&e).unwrap();
        assert_eq!(env.kind, "emergency");
        assert_eq!(env.version, 1);
        let back: Emergency = open(env).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_rejects_wrong_kind() {
        let env = seal(&emergency()).unwrap();
        let err = open::<Chat>(env).unwrap_err();
        assert!(matches!(err, RecordError::UnknownKind(k) if k == "emergency"));
    }

    #[test]
    fn test_rejects_other_versions() {
        for version in [0, 2] {
            let mut env = seal(&emergency()).unwrap();
            env.version = version;
            let err = open::<Emergency>(env).unwrap_err();
            assert!(matches!(
                err,
                RecordError::UnsupportedVersion { version: v, latest: 1, .. } if v == version
            ));
        }
    }

    #[test]
    fn test_malformed_data() {
        let env = Envelope {
            kind: "helper_alert".into(),
            version: 1,
            data: json!({ "id": 42 }),
        };
        assert!(matches!(
            open::<HelperAlert>(env),
            Err(RecordError::Malformed { kind: "helper_alert", .. })
        ));
    }
}
