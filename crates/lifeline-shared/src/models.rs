//! Domain models of the emergency coordination engine.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be stored,
//! wrapped in a versioned envelope (see [`crate::protocol`]) and handed to
//! the API layer without a separate DTO.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::ONLINE_WINDOW_SECS;
use crate::types::{AlertId, ChatId, ContactId, EmergencyId, MessageId, UserId};

/// Declares a closed string enum with strict parsing.
///
/// Unknown strings are an error: a stored status we do not understand must
/// never silently default to something else.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// A string did not name any variant of a closed enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} value {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A single position reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    pub accuracy_m: f64,
    pub captured_at: DateTime<Utc>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            captured_at,
        }
    }

    pub fn distance_km(&self, other: &Location) -> f64 {
        crate::geo::haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

str_enum!(
    /// Where the location snapshot of an emergency came from.
    LocationQuality {
        Live => "live",
        Cached => "cached",
        Missing => "missing",
    }
);

// ---------------------------------------------------------------------------
// Emergency
// ---------------------------------------------------------------------------

str_enum!(
    EmergencyStatus {
        Waiting => "waiting",
        Active => "active",
        Closed => "closed",
    }
);

impl EmergencyStatus {
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

str_enum!(
    /// What caused an emergency to be raised.
    TriggerReason {
        HoldConfirmed => "hold_confirmed",
        Auto => "auto",
        RapidTap => "rapid_tap",
        Manual => "manual",
    }
);

/// One help-request episode. A new record is created for every trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emergency {
    pub id: EmergencyId,
    pub victim_id: UserId,
    pub victim_name: String,
    pub victim_contact: Option<String>,
    /// Snapshot taken at trigger time; `None` when no position was available.
    pub location: Option<Location>,
    pub location_quality: LocationQuality,
    pub status: EmergencyStatus,
    pub trigger_reason: TriggerReason,
    pub created_at: DateTime<Utc>,
    /// Set once the session has been created and linked.
    pub chat_id: Option<ChatId>,
}

// ---------------------------------------------------------------------------
// Chat (session)
// ---------------------------------------------------------------------------

str_enum!(
    /// How a chat session was closed.
    Closure {
        Resolved => "resolved",
        Expired => "expired",
    }
);

/// The shared conversation of one emergency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub emergency_id: EmergencyId,
    pub participant_ids: BTreeSet<UserId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closure: Option<Closure>,
}

impl Chat {
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participant_ids.contains(user)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

str_enum!(
    MessageKind {
        Text => "text",
        Location => "location",
        System => "system",
    }
);

/// An append-only chat message. `seq` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    pub kind: MessageKind,
    /// Coordinates carried by `kind == location` messages.
    pub location: Option<Location>,
    pub sent_at: DateTime<Utc>,
    /// Store-assigned sequence number; tie-break for identical timestamps.
    pub seq: i64,
}

/// A message before the store has stamped it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    pub kind: MessageKind,
    pub location: Option<Location>,
}

impl NewMessage {
    pub fn system(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id: UserId::new(crate::constants::SYSTEM_SENDER),
            sender_name: crate::constants::SYSTEM_SENDER.to_string(),
            text: text.into(),
            kind: MessageKind::System,
            location: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Helper alert
// ---------------------------------------------------------------------------

str_enum!(
    DeliveryStatus {
        Pending => "pending",
        Delivered => "delivered",
    }
);

/// Durable record of one helper being alerted about one emergency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperAlert {
    pub id: AlertId,
    pub helper_id: UserId,
    pub emergency_id: EmergencyId,
    pub chat_id: ChatId,
    pub distance_km: f64,
    pub delivery_status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Contacts and presence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub id: ContactId,
    pub owner_id: UserId,
    pub name: String,
    pub phone: String,
    pub relationship: Option<String>,
    pub is_primary: bool,
}

/// Last reported state of a user, the input of helper discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: UserId,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub location: Option<Location>,
    pub is_online: bool,
    pub last_active: DateTime<Utc>,
}

impl UserPresence {
    /// Online if flagged so, or active within the trailing online window.
    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        self.is_online || now - self.last_active <= Duration::seconds(ONLINE_WINDOW_SECS)
    }
}

/// A ranked discovery result. Computed per call, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperCandidate {
    pub user_id: UserId,
    pub display_name: String,
    pub contact_info: Option<String>,
    pub location: Location,
    pub distance_km: f64,
    pub is_online: bool,
}
