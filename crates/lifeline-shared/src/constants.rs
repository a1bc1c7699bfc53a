/// Application name
pub const APP_NAME: &str = "Lifeline";

/// How long the SOS button has to be held before confirmation (ms)
pub const HOLD_DURATION_MS: u64 = 3_000;

/// Sampling interval of the hold progress and countdown timers (ms)
pub const TICK_INTERVAL_MS: u64 = 50;

/// Rolling window in which rapid taps are counted (ms)
pub const RAPID_TAP_WINDOW_MS: u64 = 1_500;

/// Number of rapid taps that triggers an emergency directly
pub const RAPID_TAP_COUNT: u32 = 3;

/// Seconds the confirmation countdown runs before auto-triggering
pub const CONFIRM_COUNTDOWN_SECS: u32 = 5;

/// Helper search radii (km)
pub const SEARCH_MIN_RADIUS_KM: f64 = 5.0;
pub const SEARCH_STEP_KM: f64 = 5.0;
pub const SEARCH_MAX_RADIUS_KM: f64 = 20.0;

/// A user counts as online if active within this window (seconds)
pub const ONLINE_WINDOW_SECS: i64 = 5 * 60;

/// Lifetime of an emergency chat before automatic expiry (seconds)
pub const CHAT_LIFETIME_SECS: i64 = 60 * 60;

/// Maximum chat message length in characters
pub const MAX_MESSAGE_CHARS: usize = 2_000;

/// Location fetch timeouts (ms): first high-accuracy attempt, then the relaxed retry
pub const LOCATION_TIMEOUT_MS: u64 = 10_000;
pub const LOCATION_RETRY_TIMEOUT_MS: u64 = 20_000;

/// Mean Earth radius used by the haversine formula (km)
pub const EARTH_RADIUS_KM: f64 = 6_371.0;

/// System chat texts
pub const CHAT_OPENED_TEXT: &str =
    "Emergency alert sent. Nearby helpers are being notified.";
pub const CHAT_RESOLVED_TEXT: &str = "The emergency has been resolved. This chat is now closed.";
pub const CHAT_EXPIRED_TEXT: &str = "This chat has ended automatically.";
pub const JOINED_SUFFIX: &str = "has joined the chat";

/// Sender name used for system messages
pub const SYSTEM_SENDER: &str = "system";
