//! Engine tunables. Defaults come from [`lifeline_shared::constants`].

use std::time::Duration;

use lifeline_shared::constants::{
    CHAT_LIFETIME_SECS, CONFIRM_COUNTDOWN_SECS, HOLD_DURATION_MS, LOCATION_RETRY_TIMEOUT_MS,
    LOCATION_TIMEOUT_MS, MAX_MESSAGE_CHARS, ONLINE_WINDOW_SECS, RAPID_TAP_COUNT,
    RAPID_TAP_WINDOW_MS, SEARCH_MAX_RADIUS_KM, SEARCH_MIN_RADIUS_KM, SEARCH_STEP_KM,
    TICK_INTERVAL_MS,
};

/// Timing of the SOS activation gestures, in milliseconds unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SosTiming {
    pub hold_ms: u64,
    pub tick_ms: u64,
    /// Rolling rapid-tap window; 1500 to 2000 ms feels natural.
    pub tap_window_ms: u64,
    pub taps_required: u32,
    pub countdown_secs: u32,
}

impl Default for SosTiming {
    fn default() -> Self {
        Self {
            hold_ms: HOLD_DURATION_MS,
            tick_ms: TICK_INTERVAL_MS,
            tap_window_ms: RAPID_TAP_WINDOW_MS,
            taps_required: RAPID_TAP_COUNT,
            countdown_secs: CONFIRM_COUNTDOWN_SECS,
        }
    }
}

/// Expanding search radii for helper discovery (km).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRadii {
    pub min_km: f64,
    pub step_km: f64,
    pub max_km: f64,
}

impl Default for SearchRadii {
    fn default() -> Self {
        Self {
            min_km: SEARCH_MIN_RADIUS_KM,
            step_km: SEARCH_STEP_KM,
            max_km: SEARCH_MAX_RADIUS_KM,
        }
    }
}

impl SearchRadii {
    /// Upper bound on widenings between `min` and `max`. A smaller step is
    /// stretched to fit.
    pub const MAX_STEPS: usize = 64;

    /// The radii searched in order: `min`, `min + step`, ... clamped so the
    /// last one is exactly `max`.
    pub fn steps(&self) -> Vec<f64> {
        let max = self.max_km.max(0.0);
        let mut radius = self.min_km.clamp(0.0, max);
        let mut out = vec![radius];
        if self.step_km.is_nan() || self.step_km <= 0.0 {
            if radius < max {
                out.push(max);
            }
            return out;
        }
        let step = self.step_km.max((max - radius) / Self::MAX_STEPS as f64);
        while radius < max {
            radius = (radius + step).min(max);
            out.push(radius);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationTimeouts {
    /// High-accuracy attempt.
    pub first: Duration,
    /// Relaxed-accuracy retry after a timeout.
    pub retry: Duration,
}

impl Default for LocationTimeouts {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(LOCATION_TIMEOUT_MS),
            retry: Duration::from_millis(LOCATION_RETRY_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sos: SosTiming,
    pub search: SearchRadii,
    pub online_window: chrono::Duration,
    pub chat_lifetime: chrono::Duration,
    pub max_message_chars: usize,
    pub location: LocationTimeouts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sos: SosTiming::default(),
            search: SearchRadii::default(),
            online_window: chrono::Duration::seconds(ONLINE_WINDOW_SECS),
            chat_lifetime: chrono::Duration::seconds(CHAT_LIFETIME_SECS),
            max_message_chars: MAX_MESSAGE_CHARS,
            location: LocationTimeouts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_steps() {
        assert_eq!(SearchRadii::default().steps(), vec![5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn test_steps_clamp_to_ceiling() {
        let radii = SearchRadii {
            min_km: 2.0,
            step_km: 5.0,
            max_km: 10.0,
        };
        assert_eq!(radii.steps(), vec![2.0, 7.0, 10.0]);
    }

    #[test]
    fn test_degenerate_steps() {
        let radii = SearchRadii {
            min_km: 1.0,
            step_km: 0.0,
            max_km: 3.0,
        };
        assert_eq!(radii.steps(), vec![1.0, 3.0]);

        let radii = SearchRadii {
            min_km: 30.0,
            step_km: 5.0,
            max_km: 20.0,
        };
        assert_eq!(radii.steps(), vec![20.0]);
    }

    #[test]
    fn test_tiny_step_is_bounded() {
        let radii = SearchRadii {
            min_km: 0.001,
            step_km: 1e-9,
            max_km: 20.0,
        };
        let steps = radii.steps();
        assert!(steps.len() <= SearchRadii::MAX_STEPS + 2);
        assert_eq!(steps.first(), Some(&0.001));
        assert_eq!(steps.last(), Some(&20.0));
        assert!(steps.windows(2).all(|w| w[0] < w[1]));

        let radii = SearchRadii {
            step_km: f64::NAN,
            ..radii
        };
        assert_eq!(radii.steps(), vec![0.001, 20.0]);
    }
}
