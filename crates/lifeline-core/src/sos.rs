//! SOS activation state machine.
//!
//! Two gestures raise an emergency:
//! - **hold**: keep the button pressed for `hold_ms`, then a confirmation
//!   countdown of `countdown_secs` runs; it auto-triggers when it reaches
//!   zero unless the user cancels or confirms early;
//! - **rapid tap**: `taps_required` short presses, each within
//!   `tap_window_ms` of the previous one, trigger immediately.
//!
//! The machine is pure: every input carries the current monotonic time in
//! milliseconds and the caller acts on the returned [`TriggerReason`]. After
//! firing the machine is back to idle, so one gesture fires at most once.

use serde::Serialize;

use lifeline_shared::models::TriggerReason;

use crate::config::SosTiming;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SosPhase {
    Idle,
    Holding,
    RapidCounting,
    Confirming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Holding { since: u64 },
    Confirming { since: u64 },
}

/// Observable state, for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SosSnapshot {
    pub phase: SosPhase,
    /// Hold progress, 0 to 100.
    pub hold_progress: f64,
    pub tap_count: u32,
    /// Whole seconds left on the confirmation countdown.
    pub countdown: u32,
}

#[derive(Debug, Clone)]
pub struct SosMachine {
    timing: SosTiming,
    state: State,
    hold_progress: f64,
    taps: u32,
    tap_deadline: Option<u64>,
    countdown: u32,
}

impl SosMachine {
    pub fn new(timing: SosTiming) -> Self {
        Self {
            timing,
            state: State::Idle,
            hold_progress: 0.0,
            taps: 0,
            tap_deadline: None,
            countdown: timing.countdown_secs,
        }
    }

    pub fn phase(&self) -> SosPhase {
        match self.state {
            State::Idle if self.taps > 0 => SosPhase::RapidCounting,
            State::Idle => SosPhase::Idle,
            State::Holding { .. } => SosPhase::Holding,
            State::Confirming { .. } => SosPhase::Confirming,
        }
    }

    pub fn snapshot(&self) -> SosSnapshot {
        SosSnapshot {
            phase: self.phase(),
            hold_progress: self.hold_progress,
            tap_count: self.taps,
            countdown: self.countdown,
        }
    }

    /// Button pressed. Ignored while holding or confirming.
    pub fn press(&mut self, now: u64) {
        self.expire_taps(now);
        if self.state == State::Idle {
            self.state = State::Holding { since: now };
            self.hold_progress = 0.0;
        }
    }

    /// Button released. A release before the hold threshold counts as a tap.
    ///
    /// Taps are judged on elapsed press time, not on the tick-sampled
    /// `hold_progress`: a press shorter than one tick never shows progress
    /// yet still counts.
    pub fn release(&mut self, now: u64) -> Option<TriggerReason> {
        let State::Holding { since } = self.state else {
            return None;
        };
        let held = now.saturating_sub(since);
        if held >= self.timing.hold_ms {
            self.begin_confirmation(now);
            return None;
        }
        self.state = State::Idle;
        self.hold_progress = 0.0;
        // A press and release at the same instant is not a tap.
        if held == 0 {
            return None;
        }
        self.register_tap(now)
    }

    /// Timer sample; call every `tick_ms`.
    pub fn tick(&mut self, now: u64) -> Option<TriggerReason> {
        self.expire_taps(now);
        match self.state {
            State::Idle => None,
            State::Holding { since } => {
                let held = now.saturating_sub(since);
                if held >= self.timing.hold_ms {
                    self.begin_confirmation(now);
                } else {
                    self.hold_progress = held as f64 * 100.0 / self.timing.hold_ms.max(1) as f64;
                }
                None
            }
            State::Confirming { since } => {
                let elapsed_secs = now.saturating_sub(since) / 1000;
                let remaining = u64::from(self.timing.countdown_secs).saturating_sub(elapsed_secs);
                self.countdown = remaining as u32;
                if remaining == 0 {
                    self.reset();
                    Some(TriggerReason::Auto)
                } else {
                    None
                }
            }
        }
    }

    /// Abort a hold or a running countdown. Returns `true` if anything was
    /// aborted.
    pub fn cancel(&mut self) -> bool {
        match self.state {
            State::Idle => false,
            State::Holding { .. } | State::Confirming { .. } => {
                self.reset();
                true
            }
        }
    }

    /// "Send now" during the countdown.
    pub fn confirm(&mut self) -> Option<TriggerReason> {
        match self.state {
            State::Confirming { .. } => {
                self.reset();
                Some(TriggerReason::HoldConfirmed)
            }
            _ => None,
        }
    }

    fn begin_confirmation(&mut self, now: u64) {
        self.state = State::Confirming { since: now };
        self.hold_progress = 0.0;
        self.countdown = self.timing.countdown_secs;
    }

    fn register_tap(&mut self, now: u64) -> Option<TriggerReason> {
        self.expire_taps(now);
        self.taps += 1;
        if self.taps >= self.timing.taps_required {
            self.taps = 0;
            self.tap_deadline = None;
            return Some(TriggerReason::RapidTap);
        }
        self.tap_deadline = Some(now + self.timing.tap_window_ms);
        None
    }

    fn expire_taps(&mut self, now: u64) {
        if matches!(self.tap_deadline, Some(deadline) if now > deadline) {
            self.taps = 0;
            self.tap_deadline = None;
        }
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.hold_progress = 0.0;
        self.countdown = self.timing.countdown_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> SosMachine {
        SosMachine::new(SosTiming::default())
    }

    /// Press at `at`, tick every 50 ms while held, release after `held` ms.
    fn hold(m: &mut SosMachine, at: u64, held: u64) -> Option<TriggerReason> {
        m.press(at);
        let mut t = at;
        while t + 50 <= at + held {
            t += 50;
            m.tick(t);
        }
        m.release(at + held)
    }

    fn tap(m: &mut SosMachine, at: u64) -> Option<TriggerReason> {
        m.press(at);
        m.release(at + 80)
    }

    #[test]
    fn test_hold_progress_is_sampled() {
        let mut m = machine();
        m.press(0);
        m.tick(1500);
        assert_eq!(m.phase(), SosPhase::Holding);
        assert!((m.snapshot().hold_progress - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_full_hold_enters_confirmation() {
        let mut m = machine();
        m.press(0);
        for t in (50..=3000).step_by(50) {
            assert_eq!(m.tick(t), None);
        }
        assert_eq!(m.phase(), SosPhase::Confirming);
        assert_eq!(m.snapshot().countdown, 5);
        // Releasing during confirmation changes nothing.
        assert_eq!(m.release(3100), None);
        assert_eq!(m.phase(), SosPhase::Confirming);
    }

    #[test]
    fn test_release_after_threshold_without_tick_still_confirms() {
        let mut m = machine();
        m.press(0);
        assert_eq!(m.release(3200), None);
        assert_eq!(m.phase(), SosPhase::Confirming);
    }

    #[test]
    fn test_countdown_auto_triggers_exactly_once() {
        let mut m = machine();
        hold(&mut m, 0, 3000);
        assert_eq!(m.phase(), SosPhase::Confirming);

        let mut fired = Vec::new();
        for t in (3050..=10_000).step_by(50) {
            if let Some(reason) = m.tick(t) {
                fired.push((t, reason));
            }
        }
        assert_eq!(fired, vec![(8000, TriggerReason::Auto)]);
        assert_eq!(m.phase(), SosPhase::Idle);
    }

    #[test]
    fn test_countdown_decrements() {
        let mut m = machine();
        hold(&mut m, 0, 3000);
        m.tick(4000);
        assert_eq!(m.snapshot().countdown, 4);
        m.tick(6500);
        assert_eq!(m.snapshot().countdown, 2);
    }

    #[test]
    fn test_cancel_during_countdown() {
        let mut m = machine();
        hold(&mut m, 0, 3000);
        m.tick(5000);
        assert!(m.cancel());
        assert_eq!(m.phase(), SosPhase::Idle);
        assert_eq!(m.snapshot().countdown, 5);
        for t in (5050..=12_000).step_by(50) {
            assert_eq!(m.tick(t), None);
        }
    }

    #[test]
    fn test_confirm_sends_now() {
        let mut m = machine();
        hold(&mut m, 0, 3000);
        assert_eq!(m.confirm(), Some(TriggerReason::HoldConfirmed));
        assert_eq!(m.phase(), SosPhase::Idle);
        assert_eq!(m.confirm(), None);
    }

    #[test]
    fn test_short_press_counts_as_tap() {
        let mut m = machine();
        assert_eq!(hold(&mut m, 0, 2999), None);
        assert_eq!(m.phase(), SosPhase::RapidCounting);
        assert_eq!(m.snapshot().tap_count, 1);
        assert_eq!(m.snapshot().hold_progress, 0.0);
    }

    #[test]
    fn test_press_shorter_than_a_tick_counts_as_tap() {
        let mut m = machine();
        m.press(0);
        assert_eq!(m.snapshot().hold_progress, 0.0);
        assert_eq!(m.release(30), None);
        assert_eq!(m.snapshot().tap_count, 1);
    }

    #[test]
    fn test_zero_length_press_is_not_a_tap() {
        let mut m = machine();
        m.press(100);
        assert_eq!(m.release(100), None);
        assert_eq!(m.phase(), SosPhase::Idle);
        assert_eq!(m.snapshot().tap_count, 0);
    }

    #[test]
    fn test_three_quick_taps_trigger() {
        let mut m = machine();
        assert_eq!(tap(&mut m, 0), None);
        assert_eq!(tap(&mut m, 400), None);
        assert_eq!(tap(&mut m, 800), Some(TriggerReason::RapidTap));
        assert_eq!(m.phase(), SosPhase::Idle);
        assert_eq!(m.snapshot().tap_count, 0);
    }

    #[test]
    fn test_window_rolls_from_last_tap() {
        let mut m = machine();
        tap(&mut m, 0);
        tap(&mut m, 1400);
        // 2800 is 2.8 s after the first tap but within 1.5 s of the second.
        assert_eq!(tap(&mut m, 2800), Some(TriggerReason::RapidTap));
    }

    #[test]
    fn test_slow_taps_reset_the_count() {
        let mut m = machine();
        tap(&mut m, 0);
        tap(&mut m, 400);
        // Gap longer than the window: counting restarts.
        assert_eq!(tap(&mut m, 400 + 80 + 1600), None);
        assert_eq!(m.snapshot().tap_count, 1);
    }

    #[test]
    fn test_tap_count_expires_on_tick() {
        let mut m = machine();
        tap(&mut m, 0);
        assert_eq!(m.phase(), SosPhase::RapidCounting);
        m.tick(2000);
        assert_eq!(m.phase(), SosPhase::Idle);
    }

    #[test]
    fn test_cancel_while_idle_is_noop() {
        let mut m = machine();
        assert!(!m.cancel());
    }
}
