//! Debounce gate for user-visible transport errors.

use super::environment::EnvironmentSignal;

/// Minimum spacing between two surfaced persistent errors (milliseconds)
pub const DEBOUNCE_INTERVAL_MS: i64 = 3_000;

/// Why a persistent error was or was not surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionDecision {
    Surface,
    /// The client is hidden or offline, so errors are expected
    SuppressedInactive,
    /// Another error was surfaced within the debounce interval
    SuppressedDebounce,
}

/// Tracks when a persistent error was last shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionWindow {
    last_surfaced_error_at: Option<i64>,
    interval_ms: i64,
}

impl Default for SuppressionWindow {
    fn default() -> Self {
        Self::new(DEBOUNCE_INTERVAL_MS)
    }
}

impl SuppressionWindow {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            last_surfaced_error_at: None,
            interval_ms,
        }
    }

    pub fn last_surfaced_error_at(&self) -> Option<i64> {
        self.last_surfaced_error_at
    }

    /// Decide whether a persistent error occurring at `now` is shown.
    ///
    /// Records `now` as the last surfacing time when the answer is
    /// [`SuppressionDecision::Surface`].
    pub fn evaluate(&mut self, now: i64, signal: EnvironmentSignal) -> SuppressionDecision {
        if !signal.is_active() {
            return SuppressionDecision::SuppressedInactive;
        }

        let within_window = self
            .last_surfaced_error_at
            .is_some_and(|last| now - last <= self.interval_ms);
        if within_window {
            return SuppressionDecision::SuppressedDebounce;
        }

        self.last_surfaced_error_at = Some(now);
        SuppressionDecision::Surface
    }

    /// Forget the last surfacing time after a confirmed recovery
    pub fn reset(&mut self) {
        self.last_surfaced_error_at = None;
    }
}
