use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-sender admission window. One row per sender in the shared store;
/// concurrent increments are the store's responsibility, the arithmetic
/// here is shared by every backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub sender: String,
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateWindow {
    pub fn new(sender: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { sender: sender.into(), window_start: now, count: 0 }
    }

    pub fn expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.window_start >= window
    }

    /// Advance the window when the rolling period has elapsed.
    pub fn roll(&mut self, window: Duration, now: DateTime<Utc>) {
        if self.expired(window, now) {
            self.window_start = now;
            self.count = 0;
        }
    }

    /// Claim one slot. Returns false without incrementing when the window
    /// is full; the count never exceeds capacity.
    pub fn try_claim(&mut self, capacity: u32) -> bool {
        if self.count < capacity {
            self.count += 1;
            return true;
        }
        false
    }

    pub fn reset_at(&self, window: Duration) -> DateTime<Utc> {
        self.window_start + window
    }

    pub fn decision(&self, allowed: bool, capacity: u32, window: Duration) -> RateDecision {
        RateDecision {
            allowed,
            remaining: capacity.saturating_sub(self.count),
            reset_at: self.reset_at(window),
        }
    }
}
