//! Qualifies a noisy trap sensor line into a single trigger per snap.
//!
//! Two stages: the raw line must hold still for the debounce window before
//! its confirmed state may change, and a confirmed closure must still read
//! closed after the stability window before it counts as a trigger.

use super::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceDetector {
    debounce_window: Tick,
    stable_window: Tick,
    last_raw_closed: bool,
    last_change: Tick,
    confirmed_closed: bool,
    confirming_since: Option<Tick>,
}

impl DebounceDetector {
    /// A detector whose line starts confirmed open.
    pub fn new(debounce_window: Tick, stable_window: Tick) -> Self {
        DebounceDetector {
            debounce_window,
            stable_window,
            last_raw_closed: false,
            last_change: 0,
            confirmed_closed: false,
            confirming_since: None,
        }
    }

    /// Restore a detector whose confirmed state survived a suspension.
    pub fn with_confirmed(debounce_window: Tick, stable_window: Tick, closed: bool, now: Tick) -> Self {
        DebounceDetector {
            last_raw_closed: closed,
            last_change: now,
            confirmed_closed: closed,
            ..DebounceDetector::new(debounce_window, stable_window)
        }
    }

    pub fn is_confirmed_closed(&self) -> bool {
        self.confirmed_closed
    }

    /// Whether a confirmed closure is waiting for its stability re-sample.
    pub fn is_confirming(&self) -> bool {
        self.confirming_since.is_some()
    }

    /// Feed one raw sample. Returns `true` exactly when a snap qualifies.
    pub fn sample(&mut self, closed: bool, now: Tick) -> bool {
        if closed != self.last_raw_closed {
            self.last_raw_closed = closed;
            self.last_change = now;
        }

        if let Some(since) = self.confirming_since {
            if now.wrapping_sub(since) < self.stable_window {
                return false;
            }
            self.confirming_since = None;
            if closed {
                tracing::debug!(now, "closure held through stability window");
                return true;
            }
            // Let a later closure qualify again.
            tracing::debug!(now, "line reopened during stability window");
            self.confirmed_closed = false;
            return false;
        }

        if closed != self.confirmed_closed && now.wrapping_sub(self.last_change) >= self.debounce_window {
            self.confirmed_closed = closed;
            if closed {
                self.confirming_since = Some(now);
            }
        }

        false
    }
}
