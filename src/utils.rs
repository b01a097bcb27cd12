//! Utility helpers shared across the dashboard core.

use std::cell::Cell;
use std::rc::Rc;

/// Return the current timestamp in **milliseconds** since UNIX epoch.
///
/// chrono's `wasmbind` feature routes this through `Date.now()` inside the
/// browser, so the same call also works in native unit tests.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Render a millisecond timestamp as RFC 3339 for logs and notices.
pub fn format_timestamp_ms(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Source of "now" for everything that debounces or stamps.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by [`now_ms`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        now_ms()
    }
}

/// Hand-driven clock.  Clones share the same instant, so a test can keep one
/// handle and advance time underneath a running [`crate::state::AppState`].
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: Rc::new(Cell::new(start_ms)) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}
