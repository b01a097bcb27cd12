//! Outbound write scheduling: per-key debounce, single-flight, bounded
//! retry and the background reconcile timer.
//!
//! Nothing here touches an event loop.  The caller feeds `now` (from a
//! [`crate::utils::Clock`]) into `schedule_save` / `poll` on every tick and
//! receives the writes that are due.  That keeps the debounce deterministic
//! and testable without timers.
//!
//! Per key there is at most one write in flight and at most one pending
//! payload behind it.  A newer `schedule_save` replaces the pending payload,
//! so only the latest state for a key ever becomes the target of a write.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::config::SyncConfig;
use crate::constants::{DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_MAX_RETRIES};
use crate::models::Snapshot;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Backoff strategy for retry delays.  Fixed formulas, no jitter, so retry
/// timings can be asserted exactly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed {
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    /// `base_ms * 2^attempt`, capped at `max_ms`.
    Exponential {
        #[serde(rename = "baseMs")]
        base_ms: u64,
        #[serde(rename = "maxMs")]
        max_ms: u64,
    },
    /// `base_ms * (attempt + 1)`, capped at `max_ms`.
    Linear {
        #[serde(rename = "baseMs")]
        base_ms: u64,
        #[serde(rename = "maxMs")]
        max_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once).
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            BackoffStrategy::Exponential {
                base_ms: DEFAULT_BACKOFF_BASE_MS,
                max_ms: DEFAULT_BACKOFF_MAX_MS,
            },
        )
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self { max_retries, backoff }
    }

    pub fn no_retry() -> Self {
        Self::new(0, BackoffStrategy::Fixed { delay_ms: 0 })
    }

    /// Delay in milliseconds before retry number `attempt` (0-indexed).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        match self.backoff {
            BackoffStrategy::Fixed { delay_ms } => delay_ms,
            BackoffStrategy::Exponential { base_ms, max_ms } => {
                let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                base_ms.saturating_mul(multiplier).min(max_ms)
            }
            BackoffStrategy::Linear { base_ms, max_ms } => {
                base_ms.saturating_mul(u64::from(attempt) + 1).min(max_ms)
            }
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// Keys & payloads
// ---------------------------------------------------------------------------

/// Logical resource a write targets.  Debounce and single-flight are per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SaveKey {
    Layout,
    Theme,
    Preference(String),
    ComponentState(String),
}

impl fmt::Display for SaveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveKey::Layout => f.write_str("layout"),
            SaveKey::Theme => f.write_str("theme"),
            SaveKey::Preference(k) => write!(f, "preference:{}", k),
            SaveKey::ComponentState(id) => write!(f, "component-state:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SavePayload {
    Layout(Snapshot),
    Theme(String),
    Preference(Value),
    ComponentState(Value),
}

/// A write released by the scheduler.  `generation` identifies the payload so
/// a late ack for a superseded write can be told apart from the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub key: SaveKey,
    pub payload: SavePayload,
    pub generation: u64,
    /// Retries already spent on this payload.
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Will be released again at `retry_at`.
    RetryScheduled { attempt: u32, retry_at: u64 },
    /// Retries used up.  The payload is parked and goes out with the next
    /// save or flush for its key.
    Exhausted,
    /// A newer payload for the key is already pending; the failure is moot.
    Superseded,
}

#[derive(Debug, Clone)]
struct Slot {
    payload: SavePayload,
    generation: u64,
    due_at: u64,
    attempt: u32,
    parked: bool,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SyncScheduler {
    debounce_ms: u64,
    reconcile_interval_ms: u64,
    retry: RetryPolicy,
    pending: BTreeMap<SaveKey, Slot>,
    in_flight: BTreeMap<SaveKey, u64>,
    next_generation: u64,
    next_reconcile_at: Option<u64>,
}

impl SyncScheduler {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            debounce_ms: config.debounce_ms,
            reconcile_interval_ms: config.reconcile_interval_ms,
            retry: config.retry.clone(),
            pending: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            next_generation: 1,
            next_reconcile_at: None,
        }
    }

    /// Queue `payload` for `key`, replacing anything still waiting and
    /// restarting that key's quiet period.
    pub fn schedule_save(&mut self, key: SaveKey, payload: SavePayload, now: u64) {
        let generation = self.bump_generation();
        let coalesced = self.pending.contains_key(&key);
        tracing::trace!(%key, generation, coalesced, "save scheduled");
        self.pending.insert(
            key,
            Slot {
                payload,
                generation,
                due_at: now.saturating_add(self.debounce_ms),
                attempt: 0,
                parked: false,
            },
        );
    }

    /// Writes whose quiet period (or retry delay) has elapsed.
    pub fn poll(&mut self, now: u64) -> Vec<PendingWrite> {
        let due: Vec<SaveKey> = self
            .pending
            .iter()
            .filter(|(key, slot)| {
                !slot.parked && slot.due_at <= now && !self.in_flight.contains_key(*key)
            })
            .map(|(key, _)| key.clone())
            .collect();
        due.into_iter().filter_map(|key| self.release(key)).collect()
    }

    /// Release pending writes immediately, for one key or for all of them.
    /// Keys with a write already in flight are made due so they follow as
    /// soon as the in-flight write settles.
    pub fn flush(&mut self, key: Option<&SaveKey>, now: u64) -> Vec<PendingWrite> {
        let keys: Vec<SaveKey> = match key {
            Some(k) => self.pending.contains_key(k).then(|| k.clone()).into_iter().collect(),
            None => self.pending.keys().cloned().collect(),
        };
        let mut released = Vec::new();
        for key in keys {
            if self.in_flight.contains_key(&key) {
                if let Some(slot) = self.pending.get_mut(&key) {
                    slot.due_at = now;
                    slot.parked = false;
                }
                continue;
            }
            if let Some(write) = self.release(key) {
                released.push(write);
            }
        }
        released
    }

    /// Acknowledge a successful write.  Returns `false` for a stale ack.
    pub fn record_success(&mut self, key: &SaveKey, generation: u64) -> bool {
        match self.in_flight.get(key) {
            Some(g) if *g == generation => {
                self.in_flight.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn record_failure(&mut self, write: PendingWrite, now: u64) -> FailureOutcome {
        if self.in_flight.get(&write.key) == Some(&write.generation) {
            self.in_flight.remove(&write.key);
        }
        if self.pending.contains_key(&write.key) {
            return FailureOutcome::Superseded;
        }

        if self.retry.should_retry(write.attempt) {
            let retry_at = now.saturating_add(self.retry.delay_ms(write.attempt));
            let attempt = write.attempt + 1;
            self.pending.insert(
                write.key,
                Slot {
                    payload: write.payload,
                    generation: write.generation,
                    due_at: retry_at,
                    attempt,
                    parked: false,
                },
            );
            FailureOutcome::RetryScheduled { attempt, retry_at }
        } else {
            self.pending.insert(
                write.key,
                Slot {
                    payload: write.payload,
                    generation: write.generation,
                    due_at: now,
                    attempt: 0,
                    parked: true,
                },
            );
            FailureOutcome::Exhausted
        }
    }

    /// Anything queued, retrying or in flight, excluding parked payloads.
    pub fn has_pending(&self) -> bool {
        !self.in_flight.is_empty() || self.pending.values().any(|s| !s.parked)
    }

    /// Anything not yet confirmed by the store, parked payloads included.
    pub fn has_unsaved(&self) -> bool {
        !self.in_flight.is_empty() || !self.pending.is_empty()
    }

    pub fn is_in_flight(&self, key: &SaveKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn pending_keys(&self) -> BTreeSet<SaveKey> {
        self.pending.keys().cloned().collect()
    }

    /// True once per reconcile interval.  The first call arms the timer.
    pub fn reconcile_due(&mut self, now: u64) -> bool {
        match self.next_reconcile_at {
            Some(at) if now >= at => {
                self.next_reconcile_at = Some(now.saturating_add(self.reconcile_interval_ms));
                true
            }
            Some(_) => false,
            None => {
                self.next_reconcile_at = Some(now.saturating_add(self.reconcile_interval_ms));
                false
            }
        }
    }

    /// Drop everything, e.g. after the session ended.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight.clear();
        self.next_reconcile_at = None;
    }

    fn release(&mut self, key: SaveKey) -> Option<PendingWrite> {
        let slot = self.pending.remove(&key)?;
        self.in_flight.insert(key.clone(), slot.generation);
        tracing::debug!(
            %key,
            generation = slot.generation,
            attempt = slot.attempt,
            "write released"
        );
        Some(PendingWrite {
            key,
            payload: slot.payload,
            generation: slot.generation,
            attempt: slot.attempt,
        })
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}
