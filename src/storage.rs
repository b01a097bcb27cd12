//! Device-local cache on top of `localStorage`.
//!
//! Entries live under a namespace prefix and are wrapped in an envelope that
//! records when they were written.  When the browser refuses a write for
//! quota reasons the cache evicts its least critical entries (layout backups
//! first, oldest first) and tries once more.  Identity and the current layout
//! are never evicted.  A write that still fails is abandoned; in-memory state
//! is never touched by cache trouble.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::Principal;
use crate::config::CacheConfig;
use crate::error::StorageError;
use crate::models::Snapshot;
use crate::utils::Clock;

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Minimal string key-value interface, modelled on the Web Storage API.
pub trait KeyValueStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&mut self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// `window.localStorage`.
pub struct BrowserStorage {
    storage: web_sys::Storage,
}

impl BrowserStorage {
    pub fn local() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no global window".into()))?;
        match window.local_storage() {
            Ok(Some(storage)) => Ok(Self { storage }),
            Ok(None) => Err(StorageError::Unavailable("localStorage is disabled".into())),
            Err(e) => Err(StorageError::Unavailable(format!("{:?}", e))),
        }
    }
}

fn is_quota_error(err: &wasm_bindgen::JsValue) -> bool {
    js_sys::Reflect::get(err, &wasm_bindgen::JsValue::from_str("name"))
        .ok()
        .and_then(|name| name.as_string())
        .map(|name| name == "QuotaExceededError" || name == "NS_ERROR_DOM_QUOTA_REACHED")
        .unwrap_or(false)
}

impl KeyValueStorage for BrowserStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage
            .get_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage.set_item(key, value).map_err(|e| {
            if is_quota_error(&e) {
                StorageError::QuotaExceeded { key: key.to_string() }
            } else {
                StorageError::Unavailable(format!("{:?}", e))
            }
        })
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.storage
            .remove_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let len = self
            .storage
            .length()
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))?;
        let mut keys = Vec::with_capacity(len as usize);
        for index in 0..len {
            if let Ok(Some(key)) = self.storage.key(index) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

/// In-memory backend with an optional byte quota (keys + values, UTF-8).
/// Used natively and in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self { entries: BTreeMap::new(), quota_bytes: Some(quota_bytes) }
    }

    pub fn used_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes {
            let replaced = self.entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let after = self.used_bytes() - replaced + key.len() + value.len();
            if after > quota {
                return Err(StorageError::QuotaExceeded { key: key.to_string() });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Entry classification
// ---------------------------------------------------------------------------

/// What a cache key holds, ordered by how readily it may be evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CacheEntryKind {
    LayoutBackup,
    ComponentState,
    Preference,
    Theme,
    CurrentLayout,
    Identity,
}

impl CacheEntryKind {
    /// Classify a key with the namespace prefix already stripped.
    pub fn classify(key: &str) -> Option<Self> {
        if key == "identity" {
            Some(Self::Identity)
        } else if key == "theme" {
            Some(Self::Theme)
        } else if key.starts_with("layout-backup:") {
            Some(Self::LayoutBackup)
        } else if key.starts_with("layout:") {
            Some(Self::CurrentLayout)
        } else if key.starts_with("pref:") {
            Some(Self::Preference)
        } else if key.starts_with("component-state:") {
            Some(Self::ComponentState)
        } else {
            None
        }
    }

    pub fn is_evictable(self) -> bool {
        !matches!(self, Self::Identity | Self::CurrentLayout)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEnvelope<T> {
    written_at: u64,
    data: T,
}

/// Only the timestamp; used to rank eviction candidates without decoding
/// their payloads.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeHeader {
    #[serde(default)]
    written_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvictionReport {
    pub removed: Vec<String>,
    pub freed_bytes: usize,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct LocalCache {
    storage: Box<dyn KeyValueStorage>,
    prefix: String,
    max_backups: usize,
    clock: Rc<dyn Clock>,
}

impl LocalCache {
    pub fn new(
        storage: Box<dyn KeyValueStorage>,
        config: &CacheConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            prefix: config.prefix.clone(),
            max_backups: config.max_layout_backups,
            clock,
        }
    }

    // ---- identity ----------------------------------------------------------

    pub fn store_identity(&mut self, principal: &Principal) -> Result<(), StorageError> {
        self.write("identity", principal)
    }

    pub fn load_identity(&self) -> Option<Principal> {
        self.read("identity")
    }

    pub fn clear_identity(&mut self) -> Result<(), StorageError> {
        self.remove("identity")
    }

    // ---- layout ------------------------------------------------------------

    pub fn store_layout(&mut self, user_id: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.write(&format!("layout:{}", user_id), snapshot)
    }

    pub fn load_layout(&self, user_id: &str) -> Option<Snapshot> {
        self.read(&format!("layout:{}", user_id))
    }

    /// Keep a copy of a layout that is about to be replaced.  Only the
    /// newest `max_layout_backups` copies are retained.
    pub fn store_layout_backup(
        &mut self,
        user_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), StorageError> {
        if self.max_backups == 0 {
            return Ok(());
        }
        let key = format!("layout-backup:{}:{:013}", user_id, self.clock.now_ms());
        self.write(&key, snapshot)?;

        let mut backups = self.backup_keys(user_id);
        if backups.len() > self.max_backups {
            let excess = backups.len() - self.max_backups;
            for key in backups.drain(..excess) {
                self.remove(&key)?;
                debug!(key = %key, "pruned layout backup");
            }
        }
        Ok(())
    }

    /// Backups for `user_id`, oldest first.
    pub fn load_layout_backups(&self, user_id: &str) -> Vec<Snapshot> {
        self.backup_keys(user_id).iter().filter_map(|k| self.read(k)).collect()
    }

    // ---- theme / preferences / component state ----------------------------

    pub fn store_theme(&mut self, theme: &str) -> Result<(), StorageError> {
        self.write("theme", &theme)
    }

    pub fn load_theme(&self) -> Option<String> {
        self.read("theme")
    }

    pub fn store_preference(&mut self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.write(&format!("pref:{}", key), value)
    }

    pub fn load_preference(&self, key: &str) -> Option<Value> {
        self.read(&format!("pref:{}", key))
    }

    pub fn store_component_state(
        &mut self,
        instance_id: &str,
        state: &Value,
    ) -> Result<(), StorageError> {
        self.write(&format!("component-state:{}", instance_id), state)
    }

    pub fn load_component_state(&self, instance_id: &str) -> Option<Value> {
        self.read(&format!("component-state:{}", instance_id))
    }

    /// All keys in our namespace, prefix stripped.
    pub fn entry_keys(&self) -> Vec<String> {
        self.storage
            .keys()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect()
    }

    // ---- eviction ----------------------------------------------------------

    /// Remove evictable entries until at least `needed_bytes` are freed.
    /// Candidates go least critical kind first, then oldest, then largest.
    pub fn evict(&mut self, needed_bytes: usize, protect: &str) -> EvictionReport {
        let mut candidates: Vec<(CacheEntryKind, u64, usize, String)> = self
            .entry_keys()
            .into_iter()
            .filter(|k| k != protect)
            .filter_map(|k| {
                let kind = CacheEntryKind::classify(&k).filter(|kind| kind.is_evictable())?;
                let full_key = self.full_key(&k);
                let raw = self.storage.get_item(&full_key).ok().flatten()?;
                let written_at = serde_json::from_str::<EnvelopeHeader>(&raw)
                    .map(|h| h.written_at)
                    .unwrap_or(0);
                Some((kind, written_at, full_key.len() + raw.len(), k))
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(b.2.cmp(&a.2)));

        let mut report = EvictionReport::default();
        for (kind, _, size, key) in candidates {
            if report.freed_bytes >= needed_bytes {
                break;
            }
            if self.remove(&key).is_ok() {
                debug!(key = %key, ?kind, size, "evicted cache entry");
                report.freed_bytes += size;
                report.removed.push(key);
            }
        }
        report
    }

    // ---- internals ---------------------------------------------------------

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn backup_keys(&self, user_id: &str) -> Vec<String> {
        let prefix = format!("layout-backup:{}:", user_id);
        let mut keys: Vec<String> = self
            .entry_keys()
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect();
        keys.sort();
        keys
    }

    fn write<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
        let envelope = CacheEnvelope { written_at: self.clock.now_ms(), data: value };
        let raw = serde_json::to_string(&envelope)?;
        let full_key = self.full_key(key);

        match self.storage.set_item(&full_key, &raw) {
            Err(StorageError::QuotaExceeded { .. }) => {
                let needed = full_key.len() + raw.len();
                let report = self.evict(needed, key);
                info!(
                    key,
                    freed = report.freed_bytes,
                    evicted = report.removed.len(),
                    "quota exceeded, evicted cache entries"
                );
                self.storage.set_item(&full_key, &raw).map_err(|err| {
                    warn!(key, error = %err, "cache write abandoned after eviction");
                    err
                })
            }
            other => other,
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get_item(&self.full_key(key)) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key, error = %err, "cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<CacheEnvelope<T>>(&raw) {
            Ok(envelope) => Some(envelope.data),
            Err(err) => {
                warn!(key, error = %err, "ignoring unreadable cache entry");
                None
            }
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let full_key = self.full_key(key);
        self.storage.remove_item(&full_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tab;
    use crate::utils::ManualClock;
    use serde_json::json;

    fn cache_with(storage: MemoryStorage, clock: &ManualClock) -> LocalCache {
        LocalCache::new(Box::new(storage), &CacheConfig::default(), Rc::new(clock.clone()))
    }

    fn snapshot(version: u64, padding: usize) -> Snapshot {
        Snapshot {
            layout_id: "layout-1".into(),
            tabs: vec![Tab::new("t1", "x".repeat(padding))],
            active_tab_id: Some("t1".into()),
            version,
            saved_at: version,
        }
    }

    #[test]
    fn keys_are_classified_by_criticality() {
        assert_eq!(CacheEntryKind::classify("identity"), Some(CacheEntryKind::Identity));
        assert_eq!(CacheEntryKind::classify("layout:u1"), Some(CacheEntryKind::CurrentLayout));
        assert_eq!(
            CacheEntryKind::classify("layout-backup:u1:1"),
            Some(CacheEntryKind::LayoutBackup)
        );
        assert_eq!(
            CacheEntryKind::classify("component-state:c"),
            Some(CacheEntryKind::ComponentState)
        );
        assert_eq!(CacheEntryKind::classify("unrelated"), None);
        assert!(CacheEntryKind::LayoutBackup < CacheEntryKind::Theme);
        assert!(!CacheEntryKind::Identity.is_evictable());
    }

    #[test]
    fn round_trips_through_envelope() {
        let clock = ManualClock::new(5);
        let mut cache = cache_with(MemoryStorage::new(), &clock);
        cache.store_theme("gzc-light").unwrap();
        cache.store_preference("density", &json!("compact")).unwrap();
        assert_eq!(cache.load_theme().as_deref(), Some("gzc-light"));
        assert_eq!(cache.load_preference("density"), Some(json!("compact")));
        assert_eq!(cache.load_preference("missing"), None);

        let mut keys = cache.entry_keys();
        keys.sort();
        assert_eq!(keys, ["pref:density", "theme"]);
    }

    #[test]
    fn corrupt_entries_read_as_missing() {
        let clock = ManualClock::new(0);
        let mut storage = MemoryStorage::new();
        storage.set_item("gzc-intel:theme", "{not json").unwrap();
        let cache = cache_with(storage, &clock);
        assert_eq!(cache.load_theme(), None);
    }

    #[test]
    fn backups_are_capped() {
        let clock = ManualClock::new(1_000);
        let mut cache = cache_with(MemoryStorage::new(), &clock);
        for v in 0..8 {
            clock.advance(10);
            cache.store_layout_backup("u1", &snapshot(v, 1)).unwrap();
        }
        let backups = cache.load_layout_backups("u1");
        assert_eq!(backups.len(), 5);
        assert_eq!(backups.first().map(|s| s.version), Some(3));
        assert_eq!(backups.last().map(|s| s.version), Some(7));
    }

    #[test]
    fn quota_pressure_evicts_backups_before_anything_else() {
        let clock = ManualClock::new(1_000);
        let mut cache = cache_with(MemoryStorage::with_quota(3_500), &clock);
        cache.store_identity(&Principal::new("u1", "tenant")).unwrap();
        cache.store_theme("gzc-dark").unwrap();
        for v in 0..3 {
            clock.advance(1);
            cache.store_layout_backup("u1", &snapshot(v, 600)).unwrap();
        }

        clock.advance(1);
        cache.store_layout("u1", &snapshot(10, 1_200)).unwrap();

        assert!(cache.load_identity().is_some());
        assert_eq!(cache.load_layout("u1").map(|s| s.version), Some(10));
        assert_eq!(cache.load_theme().as_deref(), Some("gzc-dark"));
        let remaining = cache.load_layout_backups("u1");
        assert!(remaining.len() < 3);
        // Oldest backups went first.
        assert!(remaining.iter().all(|s| s.version > 0));
    }

    #[test]
    fn write_is_abandoned_when_eviction_cannot_help() {
        let clock = ManualClock::new(0);
        let mut cache = cache_with(MemoryStorage::with_quota(300), &clock);
        cache.store_identity(&Principal::new("u1", "tenant")).unwrap();
        let err = cache.store_layout("u1", &snapshot(1, 1_000)).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert!(cache.load_identity().is_some());
    }
}
