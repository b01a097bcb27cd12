//! Remote per-user store interface.
//!
//! The browser build talks HTTP through [`crate::network::ApiClient`];
//! [`MemoryStore`] backs headless hosts and the test-suite.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::Value;

use crate::error::PersistenceError;
use crate::models::{Snapshot, SnapshotStamp};
use crate::scheduling::SaveKey;

/// Async, fallible load/save keyed by user and logical resource.  A failure
/// never invalidates local state; callers keep their last known good copy.
#[allow(async_fn_in_trait)]
pub trait PersistentStore {
    async fn load_layout(&self, user_id: &str) -> Result<Option<Snapshot>, PersistenceError>;

    async fn save_layout(&self, user_id: &str, snapshot: &Snapshot) -> Result<(), PersistenceError>;

    /// Version check used by background reconciliation.  Stores that can
    /// answer without shipping the whole document should override this.
    async fn load_layout_stamp(
        &self,
        user_id: &str,
    ) -> Result<Option<SnapshotStamp>, PersistenceError> {
        Ok(self.load_layout(user_id).await?.map(|s| s.stamp()))
    }

    async fn load_theme(&self, user_id: &str) -> Result<Option<String>, PersistenceError>;

    async fn save_theme(&self, user_id: &str, theme: &str) -> Result<(), PersistenceError>;

    async fn load_component_state(
        &self,
        user_id: &str,
        instance_id: &str,
    ) -> Result<Option<Value>, PersistenceError>;

    async fn save_component_state(
        &self,
        user_id: &str,
        instance_id: &str,
        state: &Value,
    ) -> Result<(), PersistenceError>;

    async fn load_preference(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Value>, PersistenceError>;

    async fn save_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), PersistenceError>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    layouts: HashMap<String, Snapshot>,
    themes: HashMap<String, String>,
    component_states: HashMap<(String, String), Value>,
    preferences: HashMap<(String, String), Value>,
    failing_writes: u32,
    offline: bool,
    writes: Vec<SaveKey>,
}

/// Process-local store.  Supports failure injection so retry and offline
/// behaviour can be exercised without a network.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RefCell<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with [`PersistenceError::Unavailable`].
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.borrow_mut().failing_writes = count;
    }

    /// While offline every call fails with [`PersistenceError::Network`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.borrow_mut().offline = offline;
    }

    /// Put a layout in place as if another device had saved it.
    pub fn seed_layout(&self, user_id: &str, snapshot: Snapshot) {
        self.inner.borrow_mut().layouts.insert(user_id.to_string(), snapshot);
    }

    pub fn stored_layout(&self, user_id: &str) -> Option<Snapshot> {
        self.inner.borrow().layouts.get(user_id).cloned()
    }

    pub fn stored_theme(&self, user_id: &str) -> Option<String> {
        self.inner.borrow().themes.get(user_id).cloned()
    }

    /// Keys of every successful write, in order.
    pub fn writes(&self) -> Vec<SaveKey> {
        self.inner.borrow().writes.clone()
    }

    pub fn write_count(&self, key: &SaveKey) -> usize {
        self.inner.borrow().writes.iter().filter(|k| *k == key).count()
    }

    fn check_read(&self) -> Result<(), PersistenceError> {
        if self.inner.borrow().offline {
            return Err(PersistenceError::Network("offline".into()));
        }
        Ok(())
    }

    fn begin_write(&self) -> Result<(), PersistenceError> {
        let mut inner = self.inner.borrow_mut();
        if inner.offline {
            return Err(PersistenceError::Network("offline".into()));
        }
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(PersistenceError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    async fn load_layout(&self, user_id: &str) -> Result<Option<Snapshot>, PersistenceError> {
        self.check_read()?;
        Ok(self.inner.borrow().layouts.get(user_id).cloned())
    }

    async fn save_layout(
        &self,
        user_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PersistenceError> {
        self.begin_write()?;
        let mut inner = self.inner.borrow_mut();
        inner.layouts.insert(user_id.to_string(), snapshot.clone());
        inner.writes.push(SaveKey::Layout);
        Ok(())
    }

    async fn load_theme(&self, user_id: &str) -> Result<Option<String>, PersistenceError> {
        self.check_read()?;
        Ok(self.inner.borrow().themes.get(user_id).cloned())
    }

    async fn save_theme(&self, user_id: &str, theme: &str) -> Result<(), PersistenceError> {
        self.begin_write()?;
        let mut inner = self.inner.borrow_mut();
        inner.themes.insert(user_id.to_string(), theme.to_string());
        inner.writes.push(SaveKey::Theme);
        Ok(())
    }

    async fn load_component_state(
        &self,
        user_id: &str,
        instance_id: &str,
    ) -> Result<Option<Value>, PersistenceError> {
        self.check_read()?;
        let key = (user_id.to_string(), instance_id.to_string());
        Ok(self.inner.borrow().component_states.get(&key).cloned())
    }

    async fn save_component_state(
        &self,
        user_id: &str,
        instance_id: &str,
        state: &Value,
    ) -> Result<(), PersistenceError> {
        self.begin_write()?;
        let mut inner = self.inner.borrow_mut();
        inner
            .component_states
            .insert((user_id.to_string(), instance_id.to_string()), state.clone());
        inner.writes.push(SaveKey::ComponentState(instance_id.to_string()));
        Ok(())
    }

    async fn load_preference(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Value>, PersistenceError> {
        self.check_read()?;
        let key = (user_id.to_string(), key.to_string());
        Ok(self.inner.borrow().preferences.get(&key).cloned())
    }

    async fn save_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), PersistenceError> {
        self.begin_write()?;
        let mut inner = self.inner.borrow_mut();
        inner.preferences.insert((user_id.to_string(), key.to_string()), value.clone());
        inner.writes.push(SaveKey::Preference(key.to_string()));
        Ok(())
    }
}
