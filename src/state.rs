//! Session context.
//!
//! An `AppState` is built explicitly when a user session starts and dropped
//! when it ends.  Everything the reducers touch hangs off it; there is no
//! global mutable state.

use std::collections::BTreeSet;
use std::rc::Rc;

use serde::Serialize;
use tracing::{info, warn};

use crate::auth::Principal;
use crate::canvas::{
    materialize, CanvasReconciler, GridItem, MaterializedComponent, ReconcileOutcome,
};
use crate::config::AppConfig;
use crate::constants::{DEFAULT_TAB_TITLE, DEFAULT_THEME};
use crate::layout::{LayoutManager, LoadOutcome};
use crate::models::{ListProvenance, Snapshot, SnapshotStamp, TabOptions};
use crate::registry::ComponentRegistry;
use crate::scheduling::{SaveKey, SavePayload, SyncScheduler};
use crate::storage::{KeyValueStorage, LocalCache};
use crate::utils::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Local state shown, remote load outstanding.
    Starting,
    Ready,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// A user-visible, dismissible, non-blocking message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
}

pub struct AppState {
    pub config: AppConfig,
    pub principal: Principal,
    pub registry: Rc<ComponentRegistry>,
    pub layout: LayoutManager,
    pub canvas: CanvasReconciler,
    pub sync: SyncScheduler,
    pub cache: LocalCache,
    pub theme: String,
    pub notices: Vec<Notice>,
    pub phase: SessionPhase,
    /// Newer remote layout seen while the user was editing.
    pub remote_drift: Option<SnapshotStamp>,
    /// Preference and widget-state pulls still in flight.
    pub remote_reads: BTreeSet<SaveKey>,
    /// Bumped whenever a pulled value lands in the device cache.
    pub remote_values: u64,
    clock: Rc<dyn Clock>,
    next_notice_id: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        principal: Principal,
        storage: Box<dyn KeyValueStorage>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self::with_registry(
            config,
            principal,
            Rc::new(ComponentRegistry::builtin()),
            storage,
            clock,
        )
    }

    pub fn with_registry(
        config: AppConfig,
        principal: Principal,
        registry: Rc<ComponentRegistry>,
        storage: Box<dyn KeyValueStorage>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let layout = LayoutManager::new(registry.clone(), config.grid, clock.clone());
        let sync = SyncScheduler::new(&config.sync);
        let cache = LocalCache::new(storage, &config.cache, clock.clone());
        Self {
            config,
            principal,
            registry,
            layout,
            canvas: CanvasReconciler::new(),
            sync,
            cache,
            theme: DEFAULT_THEME.to_string(),
            notices: Vec::new(),
            phase: SessionPhase::Starting,
            remote_drift: None,
            remote_reads: BTreeSet::new(),
            remote_values: 0,
            clock,
            next_notice_id: 1,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn user_id(&self) -> &str {
        &self.principal.user_id
    }

    // ---- notices -----------------------------------------------------------

    pub fn push_notice(&mut self, kind: NoticeKind, message: impl Into<String>) -> Notice {
        let notice = Notice { id: self.next_notice_id, kind, message: message.into() };
        self.next_notice_id += 1;
        self.notices.push(notice.clone());
        notice
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    // ---- layout plumbing ---------------------------------------------------

    /// Write the current layout through to the device cache and queue the
    /// debounced remote save.  Called after every successful mutation.
    ///
    /// A newer remote layout that was deferred is overruled here: the
    /// local write that follows is the last one, so it must also carry the
    /// higher stamp.
    pub fn layout_changed(&mut self) {
        if let Some(remote) = self.remote_drift.take() {
            if self.layout.supersede(remote) {
                info!(
                    ?remote,
                    version = self.layout.stamp().version,
                    "local edits supersede deferred remote layout"
                );
            }
        }
        let snapshot = self.layout.to_snapshot();
        self.cache_layout(&snapshot);
        let now = self.now_ms();
        self.sync.schedule_save(SaveKey::Layout, SavePayload::Layout(snapshot), now);
    }

    pub fn cache_layout(&mut self, snapshot: &Snapshot) {
        if let Err(err) = self.cache.store_layout(&self.principal.user_id, snapshot) {
            warn!(error = %err, "could not cache layout on this device");
        }
    }

    /// Re-run the canvas binding for one tab, restoring cached widgets when
    /// the reconciler asks for them.
    pub fn reconcile_tab(&mut self, tab_id: &str) -> Option<ReconcileOutcome> {
        let tab = self.layout.tab(tab_id)?;
        let unpopulated =
            tab.components.is_empty() && tab.provenance() == ListProvenance::Unpopulated;
        let cached = if unpopulated {
            self.cache
                .load_layout(&self.principal.user_id)
                .and_then(|s| s.tabs.into_iter().find(|t| t.id == tab_id))
        } else {
            None
        };
        let outcome = self.canvas.observe(tab, &self.registry, cached.as_ref());

        if let ReconcileOutcome::DeferToCache(components) = &outcome {
            if self.layout.restore_tab_components(tab_id, components.clone()) {
                self.layout_changed();
                if let Some(tab) = self.layout.tab(tab_id) {
                    self.canvas.observe(tab, &self.registry, None);
                }
            } else if let Some(tab) = self.layout.tab(tab_id) {
                self.canvas.accept_empty(tab);
            }
        }
        Some(outcome)
    }

    pub fn reconcile_all(&mut self) {
        let ids: Vec<String> = self.layout.tabs().iter().map(|t| t.id.clone()).collect();
        for id in ids {
            self.reconcile_tab(&id);
        }
    }

    /// Offer a snapshot from the remote store.  When it wins, the previous
    /// local layout is kept as a device backup and every tab re-binds.
    pub fn apply_remote_snapshot(&mut self, snapshot: Snapshot) -> LoadOutcome {
        let previous = self.layout.to_snapshot();
        let outcome = self.layout.load_from_snapshot(snapshot);
        if outcome == LoadOutcome::Applied {
            if previous.component_count() > 0 {
                let user_id = &self.principal.user_id;
                if let Err(err) = self.cache.store_layout_backup(user_id, &previous) {
                    warn!(error = %err, "could not back up replaced layout");
                }
            }
            let current = self.layout.to_snapshot();
            self.cache_layout(&current);
            self.canvas.clear();
            self.reconcile_all();
        }
        outcome
    }

    /// A session always has at least one tab to land on.
    pub fn ensure_default_tab(&mut self) {
        if !self.layout.tabs().is_empty() {
            return;
        }
        let options = TabOptions { closable: false, activate: true };
        match self.layout.create_tab(DEFAULT_TAB_TITLE, options) {
            Ok(_) => self.layout_changed(),
            Err(err) => warn!(error = %err, "could not create default tab"),
        }
    }

    /// No tab unlocked and nothing waiting to be written.
    pub fn is_idle(&self) -> bool {
        !self.layout.is_editing() && !self.sync.has_pending()
    }

    // ---- view helpers ------------------------------------------------------

    pub fn grid_items(&self, tab_id: &str) -> &[GridItem] {
        self.canvas.items(tab_id)
    }

    pub fn materialized(&self, tab_id: &str) -> Vec<MaterializedComponent> {
        self.layout
            .tab(tab_id)
            .map(|tab| materialize(tab, &self.registry))
            .unwrap_or_default()
    }

    /// Changes whenever something a host renders changes.
    pub fn render_key(&self) -> (u64, u64, u64, usize, u64) {
        (
            self.layout.stamp().version,
            self.canvas.epoch(),
            self.notices.last().map(|n| n.id).unwrap_or(0),
            self.notices.len(),
            self.remote_values,
        )
    }

    /// A write for `key` is queued or on the wire, so this device holds the
    /// newest value.
    pub fn has_local_write(&self, key: &SaveKey) -> bool {
        self.sync.pending_keys().contains(key) || self.sync.is_in_flight(key)
    }
}
