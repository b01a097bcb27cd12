//! Two-way binding between a tab's canonical component list and the grid.
//!
//! Each tab gets a binding with a small state machine:
//!
//! ```text
//! Unbound ──observe──▶ Syncing ──▶ Bound
//!                         ▲          │
//!                         └─canonical change
//! ```
//!
//! Change detection compares the tab revision and list length, never the
//! list contents.  An empty incoming list is classified before anything is
//! cleared: see [`EmptyListKind`].

use std::collections::HashMap;

use tracing::{debug, warn};

use super::grid::{derive_grid_items, GridItem};
use crate::constants::RACE_RECHECK_LIMIT;
use crate::error::LayoutError;
use crate::layout::LayoutManager;
use crate::models::{ComponentInstance, ListProvenance, Tab, TabId};
use crate::registry::ComponentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingState {
    #[default]
    Unbound,
    Syncing,
    Bound,
}

/// Why a tab's component list is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyListKind {
    /// Never populated in this session; the device cache may know better.
    Uninitialized,
    /// Emptied on purpose; the grid must follow.
    IntentionallyEmpty,
    /// Populated a moment ago and empty now without an authoritative cause.
    Race,
}

pub fn classify_empty(tab: &Tab) -> EmptyListKind {
    match tab.provenance() {
        ListProvenance::Unpopulated => EmptyListKind::Uninitialized,
        ListProvenance::Authoritative => EmptyListKind::IntentionallyEmpty,
        ListProvenance::Populated => EmptyListKind::Race,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Same revision and length as last time.
    Unchanged,
    /// Grid items were derived again from the canonical list.
    Rederived,
    /// The grid was emptied.
    Cleared,
    /// The tab has never been populated but the device cache holds widgets
    /// for it.  The caller restores them through the layout manager.
    DeferToCache(Vec<ComponentInstance>),
    /// Unexplained empty list; previous grid contents kept, re-checked on
    /// the next tick.
    PreservedDuringRace,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionOutcome {
    Committed(ComponentInstance),
    /// The tab is locked (or not bound); the grid gesture is dropped.
    Ignored,
}

#[derive(Debug, Default)]
struct CanvasBinding {
    state: BindingState,
    items: Vec<GridItem>,
    seen: Option<(u64, usize)>,
    race_ticks: u32,
}

impl CanvasBinding {
    fn settle(&mut self, items: Vec<GridItem>, fingerprint: (u64, usize)) {
        self.items = items;
        self.seen = Some(fingerprint);
        self.race_ticks = 0;
        self.state = BindingState::Bound;
    }
}

#[derive(Debug, Default)]
pub struct CanvasReconciler {
    bindings: HashMap<TabId, CanvasBinding>,
    epoch: u64,
}

impl CanvasReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the grid for `tab` in line with its canonical list.
    ///
    /// `cached` is the device-cache copy of the same tab, consulted only when
    /// the list is empty and has never been populated.
    pub fn observe(
        &mut self,
        tab: &Tab,
        registry: &ComponentRegistry,
        cached: Option<&Tab>,
    ) -> ReconcileOutcome {
        let binding = self.bindings.entry(tab.id.clone()).or_default();
        let fingerprint = (tab.revision(), tab.components.len());

        // Edit mode only gates interactivity; it never forces a re-derive.
        let mut relocked = false;
        for item in binding.items.iter_mut() {
            if item.is_draggable != tab.edit_mode || item.is_resizable != tab.edit_mode {
                item.set_interactive(tab.edit_mode);
                relocked = true;
            }
        }

        if binding.state == BindingState::Bound && binding.seen == Some(fingerprint) {
            binding.race_ticks = 0;
            if relocked {
                self.epoch += 1;
            }
            return ReconcileOutcome::Unchanged;
        }

        binding.state = BindingState::Syncing;

        if !tab.components.is_empty() {
            binding.settle(derive_grid_items(tab, registry), fingerprint);
            self.epoch += 1;
            debug!(
                tab_id = %tab.id,
                revision = fingerprint.0,
                items = fingerprint.1,
                "grid re-derived"
            );
            return ReconcileOutcome::Rederived;
        }

        match classify_empty(tab) {
            EmptyListKind::Uninitialized => {
                if let Some(cached) = cached.filter(|c| !c.components.is_empty()) {
                    debug!(
                        tab_id = %tab.id,
                        cached = cached.components.len(),
                        "deferring to device cache"
                    );
                    return ReconcileOutcome::DeferToCache(cached.components.clone());
                }
                binding.settle(Vec::new(), fingerprint);
                self.epoch += 1;
                ReconcileOutcome::Cleared
            }
            EmptyListKind::IntentionallyEmpty => {
                binding.settle(Vec::new(), fingerprint);
                self.epoch += 1;
                debug!(tab_id = %tab.id, "grid cleared");
                ReconcileOutcome::Cleared
            }
            EmptyListKind::Race => {
                binding.race_ticks += 1;
                if binding.race_ticks > RACE_RECHECK_LIMIT {
                    warn!(
                        tab_id = %tab.id,
                        ticks = binding.race_ticks,
                        "empty list persisted, accepting it"
                    );
                    binding.settle(Vec::new(), fingerprint);
                    self.epoch += 1;
                    return ReconcileOutcome::Cleared;
                }
                // Back to Bound with the old visuals; `seen` is left stale so
                // the next observe looks again.
                binding.state = BindingState::Bound;
                debug!(
                    tab_id = %tab.id,
                    ticks = binding.race_ticks,
                    "empty list looks transient, keeping grid"
                );
                ReconcileOutcome::PreservedDuringRace
            }
        }
    }

    /// Settle a tab whose cache deferral could not be applied.
    pub fn accept_empty(&mut self, tab: &Tab) {
        let binding = self.bindings.entry(tab.id.clone()).or_default();
        binding.settle(Vec::new(), (tab.revision(), tab.components.len()));
        self.epoch += 1;
    }

    /// Write a finished drag or resize back through the layout manager.
    ///
    /// The grid keeps the user's geometry until the next canonical
    /// re-derivation, which then carries any clamping applied by the manager.
    pub fn commit_interaction(
        &mut self,
        layout: &mut LayoutManager,
        tab_id: &str,
        item: &GridItem,
    ) -> Result<InteractionOutcome, LayoutError> {
        let editable = layout.tab(tab_id).map(|t| t.edit_mode).unwrap_or(false);
        let Some(binding) = self.bindings.get_mut(tab_id) else {
            debug!(tab_id, "interaction on unbound tab ignored");
            return Ok(InteractionOutcome::Ignored);
        };
        if !editable {
            debug!(tab_id, instance_id = %item.i, "tab locked, interaction ignored");
            return Ok(InteractionOutcome::Ignored);
        }

        if let Some(existing) = binding.items.iter_mut().find(|i| i.i == item.i) {
            existing.x = item.x;
            existing.y = item.y;
            existing.w = item.w;
            existing.h = item.h;
        }
        let updated = layout.update_component(tab_id, &item.i, &item.to_patch())?;
        Ok(InteractionOutcome::Committed(updated))
    }

    pub fn unbind(&mut self, tab_id: &str) {
        if self.bindings.remove(tab_id).is_some() {
            self.epoch += 1;
        }
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.epoch += 1;
    }

    pub fn state(&self, tab_id: &str) -> BindingState {
        self.bindings.get(tab_id).map(|b| b.state).unwrap_or_default()
    }

    pub fn items(&self, tab_id: &str) -> &[GridItem] {
        self.bindings.get(tab_id).map(|b| b.items.as_slice()).unwrap_or(&[])
    }

    /// Tabs holding on to visuals through a suspected race.
    pub fn pending_rechecks(&self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.race_ticks > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Incremented whenever visible grid state changes; hosts re-render only
    /// when it moves.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
