//! Layout state manager, the only place tabs and placed widgets change.
//!
//! Every successful mutation bumps the layout's [`SnapshotStamp`] and, when a
//! tab's component list changed, that tab's revision.  The canvas keys its
//! re-derivation off the revision; the sync path keys last-write-wins off the
//! stamp.

use std::collections::HashSet;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info, warn};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::GridConfig;
use crate::constants::MAX_TAB_TITLE_GRAPHEMES;
use crate::error::LayoutError;
use crate::models::{
    ComponentInstance, ComponentPatch, GridPos, GridSize, Layout, ListProvenance, Snapshot,
    SnapshotStamp, Tab, TabOptions,
};
use crate::registry::{ComponentDescriptor, ComponentRegistry};
use crate::utils::Clock;

/// Result of offering a snapshot to [`LayoutManager::load_from_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// The snapshot was not strictly newer; nothing changed.
    IgnoredStale { local: SnapshotStamp, incoming: SnapshotStamp },
}

/// First free cell for a new widget.
///
/// Walks from (0,0) in `step` increments along x, wrapping to the next band
/// of rows once x reaches the column count.  A cell is free when no existing
/// widget has exactly that origin.
pub fn next_free_cell(occupied: &[GridPos], grid: GridConfig) -> GridPos {
    let grid = grid.normalized();
    let taken: HashSet<GridPos> = occupied.iter().copied().collect();
    let mut candidate = GridPos::new(0, 0);
    while taken.contains(&candidate) {
        candidate.x += grid.step;
        if candidate.x >= grid.columns {
            candidate.x = 0;
            candidate.y += grid.step;
        }
    }
    candidate
}

pub struct LayoutManager {
    layout: Layout,
    stamp: SnapshotStamp,
    next_revision: u64,
    registry: Rc<ComponentRegistry>,
    grid: GridConfig,
    clock: Rc<dyn Clock>,
}

impl LayoutManager {
    pub fn new(registry: Rc<ComponentRegistry>, grid: GridConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            layout: Layout {
                id: format!("layout-{}", Uuid::new_v4()),
                tabs: Vec::new(),
                active_tab_id: None,
            },
            stamp: SnapshotStamp::default(),
            next_revision: 1,
            registry,
            grid: grid.normalized(),
            clock,
        }
    }

    // ---------------------------------------------------------------------
    // Read access
    // ---------------------------------------------------------------------

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.layout.tabs
    }

    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.layout.tabs.iter().find(|t| t.id == tab_id)
    }

    pub fn active_tab_id(&self) -> Option<&str> {
        self.layout.active_tab_id.as_deref()
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active_tab_id().and_then(|id| self.tab(id))
    }

    pub fn stamp(&self) -> SnapshotStamp {
        self.stamp
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn grid(&self) -> GridConfig {
        self.grid
    }

    /// Whether any tab is currently unlocked for editing.
    pub fn is_editing(&self) -> bool {
        self.layout.tabs.iter().any(|t| t.edit_mode)
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            layout_id: self.layout.id.clone(),
            tabs: self.layout.tabs.clone(),
            active_tab_id: self.layout.active_tab_id.clone(),
            version: self.stamp.version,
            saved_at: self.stamp.saved_at,
        }
    }

    // ---------------------------------------------------------------------
    // Tabs
    // ---------------------------------------------------------------------

    pub fn create_tab(&mut self, title: &str, options: TabOptions) -> Result<Tab, LayoutError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(LayoutError::Validation("tab title must not be empty".into()));
        }
        if title.graphemes(true).count() > MAX_TAB_TITLE_GRAPHEMES {
            return Err(LayoutError::Validation(format!(
                "tab title must be at most {} characters",
                MAX_TAB_TITLE_GRAPHEMES
            )));
        }

        let mut tab = Tab::new(format!("tab-{}", Uuid::new_v4()), title);
        tab.closable = options.closable;
        tab.revision = self.bump_revision();
        self.layout.tabs.push(tab.clone());
        if options.activate || self.layout.active_tab_id.is_none() {
            self.layout.active_tab_id = Some(tab.id.clone());
        }
        self.touch();
        info!(tab_id = %tab.id, title = %tab.title, "tab created");
        Ok(tab)
    }

    pub fn close_tab(&mut self, tab_id: &str) -> Result<(), LayoutError> {
        let index = self.tab_index(tab_id)?;
        if !self.layout.tabs[index].closable {
            return Err(LayoutError::InvalidOperation(format!("tab `{}` cannot be closed", tab_id)));
        }
        self.layout.tabs.remove(index);

        if self.layout.active_tab_id.as_deref() == Some(tab_id) {
            // Previous tab in sequence; closing the first tab hands over to
            // the new first tab.
            let fallback = index.checked_sub(1).unwrap_or(0);
            self.layout.active_tab_id = self.layout.tabs.get(fallback).map(|t| t.id.clone());
        }
        self.touch();
        info!(tab_id, active = ?self.layout.active_tab_id, "tab closed");
        Ok(())
    }

    /// Point the layout at `tab_id`.  Unknown ids are ignored.  Returns
    /// whether the pointer moved.
    pub fn set_active_tab(&mut self, tab_id: &str) -> bool {
        if self.tab(tab_id).is_none() {
            debug!(tab_id, "ignoring activation of unknown tab");
            return false;
        }
        if self.layout.active_tab_id.as_deref() == Some(tab_id) {
            return false;
        }
        self.layout.active_tab_id = Some(tab_id.to_string());
        self.touch();
        true
    }

    /// Flip edit mode on one tab; returns the new value.
    pub fn toggle_edit_mode(&mut self, tab_id: &str) -> Result<bool, LayoutError> {
        let index = self.tab_index(tab_id)?;
        let tab = &mut self.layout.tabs[index];
        tab.edit_mode = !tab.edit_mode;
        let edit_mode = tab.edit_mode;
        self.touch();
        debug!(tab_id, edit_mode, "edit mode toggled");
        Ok(edit_mode)
    }

    /// Set edit mode explicitly; returns whether it changed.
    pub fn set_edit_mode(&mut self, tab_id: &str, edit_mode: bool) -> Result<bool, LayoutError> {
        let index = self.tab_index(tab_id)?;
        if self.layout.tabs[index].edit_mode == edit_mode {
            return Ok(false);
        }
        self.layout.tabs[index].edit_mode = edit_mode;
        self.touch();
        Ok(true)
    }

    /// Explicit user clear.  The resulting empty list is authoritative.
    pub fn clear_tab(&mut self, tab_id: &str) -> Result<(), LayoutError> {
        let index = self.tab_index(tab_id)?;
        let revision = self.bump_revision();
        let tab = &mut self.layout.tabs[index];
        tab.components.clear();
        tab.provenance = ListProvenance::Authoritative;
        tab.revision = revision;
        self.touch();
        info!(tab_id, "tab cleared");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Components
    // ---------------------------------------------------------------------

    pub fn add_component(
        &mut self,
        tab_id: &str,
        component_type: &str,
        position: Option<GridPos>,
    ) -> Result<ComponentInstance, LayoutError> {
        let index = self.tab_index(tab_id)?;
        let descriptor = self
            .registry
            .get_component(component_type)
            .ok_or_else(|| LayoutError::UnknownComponentType(component_type.to_string()))?;

        let size = clamp_size(Some(descriptor), descriptor.default_size, self.grid);
        let origin = match position {
            Some(pos) => clamp_position(pos, size, self.grid),
            None => {
                let occupied: Vec<GridPos> =
                    self.layout.tabs[index].components.iter().map(|c| c.position()).collect();
                next_free_cell(&occupied, self.grid)
            }
        };
        let instance = ComponentInstance {
            id: format!("{}-{}", component_type, Uuid::new_v4()),
            component_type: component_type.to_string(),
            x: origin.x,
            y: origin.y,
            w: size.w,
            h: size.h,
            props: descriptor.default_props.clone(),
        };

        let revision = self.bump_revision();
        let tab = &mut self.layout.tabs[index];
        tab.components.push(instance.clone());
        tab.provenance = ListProvenance::Populated;
        tab.revision = revision;
        self.touch();
        info!(
            tab_id,
            instance_id = %instance.id,
            x = instance.x,
            y = instance.y,
            "component added"
        );
        Ok(instance)
    }

    /// Merge `patch` into a placed widget.  Out-of-range values are clamped
    /// into the widget's registry bounds and the grid, never rejected.
    pub fn update_component(
        &mut self,
        tab_id: &str,
        instance_id: &str,
        patch: &ComponentPatch,
    ) -> Result<ComponentInstance, LayoutError> {
        let tab_index = self.tab_index(tab_id)?;
        let component_index = self.layout.tabs[tab_index]
            .components
            .iter()
            .position(|c| c.id == instance_id)
            .ok_or_else(|| LayoutError::component_not_found(instance_id))?;

        let current = &self.layout.tabs[tab_index].components[component_index];
        if patch.is_empty() {
            return Ok(current.clone());
        }
        let descriptor = self.registry.get_component(&current.component_type);
        let size = clamp_size(
            descriptor,
            GridSize::new(patch.w.unwrap_or(current.w), patch.h.unwrap_or(current.h)),
            self.grid,
        );
        let origin = clamp_position(
            GridPos::new(patch.x.unwrap_or(current.x), patch.y.unwrap_or(current.y)),
            size,
            self.grid,
        );
        let props = match &patch.props {
            Some(incoming) => merge_props(&current.props, incoming),
            None => current.props.clone(),
        };
        let updated = ComponentInstance {
            id: current.id.clone(),
            component_type: current.component_type.clone(),
            x: origin.x,
            y: origin.y,
            w: size.w,
            h: size.h,
            props,
        };

        if &updated == current {
            return Ok(updated);
        }
        let revision = self.bump_revision();
        let tab = &mut self.layout.tabs[tab_index];
        tab.components[component_index] = updated.clone();
        tab.provenance = ListProvenance::Populated;
        tab.revision = revision;
        self.touch();
        debug!(
            tab_id,
            instance_id,
            x = updated.x,
            y = updated.y,
            w = updated.w,
            h = updated.h,
            "component updated"
        );
        Ok(updated)
    }

    /// Idempotent: removing something that is not there is a no-op.
    /// Returns whether anything was removed.
    pub fn remove_component(&mut self, tab_id: &str, instance_id: &str) -> bool {
        let Some(tab_index) = self.layout.tabs.iter().position(|t| t.id == tab_id) else {
            return false;
        };
        let before = self.layout.tabs[tab_index].components.len();
        self.layout.tabs[tab_index].components.retain(|c| c.id != instance_id);
        if self.layout.tabs[tab_index].components.len() == before {
            return false;
        }

        let revision = self.bump_revision();
        let tab = &mut self.layout.tabs[tab_index];
        tab.provenance = if tab.components.is_empty() {
            ListProvenance::Authoritative
        } else {
            ListProvenance::Populated
        };
        tab.revision = revision;
        self.touch();
        info!(tab_id, instance_id, "component removed");
        true
    }

    /// Put locally cached widgets back onto a tab that has never been
    /// populated in this session.  Returns whether anything was restored.
    pub fn restore_tab_components(
        &mut self,
        tab_id: &str,
        components: Vec<ComponentInstance>,
    ) -> bool {
        let Some(tab_index) = self.layout.tabs.iter().position(|t| t.id == tab_id) else {
            return false;
        };
        let tab = &self.layout.tabs[tab_index];
        if !tab.components.is_empty()
            || tab.provenance != ListProvenance::Unpopulated
            || components.is_empty()
        {
            return false;
        }

        let mut seen: HashSet<String> = self.all_instance_ids();
        let restored = self.sanitize_components(components, &mut seen);
        let count = restored.len();
        let revision = self.bump_revision();
        let tab = &mut self.layout.tabs[tab_index];
        tab.components = restored;
        tab.provenance = ListProvenance::Populated;
        tab.revision = revision;
        self.touch();
        info!(tab_id, count, "restored cached components");
        true
    }

    // ---------------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------------

    /// Replace the whole layout from `snapshot` when it is strictly newer
    /// than ours.  Older or equal snapshots never replace anything, so a
    /// stale empty list can never wipe a populated one.
    pub fn load_from_snapshot(&mut self, snapshot: Snapshot) -> LoadOutcome {
        let incoming = snapshot.stamp();
        if incoming <= self.stamp {
            warn!(
                ?incoming,
                local = ?self.stamp,
                "ignoring snapshot that is not newer than local state"
            );
            return LoadOutcome::IgnoredStale { local: self.stamp, incoming };
        }

        let mut seen = HashSet::new();
        let mut tabs = Vec::with_capacity(snapshot.tabs.len());
        for mut tab in snapshot.tabs {
            if tabs.iter().any(|t: &Tab| t.id == tab.id) {
                warn!(tab_id = %tab.id, "dropping duplicate tab from snapshot");
                continue;
            }
            let components = std::mem::take(&mut tab.components);
            tab.components = self.sanitize_components(components, &mut seen);
            tab.provenance = if tab.components.is_empty() {
                ListProvenance::Authoritative
            } else {
                ListProvenance::Populated
            };
            tab.revision = self.bump_revision();
            tabs.push(tab);
        }

        let active = snapshot
            .active_tab_id
            .filter(|id| tabs.iter().any(|t| &t.id == id))
            .or_else(|| tabs.first().map(|t| t.id.clone()));

        if !snapshot.layout_id.is_empty() {
            self.layout.id = snapshot.layout_id;
        }
        self.layout.tabs = tabs;
        self.layout.active_tab_id = active;
        self.stamp = incoming;
        info!(
            version = incoming.version,
            tabs = self.layout.tabs.len(),
            "layout loaded from snapshot"
        );
        LoadOutcome::Applied
    }

    /// Move our stamp past `remote` so the next write outranks a remote
    /// layout that was not pulled.  Content is untouched.  Returns whether
    /// the stamp moved.
    pub fn supersede(&mut self, remote: SnapshotStamp) -> bool {
        if self.stamp > remote {
            return false;
        }
        self.stamp.version = remote.version + 1;
        self.stamp.saved_at = self.clock.now_ms().max(remote.saved_at);
        true
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn tab_index(&self, tab_id: &str) -> Result<usize, LayoutError> {
        self.layout
            .tabs
            .iter()
            .position(|t| t.id == tab_id)
            .ok_or_else(|| LayoutError::tab_not_found(tab_id))
    }

    fn touch(&mut self) {
        self.stamp.version += 1;
        self.stamp.saved_at = self.clock.now_ms().max(self.stamp.saved_at);
    }

    fn bump_revision(&mut self) -> u64 {
        let revision = self.next_revision;
        self.next_revision += 1;
        revision
    }

    fn all_instance_ids(&self) -> HashSet<String> {
        self.layout
            .tabs
            .iter()
            .flat_map(|t| t.components.iter().map(|c| c.id.clone()))
            .collect()
    }

    /// Clamp stored geometry and drop instances whose id is already used
    /// elsewhere in the layout.
    fn sanitize_components(
        &self,
        components: Vec<ComponentInstance>,
        seen: &mut HashSet<String>,
    ) -> Vec<ComponentInstance> {
        components
            .into_iter()
            .filter_map(|mut c| {
                if !seen.insert(c.id.clone()) {
                    warn!(instance_id = %c.id, "dropping duplicate component id");
                    return None;
                }
                let descriptor = self.registry.get_component(&c.component_type);
                if descriptor.is_none() {
                    warn!(
                        instance_id = %c.id,
                        component_type = %c.component_type,
                        "component type not registered"
                    );
                }
                let size = clamp_size(descriptor, c.size(), self.grid);
                let origin = clamp_position(c.position(), size, self.grid);
                c.w = size.w;
                c.h = size.h;
                c.x = origin.x;
                c.y = origin.y;
                Some(c)
            })
            .collect()
    }
}

fn clamp_size(
    descriptor: Option<&ComponentDescriptor>,
    size: GridSize,
    grid: GridConfig,
) -> GridSize {
    let size = match descriptor {
        Some(d) => d.clamp_size(size),
        None => size,
    };
    GridSize::new(size.w.clamp(1, grid.columns), size.h.max(1))
}

fn clamp_position(pos: GridPos, size: GridSize, grid: GridConfig) -> GridPos {
    GridPos::new(pos.x.min(grid.columns.saturating_sub(size.w)), pos.y)
}

/// Shallow-merge object props; anything else replaces wholesale.
fn merge_props(current: &Value, incoming: &Value) -> Value {
    match (current, incoming) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EntityKind;
    use crate::utils::ManualClock;
    use serde_json::json;

    fn manager() -> LayoutManager {
        LayoutManager::new(
            Rc::new(ComponentRegistry::builtin()),
            GridConfig::default(),
            Rc::new(ManualClock::new(1_000)),
        )
    }

    fn manager_with_tab() -> (LayoutManager, String) {
        let mut m = manager();
        let tab = m.create_tab("Main", TabOptions::default()).unwrap();
        (m, tab.id)
    }

    #[test]
    fn create_tab_starts_empty_and_locked() {
        let (m, id) = manager_with_tab();
        let tab = m.tab(&id).unwrap();
        assert!(tab.components.is_empty());
        assert!(!tab.edit_mode);
        assert_eq!(m.active_tab_id(), Some(id.as_str()));
        assert_eq!(m.stamp().version, 1);
    }

    #[test]
    fn create_tab_rejects_blank_title() {
        let mut m = manager();
        assert!(matches!(
            m.create_tab("   ", TabOptions::default()),
            Err(LayoutError::Validation(_))
        ));
        assert!(m.tabs().is_empty());
        assert_eq!(m.stamp().version, 0);
    }

    #[test]
    fn create_tab_counts_graphemes_not_bytes() {
        let mut m = manager();
        let flags = "🇬🇧".repeat(MAX_TAB_TITLE_GRAPHEMES);
        assert!(m.create_tab(&flags, TabOptions::default()).is_ok());
        let too_long = "x".repeat(MAX_TAB_TITLE_GRAPHEMES + 1);
        assert!(m.create_tab(&too_long, TabOptions::default()).is_err());
    }

    #[test]
    fn closing_active_tab_falls_back_to_previous() {
        let mut m = manager();
        let a = m.create_tab("A", TabOptions::default()).unwrap().id;
        let b = m.create_tab("B", TabOptions::default()).unwrap().id;
        let c = m.create_tab("C", TabOptions::default()).unwrap().id;
        m.close_tab(&c).unwrap();
        assert_eq!(m.active_tab_id(), Some(b.as_str()));

        m.set_active_tab(&a);
        m.close_tab(&a).unwrap();
        assert_eq!(m.active_tab_id(), Some(b.as_str()), "first tab hands over to the next one");

        m.close_tab(&b).unwrap();
        assert_eq!(m.active_tab_id(), None);
    }

    #[test]
    fn closing_inactive_tab_keeps_pointer() {
        let mut m = manager();
        let a = m.create_tab("A", TabOptions::default()).unwrap().id;
        let b = m.create_tab("B", TabOptions::default()).unwrap().id;
        m.close_tab(&a).unwrap();
        assert_eq!(m.active_tab_id(), Some(b.as_str()));
    }

    #[test]
    fn non_closable_tab_cannot_be_closed() {
        let mut m = manager();
        let tab = m.create_tab("Main", TabOptions { closable: false, activate: true }).unwrap();
        assert!(matches!(m.close_tab(&tab.id), Err(LayoutError::InvalidOperation(_))));
        assert_eq!(m.tabs().len(), 1);
    }

    #[test]
    fn unknown_tabs_are_not_found_or_ignored() {
        let mut m = manager();
        assert_eq!(
            m.close_tab("ghost"),
            Err(LayoutError::NotFound { kind: EntityKind::Tab, id: "ghost".into() })
        );
        assert!(!m.set_active_tab("ghost"));
        assert!(m.toggle_edit_mode("ghost").is_err());
    }

    #[test]
    fn inactive_tab_creation_keeps_pointer() {
        let (mut m, main) = manager_with_tab();
        m.create_tab("Later", TabOptions { closable: true, activate: false }).unwrap();
        assert_eq!(m.active_tab_id(), Some(main.as_str()));
    }

    #[test]
    fn two_components_land_side_by_side() {
        let (mut m, tab) = manager_with_tab();
        let first = m.add_component(&tab, "chart", None).unwrap();
        let second = m.add_component(&tab, "chart", None).unwrap();
        assert_eq!((first.x, first.y), (0, 0));
        assert_eq!((second.x, second.y), (2, 0));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn placement_wraps_past_last_column() {
        let occupied: Vec<GridPos> = (0..6).map(|i| GridPos::new(i * 2, 0)).collect();
        assert_eq!(next_free_cell(&occupied, GridConfig::default()), GridPos::new(0, 2));
    }

    #[test]
    fn placement_fills_gaps_first() {
        let occupied = [GridPos::new(0, 0), GridPos::new(4, 0)];
        assert_eq!(next_free_cell(&occupied, GridConfig::default()), GridPos::new(2, 0));
    }

    #[test]
    fn unknown_component_type_creates_nothing() {
        let (mut m, tab) = manager_with_tab();
        let version = m.stamp().version;
        assert_eq!(
            m.add_component(&tab, "nope", None),
            Err(LayoutError::UnknownComponentType("nope".into()))
        );
        assert!(m.tab(&tab).unwrap().components.is_empty());
        assert_eq!(m.stamp().version, version);
    }

    #[test]
    fn new_component_uses_registry_defaults() {
        let (mut m, tab) = manager_with_tab();
        let c = m.add_component(&tab, "portfolio", Some(GridPos::new(10, 3))).unwrap();
        assert_eq!((c.w, c.h), (6, 4));
        assert_eq!((c.x, c.y), (6, 3), "explicit position is pulled inside the grid");
        assert_eq!(c.props["showPnl"], true);
    }

    #[test]
    fn update_clamps_to_max_size() {
        let (mut m, tab) = manager_with_tab();
        let c = m.add_component(&tab, "chart", None).unwrap();
        let updated = m.update_component(&tab, &c.id, &ComponentPatch::size(50, 50)).unwrap();
        assert_eq!((updated.w, updated.h), (8, 6));
        let stored = m.tab(&tab).unwrap().component(&c.id).unwrap();
        assert_eq!((stored.w, stored.h), (8, 6));
    }

    #[test]
    fn update_clamps_below_min_and_inside_grid() {
        let (mut m, tab) = manager_with_tab();
        let c = m.add_component(&tab, "chart", None).unwrap();
        let patch = ComponentPatch {
            x: Some(11),
            w: Some(0),
            h: Some(1),
            ..ComponentPatch::default()
        };
        let updated = m.update_component(&tab, &c.id, &patch).unwrap();
        assert_eq!((updated.w, updated.h), (2, 2));
        assert_eq!(updated.x, 10);
    }

    #[test]
    fn update_merges_object_props() {
        let (mut m, tab) = manager_with_tab();
        let c = m.add_component(&tab, "chart", None).unwrap();
        let updated = m
            .update_component(&tab, &c.id, &ComponentPatch::props(json!({ "interval": "1h" })))
            .unwrap();
        assert_eq!(updated.props, json!({ "symbol": "EURUSD", "interval": "1h" }));
    }

    #[test]
    fn update_reports_missing_targets() {
        let (mut m, tab) = manager_with_tab();
        assert!(matches!(
            m.update_component("ghost", "x", &ComponentPatch::default()),
            Err(LayoutError::NotFound { kind: EntityKind::Tab, .. })
        ));
        assert!(matches!(
            m.update_component(&tab, "x", &ComponentPatch::default()),
            Err(LayoutError::NotFound { kind: EntityKind::Component, .. })
        ));
    }

    #[test]
    fn noop_update_does_not_bump_version() {
        let (mut m, tab) = manager_with_tab();
        let c = m.add_component(&tab, "chart", None).unwrap();
        let version = m.stamp().version;
        let revision = m.tab(&tab).unwrap().revision();
        m.update_component(&tab, &c.id, &ComponentPatch::position(c.x, c.y)).unwrap();
        assert_eq!(m.stamp().version, version);
        assert_eq!(m.tab(&tab).unwrap().revision(), revision);
    }

    #[test]
    fn empty_patch_leaves_component_untouched() {
        let (mut m, tab) = manager_with_tab();
        let c = m.add_component(&tab, "chart", None).unwrap();
        let version = m.stamp().version;
        let same = m.update_component(&tab, &c.id, &ComponentPatch::default()).unwrap();
        assert_eq!(same, c);
        assert_eq!(m.stamp().version, version);
    }

    #[test]
    fn removal_is_idempotent() {
        let (mut m, tab) = manager_with_tab();
        let c = m.add_component(&tab, "chart", None).unwrap();
        assert!(m.remove_component(&tab, &c.id));
        let version = m.stamp().version;
        assert!(!m.remove_component(&tab, &c.id));
        assert!(!m.remove_component("ghost", &c.id));
        assert_eq!(m.stamp().version, version);
        assert_eq!(m.tab(&tab).unwrap().provenance(), ListProvenance::Authoritative);
    }

    #[test]
    fn toggle_edit_mode_leaves_components_alone() {
        let (mut m, tab) = manager_with_tab();
        let other = m.create_tab("Other", TabOptions::default()).unwrap().id;
        m.add_component(&tab, "chart", None).unwrap();
        let before = m.tab(&tab).unwrap().clone();

        assert!(m.toggle_edit_mode(&tab).unwrap());
        let after = m.tab(&tab).unwrap();
        assert_eq!(after.components, before.components);
        assert_eq!(after.revision(), before.revision());
        assert!(!m.tab(&other).unwrap().edit_mode);
        assert!(m.is_editing());
    }

    #[test]
    fn clear_tab_is_authoritative() {
        let (mut m, tab) = manager_with_tab();
        m.add_component(&tab, "chart", None).unwrap();
        m.clear_tab(&tab).unwrap();
        let t = m.tab(&tab).unwrap();
        assert!(t.components.is_empty());
        assert_eq!(t.provenance(), ListProvenance::Authoritative);
    }

    #[test]
    fn stale_snapshot_never_wipes_components() {
        let (mut m, tab) = manager_with_tab();
        m.toggle_edit_mode(&tab).unwrap();
        let before_add = m.to_snapshot();
        m.add_component(&tab, "chart", None).unwrap();

        let outcome = m.load_from_snapshot(before_add.clone());
        assert!(matches!(outcome, LoadOutcome::IgnoredStale { .. }));
        assert_eq!(m.tab(&tab).unwrap().components.len(), 1);

        let mut equal = m.to_snapshot();
        equal.tabs[0].components.clear();
        assert!(matches!(m.load_from_snapshot(equal), LoadOutcome::IgnoredStale { .. }));
        assert_eq!(m.tab(&tab).unwrap().components.len(), 1);
    }

    #[test]
    fn newer_snapshot_replaces_state() {
        let (mut m, tab) = manager_with_tab();
        m.add_component(&tab, "chart", None).unwrap();
        let mut newer = m.to_snapshot();
        newer.version += 10;
        newer.tabs[0].components.clear();
        newer.active_tab_id = Some("missing".into());

        assert_eq!(m.load_from_snapshot(newer), LoadOutcome::Applied);
        let t = m.tab(&tab).unwrap();
        assert!(t.components.is_empty());
        assert_eq!(t.provenance(), ListProvenance::Authoritative);
        assert_eq!(
            m.active_tab_id(),
            Some(tab.as_str()),
            "dangling pointer falls back to first tab"
        );
    }

    #[test]
    fn snapshot_load_sanitizes_components() {
        let mut m = manager();
        let snapshot: Snapshot = serde_json::from_value(json!({
            "tabs": [{
                "id": "t1", "title": "One",
                "components": [
                    { "id": "a", "type": "chart", "x": 20, "y": 0, "w": 99, "h": 1, "props": {} },
                    { "id": "a", "type": "chart", "x": 0, "y": 0, "w": 4, "h": 3, "props": {} }
                ]
            }],
            "activeTabId": "t1",
            "version": 4,
            "savedAt": 10
        }))
        .unwrap();
        assert_eq!(m.load_from_snapshot(snapshot), LoadOutcome::Applied);
        let t = m.tab("t1").unwrap();
        assert_eq!(t.components.len(), 1);
        let c = &t.components[0];
        assert_eq!((c.x, c.w, c.h), (4, 8, 2));
        assert_eq!(m.stamp(), SnapshotStamp { version: 4, saved_at: 10 });
    }

    #[test]
    fn restore_only_fills_unpopulated_tabs() {
        let (mut m, tab) = manager_with_tab();
        let cached = vec![ComponentInstance {
            id: "cached-1".into(),
            component_type: "chart".into(),
            x: 0,
            y: 0,
            w: 4,
            h: 3,
            props: json!({}),
        }];
        assert!(m.restore_tab_components(&tab, cached.clone()));
        assert_eq!(m.tab(&tab).unwrap().provenance(), ListProvenance::Populated);
        assert!(!m.restore_tab_components(&tab, cached.clone()), "already populated");

        m.clear_tab(&tab).unwrap();
        assert!(!m.restore_tab_components(&tab, cached), "explicitly cleared tabs stay empty");
    }

    #[test]
    fn every_mutation_advances_the_stamp() {
        let (mut m, tab) = manager_with_tab();
        let mut last = m.stamp();
        let c = m.add_component(&tab, "chart", None).unwrap();
        assert!(m.stamp() > last);
        last = m.stamp();
        m.update_component(&tab, &c.id, &ComponentPatch::position(4, 4)).unwrap();
        assert!(m.stamp() > last);
        last = m.stamp();
        m.toggle_edit_mode(&tab).unwrap();
        assert!(m.stamp() > last);
    }

    #[test]
    fn supersede_only_moves_forward() {
        let (mut m, tab) = manager_with_tab();
        m.add_component(&tab, "chart", None).unwrap();
        let before = m.stamp();

        assert!(!m.supersede(SnapshotStamp { version: 1, saved_at: 0 }));
        assert_eq!(m.stamp(), before);

        assert!(m.supersede(SnapshotStamp { version: 40, saved_at: 9_000 }));
        assert_eq!(m.stamp(), SnapshotStamp { version: 41, saved_at: 9_000 });
        assert_eq!(m.tab(&tab).unwrap().components.len(), 1);
    }
}
