use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type TabId = String;
pub type InstanceId = String;

/// Grid cell coordinates (columns / rows, not pixels).
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Default)]
pub struct GridPos {
    pub x: u32,
    pub y: u32,
}

impl GridPos {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Width / height in grid units.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Debug)]
pub struct GridSize {
    pub w: u32,
    pub h: u32,
}

impl GridSize {
    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }
}

/// One placed widget.  `props` is an opaque JSON bag owned by the widget.
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct ComponentInstance {
    pub id: InstanceId,
    #[serde(rename = "type")]
    pub component_type: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default)]
    pub props: Value,
}

impl ComponentInstance {
    pub fn position(&self) -> GridPos {
        GridPos::new(self.x, self.y)
    }

    pub fn size(&self) -> GridSize {
        GridSize::new(self.w, self.h)
    }
}

/// Partial update for a placed widget.  `None` leaves the field untouched.
#[derive(Clone, Deserialize, PartialEq, Debug, Default)]
#[serde(default)]
pub struct ComponentPatch {
    pub x: Option<u32>,
    pub y: Option<u32>,
    pub w: Option<u32>,
    pub h: Option<u32>,
    pub props: Option<Value>,
}

impl ComponentPatch {
    pub fn position(x: u32, y: u32) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    pub fn size(w: u32, h: u32) -> Self {
        Self { w: Some(w), h: Some(h), ..Self::default() }
    }

    pub fn props(props: Value) -> Self {
        Self { props: Some(props), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none()
            && self.y.is_none()
            && self.w.is_none()
            && self.h.is_none()
            && self.props.is_none()
    }
}

/// How far a tab's component list can be trusted when it is empty.
///
/// Never serialized: provenance is a property of this session's view of the
/// tab, not of the stored document.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ListProvenance {
    /// Nothing has been placed on or loaded into the tab yet.
    #[default]
    Unpopulated,
    /// The list reflects user edits or loaded data.
    Populated,
    /// The list was emptied on purpose: an explicit clear, removal of the last
    /// widget, or a strictly newer snapshot that carried no widgets.
    Authoritative,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub title: String,
    #[serde(default = "default_closable")]
    pub closable: bool,
    #[serde(default)]
    pub edit_mode: bool,
    #[serde(default)]
    pub components: Vec<ComponentInstance>,

    // Bumped by the layout manager on every component-list change; the canvas
    // compares it instead of deep-diffing the list.
    #[serde(skip)]
    pub(crate) revision: u64,
    #[serde(skip)]
    pub(crate) provenance: ListProvenance,
}

fn default_closable() -> bool {
    true
}

impl Tab {
    pub fn new(id: impl Into<TabId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            closable: true,
            edit_mode: false,
            components: Vec::new(),
            revision: 0,
            provenance: ListProvenance::Unpopulated,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn provenance(&self) -> ListProvenance {
        self.provenance
    }

    pub fn component(&self, instance_id: &str) -> Option<&ComponentInstance> {
        self.components.iter().find(|c| c.id == instance_id)
    }
}

/// Options accepted by `create_tab`.
#[derive(Clone, Copy, Deserialize, PartialEq, Eq, Debug)]
#[serde(default)]
pub struct TabOptions {
    pub closable: bool,
    pub activate: bool,
}

impl Default for TabOptions {
    fn default() -> Self {
        Self { closable: true, activate: true }
    }
}

/// Ordering key used for last-write-wins between devices.  Compared
/// lexicographically: mutation count first, then save time.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStamp {
    pub version: u64,
    pub saved_at: u64,
}

/// Canonical in-memory layout: ordered tabs plus the active pointer.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Layout {
    pub id: String,
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<TabId>,
}

/// Serializable projection of a [`Layout`] as written to the stores.
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub layout_id: String,
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub active_tab_id: Option<TabId>,
    pub version: u64,
    #[serde(default)]
    pub saved_at: u64,
}

impl Snapshot {
    pub fn stamp(&self) -> SnapshotStamp {
        SnapshotStamp { version: self.version, saved_at: self.saved_at }
    }

    pub fn component_count(&self) -> usize {
        self.tabs.iter().map(|t| t.components.len()).sum()
    }

    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }
}
