// src/messages.rs
//
// Everything that can happen to a session, and the side effects the
// reducers ask for in response.
//
use serde_json::Value;

use crate::canvas::GridItem;
use crate::error::PersistenceError;
use crate::models::{ComponentPatch, GridPos, Snapshot, SnapshotStamp, TabId, TabOptions};
use crate::scheduling::{PendingWrite, SaveKey};
use crate::state::Notice;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // Session lifecycle
    StartSession,
    SessionLoaded {
        remote: Option<Snapshot>,
        theme: Option<String>,
    },
    SessionLoadFailed(PersistenceError),
    Logout,

    // Tabs
    CreateTab {
        title: String,
        options: TabOptions,
    },
    CloseTab(TabId),
    SetActiveTab(TabId),
    ToggleEditMode(TabId),
    SaveAndExitEditMode(TabId), // Lock the tab and flush pending writes
    ClearTab(TabId),

    // Components
    AddComponent {
        tab_id: TabId,
        component_type: String,
        position: Option<GridPos>,
    },
    UpdateComponent {
        tab_id: TabId,
        instance_id: String,
        patch: ComponentPatch,
    },
    RemoveComponent {
        tab_id: TabId,
        instance_id: String,
    },

    // Grid gestures (fired when the user lets go)
    GridDragStop {
        tab_id: TabId,
        item: GridItem,
    },
    GridResizeStop {
        tab_id: TabId,
        item: GridItem,
    },

    // Theme / preferences / per-widget state
    SetTheme(String),
    SetPreference {
        key: String,
        value: Value,
    },
    SaveComponentState {
        instance_id: String,
        state: Value,
    },
    /// Make sure a preference is on this device, pulling it if missing
    LoadPreference(String),
    LoadComponentState(String),
    PreferenceLoaded {
        key: String,
        value: Option<Value>,
    },
    ComponentStateLoaded {
        instance_id: String,
        state: Option<Value>,
    },
    RemoteReadFailed {
        key: SaveKey,
        error: PersistenceError,
    },

    // Sync
    Tick,
    Flush(Option<SaveKey>),
    SaveSucceeded {
        key: SaveKey,
        generation: u64,
    },
    SaveFailed {
        write: PendingWrite,
        error: PersistenceError,
    },
    RemoteStampChecked(Option<SnapshotStamp>),
    RemoteLayoutFetched(Option<Snapshot>),
    RemoteCheckFailed(PersistenceError),

    // Notices
    DismissNotice(u64),
}

impl Message {
    /// Whether the message still means something once the session has ended:
    /// draining writes queued at logout and clearing toasts.
    pub fn survives_logout(&self) -> bool {
        matches!(
            self,
            Message::Tick
                | Message::Flush(_)
                | Message::SaveSucceeded { .. }
                | Message::SaveFailed { .. }
                | Message::DismissNotice(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Chain another message to be processed
    SendMessage(Message),

    /// Load the remote layout and theme for the session's user
    LoadSession,

    /// Write one released payload to the remote store
    Persist(PendingWrite),

    /// Ask the remote store for its layout version only
    CheckRemoteStamp,

    /// Pull the full remote layout
    FetchRemoteLayout,

    /// Pull one preference the device cache does not hold
    FetchPreference(String),

    /// Pull one widget's saved state
    FetchComponentState(String),

    /// Surface a notice to the user
    ShowToast(Notice),

    /// Tear down the session after the final flush went out
    EndSession,
}

impl Command {
    pub fn send(msg: Message) -> Self {
        Command::SendMessage(msg)
    }
}
