//! End-to-end session flows against the in-memory store: debounced saves,
//! reloads, retry exhaustion, logout and background reconciliation.
//!
//! Run with: cargo test --test session_sync

use std::cell::RefCell;
use std::rc::Rc;

use futures::executor::block_on;
use serde_json::json;

use gzc_intel_frontend::auth::Principal;
use gzc_intel_frontend::config::AppConfig;
use gzc_intel_frontend::error::StorageError;
use gzc_intel_frontend::messages::Message;
use gzc_intel_frontend::models::{GridPos, Snapshot, Tab, TabOptions};
use gzc_intel_frontend::persistence::MemoryStore;
use gzc_intel_frontend::runtime::Runtime;
use gzc_intel_frontend::scheduling::SaveKey;
use gzc_intel_frontend::state::{AppState, NoticeKind, SessionPhase};
use gzc_intel_frontend::storage::{KeyValueStorage, MemoryStorage};
use gzc_intel_frontend::utils::ManualClock;

const USER: &str = "trader-1";

/// One browser profile's localStorage, shared across simulated reloads.
#[derive(Clone, Default)]
struct Device(Rc<RefCell<MemoryStorage>>);

impl KeyValueStorage for Device {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.0.borrow().get_item(key)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.0.borrow_mut().set_item(key, value)
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.0.borrow_mut().remove_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.0.borrow().keys()
    }
}

fn open_session(
    device: &Device,
    store: MemoryStore,
    clock: &Rc<ManualClock>,
) -> Runtime<MemoryStore> {
    let state = AppState::new(
        AppConfig::default(),
        Principal::new(USER, "gzc"),
        Box::new(device.clone()),
        clock.clone(),
    );
    let mut rt = Runtime::new(state, store);
    block_on(rt.dispatch(Message::StartSession));
    rt
}

/// Let every debounce window lapse and release what is due.
fn settle(rt: &mut Runtime<MemoryStore>, clock: &ManualClock) {
    clock.advance(1_000);
    block_on(rt.tick());
}

fn active_tab(rt: &Runtime<MemoryStore>) -> String {
    rt.state().layout.active_tab_id().unwrap().to_string()
}

fn add(rt: &mut Runtime<MemoryStore>, tab_id: &str, component_type: &str) {
    block_on(rt.dispatch(Message::AddComponent {
        tab_id: tab_id.to_string(),
        component_type: component_type.to_string(),
        position: None,
    }));
}

#[test]
fn fresh_session_lands_on_main_tab() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let rt = open_session(&Device::default(), MemoryStore::new(), &clock);

    assert_eq!(rt.state().phase, SessionPhase::Ready);
    let tabs = rt.state().layout.tabs();
    assert_eq!(tabs.len(), 1);
    assert_eq!(tabs[0].title, "Main");
    assert!(!tabs[0].closable);
    assert!(rt.toasts().is_empty());
}

#[test]
fn rapid_edits_coalesce_into_one_write() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut rt = open_session(&Device::default(), MemoryStore::new(), &clock);
    settle(&mut rt, &clock);
    assert_eq!(rt.store().write_count(&SaveKey::Layout), 1);

    let tab = active_tab(&rt);
    for component_type in ["market-data", "chart", "fx-quotes"] {
        add(&mut rt, &tab, component_type);
        clock.advance(100);
        block_on(rt.tick());
    }
    assert_eq!(rt.store().write_count(&SaveKey::Layout), 1, "still inside the quiet period");

    settle(&mut rt, &clock);
    assert_eq!(rt.store().write_count(&SaveKey::Layout), 2);
    let stored = rt.store().stored_layout(USER).unwrap();
    assert_eq!(stored.component_count(), 3);
    assert_eq!(stored.stamp(), rt.state().layout.stamp());
}

#[test]
fn components_get_distinct_cells_in_placement_order() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut rt = open_session(&Device::default(), MemoryStore::new(), &clock);
    let tab = active_tab(&rt);
    add(&mut rt, &tab, "market-data");
    add(&mut rt, &tab, "portfolio");

    let positions: Vec<GridPos> = rt
        .state()
        .layout
        .tab(&tab)
        .unwrap()
        .components
        .iter()
        .map(|c| c.position())
        .collect();
    assert_eq!(positions, vec![GridPos::new(0, 0), GridPos::new(2, 0)]);
    assert_eq!(rt.state().grid_items(&tab).len(), 2);
}

#[test]
fn reload_on_another_device_restores_saved_layout() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut first = open_session(&Device::default(), MemoryStore::new(), &clock);
    let tab = active_tab(&first);
    block_on(first.dispatch(Message::ToggleEditMode(tab.clone())));
    add(&mut first, &tab, "bloomberg-volatility");
    block_on(first.dispatch(Message::SaveAndExitEditMode(tab.clone())));
    let expected = first.state().layout.to_snapshot();
    let (_, store) = first.into_parts();

    clock.advance(60_000);
    let second = open_session(&Device::default(), store, &clock);
    let restored = second.state().layout.to_snapshot();
    assert_eq!(restored.stamp(), expected.stamp());
    assert_eq!(
        serde_json::to_value(&restored.tabs).unwrap(),
        serde_json::to_value(&expected.tabs).unwrap()
    );
    assert_eq!(second.state().grid_items(&tab).len(), 1);
}

#[test]
fn offline_reload_uses_device_cache() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let device = Device::default();
    let store = MemoryStore::new();
    store.set_offline(true);

    let mut first = open_session(&device, store, &clock);
    let tab = active_tab(&first);
    add(&mut first, &tab, "chart");
    add(&mut first, &tab, "trade-blotter");
    let (_, store) = first.into_parts();

    let second = open_session(&device, store, &clock);
    assert_eq!(second.state().layout.tab(&tab).unwrap().components.len(), 2);
    assert_eq!(second.state().grid_items(&tab).len(), 2);
    assert!(second.toasts().iter().any(|n| n.kind == NoticeKind::Info));
}

#[test]
fn stale_remote_layout_never_wipes_newer_local_edits() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let device = Device::default();
    let store = MemoryStore::new();

    let mut first = open_session(&device, store, &clock);
    settle(&mut first, &clock);
    let tab = active_tab(&first);
    // Edits reach the device cache but the remote write never lands.
    first.store().set_offline(true);
    add(&mut first, &tab, "portfolio");
    let (_, store) = first.into_parts();
    store.set_offline(false);

    let second = open_session(&device, store, &clock);
    assert_eq!(second.state().layout.tab(&tab).unwrap().components.len(), 1);
    // The device was ahead, so its layout is queued to go back up.
    assert!(second.state().sync.pending_keys().contains(&SaveKey::Layout));
}

#[test]
fn exhausted_retries_keep_local_state_and_tell_the_user() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut rt = open_session(&Device::default(), MemoryStore::new(), &clock);
    rt.store().fail_next_writes(10);

    for _ in 0..8 {
        clock.advance(30_000);
        block_on(rt.tick());
    }
    let errors: Vec<_> = rt.toasts().iter().filter(|n| n.kind == NoticeKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(rt.store().write_count(&SaveKey::Layout), 0);
    assert_eq!(rt.state().layout.tabs().len(), 1);
    assert!(rt.state().sync.has_unsaved());

    // Service recovers; the next change carries the parked layout along.
    rt.store().fail_next_writes(0);
    block_on(rt.dispatch(Message::CreateTab {
        title: "Rates".into(),
        options: TabOptions::default(),
    }));
    settle(&mut rt, &clock);
    assert_eq!(rt.store().stored_layout(USER).unwrap().tabs.len(), 2);
    assert!(!rt.state().sync.has_unsaved());
}

#[test]
fn logout_flushes_pending_writes() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut rt = open_session(&Device::default(), MemoryStore::new(), &clock);
    let tab = active_tab(&rt);
    add(&mut rt, &tab, "chart");
    block_on(rt.dispatch(Message::SetTheme("gzc-light".into())));

    block_on(rt.dispatch(Message::Logout));
    assert!(rt.is_ended());
    assert_eq!(rt.state().phase, SessionPhase::Ended);
    assert_eq!(rt.store().stored_layout(USER).unwrap().component_count(), 1);
    assert_eq!(rt.store().stored_theme(USER).as_deref(), Some("gzc-light"));
    assert!(!rt.state().sync.has_unsaved());
}

fn newer_remote(rt: &Runtime<MemoryStore>, bump: u64) -> Snapshot {
    let mut remote = rt.state().layout.to_snapshot();
    remote.version += bump;
    remote.tabs.push(Tab::new("tab-from-laptop", "Laptop"));
    remote
}

#[test]
fn background_reconcile_pulls_newer_remote_when_idle() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut rt = open_session(&Device::default(), MemoryStore::new(), &clock);
    settle(&mut rt, &clock);

    let remote = newer_remote(&rt, 5);
    rt.store().seed_layout(USER, remote.clone());

    clock.advance(300_000);
    block_on(rt.tick());
    assert_eq!(rt.state().layout.stamp(), remote.stamp());
    assert!(rt.state().layout.tab("tab-from-laptop").is_some());
    assert!(rt.toasts().iter().any(|n| n.message.contains("another device")));
}

#[test]
fn background_reconcile_waits_while_editing() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut rt = open_session(&Device::default(), MemoryStore::new(), &clock);
    let tab = active_tab(&rt);
    block_on(rt.dispatch(Message::ToggleEditMode(tab.clone())));
    settle(&mut rt, &clock);

    let remote = newer_remote(&rt, 5);
    rt.store().seed_layout(USER, remote.clone());

    clock.advance(300_000);
    block_on(rt.tick());
    assert!(rt.state().layout.tab("tab-from-laptop").is_none(), "no overwrite mid-edit");
    assert_eq!(rt.state().remote_drift, Some(remote.stamp()));

    // Finishing the edit is the later write and takes precedence.
    block_on(rt.dispatch(Message::SaveAndExitEditMode(tab)));
    let stored = rt.store().stored_layout(USER).unwrap();
    assert!(stored.stamp() > remote.stamp());
    assert!(stored.tab("tab-from-laptop").is_none());
    assert_eq!(rt.state().remote_drift, None);
}

#[test]
fn deferred_remote_is_pulled_once_idle() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut rt = open_session(&Device::default(), MemoryStore::new(), &clock);
    settle(&mut rt, &clock);

    let remote = newer_remote(&rt, 3);
    rt.store().seed_layout(USER, remote.clone());
    clock.advance(300_000);
    // A theme write is still in its quiet period when the check runs.
    block_on(rt.dispatch(Message::SetTheme("gzc-light".into())));
    block_on(rt.tick());
    assert_eq!(rt.state().remote_drift, Some(remote.stamp()));
    assert!(rt.state().layout.tab("tab-from-laptop").is_none());

    settle(&mut rt, &clock);
    assert_eq!(rt.store().stored_theme(USER).as_deref(), Some("gzc-light"));

    block_on(rt.tick());
    assert_eq!(rt.state().remote_drift, None);
    assert!(rt.state().layout.tab("tab-from-laptop").is_some());
}

#[test]
fn preference_saved_elsewhere_reaches_a_fresh_device() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut first = open_session(&Device::default(), MemoryStore::new(), &clock);
    block_on(first.dispatch(Message::SetPreference {
        key: "density".into(),
        value: json!("compact"),
    }));
    block_on(first.dispatch(Message::SaveComponentState {
        instance_id: "chart-1".into(),
        state: json!({ "zoom": 4 }),
    }));
    settle(&mut first, &clock);
    let (_, store) = first.into_parts();

    let fresh = Device::default();
    let mut second = open_session(&fresh, store, &clock);
    assert_eq!(second.state().cache.load_preference("density"), None);
    block_on(second.dispatch(Message::LoadPreference("density".into())));
    block_on(second.dispatch(Message::LoadComponentState("chart-1".into())));

    assert_eq!(second.state().cache.load_preference("density"), Some(json!("compact")));
    assert_eq!(second.state().cache.load_component_state("chart-1"), Some(json!({ "zoom": 4 })));
    assert!(second.state().remote_reads.is_empty());
    // Written through to the device, so a later offline reload still has it.
    let (_, store) = second.into_parts();
    store.set_offline(true);
    let third = open_session(&fresh, store, &clock);
    assert_eq!(third.state().cache.load_preference("density"), Some(json!("compact")));
}

#[test]
fn edits_after_logout_are_ignored() {
    let clock = Rc::new(ManualClock::new(1_000_000));
    let mut rt = open_session(&Device::default(), MemoryStore::new(), &clock);
    let tab = active_tab(&rt);
    add(&mut rt, &tab, "chart");
    block_on(rt.dispatch(Message::Logout));
    let saved = rt.store().stored_layout(USER).unwrap();

    add(&mut rt, &tab, "trade-blotter");
    block_on(rt.dispatch(Message::CreateTab {
        title: "Rates".into(),
        options: TabOptions::default(),
    }));
    block_on(rt.dispatch(Message::SetTheme("gzc-light".into())));
    settle(&mut rt, &clock);

    assert_eq!(rt.state().layout.tabs().len(), 1);
    assert_eq!(rt.state().layout.tab(&tab).unwrap().components.len(), 1);
    assert!(!rt.state().sync.has_unsaved());
    assert_eq!(rt.store().stored_layout(USER).unwrap().stamp(), saved.stamp());
    assert_eq!(rt.store().stored_theme(USER), None);
}
