//! GZC Intel dashboard state engine.
//!
//! Owns the user's tabbed widget layout, keeps the canvas grid bound to it,
//! and syncs layout, theme and per-widget state to the per-user preference
//! service with a device cache underneath.  [`GzcIntelApp`] is the browser
//! entry point; [`runtime::Runtime`] drives the same reducers headlessly.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use gloo_timers::callback::Interval;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

pub mod auth;
pub mod canvas;
pub mod command_executors;
pub mod config;
pub mod constants;
pub mod error;
pub mod layout;
pub mod logging;
pub mod messages;
pub mod models;
pub mod network;
pub mod persistence;
pub mod reducers;
pub mod registry;
pub mod runtime;
pub mod scheduling;
pub mod state;
pub mod storage;
pub mod toast;
pub mod update;
pub mod utils;

use crate::auth::{Principal, SessionToken};
use crate::canvas::GridItem;
use crate::command_executors::execute_command;
use crate::config::AppConfig;
use crate::constants::TICK_INTERVAL_MS;
use crate::messages::{Command, Message};
use crate::models::{ComponentPatch, GridPos, TabOptions};
use crate::network::ApiClient;
use crate::state::{AppState, NoticeKind};
use crate::storage::{BrowserStorage, KeyValueStorage, MemoryStorage};
use crate::utils::SystemClock;

type RenderKey = (u64, u64, u64, usize, u64);

struct AppHandle {
    state: RefCell<AppState>,
    store: ApiClient<SessionToken>,
    tokens: SessionToken,
    on_change: RefCell<Option<js_sys::Function>>,
    ticker: RefCell<Option<Interval>>,
    last_render: Cell<RenderKey>,
}

/// One signed-in dashboard session.
#[wasm_bindgen]
pub struct GzcIntelApp {
    inner: Rc<AppHandle>,
}

#[wasm_bindgen]
impl GzcIntelApp {
    /// `config` may be `undefined` for defaults.  `principal` is
    /// `{ userId, tenantId, displayName? }` from the host's sign-in.
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: JsValue,
        principal: JsValue,
        token: Option<String>,
    ) -> Result<GzcIntelApp, JsError> {
        console_error_panic_hook::set_once();

        let config: AppConfig = if config.is_undefined() || config.is_null() {
            AppConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)?
        };
        logging::init(&config.log_level);
        let principal: Principal = serde_wasm_bindgen::from_value(principal)?;

        let storage: Box<dyn KeyValueStorage> = match BrowserStorage::local() {
            Ok(storage) => Box::new(storage),
            Err(err) => {
                warn!(error = %err, "localStorage unavailable, caching in memory");
                Box::new(MemoryStorage::new())
            }
        };
        let tokens = SessionToken::new(token);
        let store = ApiClient::new(config.api.clone(), tokens.clone());
        let state = AppState::new(config, principal, storage, Rc::new(SystemClock));
        let last_render = state.render_key();

        Ok(GzcIntelApp {
            inner: Rc::new(AppHandle {
                state: RefCell::new(state),
                store,
                tokens,
                on_change: RefCell::new(None),
                ticker: RefCell::new(None),
                last_render: Cell::new(last_render),
            }),
        })
    }

    /// Load the session and start the scheduler tick.
    pub fn start(&self) {
        info!(user_id = %self.inner.state.borrow().principal.user_id, "session starting");
        dispatch(&self.inner, Message::StartSession);

        let weak = Rc::downgrade(&self.inner);
        let interval = Interval::new(TICK_INTERVAL_MS, move || {
            if let Some(handle) = weak.upgrade() {
                dispatch(&handle, Message::Tick);
            }
        });
        *self.inner.ticker.borrow_mut() = Some(interval);
    }

    /// Called with no arguments whenever something renderable changed.
    #[wasm_bindgen(js_name = setOnChange)]
    pub fn set_on_change(&self, callback: Option<js_sys::Function>) {
        *self.inner.on_change.borrow_mut() = callback;
    }

    #[wasm_bindgen(js_name = setToken)]
    pub fn set_token(&self, token: Option<String>) {
        self.inner.tokens.set(token);
    }

    // ---- tabs --------------------------------------------------------------

    #[wasm_bindgen(js_name = createTab)]
    pub fn create_tab(&self, title: String, options: JsValue) -> Result<JsValue, JsError> {
        let options: TabOptions = from_optional(options)?.unwrap_or_default();
        let before: HashSet<String> = self.tab_ids();
        self.dispatch_checked(Message::CreateTab { title, options })?;
        let state = self.inner.state.borrow();
        let created = state.layout.tabs().iter().find(|t| !before.contains(&t.id));
        created.map_or(Ok(JsValue::NULL), to_js)
    }

    #[wasm_bindgen(js_name = closeTab)]
    pub fn close_tab(&self, tab_id: String) -> Result<(), JsError> {
        self.dispatch_checked(Message::CloseTab(tab_id))
    }

    #[wasm_bindgen(js_name = setActiveTab)]
    pub fn set_active_tab(&self, tab_id: String) {
        dispatch(&self.inner, Message::SetActiveTab(tab_id));
    }

    #[wasm_bindgen(js_name = activeTabId)]
    pub fn active_tab_id(&self) -> Option<String> {
        self.inner.state.borrow().layout.active_tab_id().map(str::to_string)
    }

    /// Returns the tab's new edit mode.
    #[wasm_bindgen(js_name = toggleEditMode)]
    pub fn toggle_edit_mode(&self, tab_id: String) -> Result<bool, JsError> {
        self.dispatch_checked(Message::ToggleEditMode(tab_id.clone()))?;
        Ok(self.inner.state.borrow().layout.tab(&tab_id).map(|t| t.edit_mode).unwrap_or(false))
    }

    #[wasm_bindgen(js_name = saveAndExitEditMode)]
    pub fn save_and_exit_edit_mode(&self, tab_id: String) -> Result<(), JsError> {
        self.dispatch_checked(Message::SaveAndExitEditMode(tab_id))
    }

    #[wasm_bindgen(js_name = clearTab)]
    pub fn clear_tab(&self, tab_id: String) -> Result<(), JsError> {
        self.dispatch_checked(Message::ClearTab(tab_id))
    }

    // ---- components --------------------------------------------------------

    #[wasm_bindgen(js_name = addComponent)]
    pub fn add_component(
        &self,
        tab_id: String,
        component_type: String,
        position: JsValue,
    ) -> Result<JsValue, JsError> {
        let position: Option<GridPos> = from_optional(position)?;
        let before: HashSet<String> = self.component_ids(&tab_id);
        self.dispatch_checked(Message::AddComponent {
            tab_id: tab_id.clone(),
            component_type,
            position,
        })?;
        let state = self.inner.state.borrow();
        let added = state
            .layout
            .tab(&tab_id)
            .and_then(|t| t.components.iter().find(|c| !before.contains(&c.id)));
        added.map_or(Ok(JsValue::NULL), to_js)
    }

    #[wasm_bindgen(js_name = updateComponent)]
    pub fn update_component(
        &self,
        tab_id: String,
        instance_id: String,
        patch: JsValue,
    ) -> Result<JsValue, JsError> {
        let patch: ComponentPatch = serde_wasm_bindgen::from_value(patch)?;
        self.dispatch_checked(Message::UpdateComponent {
            tab_id: tab_id.clone(),
            instance_id: instance_id.clone(),
            patch,
        })?;
        let state = self.inner.state.borrow();
        let updated = state.layout.tab(&tab_id).and_then(|t| t.component(&instance_id));
        updated.map_or(Ok(JsValue::NULL), to_js)
    }

    #[wasm_bindgen(js_name = removeComponent)]
    pub fn remove_component(&self, tab_id: String, instance_id: String) {
        dispatch(&self.inner, Message::RemoveComponent { tab_id, instance_id });
    }

    // ---- grid --------------------------------------------------------------

    #[wasm_bindgen(js_name = onDragStop)]
    pub fn on_drag_stop(&self, tab_id: String, item: JsValue) -> Result<(), JsError> {
        let item: GridItem = serde_wasm_bindgen::from_value(item)?;
        self.dispatch_checked(Message::GridDragStop { tab_id, item })
    }

    #[wasm_bindgen(js_name = onResizeStop)]
    pub fn on_resize_stop(&self, tab_id: String, item: JsValue) -> Result<(), JsError> {
        let item: GridItem = serde_wasm_bindgen::from_value(item)?;
        self.dispatch_checked(Message::GridResizeStop { tab_id, item })
    }

    #[wasm_bindgen(js_name = gridItems)]
    pub fn grid_items(&self, tab_id: String) -> Result<JsValue, JsError> {
        to_js(self.inner.state.borrow().grid_items(&tab_id))
    }

    /// Widgets ready to mount for one tab.
    pub fn components(&self, tab_id: String) -> Result<JsValue, JsError> {
        to_js(&self.inner.state.borrow().materialized(&tab_id))
    }

    /// Every registered widget type.
    pub fn catalog(&self) -> Result<JsValue, JsError> {
        to_js(self.inner.state.borrow().registry.list_components())
    }

    pub fn snapshot(&self) -> Result<JsValue, JsError> {
        to_js(&self.inner.state.borrow().layout.to_snapshot())
    }

    // ---- theme / preferences ----------------------------------------------

    #[wasm_bindgen(js_name = setTheme)]
    pub fn set_theme(&self, theme: String) {
        dispatch(&self.inner, Message::SetTheme(theme));
    }

    pub fn theme(&self) -> String {
        self.inner.state.borrow().theme.clone()
    }

    #[wasm_bindgen(js_name = setPreference)]
    pub fn set_preference(&self, key: String, value: JsValue) -> Result<(), JsError> {
        let value: Value = serde_wasm_bindgen::from_value(value)?;
        dispatch(&self.inner, Message::SetPreference { key, value });
        Ok(())
    }

    /// Cached value, or `null` while a miss is pulled from the remote store.
    /// `onChange` fires once the pulled value lands.
    pub fn preference(&self, key: String) -> Result<JsValue, JsError> {
        let cached = self.inner.state.borrow().cache.load_preference(&key);
        if cached.is_none() {
            dispatch(&self.inner, Message::LoadPreference(key));
        }
        to_js(&cached)
    }

    #[wasm_bindgen(js_name = saveComponentState)]
    pub fn save_component_state(&self, instance_id: String, state: JsValue) -> Result<(), JsError> {
        let state: Value = serde_wasm_bindgen::from_value(state)?;
        dispatch(&self.inner, Message::SaveComponentState { instance_id, state });
        Ok(())
    }

    #[wasm_bindgen(js_name = componentState)]
    pub fn component_state(&self, instance_id: String) -> Result<JsValue, JsError> {
        let cached = self.inner.state.borrow().cache.load_component_state(&instance_id);
        if cached.is_none() {
            dispatch(&self.inner, Message::LoadComponentState(instance_id));
        }
        to_js(&cached)
    }

    // ---- sync / session ----------------------------------------------------

    /// Push every pending write now.
    pub fn flush(&self) {
        dispatch(&self.inner, Message::Flush(None));
    }

    #[wasm_bindgen(js_name = hasUnsavedChanges)]
    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.state.borrow().sync.has_unsaved()
    }

    pub fn notices(&self) -> Result<JsValue, JsError> {
        to_js(&self.inner.state.borrow().notices)
    }

    #[wasm_bindgen(js_name = dismissNotice)]
    pub fn dismiss_notice(&self, id: u64) {
        dispatch(&self.inner, Message::DismissNotice(id));
    }

    pub fn logout(&self) {
        dispatch(&self.inner, Message::Logout);
    }
}

impl GzcIntelApp {
    fn tab_ids(&self) -> HashSet<String> {
        self.inner.state.borrow().layout.tabs().iter().map(|t| t.id.clone()).collect()
    }

    fn component_ids(&self, tab_id: &str) -> HashSet<String> {
        self.inner
            .state
            .borrow()
            .layout
            .tab(tab_id)
            .map(|t| t.components.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Dispatch and turn a freshly raised error notice into a JS exception.
    fn dispatch_checked(&self, msg: Message) -> Result<(), JsError> {
        let last_notice = self.inner.state.borrow().notices.last().map(|n| n.id).unwrap_or(0);
        dispatch(&self.inner, msg);
        let state = self.inner.state.borrow();
        let raised = state
            .notices
            .iter()
            .find(|n| n.id > last_notice && n.kind == NoticeKind::Error);
        raised.map_or(Ok(()), |notice| Err(JsError::new(&notice.message)))
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

fn dispatch(handle: &Rc<AppHandle>, msg: Message) {
    let commands = {
        let mut state = handle.state.borrow_mut();
        update::update(&mut state, msg)
    };
    notify_if_changed(handle);
    for cmd in commands {
        run_command(handle, cmd);
    }
}

fn run_command(handle: &Rc<AppHandle>, cmd: Command) {
    match cmd {
        Command::SendMessage(msg) => dispatch(handle, msg),
        Command::ShowToast(notice) => {
            let weak = Rc::downgrade(handle);
            let id = notice.id;
            let shown = toast::show_notice(&notice, move || {
                if let Some(handle) = weak.upgrade() {
                    dispatch(&handle, Message::DismissNotice(id));
                }
            });
            if let Err(err) = shown {
                warn!(error = ?err, "could not render toast");
            }
        }
        Command::EndSession => {
            // In-flight writes still settle; only the tick stops.
            handle.ticker.borrow_mut().take();
        }
        other => {
            let handle = handle.clone();
            spawn_local(async move {
                let principal = handle.state.borrow().principal.clone();
                let replies = execute_command(other, &handle.store, &principal).await;
                for msg in replies {
                    dispatch(&handle, msg);
                }
            });
        }
    }
}

fn notify_if_changed(handle: &AppHandle) {
    let key = handle.state.borrow().render_key();
    if key == handle.last_render.get() {
        return;
    }
    handle.last_render.set(key);
    let callback = handle.on_change.borrow().clone();
    if let Some(callback) = callback {
        if let Err(err) = callback.call0(&JsValue::NULL) {
            warn!(error = ?err, "onChange callback threw");
        }
    }
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsError> {
    Ok(value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())?)
}

fn from_optional<T: serde::de::DeserializeOwned>(value: JsValue) -> Result<Option<T>, JsError> {
    if value.is_undefined() || value.is_null() {
        Ok(None)
    } else {
        Ok(Some(serde_wasm_bindgen::from_value(value)?))
    }
}
