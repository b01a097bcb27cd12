//! Theme, free-form preferences, per-widget state and notices.
//!
//! Each value is written to the device cache first and then queued for the
//! remote store under its own save key.  Reads go the other way: the device
//! cache answers when it can, and a miss pulls the value from the remote
//! store into the cache.

use tracing::{debug, warn};

use serde_json::Value;

use crate::messages::{Command, Message};
use crate::scheduling::{SaveKey, SavePayload};
use crate::state::AppState;

pub fn update(state: &mut AppState, msg: &Message, commands: &mut Vec<Command>) -> bool {
    match msg {
        Message::SetTheme(theme) => {
            let theme = theme.trim();
            if theme.is_empty() {
                warn!("ignoring empty theme name");
                return true;
            }
            if theme == state.theme {
                return true;
            }
            state.theme = theme.to_string();
            if let Err(err) = state.cache.store_theme(theme) {
                warn!(error = %err, "could not cache theme");
            }
            let now = state.now_ms();
            state.sync.schedule_save(SaveKey::Theme, SavePayload::Theme(theme.to_string()), now);
            true
        }
        Message::SetPreference { key, value } => {
            if let Err(err) = state.cache.store_preference(key, value) {
                warn!(key = %key, error = %err, "could not cache preference");
            }
            let now = state.now_ms();
            state.sync.schedule_save(
                SaveKey::Preference(key.clone()),
                SavePayload::Preference(value.clone()),
                now,
            );
            true
        }
        Message::SaveComponentState { instance_id, state: widget_state } => {
            if let Err(err) = state.cache.store_component_state(instance_id, widget_state) {
                warn!(instance_id = %instance_id, error = %err, "could not cache component state");
            }
            let now = state.now_ms();
            state.sync.schedule_save(
                SaveKey::ComponentState(instance_id.clone()),
                SavePayload::ComponentState(widget_state.clone()),
                now,
            );
            true
        }
        Message::LoadPreference(key) => {
            if state.cache.load_preference(key).is_none() {
                request_read(state, commands, SaveKey::Preference(key.clone()));
            }
            true
        }
        Message::LoadComponentState(instance_id) => {
            if state.cache.load_component_state(instance_id).is_none() {
                request_read(state, commands, SaveKey::ComponentState(instance_id.clone()));
            }
            true
        }
        Message::PreferenceLoaded { key, value } => {
            let save_key = SaveKey::Preference(key.clone());
            if let Some(value) = accept_read(state, &save_key, value.as_ref()) {
                if let Err(err) = state.cache.store_preference(key, value) {
                    warn!(key = %key, error = %err, "could not cache pulled preference");
                } else {
                    state.remote_values += 1;
                }
            }
            true
        }
        Message::ComponentStateLoaded { instance_id, state: widget_state } => {
            let save_key = SaveKey::ComponentState(instance_id.clone());
            if let Some(widget_state) = accept_read(state, &save_key, widget_state.as_ref()) {
                if let Err(err) = state.cache.store_component_state(instance_id, widget_state) {
                    warn!(
                        instance_id = %instance_id,
                        error = %err,
                        "could not cache pulled component state"
                    );
                } else {
                    state.remote_values += 1;
                }
            }
            true
        }
        Message::RemoteReadFailed { key, error } => {
            state.remote_reads.remove(key);
            debug!(%key, error = %error, "remote read failed, device cache stays as is");
            true
        }
        Message::DismissNotice(id) => {
            if !state.dismiss_notice(*id) {
                debug!(id, "notice already gone");
            }
            true
        }
        _ => false,
    }
}

fn request_read(state: &mut AppState, commands: &mut Vec<Command>, key: SaveKey) {
    let fetch = match &key {
        SaveKey::ComponentState(id) => Command::FetchComponentState(id.clone()),
        SaveKey::Preference(k) => Command::FetchPreference(k.clone()),
        SaveKey::Layout | SaveKey::Theme => return,
    };
    debug!(%key, "not on this device, pulling from remote store");
    if state.remote_reads.insert(key) {
        commands.push(fetch);
    }
}

/// A pulled value is kept unless a local write for the same key is newer.
fn accept_read<'a>(
    state: &mut AppState,
    key: &SaveKey,
    value: Option<&'a Value>,
) -> Option<&'a Value> {
    state.remote_reads.remove(key);
    if state.has_local_write(key) {
        debug!(%key, "local write pending, dropping pulled value");
        return None;
    }
    value
}
