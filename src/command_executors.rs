// src/command_executors.rs
//
// Runs the side effects reducers ask for and turns each result back into a
// message.  Nothing here touches `AppState`.
//
use tracing::{debug, warn};

use crate::auth::Principal;
use crate::messages::{Command, Message};
use crate::persistence::PersistentStore;
use crate::scheduling::{PendingWrite, SaveKey, SavePayload};

/// Execute one command against `store`.  Commands that are handled by the
/// host (toasts, teardown) yield no messages.
pub async fn execute_command<S: PersistentStore>(
    cmd: Command,
    store: &S,
    principal: &Principal,
) -> Vec<Message> {
    let user_id = principal.user_id.as_str();
    match cmd {
        Command::SendMessage(msg) => vec![msg],
        Command::LoadSession => {
            let (layout, theme) =
                futures::join!(store.load_layout(user_id), store.load_theme(user_id));
            match layout {
                Ok(remote) => {
                    // A missing theme is not worth failing the session over.
                    let theme = theme.unwrap_or_else(|err| {
                        warn!(error = %err, "could not load theme");
                        None
                    });
                    vec![Message::SessionLoaded { remote, theme }]
                }
                Err(err) => vec![Message::SessionLoadFailed(err)],
            }
        }
        Command::Persist(write) => vec![persist(write, store, user_id).await],
        Command::CheckRemoteStamp => match store.load_layout_stamp(user_id).await {
            Ok(stamp) => vec![Message::RemoteStampChecked(stamp)],
            Err(err) => vec![Message::RemoteCheckFailed(err)],
        },
        Command::FetchRemoteLayout => match store.load_layout(user_id).await {
            Ok(snapshot) => vec![Message::RemoteLayoutFetched(snapshot)],
            Err(err) => vec![Message::RemoteCheckFailed(err)],
        },
        Command::FetchPreference(key) => match store.load_preference(user_id, &key).await {
            Ok(value) => vec![Message::PreferenceLoaded { key, value }],
            Err(error) => vec![Message::RemoteReadFailed { key: SaveKey::Preference(key), error }],
        },
        Command::FetchComponentState(instance_id) => {
            match store.load_component_state(user_id, &instance_id).await {
                Ok(state) => vec![Message::ComponentStateLoaded { instance_id, state }],
                Err(error) => {
                    let key = SaveKey::ComponentState(instance_id);
                    vec![Message::RemoteReadFailed { key, error }]
                }
            }
        }
        Command::ShowToast(_) | Command::EndSession => Vec::new(),
    }
}

async fn persist<S: PersistentStore>(write: PendingWrite, store: &S, user_id: &str) -> Message {
    let result = match &write.payload {
        SavePayload::Layout(snapshot) => store.save_layout(user_id, snapshot).await,
        SavePayload::Theme(theme) => store.save_theme(user_id, theme).await,
        SavePayload::Preference(value) => match &write.key {
            SaveKey::Preference(key) => store.save_preference(user_id, key, value).await,
            other => {
                warn!(key = %other, "preference payload under foreign key");
                store.save_preference(user_id, &other.to_string(), value).await
            }
        },
        SavePayload::ComponentState(state) => match &write.key {
            SaveKey::ComponentState(id) => {
                store.save_component_state(user_id, id, state).await
            }
            other => {
                warn!(key = %other, "component payload under foreign key");
                store.save_component_state(user_id, &other.to_string(), state).await
            }
        },
    };
    match result {
        Ok(()) => {
            debug!(key = %write.key, generation = write.generation, "write stored");
            Message::SaveSucceeded { key: write.key, generation: write.generation }
        }
        Err(error) => Message::SaveFailed { write, error },
    }
}
