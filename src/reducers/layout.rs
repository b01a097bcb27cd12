//! Tab and component mutations.
//!
//! Every successful mutation goes through `AppState::layout_changed` (device
//! cache + debounced remote save) and re-binds the affected tab's canvas.

use tracing::debug;

use super::reject;
use crate::messages::{Command, Message};
use crate::state::AppState;

pub fn update(state: &mut AppState, msg: &Message, commands: &mut Vec<Command>) -> bool {
    match msg {
        Message::CreateTab { title, options } => {
            match state.layout.create_tab(title, *options) {
                Ok(tab) => {
                    state.layout_changed();
                    state.reconcile_tab(&tab.id);
                }
                Err(err) => reject(state, commands, &err),
            }
            true
        }
        Message::CloseTab(tab_id) => {
            match state.layout.close_tab(tab_id) {
                Ok(()) => {
                    state.canvas.unbind(tab_id);
                    state.layout_changed();
                    if let Some(active) = state.layout.active_tab_id().map(str::to_string) {
                        state.reconcile_tab(&active);
                    }
                }
                Err(err) => reject(state, commands, &err),
            }
            true
        }
        Message::SetActiveTab(tab_id) => {
            if state.layout.set_active_tab(tab_id) {
                state.layout_changed();
                state.reconcile_tab(tab_id);
            } else {
                debug!(tab_id = %tab_id, "activation ignored");
            }
            true
        }
        Message::ToggleEditMode(tab_id) => {
            match state.layout.toggle_edit_mode(tab_id) {
                Ok(_) => {
                    state.layout_changed();
                    state.reconcile_tab(tab_id);
                }
                Err(err) => reject(state, commands, &err),
            }
            true
        }
        Message::SaveAndExitEditMode(tab_id) => {
            match state.layout.set_edit_mode(tab_id, false) {
                Ok(changed) => {
                    if changed {
                        state.layout_changed();
                        state.reconcile_tab(tab_id);
                    }
                    let now = state.now_ms();
                    for write in state.sync.flush(None, now) {
                        commands.push(Command::Persist(write));
                    }
                }
                Err(err) => reject(state, commands, &err),
            }
            true
        }
        Message::ClearTab(tab_id) => {
            match state.layout.clear_tab(tab_id) {
                Ok(()) => {
                    state.layout_changed();
                    state.reconcile_tab(tab_id);
                }
                Err(err) => reject(state, commands, &err),
            }
            true
        }
        Message::AddComponent { tab_id, component_type, position } => {
            match state.layout.add_component(tab_id, component_type, *position) {
                Ok(_) => {
                    state.layout_changed();
                    state.reconcile_tab(tab_id);
                }
                Err(err) => reject(state, commands, &err),
            }
            true
        }
        Message::UpdateComponent { tab_id, instance_id, patch } => {
            let before = state.layout.stamp();
            match state.layout.update_component(tab_id, instance_id, patch) {
                Ok(_) if state.layout.stamp() != before => {
                    state.layout_changed();
                    state.reconcile_tab(tab_id);
                }
                Ok(_) => {}
                Err(err) => reject(state, commands, &err),
            }
            true
        }
        Message::RemoveComponent { tab_id, instance_id } => {
            if state.layout.remove_component(tab_id, instance_id) {
                state.layout_changed();
                state.reconcile_tab(tab_id);
            }
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::config::AppConfig;
    use crate::models::{GridPos, TabOptions};
    use crate::state::NoticeKind;
    use crate::storage::MemoryStorage;
    use crate::utils::ManualClock;
    use std::rc::Rc;

    fn state() -> AppState {
        let mut s = AppState::new(
            AppConfig::default(),
            Principal::new("u1", "gzc"),
            Box::new(MemoryStorage::new()),
            Rc::new(ManualClock::new(0)),
        );
        s.ensure_default_tab();
        s
    }

    #[test]
    fn adding_a_component_binds_the_canvas() {
        let mut s = state();
        let tab_id = s.layout.tabs()[0].id.clone();
        let mut cmds = Vec::new();
        let msg = Message::AddComponent {
            tab_id: tab_id.clone(),
            component_type: "chart".into(),
            position: Some(GridPos::new(0, 0)),
        };
        assert!(update(&mut s, &msg, &mut cmds));
        assert!(cmds.is_empty());
        assert_eq!(s.grid_items(&tab_id).len(), 1);
        assert!(s.cache.load_layout("u1").is_some_and(|l| l.component_count() == 1));
    }

    #[test]
    fn rejected_mutation_surfaces_a_notice() {
        let mut s = state();
        let tab_id = s.layout.tabs()[0].id.clone();
        let version = s.layout.stamp().version;
        let mut cmds = Vec::new();
        update(&mut s, &Message::CloseTab(tab_id), &mut cmds);

        assert_eq!(s.layout.tabs().len(), 1);
        assert_eq!(s.layout.stamp().version, version);
        assert!(matches!(&cmds[..], [Command::ShowToast(n)] if n.kind == NoticeKind::Error));
    }

    #[test]
    fn save_and_exit_flushes_pending_writes() {
        let mut s = state();
        let mut cmds = Vec::new();
        update(
            &mut s,
            &Message::CreateTab { title: "Rates".into(), options: TabOptions::default() },
            &mut cmds,
        );
        let tab_id = s.layout.active_tab_id().unwrap().to_string();
        update(&mut s, &Message::ToggleEditMode(tab_id.clone()), &mut cmds);
        assert!(s.layout.is_editing());

        update(&mut s, &Message::SaveAndExitEditMode(tab_id), &mut cmds);
        assert!(!s.layout.is_editing());
        assert!(cmds.iter().any(|c| matches!(c, Command::Persist(_))));
    }

    #[test]
    fn other_messages_fall_through() {
        let mut s = state();
        assert!(!update(&mut s, &Message::Tick, &mut Vec::new()));
    }
}
