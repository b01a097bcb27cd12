//! Grid gestures and canvas re-binding.

use tracing::debug;

use super::reject;
use crate::canvas::InteractionOutcome;
use crate::messages::{Command, Message};
use crate::state::AppState;

pub fn update(state: &mut AppState, msg: &Message, commands: &mut Vec<Command>) -> bool {
    match msg {
        Message::GridDragStop { tab_id, item } | Message::GridResizeStop { tab_id, item } => {
            let before = state.layout.stamp();
            match state.canvas.commit_interaction(&mut state.layout, tab_id, item) {
                Ok(InteractionOutcome::Committed(instance)) => {
                    if state.layout.stamp() != before {
                        state.layout_changed();
                    }
                    debug!(
                        tab_id = %tab_id,
                        instance_id = %instance.id,
                        "grid interaction committed"
                    );
                    state.reconcile_tab(tab_id);
                }
                Ok(InteractionOutcome::Ignored) => {}
                Err(err) => reject(state, commands, &err),
            }
            true
        }
        _ => false,
    }
}

/// Re-observe tabs whose canvas is holding visuals through an unexplained
/// empty list.  Runs on every tick.
pub fn recheck_races(state: &mut AppState) {
    for tab_id in state.canvas.pending_rechecks() {
        state.reconcile_tab(&tab_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::config::AppConfig;
    use crate::models::GridPos;
    use crate::storage::MemoryStorage;
    use crate::utils::ManualClock;
    use std::rc::Rc;

    fn state_with_chart() -> (AppState, String) {
        let mut s = AppState::new(
            AppConfig::default(),
            Principal::new("u1", "gzc"),
            Box::new(MemoryStorage::new()),
            Rc::new(ManualClock::new(0)),
        );
        s.ensure_default_tab();
        let tab_id = s.layout.tabs()[0].id.clone();
        s.layout.add_component(&tab_id, "chart", Some(GridPos::new(0, 0))).unwrap();
        s.reconcile_tab(&tab_id);
        (s, tab_id)
    }

    #[test]
    fn drag_on_locked_tab_is_ignored() {
        let (mut s, tab_id) = state_with_chart();
        let mut item = s.grid_items(&tab_id)[0].clone();
        item.x = 6;
        let mut cmds = Vec::new();
        assert!(update(&mut s, &Message::GridDragStop { tab_id: tab_id.clone(), item }, &mut cmds));
        assert_eq!(s.layout.tab(&tab_id).unwrap().components[0].x, 0);
        assert!(cmds.is_empty());
    }

    #[test]
    fn resize_in_edit_mode_is_clamped_and_saved() {
        let (mut s, tab_id) = state_with_chart();
        s.layout.toggle_edit_mode(&tab_id).unwrap();
        s.reconcile_tab(&tab_id);
        let mut item = s.grid_items(&tab_id)[0].clone();
        item.w = 11;
        let mut cmds = Vec::new();
        update(&mut s, &Message::GridResizeStop { tab_id: tab_id.clone(), item }, &mut cmds);

        // chart tops out at eight columns
        assert_eq!(s.layout.tab(&tab_id).unwrap().components[0].w, 8);
        assert_eq!(s.grid_items(&tab_id)[0].w, 8);
        assert!(s.sync.has_pending());
    }
}
