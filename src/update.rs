// src/update.rs
//
use tracing::{debug, trace};

use crate::messages::{Command, Message};
use crate::state::{AppState, SessionPhase};

/// Apply one message to the session and return the side effects it asks for.
///
/// Domain reducers run in turn; the first one that consumes the message ends
/// the walk.  After logout only messages that drain the final writes are
/// accepted; everything else is dropped.
pub fn update(state: &mut AppState, msg: Message) -> Vec<Command> {
    let mut commands = Vec::new();
    trace!(?msg, "update");

    if state.phase == SessionPhase::Ended && !msg.survives_logout() {
        debug!(?msg, "session ended, ignoring");
        return commands;
    }

    if crate::reducers::layout::update(state, &msg, &mut commands) {
        return commands;
    }
    if crate::reducers::canvas::update(state, &msg, &mut commands) {
        return commands;
    }
    if crate::reducers::preferences::update(state, &msg, &mut commands) {
        return commands;
    }
    if crate::reducers::sync::update(state, &msg, &mut commands) {
        return commands;
    }

    tracing::warn!(?msg, "message not handled by any reducer");
    commands
}
