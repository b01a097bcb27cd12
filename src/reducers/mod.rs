//! Domain reducers.
//!
//! Each module handles one slice of [`crate::messages::Message`] and returns
//! `true` once it has consumed a message so `update.rs` can stop delegating.

pub mod canvas;
pub mod layout;
pub mod preferences;
pub mod sync;

use tracing::warn;

use crate::error::LayoutError;
use crate::messages::Command;
use crate::state::{AppState, NoticeKind};

/// Report a rejected mutation.  The layout is left exactly as it was.
pub(crate) fn reject(state: &mut AppState, commands: &mut Vec<Command>, err: &LayoutError) {
    warn!(error = %err, "layout mutation rejected");
    let notice = state.push_notice(NoticeKind::Error, err.to_string());
    commands.push(Command::ShowToast(notice));
}
