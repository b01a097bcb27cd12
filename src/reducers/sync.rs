//! Session lifecycle, write acknowledgements and background reconciliation
//! against the remote store.

use tracing::{debug, error, info, warn};

use crate::constants::DEFAULT_THEME;
use crate::layout::LoadOutcome;
use crate::messages::{Command, Message};
use crate::models::SnapshotStamp;
use crate::scheduling::{FailureOutcome, SaveKey};
use crate::state::{AppState, NoticeKind, SessionPhase};
use crate::utils::format_timestamp_ms;

pub fn update(state: &mut AppState, msg: &Message, commands: &mut Vec<Command>) -> bool {
    match msg {
        Message::StartSession => {
            state.phase = SessionPhase::Starting;
            if let Err(err) = state.cache.store_identity(&state.principal) {
                warn!(error = %err, "could not cache identity");
            }
            // Show whatever this device remembers while the remote load runs.
            if let Some(local) = state.cache.load_layout(&state.principal.user_id) {
                let outcome = state.layout.load_from_snapshot(local);
                debug!(?outcome, "device layout offered");
            }
            if let Some(theme) = state.cache.load_theme() {
                state.theme = theme;
            }
            state.reconcile_all();
            commands.push(Command::LoadSession);
            true
        }
        Message::SessionLoaded { remote, theme } => {
            match remote {
                // Edits made while the load was in flight are not replaced.
                Some(snapshot) if snapshot.stamp() > state.layout.stamp() && !state.is_idle() => {
                    defer_remote(state, snapshot.stamp());
                }
                Some(snapshot) => match state.apply_remote_snapshot(snapshot.clone()) {
                    LoadOutcome::Applied => {
                        info!(version = snapshot.version, "remote layout applied")
                    }
                    LoadOutcome::IgnoredStale { local, incoming } => {
                        info!(?local, ?incoming, "device layout is current");
                        if local > incoming {
                            // Device got ahead while offline; push it up.
                            state.layout_changed();
                        }
                    }
                },
                None if !state.layout.tabs().is_empty() => state.layout_changed(),
                None => {}
            }
            let theme_busy = state.has_local_write(&SaveKey::Theme);
            if let Some(theme) = theme.as_deref().filter(|t| !t.trim().is_empty() && !theme_busy) {
                state.theme = theme.to_string();
                if let Err(err) = state.cache.store_theme(theme) {
                    warn!(error = %err, "could not cache theme");
                }
            }
            begin_ready(state);
            true
        }
        Message::SessionLoadFailed(err) => {
            warn!(error = %err, "remote load failed, continuing from device cache");
            begin_ready(state);
            let notice = state.push_notice(
                NoticeKind::Info,
                "Couldn't reach saved preferences. Showing the layout stored on this device.",
            );
            commands.push(Command::ShowToast(notice));
            true
        }
        Message::Logout => {
            let now = state.now_ms();
            for write in state.sync.flush(None, now) {
                commands.push(Command::Persist(write));
            }
            if let Err(err) = state.cache.clear_identity() {
                warn!(error = %err, "could not clear cached identity");
            }
            state.phase = SessionPhase::Ended;
            state.remote_drift = None;
            info!(user_id = %state.principal.user_id, "session ended");
            commands.push(Command::EndSession);
            true
        }
        Message::Tick => {
            if state.phase == SessionPhase::Ended {
                return true;
            }
            let now = state.now_ms();
            for write in state.sync.poll(now) {
                commands.push(Command::Persist(write));
            }
            super::canvas::recheck_races(state);

            if state.phase == SessionPhase::Ready {
                if state.sync.reconcile_due(now) {
                    commands.push(Command::CheckRemoteStamp);
                } else if state.remote_drift.is_some() && state.is_idle() {
                    state.remote_drift = None;
                    commands.push(Command::FetchRemoteLayout);
                }
            }
            true
        }
        Message::Flush(key) => {
            let now = state.now_ms();
            for write in state.sync.flush(key.as_ref(), now) {
                commands.push(Command::Persist(write));
            }
            true
        }
        Message::SaveSucceeded { key, generation } => {
            if state.sync.record_success(key, *generation) {
                debug!(%key, generation, "write confirmed");
            } else {
                debug!(%key, generation, "stale ack ignored");
            }
            if state.phase == SessionPhase::Ended {
                // Writes that queued up behind an in-flight one at logout.
                let now = state.now_ms();
                for write in state.sync.flush(None, now) {
                    commands.push(Command::Persist(write));
                }
            }
            true
        }
        Message::SaveFailed { write, error: cause } => {
            let key = write.key.clone();
            let now = state.now_ms();
            match state.sync.record_failure(write.clone(), now) {
                FailureOutcome::RetryScheduled { attempt, retry_at } => {
                    warn!(
                        %key,
                        attempt,
                        retry_at = %format_timestamp_ms(retry_at),
                        error = %cause,
                        "write failed, retry scheduled"
                    );
                }
                FailureOutcome::Exhausted => {
                    error!(%key, error = %cause, "write failed, retries exhausted");
                    let message = format!(
                        "Couldn't save your {}. Your changes are kept on this device \
                         and will be saved again with your next change.",
                        describe(&key)
                    );
                    if !state.notices.iter().any(|n| n.message == message) {
                        let notice = state.push_notice(NoticeKind::Error, message);
                        commands.push(Command::ShowToast(notice));
                    }
                }
                FailureOutcome::Superseded => debug!(%key, "failed write already superseded"),
            }
            true
        }
        Message::RemoteStampChecked(stamp) => {
            match stamp {
                Some(remote) if *remote > state.layout.stamp() => {
                    if state.is_idle() {
                        commands.push(Command::FetchRemoteLayout);
                    } else {
                        defer_remote(state, *remote);
                    }
                }
                _ => debug!("remote layout not newer"),
            }
            true
        }
        Message::RemoteLayoutFetched(Some(snapshot)) => {
            if !state.is_idle() {
                defer_remote(state, snapshot.stamp());
                return true;
            }
            if state.apply_remote_snapshot(snapshot.clone()) == LoadOutcome::Applied {
                state.remote_drift = None;
                let notice =
                    state.push_notice(NoticeKind::Info, "Layout updated from another device.");
                commands.push(Command::ShowToast(notice));
            }
            true
        }
        Message::RemoteLayoutFetched(None) => true,
        Message::RemoteCheckFailed(err) => {
            debug!(error = %err, "background reconcile skipped");
            true
        }
        _ => false,
    }
}

fn begin_ready(state: &mut AppState) {
    state.ensure_default_tab();
    if state.theme.trim().is_empty() {
        state.theme = DEFAULT_THEME.to_string();
    }
    state.reconcile_all();
    state.phase = SessionPhase::Ready;
    let now = state.now_ms();
    state.sync.reconcile_due(now);
}

/// Remember a newer remote layout seen while the session is busy.  An unsent
/// local layout is the later write, so it is requeued with a stamp that
/// outranks the remote one; otherwise the pull waits until the session is
/// idle.
fn defer_remote(state: &mut AppState, remote: SnapshotStamp) {
    state.remote_drift = Some(remote);
    if state.has_local_write(&SaveKey::Layout) {
        state.layout_changed();
    } else {
        info!(?remote, "remote layout is newer, deferring until idle");
    }
}

fn describe(key: &SaveKey) -> &'static str {
    match key {
        SaveKey::Layout => "layout",
        SaveKey::Theme => "theme",
        SaveKey::Preference(_) => "preferences",
        SaveKey::ComponentState(_) => "widget settings",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::config::AppConfig;
    use crate::error::PersistenceError;
    use crate::models::{Snapshot, SnapshotStamp, Tab};
    use crate::scheduling::{PendingWrite, SavePayload};
    use crate::storage::MemoryStorage;
    use crate::utils::ManualClock;
    use std::rc::Rc;

    fn state() -> (AppState, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::new(1_000));
        let s = AppState::new(
            AppConfig::default(),
            Principal::new("u1", "gzc"),
            Box::new(MemoryStorage::new()),
            clock.clone(),
        );
        (s, clock)
    }

    fn remote(version: u64) -> Snapshot {
        Snapshot {
            layout_id: "remote".into(),
            tabs: vec![Tab::new("t-remote", "Rates")],
            active_tab_id: Some("t-remote".into()),
            version,
            saved_at: 10,
        }
    }

    #[test]
    fn start_session_requests_remote_load() {
        let (mut s, _) = state();
        let mut cmds = Vec::new();
        update(&mut s, &Message::StartSession, &mut cmds);
        assert_eq!(cmds, vec![Command::LoadSession]);
        assert_eq!(s.phase, SessionPhase::Starting);
        assert_eq!(s.cache.load_identity(), Some(s.principal.clone()));
    }

    #[test]
    fn newer_remote_layout_wins_on_load() {
        let (mut s, _) = state();
        update(&mut s, &Message::StartSession, &mut Vec::new());
        let msg = Message::SessionLoaded {
            remote: Some(remote(7)),
            theme: Some("gzc-light".into()),
        };
        update(&mut s, &msg, &mut Vec::new());

        assert_eq!(s.phase, SessionPhase::Ready);
        assert_eq!(s.layout.stamp().version, 7);
        assert_eq!(s.layout.active_tab_id(), Some("t-remote"));
        assert_eq!(s.theme, "gzc-light");
    }

    #[test]
    fn failed_load_lands_on_default_tab() {
        let (mut s, _) = state();
        let mut cmds = Vec::new();
        let failed = Message::SessionLoadFailed(PersistenceError::Network("down".into()));
        update(&mut s, &failed, &mut cmds);
        assert_eq!(s.phase, SessionPhase::Ready);
        assert_eq!(s.layout.tabs().len(), 1);
        assert!(matches!(&cmds[..], [Command::ShowToast(n)] if n.kind == NoticeKind::Info));
    }

    #[test]
    fn exhausted_retries_notify_once() {
        let (mut s, _) = state();
        s.config.sync.retry = crate::scheduling::RetryPolicy::no_retry();
        s.sync = crate::scheduling::SyncScheduler::new(&s.config.sync);
        let write = PendingWrite {
            key: SaveKey::Theme,
            payload: SavePayload::Theme("x".into()),
            generation: 1,
            attempt: 0,
        };
        let fail = Message::SaveFailed {
            write,
            error: PersistenceError::Unavailable("503".into()),
        };
        let mut cmds = Vec::new();
        update(&mut s, &fail, &mut cmds);
        update(&mut s, &fail, &mut cmds);
        assert_eq!(cmds.iter().filter(|c| matches!(c, Command::ShowToast(_))).count(), 1);
        assert!(s.sync.has_unsaved());
    }

    fn settle_writes(s: &mut AppState) {
        let now = s.now_ms();
        for write in s.sync.flush(None, now) {
            s.sync.record_success(&write.key, write.generation);
        }
    }

    #[test]
    fn newer_stamp_is_deferred_while_editing() {
        let (mut s, _) = state();
        let unauthorized = Message::SessionLoadFailed(PersistenceError::Unauthorized);
        update(&mut s, &unauthorized, &mut Vec::new());
        let tab_id = s.layout.tabs()[0].id.clone();
        s.layout.toggle_edit_mode(&tab_id).unwrap();
        settle_writes(&mut s);

        let newer = SnapshotStamp { version: 99, saved_at: 0 };
        let mut cmds = Vec::new();
        update(&mut s, &Message::RemoteStampChecked(Some(newer)), &mut cmds);
        assert!(cmds.is_empty());
        assert_eq!(s.remote_drift, Some(newer));
        assert!(s.layout.stamp() < newer);
    }

    #[test]
    fn unsent_layout_outranks_newer_remote() {
        let (mut s, _) = state();
        let unauthorized = Message::SessionLoadFailed(PersistenceError::Unauthorized);
        update(&mut s, &unauthorized, &mut Vec::new());
        assert!(s.sync.pending_keys().contains(&SaveKey::Layout));

        let newer = SnapshotStamp { version: 99, saved_at: 0 };
        update(&mut s, &Message::RemoteStampChecked(Some(newer)), &mut Vec::new());
        assert_eq!(s.remote_drift, None);
        assert!(s.layout.stamp() > newer);

        let now = s.now_ms();
        let writes = s.sync.flush(None, now);
        assert!(matches!(&writes[0].payload, SavePayload::Layout(snap) if snap.version == 100));
    }

    #[test]
    fn edits_made_during_startup_load_survive_newer_remote() {
        let (mut s, _) = state();
        let mut cached = remote(2);
        cached.tabs = vec![Tab::new("t1", "Desk")];
        cached.active_tab_id = Some("t1".into());
        s.cache.store_layout("u1", &cached).unwrap();

        update(&mut s, &Message::StartSession, &mut Vec::new());
        crate::update::update(&mut s, Message::ToggleEditMode("t1".into()));
        crate::update::update(
            &mut s,
            Message::AddComponent {
                tab_id: "t1".into(),
                component_type: "chart".into(),
                position: None,
            },
        );

        let mut incoming = cached.clone();
        incoming.version = 10;
        let loaded = Message::SessionLoaded { remote: Some(incoming.clone()), theme: None };
        update(&mut s, &loaded, &mut Vec::new());

        let tab = s.layout.tab("t1").unwrap();
        assert_eq!(tab.components.len(), 1);
        assert!(tab.edit_mode);
        assert_eq!(s.phase, SessionPhase::Ready);
        // The unsent local layout now outranks the remote one.
        assert_eq!(s.remote_drift, None);
        assert!(s.layout.stamp() > incoming.stamp());
        assert!(s.sync.pending_keys().contains(&SaveKey::Layout));
    }

    #[test]
    fn theme_chosen_during_startup_load_is_kept() {
        let (mut s, _) = state();
        update(&mut s, &Message::StartSession, &mut Vec::new());
        crate::update::update(&mut s, Message::SetTheme("gzc-light".into()));
        let loaded = Message::SessionLoaded { remote: None, theme: Some("gzc-classic".into()) };
        update(&mut s, &loaded, &mut Vec::new());
        assert_eq!(s.theme, "gzc-light");
    }

    #[test]
    fn logout_flushes_and_ends() {
        let (mut s, _) = state();
        let unauthorized = Message::SessionLoadFailed(PersistenceError::Unauthorized);
        update(&mut s, &unauthorized, &mut Vec::new());
        let mut cmds = Vec::new();
        update(&mut s, &Message::Logout, &mut cmds);
        assert!(matches!(cmds.first(), Some(Command::Persist(w)) if w.key == SaveKey::Layout));
        assert_eq!(cmds.last(), Some(&Command::EndSession));
        assert_eq!(s.phase, SessionPhase::Ended);
        assert_eq!(s.cache.load_identity(), None);
    }
}
