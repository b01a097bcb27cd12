//! Headless session driver.
//!
//! Owns an [`AppState`] and a [`PersistentStore`] and runs the
//! update/execute loop to quiescence for every dispatched message.  The
//! browser binding in `lib.rs` does the same with `spawn_local`; this one
//! awaits in line, which keeps non-browser hosts and the test-suite
//! deterministic.

use std::collections::VecDeque;

use crate::command_executors::execute_command;
use crate::messages::{Command, Message};
use crate::persistence::PersistentStore;
use crate::state::{AppState, Notice};
use crate::update::update;

pub struct Runtime<S: PersistentStore> {
    state: AppState,
    store: S,
    toasts: Vec<Notice>,
    ended: bool,
}

impl<S: PersistentStore> Runtime<S> {
    pub fn new(state: AppState, store: S) -> Self {
        Self { state, store, toasts: Vec::new(), ended: false }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Every notice surfaced so far, in order.
    pub fn toasts(&self) -> &[Notice] {
        &self.toasts
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Process `msg` and everything it causes.
    pub async fn dispatch(&mut self, msg: Message) {
        let mut queue = VecDeque::from([msg]);
        while let Some(msg) = queue.pop_front() {
            for cmd in update(&mut self.state, msg) {
                match cmd {
                    Command::ShowToast(notice) => self.toasts.push(notice),
                    Command::EndSession => self.ended = true,
                    other => {
                        let replies =
                            execute_command(other, &self.store, &self.state.principal).await;
                        queue.extend(replies);
                    }
                }
            }
        }
    }

    /// One scheduler tick.
    pub async fn tick(&mut self) {
        self.dispatch(Message::Tick).await;
    }

    pub fn into_parts(self) -> (AppState, S) {
        (self.state, self.store)
    }
}
