//! Shared helpers for the relay integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use protocol::Message;
use relay::session::{SessionName, SessionStore, StoreError};
use relay::{RelayEngine, RelaySettings};
use tokio::sync::mpsc;

/// A backend call recorded by [`FakeStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Capture(String),
    Create { name: String, command: String },
    Kill(String),
    SendText { session: String, text: String },
    SendKey { session: String, key: String },
}

#[derive(Default)]
struct State {
    sessions: Vec<SessionName>,
    screens: HashMap<SessionName, String>,
    churning: HashMap<SessionName, u64>,
    calls: Vec<Call>,
    fail_create: Option<String>,
    fail_send: Option<String>,
    fail_capture: bool,
    list_delay: Option<Duration>,
}

/// In-memory session store that records every call.
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

impl FakeStore {
    pub fn with_sessions(names: &[&str]) -> Self {
        let store = Self::default();
        for name in names {
            store.add_session(name);
        }
        store
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Adds a session with an empty screen.
    pub fn add_session(&self, name: &str) {
        let mut state = self.state();
        state.sessions.push(name.to_string());
        state.screens.insert(name.to_string(), String::new());
    }

    /// Removes a session behind the relay's back.
    pub fn remove_session(&self, name: &str) {
        let mut state = self.state();
        state.sessions.retain(|s| s != name);
        state.screens.remove(name);
    }

    pub fn set_screen(&self, name: &str, text: &str) {
        self.state().screens.insert(name.to_string(), text.to_string());
    }

    /// Makes every capture of `name` return different text.
    pub fn set_churning(&self, name: &str, churning: bool) {
        let mut state = self.state();
        if churning {
            state.churning.insert(name.to_string(), 0);
        } else {
            state.churning.remove(name);
        }
    }

    pub fn fail_create(&self, message: &str) {
        self.state().fail_create = Some(message.to_string());
    }

    pub fn fail_send(&self, message: &str) {
        self.state().fail_send = Some(message.to_string());
    }

    pub fn fail_capture(&self, fail: bool) {
        self.state().fail_capture = fail;
    }

    /// Makes every `list` call sleep first, like a tmux subprocess would.
    pub fn set_list_delay(&self, delay: Duration) {
        self.state().list_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Sessions captured since the last [`clear_calls`](Self::clear_calls).
    pub fn captured(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Capture(session) => Some(session),
                _ => None,
            })
            .collect()
    }

    /// Send calls since the last [`clear_calls`](Self::clear_calls).
    pub fn sends(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::SendText { .. } | Call::SendKey { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    fn failed(command: &str, stderr: &str) -> StoreError {
        StoreError::CommandFailed {
            command: command.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

impl SessionStore for FakeStore {
    async fn list(&self) -> Result<Vec<SessionName>, StoreError> {
        self.record(Call::List);
        let delay = self.state().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().sessions.clone())
    }

    async fn capture(&self, session: &str, _scrollback: u32) -> Result<String, StoreError> {
        self.record(Call::Capture(session.to_string()));
        let mut state = self.state();
        if state.fail_capture {
            return Err(Self::failed("capture-pane", "server exited unexpectedly"));
        }
        let screen = state
            .screens
            .get(session)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session.to_string()))?;
        match state.churning.get_mut(session) {
            Some(counter) => {
                *counter += 1;
                Ok(format!("{}{}", screen, counter))
            }
            None => Ok(screen),
        }
    }

    async fn create(&self, name: &str, command: &str) -> Result<(), StoreError> {
        self.record(Call::Create {
            name: name.to_string(),
            command: command.to_string(),
        });
        if let Some(message) = self.state().fail_create.clone() {
            return Err(Self::failed("new-session", &message));
        }
        self.add_session(name);
        Ok(())
    }

    async fn kill(&self, name: &str) -> Result<(), StoreError> {
        self.record(Call::Kill(name.to_string()));
        let mut state = self.state();
        if !state.sessions.iter().any(|s| s == name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        state.sessions.retain(|s| s != name);
        state.screens.remove(name);
        Ok(())
    }

    async fn send_text(&self, session: &str, text: &str) -> Result<(), StoreError> {
        self.record(Call::SendText {
            session: session.to_string(),
            text: text.to_string(),
        });
        match self.state().fail_send.clone() {
            Some(message) => Err(Self::failed("send-keys", &message)),
            None => Ok(()),
        }
    }

    async fn send_key(&self, session: &str, key: &str) -> Result<(), StoreError> {
        self.record(Call::SendKey {
            session: session.to_string(),
            key: key.to_string(),
        });
        match self.state().fail_send.clone() {
            Some(message) => Err(Self::failed("send-keys", &message)),
            None => Ok(()),
        }
    }
}

/// An engine over `store` with default settings.
pub fn engine(store: &FakeStore) -> RelayEngine<FakeStore> {
    RelayEngine::new(store.clone(), RelaySettings::default())
}

/// Connects a client and discards its initial sessions and status.
pub async fn connect(engine: &mut RelayEngine<FakeStore>, id: &str) -> mpsc::Receiver<Message> {
    let mut rx = engine.connect(id.to_string()).await;
    drain(&mut rx);
    rx
}

/// Takes every message already queued.
pub fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}

/// Contents of the `output` messages among `messages`.
pub fn outputs(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            Message::Output(output) => Some(output.content.clone()),
            _ => None,
        })
        .collect()
}

pub fn sessions(names: &[&str], active: Option<&str>) -> Message {
    Message::sessions(
        names.iter().map(|s| s.to_string()).collect(),
        active.map(str::to_string),
    )
}

pub fn status(session: Option<&str>, is_busy: bool) -> Message {
    Message::status(session.map(str::to_string), is_busy)
}
