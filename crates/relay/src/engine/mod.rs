//! Relay engine.
//!
//! The engine owns the current attachment, runs its capture loop and fans
//! state out to connected clients. It can be driven directly through its
//! async methods, or spawned as an actor and driven through an
//! [`EngineHandle`]; either way every request is handled to completion
//! before the next one starts.
//!
//! # Example
//!
//! ```no_run
//! use relay::engine::{RelayEngine, RelaySettings};
//! use relay::session::TmuxStore;
//!
//! # async fn example() -> Result<(), relay::engine::EngineError> {
//! let engine = RelayEngine::new(TmuxStore::default(), RelaySettings::default());
//! let (handle, _task) = engine.spawn();
//!
//! let mut rx = handle.connect("client-1".to_string()).await?;
//! while let Some(msg) = rx.recv().await {
//!     println!("{:?}", msg);
//! }
//! # Ok(())
//! # }
//! ```

pub mod attachment;
pub mod capture;
pub mod registry;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use protocol::{Command, CommandAction, Input, Message};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::sanitize::{display_text, is_blank};
use crate::session::{SessionName, SessionStore, StoreError};

pub use attachment::{Attachment, CaptureCache, DebounceWindow, SharedCache, TickOutcome};
pub use capture::CaptureLoop;
pub use registry::{ClientHandle, ClientId, ClientRegistry, ClientStats};

use attachment::lock;
use capture::CaptureContext;

/// Depth of the request queue in front of a spawned engine.
const REQUEST_QUEUE_DEPTH: usize = 64;

/// Errors returned by [`EngineHandle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine task has stopped.
    #[error("relay engine is not running")]
    Closed,
}

/// Engine timing and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Capture period.
    pub tick_interval: Duration,
    /// Quiet time before a change is broadcast.
    pub debounce: Duration,
    /// Longest a changed screen may be withheld.
    pub max_silence: Duration,
    /// Sleep after a failed capture.
    pub error_backoff: Duration,
    /// Pause between literal text and the terminating Enter.
    pub enter_delay: Duration,
    /// Scrollback lines included in each capture.
    pub scrollback_lines: u32,
    /// Outbound queue depth per client.
    pub client_buffer: usize,
    /// Session name used by `create` without a name.
    pub default_session: String,
    /// Command used by `create` without a command.
    pub default_command: String,
}

impl RelaySettings {
    /// The debounce window used by the capture loop.
    pub fn debounce_window(&self) -> DebounceWindow {
        DebounceWindow {
            debounce: self.debounce,
            max_silence: self.max_silence,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        let capture = &config.capture;
        Self {
            tick_interval: Duration::from_millis(capture.tick_interval_ms),
            debounce: Duration::from_millis(capture.debounce_ms),
            max_silence: Duration::from_millis(capture.max_silence_ms),
            error_backoff: Duration::from_millis(capture.error_backoff_ms),
            enter_delay: Duration::from_millis(capture.enter_delay_ms),
            scrollback_lines: capture.scrollback_lines,
            client_buffer: config.server.client_buffer,
            default_session: config.session.default_name.clone(),
            default_command: config.session.default_command.clone(),
        }
    }
}

/// Notices sent from a capture loop back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotice {
    /// The loop found its session missing and exited.
    SessionLost {
        session: SessionName,
        generation: u64,
    },
}

/// Requests accepted by a spawned engine.
#[derive(Debug)]
pub enum EngineRequest {
    /// Register a client; replies with its message receiver.
    Connect {
        client_id: ClientId,
        reply: oneshot::Sender<mpsc::Receiver<Message>>,
    },
    /// Unregister a client.
    Disconnect { client_id: ClientId },
    /// Handle a decoded message from a client.
    Dispatch { client_id: ClientId, message: Message },
    /// Detach and stop the engine.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable handle to a spawned engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Registers a client and returns the receiver for its messages.
    ///
    /// The client immediately receives the session listing and status.
    pub async fn connect(&self, client_id: ClientId) -> Result<mpsc::Receiver<Message>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Connect { client_id, reply }).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Unregisters a client.
    pub async fn disconnect(&self, client_id: ClientId) -> Result<(), EngineError> {
        self.send(EngineRequest::Disconnect { client_id }).await
    }

    /// Queues a client message for handling.
    pub async fn dispatch(&self, client_id: ClientId, message: Message) -> Result<(), EngineError> {
        self.send(EngineRequest::Dispatch { client_id, message }).await
    }

    /// Detaches, stops the engine and waits for it to finish.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Shutdown { reply }).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Whether the engine task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(request).await.map_err(|_| EngineError::Closed)
    }
}

/// The relay engine.
pub struct RelayEngine<S: SessionStore> {
    store: Arc<S>,
    registry: ClientRegistry,
    settings: RelaySettings,
    attachment: Option<Attachment>,
    cache: SharedCache,
    generation: u64,
    notice_tx: mpsc::UnboundedSender<EngineNotice>,
    notice_rx: Option<mpsc::UnboundedReceiver<EngineNotice>>,
}

impl<S: SessionStore> RelayEngine<S> {
    /// Creates a detached engine with no clients.
    pub fn new(store: S, settings: RelaySettings) -> Self {
        Self::with_store(Arc::new(store), settings)
    }

    /// Creates an engine around a shared store.
    pub fn with_store(store: Arc<S>, settings: RelaySettings) -> Self {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        Self {
            store,
            registry: ClientRegistry::new(settings.client_buffer),
            settings,
            attachment: None,
            cache: Arc::new(Mutex::new(CaptureCache::default())),
            generation: 0,
            notice_tx,
            notice_rx: Some(notice_rx),
        }
    }

    /// The client registry.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// The engine settings.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// The current attachment, if any.
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Name of the attached session.
    pub fn active_session(&self) -> Option<&str> {
        self.attachment.as_ref().map(Attachment::session)
    }

    /// A copy of the attachment's text caches.
    pub fn cache_snapshot(&self) -> CaptureCache {
        lock(&self.cache).clone()
    }

    /// Whether the attached session changed within the debounce window.
    ///
    /// Always false while detached.
    pub fn is_busy(&self) -> bool {
        self.attachment.is_some() && lock(&self.cache).is_busy(Instant::now(), self.settings.debounce)
    }

    /// Registers a client and sends it the session listing and status.
    pub async fn connect(&mut self, client_id: ClientId) -> mpsc::Receiver<Message> {
        let rx = self.registry.add(client_id.clone()).await;
        info!(client_id = %client_id, "Client connected");

        let sessions = self.list_sessions().await.unwrap_or_default();
        let active = self.active_session().map(str::to_string);
        self.registry
            .send_to(&client_id, Message::sessions(sessions, active))
            .await;
        let status = self.status_message();
        self.registry.send_to(&client_id, status).await;

        rx
    }

    /// Unregisters a client.
    pub async fn disconnect(&mut self, client_id: &str) {
        if let Some(stats) = self.registry.remove(client_id).await {
            info!(
                client_id = %client_id,
                sent = stats.messages_sent,
                dropped = stats.messages_dropped,
                "Client disconnected"
            );
        }
    }

    /// Handles a decoded message from a client.
    pub async fn handle_message(&mut self, client_id: &str, message: Message) {
        match message {
            Message::Input(Input { content, key }) => {
                self.send_input(&content, key.as_deref()).await;
            }
            Message::Command(command) => self.dispatch(client_id, command).await,
            other => {
                debug!(
                    client_id = %client_id,
                    message_type = other.type_name(),
                    "Ignoring relay-bound message from client"
                );
            }
        }
    }

    /// Maps a command to the engine operation it names.
    ///
    /// Unknown actions are ignored.
    pub async fn dispatch(&mut self, client_id: &str, command: Command) {
        let action = match command.parsed_action() {
            Ok(action) => action,
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Ignoring command");
                return;
            }
        };
        debug!(client_id = %client_id, action = %action, "Dispatching command");

        match action {
            CommandAction::List => self.broadcast_sessions().await,
            CommandAction::Attach => {
                self.attach(command.session.as_deref().unwrap_or(""))
                    .await
            }
            CommandAction::Detach => self.detach().await,
            CommandAction::Create => {
                self.create(command.session.as_deref(), command.command.as_deref())
                    .await
            }
            CommandAction::Refresh => self.refresh().await,
            CommandAction::Ping => {
                self.registry.send_to(client_id, Message::Pong).await;
            }
            CommandAction::Kill => self.kill(command.session.as_deref().unwrap_or("")).await,
        }
    }

    /// Attaches to `name`, replacing any current attachment.
    ///
    /// An empty name, or one the store does not list, leaves the engine
    /// unchanged and broadcasts a notice. Clients receive the snapshot,
    /// listing and status before the new capture loop first ticks.
    pub async fn attach(&mut self, name: &str) {
        let known = !name.is_empty()
            && self
                .list_sessions()
                .await
                .unwrap_or_default()
                .iter()
                .any(|s| s == name);
        if !known {
            info!(session = %name, "Attach to unknown session");
            self.broadcast_output(format!("Session not found: {}", name))
                .await;
            return;
        }

        self.release().await;

        let snapshot = match self
            .store
            .capture(name, self.settings.scrollback_lines)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(session = %name, error = %e, "Initial capture failed");
                String::new()
            }
        };

        *lock(&self.cache) = CaptureCache::seeded(&snapshot, Instant::now());
        self.generation += 1;

        self.broadcast_output(display_text(&snapshot)).await;
        let sessions = self.list_sessions().await.unwrap_or_default();
        self.registry
            .broadcast(Message::sessions(sessions, Some(name.to_string())))
            .await;
        // A seeded cache is idle.
        lock(&self.cache).set_announced_busy(false);
        self.registry
            .broadcast(Message::status(Some(name.to_string()), false))
            .await;

        let capture = CaptureLoop::spawn(CaptureContext {
            store: Arc::clone(&self.store),
            registry: self.registry.clone(),
            cache: Arc::clone(&self.cache),
            settings: self.settings.clone(),
            session: name.to_string(),
            generation: self.generation,
            notices: self.notice_tx.clone(),
        });
        self.attachment = Some(Attachment {
            session: name.to_string(),
            generation: self.generation,
            capture,
        });
        info!(session = %name, generation = self.generation, "Attached");
    }

    /// Detaches and broadcasts the resulting status.
    pub async fn detach(&mut self) {
        self.release().await;
        self.broadcast_status().await;
    }

    /// Creates a session and attaches to it.
    ///
    /// Missing arguments fall back to the configured defaults.
    pub async fn create(&mut self, name: Option<&str>, command: Option<&str>) {
        let name = non_empty(name)
            .unwrap_or(self.settings.default_session.as_str())
            .to_string();
        let command = non_empty(command)
            .unwrap_or(self.settings.default_command.as_str())
            .to_string();

        let sessions = self.list_sessions().await.unwrap_or_default();
        if sessions.iter().any(|s| *s == name) {
            self.broadcast_output(format!("Session already exists: {}", name))
                .await;
            return;
        }

        match self.store.create(&name, &command).await {
            Ok(()) => {
                self.broadcast_output(format!("Created session: {}", name))
                    .await;
                self.attach(&name).await;
            }
            Err(e) => {
                error!(session = %name, error = %e, "Failed to create session");
                self.broadcast_output(format!("Failed to create session: {}", e))
                    .await;
            }
        }

        self.broadcast_sessions().await;
    }

    /// Kills a session, detaching first if it is the attached one.
    ///
    /// Store failures are ignored; the listing is always refreshed.
    pub async fn kill(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }

        if self.active_session() == Some(name) {
            self.detach().await;
        }

        match self.store.kill(name).await {
            Ok(()) => info!(session = %name, "Killed session"),
            Err(e) => debug!(session = %name, error = %e, "Kill failed"),
        }

        self.broadcast_sessions().await;
    }

    /// Types into the attached session.
    ///
    /// A non-empty `key` is sent as a named key. Otherwise `content` is sent
    /// literally and followed by Enter.
    pub async fn send_input(&mut self, content: &str, key: Option<&str>) {
        let Some(session) = self.active_session().map(str::to_string) else {
            self.broadcast_output("[Error] No active session").await;
            return;
        };

        match self.list_sessions().await {
            Ok(sessions) if !sessions.contains(&session) => {
                warn!(session = %session, "Input for a session that no longer exists");
                self.broadcast_output(format!("[Error] Session '{}' no longer exists", session))
                    .await;
                self.detach().await;
                self.broadcast_sessions().await;
                return;
            }
            _ => {}
        }

        let result = match non_empty(key) {
            Some(key) => self.store.send_key(&session, key).await,
            None => self.send_line(&session, content).await,
        };

        if let Err(e) = result {
            error!(session = %session, error = %e, "Failed to send input");
            self.broadcast_output(format!("[Error] Failed to send input: {}", e))
                .await;
        }
    }

    /// Captures and broadcasts the attached screen immediately.
    pub async fn refresh(&mut self) {
        let Some(session) = self.active_session().map(str::to_string) else {
            debug!("Refresh while detached");
            return;
        };

        match self
            .store
            .capture(&session, self.settings.scrollback_lines)
            .await
        {
            Ok(raw) => {
                let text = display_text(&raw);
                if !is_blank(&text) {
                    self.broadcast_output(text).await;
                }
                lock(&self.cache).mark_emitted(&raw, Instant::now());
            }
            Err(e) => warn!(session = %session, error = %e, "Refresh capture failed"),
        }
    }

    /// Broadcasts the session listing.
    ///
    /// Detaches first when the attached session is no longer listed.
    pub async fn broadcast_sessions(&mut self) {
        let sessions = match self.list_sessions().await {
            Ok(sessions) => {
                if let Some(active) = self.active_session().map(str::to_string) {
                    if !sessions.contains(&active) {
                        info!(session = %active, "Attached session no longer listed");
                        self.detach().await;
                    }
                }
                sessions
            }
            Err(_) => Vec::new(),
        };

        let active = self.active_session().map(str::to_string);
        self.registry
            .broadcast(Message::sessions(sessions, active))
            .await;
    }

    /// Broadcasts the current status.
    pub async fn broadcast_status(&mut self) {
        let status = self.status_message();
        self.registry.broadcast(status).await;
    }

    /// Handles notices from capture loops that are already queued.
    pub async fn handle_pending_notices(&mut self) {
        let mut pending = Vec::new();
        if let Some(rx) = self.notice_rx.as_mut() {
            while let Ok(notice) = rx.try_recv() {
                pending.push(notice);
            }
        }
        for notice in pending {
            self.handle_notice(notice).await;
        }
    }

    /// Detaches without broadcasting.
    pub async fn shutdown(&mut self) {
        self.release().await;
        info!("Relay engine stopped");
    }

    /// Moves the engine onto its own task.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let task = tokio::spawn(self.run(rx));
        (EngineHandle { tx }, task)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<EngineRequest>) {
        let Some(mut notices) = self.notice_rx.take() else {
            error!("Engine notice channel already taken");
            return;
        };

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        self.shutdown().await;
                        break;
                    };
                    if let Some(reply) = self.handle_request(request).await {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                }
                Some(notice) = notices.recv() => self.handle_notice(notice).await,
            }
        }
    }

    /// Handles one request; returns the reply channel on shutdown.
    async fn handle_request(&mut self, request: EngineRequest) -> Option<oneshot::Sender<()>> {
        match request {
            EngineRequest::Connect { client_id, reply } => {
                let rx = self.connect(client_id).await;
                let _ = reply.send(rx);
            }
            EngineRequest::Disconnect { client_id } => self.disconnect(&client_id).await,
            EngineRequest::Dispatch { client_id, message } => {
                self.handle_message(&client_id, message).await
            }
            EngineRequest::Shutdown { reply } => return Some(reply),
        }
        None
    }

    async fn handle_notice(&mut self, notice: EngineNotice) {
        match notice {
            EngineNotice::SessionLost { session, generation } => {
                let current = self.attachment.as_ref().map(Attachment::generation);
                if current != Some(generation) {
                    debug!(session = %session, generation, "Ignoring stale session notice");
                    return;
                }
                self.broadcast_output(format!("[Error] Session '{}' no longer exists", session))
                    .await;
                self.detach().await;
                self.broadcast_sessions().await;
            }
        }
    }

    /// Stops the capture loop and clears every cached field.
    async fn release(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            attachment.capture.stop().await;
            info!(session = %attachment.session, "Detached");
        }
        lock(&self.cache).clear();
    }

    async fn send_line(&self, session: &str, content: &str) -> Result<(), StoreError> {
        self.store.send_text(session, content).await?;
        sleep(self.settings.enter_delay).await;
        self.store.send_key(session, "Enter").await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionName>, StoreError> {
        self.store.list().await.inspect_err(|e| {
            warn!(error = %e, "Failed to list sessions");
        })
    }

    async fn broadcast_output(&self, content: impl Into<String>) {
        self.registry.broadcast(Message::output(content)).await;
    }

    fn status_message(&self) -> Message {
        let busy = self.is_busy();
        lock(&self.cache).set_announced_busy(busy);
        Message::status(self.active_session().map(str::to_string), busy)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
