//! The capture loop task.
//!
//! One loop runs per attachment. Each tick it captures the attached session,
//! runs the capture through the shared [`CaptureCache`](super::CaptureCache)
//! and broadcasts whatever the debounce rules decided. The loop exits when its
//! token is cancelled or when it finds that its session is gone.

use std::sync::Arc;

use protocol::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{SessionName, SessionStore, StoreError};

use super::attachment::{lock, SharedCache};
use super::registry::ClientRegistry;
use super::{EngineNotice, RelaySettings};

/// Everything a capture loop needs.
pub(crate) struct CaptureContext<S: SessionStore> {
    pub store: Arc<S>,
    pub registry: ClientRegistry,
    pub cache: SharedCache,
    pub settings: RelaySettings,
    pub session: SessionName,
    pub generation: u64,
    pub notices: mpsc::UnboundedSender<EngineNotice>,
}

/// Handle to a running capture loop.
pub struct CaptureLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CaptureLoop {
    /// Spawns the loop on the current runtime.
    pub(crate) fn spawn<S: SessionStore>(ctx: CaptureContext<S>) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(ctx, token.clone()));
        Self { token, handle }
    }

    /// Whether the task has not finished yet.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancels the loop and waits for the task to finish.
    ///
    /// An in-flight capture is allowed to complete; the loop notices the
    /// cancellation at its next suspension point.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!(error = %e, "Capture loop panicked");
            }
        }
    }
}

async fn run<S: SessionStore>(ctx: CaptureContext<S>, token: CancellationToken) {
    debug!(session = %ctx.session, generation = ctx.generation, "Capture loop started");

    loop {
        if token.is_cancelled() {
            break;
        }

        let delay = match ctx
            .store
            .capture(&ctx.session, ctx.settings.scrollback_lines)
            .await
        {
            Ok(raw) => {
                if token.is_cancelled() {
                    break;
                }
                tick(&ctx, raw).await;
                ctx.settings.tick_interval
            }
            Err(e) => {
                if token.is_cancelled() {
                    break;
                }
                if session_gone(&ctx, &e).await {
                    info!(session = %ctx.session, "Attached session disappeared");
                    let _ = ctx.notices.send(EngineNotice::SessionLost {
                        session: ctx.session.clone(),
                        generation: ctx.generation,
                    });
                    break;
                }
                warn!(session = %ctx.session, error = %e, "Capture failed, backing off");
                ctx.settings.error_backoff
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    debug!(session = %ctx.session, generation = ctx.generation, "Capture loop stopped");
}

/// Runs one capture through the cache and broadcasts the outcome.
async fn tick<S: SessionStore>(ctx: &CaptureContext<S>, raw: String) {
    let outcome = {
        let mut cache = lock(&ctx.cache);
        cache.observe(raw, Instant::now(), ctx.settings.debounce_window())
    };

    if let Some(text) = outcome.output {
        ctx.registry.broadcast(Message::output(text)).await;
    }

    if let Some(busy) = outcome.busy {
        debug!(session = %ctx.session, busy, "Announcing status");
        ctx.registry
            .broadcast(Message::status(Some(ctx.session.clone()), busy))
            .await;
    }
}

/// Whether a capture failure means the session no longer exists.
async fn session_gone<S: SessionStore>(ctx: &CaptureContext<S>, err: &StoreError) -> bool {
    if matches!(err, StoreError::NotFound(_)) {
        return true;
    }

    match ctx.store.list().await {
        Ok(sessions) => !sessions.iter().any(|s| *s == ctx.session),
        Err(e) => {
            debug!(error = %e, "Could not list sessions after capture failure");
            false
        }
    }
}
