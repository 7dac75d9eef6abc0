//! Session store interface.
//!
//! The session store is the terminal multiplexer backend. It owns the
//! sessions; the relay only references them by name.

use std::future::Future;

use thiserror::Error;

/// Name of a session in the store.
pub type SessionName = String;

/// Errors reported by a session store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend tool is missing.
    #[error("session backend not available: {0}")]
    NotAvailable(String),

    /// A backend command exited unsuccessfully.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Trimmed standard error of the command.
        stderr: String,
    },

    /// The named session does not exist.
    #[error("session not found: {0}")]
    NotFound(SessionName),

    /// I/O error while running the backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations the relay needs from the multiplexer backend.
///
/// Implementations must be shareable across tasks; every returned future is
/// `Send` so that the capture loop can run on the multi-threaded runtime.
pub trait SessionStore: Send + Sync + 'static {
    /// Lists the names of all sessions.
    fn list(&self) -> impl Future<Output = Result<Vec<SessionName>, StoreError>> + Send;

    /// Captures the session's screen including up to `scrollback` lines of history.
    fn capture(
        &self,
        session: &str,
        scrollback: u32,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Creates a detached session running `command`.
    fn create(&self, name: &str, command: &str)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Kills a session.
    fn kill(&self, name: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Types `text` literally into the session.
    fn send_text(&self, session: &str, text: &str)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Sends a named key such as `Enter`, `C-c` or `Up`.
    fn send_key(&self, session: &str, key: &str)
        -> impl Future<Output = Result<(), StoreError>> + Send;
}
