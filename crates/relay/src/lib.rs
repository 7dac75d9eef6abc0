//! # tmux-relay
//!
//! Mirrors a tmux session to remote clients over WebSocket and injects their
//! keystrokes back into it.
//!
//! ## Overview
//!
//! The relay attaches to at most one tmux session at a time. While attached, a
//! capture loop polls the pane, strips control sequences, and broadcasts the
//! screen once it settles. Every connected client sees the same stream.
//!
//! - **Session Store**: the tmux backend, reached through [`SessionStore`]
//! - **Relay Engine**: attachment state, capture loop, command dispatch
//! - **Client Registry**: per-client queues and fan-out
//! - **Network**: the WebSocket server bridging sockets to the engine
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Relay Engine                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────┐  │
//! │  │   Attachment   │  │  Capture Loop  │  │ Client Registry│  │
//! │  └────────────────┘  └────────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                      │                    │
//!          │ commands             │ capture/send-keys  │ messages
//!  ┌───────┴────────┐     ┌───────▼────────┐   ┌───────▼────────┐
//!  │ WebSocket srv  │     │   TmuxStore    │   │    clients     │
//!  └────────────────┘     └────────────────┘   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay::{Config, RelayEngine, RelaySettings, TmuxStore, WebSocketServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let store = TmuxStore::new(config.session.tmux_binary.clone());
//!     store.check_available().await?;
//!
//!     let (engine, engine_task) = RelayEngine::new(store, RelaySettings::from(&config)).spawn();
//!     let server = WebSocketServer::bind(&config.listen_addr(), engine.clone()).await?;
//!
//!     let shutdown = CancellationToken::new();
//!     server.serve(shutdown).await?;
//!
//!     engine.shutdown().await?;
//!     engine_task.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`sanitize`]: Control sequence stripping
//! - [`session`]: Session store interface and tmux backend
//! - [`engine`]: Relay engine and client registry
//! - [`network`]: WebSocket server

pub mod config;
pub mod engine;
pub mod network;
pub mod sanitize;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{SessionName, SessionStore, StoreError, TmuxStore};

// Re-export engine types for convenience
pub use engine::{
    ClientId, ClientRegistry, EngineError, EngineHandle, RelayEngine, RelaySettings,
};

// Re-export network types for convenience
pub use network::{ServerError, WebSocketServer};
