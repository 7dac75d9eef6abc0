//! Network module for client connections.
//!
//! Clients reach the relay over WebSocket. Each text frame carries one JSON
//! message of the `protocol` crate.

pub mod websocket;

use std::net::SocketAddr;

use thiserror::Error;

/// Errors from the network layer.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The WebSocket upgrade failed.
    #[error("WebSocket handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// The relay engine has stopped.
    #[error("relay engine is not running")]
    EngineClosed,
}

pub use websocket::WebSocketServer;
