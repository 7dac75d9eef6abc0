//! WebSocket server.
//!
//! Accepts TCP connections, upgrades them to WebSocket and bridges each one
//! to the relay engine. Every connection gets a writer task draining the
//! client's queue into the socket, while the connection task itself decodes
//! inbound frames and forwards them to the engine.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use protocol::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ServerError;
use crate::engine::EngineHandle;

/// What to do with one inbound frame.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// Decode and dispatch this text.
    Text(String),
    /// Nothing to do.
    Skip,
    /// The peer is closing.
    Close,
}

fn classify(frame: WsMessage) -> Inbound {
    match frame {
        WsMessage::Text(text) => Inbound::Text(text),
        WsMessage::Binary(data) => match String::from_utf8(data) {
            Ok(text) => Inbound::Text(text),
            Err(_) => {
                debug!("Dropping non-UTF-8 binary frame");
                Inbound::Skip
            }
        },
        WsMessage::Close(_) => Inbound::Close,
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Inbound::Skip,
    }
}

/// Listens for WebSocket clients and connects them to an engine.
pub struct WebSocketServer {
    listener: TcpListener,
    engine: EngineHandle,
}

impl WebSocketServer {
    /// Binds the listener.
    pub async fn bind(addr: &str, engine: EngineHandle) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, engine })
    }

    /// The bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// Cancelling also ends every open connection.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        match self.local_addr() {
            Ok(addr) => info!(addr = %addr, "WebSocket server listening"),
            Err(e) => warn!(error = %e, "WebSocket server listening on unknown address"),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("WebSocket server stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let engine = self.engine.clone();
                    let token = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, engine, token).await {
                            debug!(peer = %peer, error = %e, "Connection ended with error");
                        }
                    });
                }
            }
        }

        Ok(())
    }
}

/// Serves one client until it disconnects or `shutdown` is cancelled.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: EngineHandle,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let ws = accept_async(stream)
        .await
        .map_err(|source| ServerError::Handshake { peer, source })?;

    let client_id = Uuid::new_v4().to_string();
    let mut outbound = engine
        .connect(client_id.clone())
        .await
        .map_err(|_| ServerError::EngineClosed)?;
    info!(client_id = %client_id, peer = %peer, "WebSocket client connected");

    let (mut sink, mut frames) = ws.split();

    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(client_id = %writer_id, error = %e, "Failed to encode message");
                    continue;
                }
            };
            if let Err(e) = sink.send(WsMessage::Text(json)).await {
                debug!(client_id = %writer_id, error = %e, "Failed to write to client");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let result = loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            frame = frames.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(client_id = %client_id, error = %e, "WebSocket read error");
                break Ok(());
            }
            None => break Ok(()),
        };

        match classify(frame) {
            Inbound::Text(text) => match Message::from_json(&text) {
                Ok(msg) => {
                    if engine.dispatch(client_id.clone(), msg).await.is_err() {
                        break Err(ServerError::EngineClosed);
                    }
                }
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "Dropping undecodable message");
                }
            },
            Inbound::Skip => {}
            Inbound::Close => break Ok(()),
        }
    };

    if engine.disconnect(client_id.clone()).await.is_err() {
        debug!(client_id = %client_id, "Engine gone before disconnect");
    }
    if let Err(e) = writer.await {
        debug!(client_id = %client_id, error = %e, "Writer task failed");
    }
    info!(client_id = %client_id, "WebSocket client disconnected");

    result
}
