//! # tmux-relay Protocol Library
//!
//! Wire message definitions shared by the relay and its clients.
//!
//! Messages are newline-free JSON objects tagged by a `type` field:
//!
//! | type       | fields                                   | direction        |
//! |------------|------------------------------------------|------------------|
//! | `output`   | `content`                                | relay -> client  |
//! | `status`   | `connected`, `session`, `is_busy`        | relay -> client  |
//! | `sessions` | `sessions`, `active`                     | relay -> client  |
//! | `pong`     |                                          | relay -> client  |
//! | `input`    | `content`, `key`                         | client -> relay  |
//! | `command`  | `action`, `session`, `command`           | client -> relay  |
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{CommandAction, Message};
//!
//! let msg = Message::from_json(r#"{"type":"command","action":"attach","session":"main"}"#).unwrap();
//! if let Message::Command(cmd) = msg {
//!     assert_eq!(cmd.parsed_action().unwrap(), CommandAction::Attach);
//! }
//!
//! let reply = Message::status(Some("main".to_string()), false);
//! assert!(reply.to_json().unwrap().contains("\"type\":\"status\""));
//! ```

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    Command, CommandAction, Input, Message, Output, Sessions, Status, MESSAGE_TYPES,
};
