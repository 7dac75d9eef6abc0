//! Wire message definitions for tmux-relay.
//!
//! Every message is a single JSON object carrying a `type` tag. The set of
//! tags is closed and each tag has a fixed set of fields: decoding an object
//! with an unknown tag or a field its tag does not define fails.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Tags accepted by [`Message::from_json`].
pub const MESSAGE_TYPES: &[&str] = &["output", "status", "sessions", "pong", "input", "command"];

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    // Relay -> client
    /// Screen content or an informational line.
    Output(Output),
    /// Attachment status.
    Status(Status),
    /// Session listing.
    Sessions(Sessions),
    /// Liveness acknowledgment.
    Pong,

    // Client -> relay
    /// Keystrokes for the attached session.
    Input(Input),
    /// Control command.
    Command(Command),
}

/// Screen content or informational text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Output {
    pub content: String,
}

/// Attachment status as seen by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Status {
    /// Whether the relay is serving. Always true when sent by the relay.
    pub connected: bool,
    /// Name of the attached session, if any.
    pub session: Option<String>,
    /// Whether the attached screen changed within the debounce window.
    pub is_busy: bool,
}

/// Session listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sessions {
    pub sessions: Vec<String>,
    pub active: Option<String>,
}

/// Keystrokes to inject.
///
/// When `key` is set it is sent as a named key (e.g. `C-c`, `Up`) and
/// `content` is ignored. Otherwise `content` is typed literally and
/// followed by Enter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Input {
    pub content: String,
    pub key: Option<String>,
}

/// Control command sent by a client.
///
/// `action` stays a plain string on the wire so that newer clients can send
/// actions this relay does not know; see [`Command::parsed_action`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Command {
    pub action: String,
    pub session: Option<String>,
    pub command: Option<String>,
}

impl Command {
    /// Creates a command with only an action set.
    pub fn new(action: CommandAction) -> Self {
        Self {
            action: action.as_str().to_string(),
            ..Default::default()
        }
    }

    /// Sets the target session.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Sets the shell command used by `create`.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Parses the action string.
    pub fn parsed_action(&self) -> Result<CommandAction> {
        self.action.parse()
    }
}

/// Known command actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandAction {
    List,
    Attach,
    Detach,
    Create,
    Refresh,
    Ping,
    Kill,
}

impl CommandAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::List => "list",
            CommandAction::Attach => "attach",
            CommandAction::Detach => "detach",
            CommandAction::Create => "create",
            CommandAction::Refresh => "refresh",
            CommandAction::Ping => "ping",
            CommandAction::Kill => "kill",
        }
    }
}

impl FromStr for CommandAction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "list" => Ok(CommandAction::List),
            "attach" => Ok(CommandAction::Attach),
            "detach" => Ok(CommandAction::Detach),
            "create" => Ok(CommandAction::Create),
            "refresh" => Ok(CommandAction::Refresh),
            "ping" => Ok(CommandAction::Ping),
            "kill" => Ok(CommandAction::Kill),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// Builds an `output` message.
    pub fn output(content: impl Into<String>) -> Self {
        Message::Output(Output {
            content: content.into(),
        })
    }

    /// Builds a `status` message as sent by a running relay.
    pub fn status(session: Option<String>, is_busy: bool) -> Self {
        Message::Status(Status {
            connected: true,
            session,
            is_busy,
        })
    }

    /// Builds a `sessions` message.
    pub fn sessions(sessions: Vec<String>, active: Option<String>) -> Self {
        Message::Sessions(Sessions { sessions, active })
    }

    /// Builds an `input` message.
    pub fn input(content: impl Into<String>, key: Option<String>) -> Self {
        Message::Input(Input {
            content: content.into(),
            key,
        })
    }

    /// Returns the wire tag of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Output(_) => "output",
            Message::Status(_) => "status",
            Message::Sessions(_) => "sessions",
            Message::Pong => "pong",
            Message::Input(_) => "input",
            Message::Command(_) => "command",
        }
    }

    /// Serializes the message to a single-line JSON object.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parses a JSON object into a message.
    ///
    /// Fails with [`ProtocolError::UnknownMessageType`] when the `type` tag is
    /// not one of [`MESSAGE_TYPES`], and with
    /// [`ProtocolError::Deserialization`] when the object carries a field its
    /// tag does not define. Fields missing from the object take their default
    /// values.
    pub fn from_json(data: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(data)?;

        let tag = match value.get("type") {
            Some(serde_json::Value::String(tag)) => tag.clone(),
            Some(other) => return Err(ProtocolError::UnknownMessageType(other.to_string())),
            None => {
                return Err(ProtocolError::Deserialization(
                    "missing `type` field".to_string(),
                ))
            }
        };

        if !MESSAGE_TYPES.contains(&tag.as_str()) {
            return Err(ProtocolError::UnknownMessageType(tag));
        }

        // Unit variants skip field checks in serde, so `pong` is checked here.
        if tag == "pong" {
            let extra = value
                .as_object()
                .and_then(|fields| fields.keys().find(|key| *key != "type"));
            if let Some(field) = extra {
                return Err(ProtocolError::Deserialization(format!(
                    "unknown field `{}` in pong",
                    field
                )));
            }
        }

        Ok(serde_json::from_value(value)?)
    }
}
