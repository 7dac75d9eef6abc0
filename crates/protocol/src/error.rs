//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all codec failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The `type` tag does not name a known message.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A command carried an action outside the known set.
    #[error("unknown command action: {0}")]
    UnknownAction(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_message_type_display() {
        let err = ProtocolError::UnknownMessageType("resize".to_string());
        assert_eq!(err.to_string(), "unknown message type: resize");
    }

    #[test]
    fn test_unknown_action_display() {
        let err = ProtocolError::UnknownAction("reboot".to_string());
        assert_eq!(err.to_string(), "unknown command action: reboot");
    }

    #[test]
    fn test_from_serde_json_syntax_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_from_serde_json_data_error() {
        let json_err = serde_json::from_str::<i32>("\"not a number\"").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
