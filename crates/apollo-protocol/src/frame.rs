//! Inbound frame disambiguation
//!
//! The remote side does not tag its frames. A frame is a [`Command`] when it
//! carries a non-empty `command`, otherwise a [`ShellIo`] when it carries a
//! non-empty `message`, otherwise it is unrecognized and gets dropped. A frame
//! with both fields set is a command.

use serde::Deserialize;

use crate::message::{Command, ShellIo};
use crate::session::SessionId;

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Terminal input for a session
    Io(ShellIo),
    /// Control instruction for a session
    Command(Command),
    /// Valid JSON object matching neither shape
    Unrecognized,
}

/// Every field the two shapes can carry, all optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFrame {
    connection_id: SessionId,
    message: Option<String>,
    command: Option<String>,
}

impl Frame {
    /// Classify a parsed JSON value.
    ///
    /// Fails only if the value is not an object with string-typed fields.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_value(value)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawFrame) -> Self {
        match (raw.command, raw.message) {
            (Some(command), _) if !command.is_empty() => Frame::Command(Command {
                connection_id: raw.connection_id,
                command,
            }),
            (_, Some(message)) if !message.is_empty() => Frame::Io(ShellIo {
                connection_id: raw.connection_id,
                message,
            }),
            _ => Frame::Unrecognized,
        }
    }

    /// Session the frame is addressed to, if it was recognized
    pub fn connection_id(&self) -> Option<&SessionId> {
        match self {
            Frame::Io(io) => Some(&io.connection_id),
            Frame::Command(command) => Some(&command.connection_id),
            Frame::Unrecognized => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_io_frame() {
        let frame = Frame::from_value(json!({"connection_id": "x", "message": "ls\n"})).unwrap();
        assert_eq!(frame, Frame::Io(ShellIo::new("x", "ls\n")));
    }

    #[test]
    fn test_command_frame() {
        let frame =
            Frame::from_value(json!({"command": "new connection", "connection_id": "x"})).unwrap();
        assert_eq!(frame, Frame::Command(Command::new("x", "new connection")));
    }

    #[test]
    fn test_command_wins_over_message() {
        let frame = Frame::from_value(
            json!({"connection_id": "x", "message": "ls\n", "command": "cancel"}),
        )
        .unwrap();
        assert_eq!(frame, Frame::Command(Command::new("x", "cancel")));
    }

    #[test]
    fn test_empty_fields_are_unrecognized() {
        let frame =
            Frame::from_value(json!({"connection_id": "x", "message": "", "command": ""})).unwrap();
        assert_eq!(frame, Frame::Unrecognized);

        let frame = Frame::from_value(json!({"connection_id": "x"})).unwrap();
        assert_eq!(frame, Frame::Unrecognized);
        assert!(frame.connection_id().is_none());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let frame =
            Frame::from_value(json!({"connection_id": "y", "message": "a", "extra": 1})).unwrap();
        assert_eq!(frame.connection_id(), Some(&SessionId::from("y")));
    }

    #[test]
    fn test_non_object_is_error() {
        assert!(Frame::from_value(json!([1, 2, 3])).is_err());
        assert!(Frame::from_value(json!({"connection_id": 5, "message": "a"})).is_err());
    }
}
