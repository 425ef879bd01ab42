//! Message types for the Apollo wire protocol
//!
//! Two payload shapes share one JSON envelope:
//!
//! - [`ShellIo`]: terminal input from the operator, or terminal output from
//!   a session, `{"connection_id": "..", "message": ".."}`
//! - [`Command`]: a control instruction, `{"connection_id": "..", "command": ".."}`
//!
//! # Message Flow
//!
//! 1. Operator sends `Command { command: "new connection" }` (optional, the
//!    first `ShellIo` for an unknown id also opens a session)
//! 2. Terminal input: `ShellIo` from the operator, written to the session's PTY
//! 3. Terminal output: `ShellIo` from the agent, one per PTY read
//! 4. Session end: `Command { command: "cancel" }`
//! 5. Any other command name runs a predefined action, which may answer with
//!    follow-up `Command`s such as `"finished"`

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Command that creates (or replaces) the session for an id
pub const NEW_CONNECTION: &str = "new connection";

/// Command that terminates and removes the session for an id
pub const CANCEL: &str = "cancel";

/// Follow-up command emitted when a predefined action completes
pub const FINISHED: &str = "finished";

/// Terminal input or output for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellIo {
    /// Session this frame belongs to
    pub connection_id: SessionId,
    /// Raw terminal text
    pub message: String,
}

impl ShellIo {
    /// Create a new I/O frame
    pub fn new(connection_id: impl Into<SessionId>, message: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            message: message.into(),
        }
    }
}

/// Control instruction addressed to one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Session this command targets
    pub connection_id: SessionId,
    /// Command name
    pub command: String,
}

/// Interpretation of a command name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind<'a> {
    /// Open or replace the session
    NewConnection,
    /// Close and remove the session
    Cancel,
    /// Anything else, routed to the action dispatcher by name
    Action(&'a str),
}

impl Command {
    /// Create a new command frame
    pub fn new(connection_id: impl Into<SessionId>, command: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            command: command.into(),
        }
    }

    /// Classify the command name
    pub fn kind(&self) -> CommandKind<'_> {
        match self.command.as_str() {
            NEW_CONNECTION => CommandKind::NewConnection,
            CANCEL => CommandKind::Cancel,
            other => CommandKind::Action(other),
        }
    }
}

/// Outbound frame written by the agent.
///
/// Serialized untagged, so each variant produces exactly its own shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Terminal output (or a synthetic error line) for a session
    Io(ShellIo),
    /// Follow-up command produced by an action
    Command(Command),
}

impl Message {
    /// Session this message is addressed to
    pub fn connection_id(&self) -> &SessionId {
        match self {
            Message::Io(io) => &io.connection_id,
            Message::Command(command) => &command.connection_id,
        }
    }
}

impl From<ShellIo> for Message {
    fn from(io: ShellIo) -> Self {
        Message::Io(io)
    }
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Message::Command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kind() {
        assert_eq!(
            Command::new("1", "new connection").kind(),
            CommandKind::NewConnection
        );
        assert_eq!(Command::new("1", "cancel").kind(), CommandKind::Cancel);
        assert_eq!(
            Command::new("1", "linpeas").kind(),
            CommandKind::Action("linpeas")
        );
    }

    #[test]
    fn test_outbound_io_shape() {
        let message = Message::from(ShellIo::new("x", "hello"));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"connection_id": "x", "message": "hello"})
        );
    }

    #[test]
    fn test_outbound_command_shape() {
        let message = Message::from(Command::new("x", FINISHED));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"connection_id": "x", "command": "finished"})
        );
        assert_eq!(message.connection_id().as_str(), "x");
    }
}
