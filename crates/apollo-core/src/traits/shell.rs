//! Session manager trait

use apollo_protocol::{Command, ShellIo};

use crate::error::SessionError;
use crate::traits::Outbound;

/// Routes remote input and control commands to local shell sessions
pub trait ShellManager: Send + Sync {
    /// Aggregate output of every session, drained by the protocol client
    fn outbound(&self) -> Outbound;

    /// Write `io.message` into the session for `io.connection_id`,
    /// creating the session first if it does not exist.
    ///
    /// Only session creation failures are returned; write failures show up
    /// on the aggregate output.
    fn execute(&self, io: ShellIo) -> Result<(), SessionError>;

    /// Handle a control command. Failures are reported on the aggregate
    /// output, never returned.
    fn execute_predefined_command(&self, command: Command);

    /// Close every session
    fn close(&self);
}

impl<T: ShellManager + ?Sized> ShellManager for std::sync::Arc<T> {
    fn outbound(&self) -> Outbound {
        (**self).outbound()
    }

    fn execute(&self, io: ShellIo) -> Result<(), SessionError> {
        (**self).execute(io)
    }

    fn execute_predefined_command(&self, command: Command) {
        (**self).execute_predefined_command(command)
    }

    fn close(&self) {
        (**self).close()
    }
}
