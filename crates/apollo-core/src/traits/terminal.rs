//! Remote terminal (protocol client) trait

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use apollo_protocol::{Command, Message, ShellIo};

use crate::credential::Credential;
use crate::error::ConnectionError;

/// Outbound frames, shared across epochs.
///
/// Only one epoch's write loop holds the lock at a time.
pub type Outbound = Arc<Mutex<mpsc::Receiver<Message>>>;

/// Something that happened on the remote connection
#[derive(Debug)]
pub enum RemoteEvent {
    /// Terminal input for a session
    Io(ShellIo),
    /// Control command for a session
    Command(Command),
    /// The epoch failed. Reported at most once per epoch, and never for an
    /// epoch that was interrupted.
    Error {
        /// Epoch that failed
        epoch: u64,
        /// What went wrong
        error: ConnectionError,
    },
}

/// Handle to one `listen` call.
///
/// `interrupt` asks the epoch to close gracefully; `done` fires exactly once
/// when the epoch has fully stopped, whether it was interrupted, failed to
/// dial, or lost its connection.
#[derive(Debug, Clone)]
pub struct Epoch {
    id: u64,
    interrupt: CancellationToken,
    done: CancellationToken,
}

impl Epoch {
    /// Create a fresh epoch handle
    pub fn new(id: u64) -> Self {
        Self {
            id,
            interrupt: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    /// Epoch number, increasing per `listen` call
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request a graceful close
    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    /// Whether a close was requested
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Resolves once a close was requested
    pub fn interrupted(&self) -> WaitForCancellationFutureOwned {
        self.interrupt.clone().cancelled_owned()
    }

    /// Mark the epoch as stopped
    pub fn complete(&self) {
        self.done.cancel();
    }

    /// Whether the epoch has stopped
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the epoch has stopped
    pub fn done(&self) -> WaitForCancellationFutureOwned {
        self.done.clone().cancelled_owned()
    }
}

/// Owns at most one connection to the control plane at a time
#[async_trait]
pub trait RemoteTerminal: Send {
    /// Start a new epoch: dial `endpoint` presenting `credential`, then
    /// route inbound frames to [`RemoteTerminal::next_event`] and drain
    /// `outbound` onto the wire until interrupted or disconnected.
    ///
    /// Returns immediately; dialing happens in the background.
    fn listen(&mut self, endpoint: &str, credential: &Credential, outbound: Outbound) -> Epoch;

    /// Next event from any epoch, in wire order.
    ///
    /// The stream lives as long as the terminal, not just one epoch.
    async fn next_event(&mut self) -> Option<RemoteEvent>;
}
