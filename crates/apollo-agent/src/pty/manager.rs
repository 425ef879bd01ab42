//! PTY session management
//!
//! Keeps one [`PtySession`] per session id and fans every session's output
//! into a single aggregate stream for the protocol client. Failures are
//! reported to the operator as output frames on that stream.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::WaitForCancellationFutureOwned;

use apollo_core::error::SessionError;
use apollo_core::traits::{Outbound, ShellManager};
use apollo_protocol::{Command, CommandKind, Message, SessionId, ShellIo};

use super::shell::{verify_shell, ShellSettings};
use super::PtySession;
use crate::action::ActionRegistry;

/// Aggregate output buffered before session forwarders wait.
///
/// Sized for a burst of output across several sessions while the socket
/// is briefly slow.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Manages the PTY sessions on this machine
pub struct SessionManager {
    settings: ShellSettings,
    sessions: DashMap<SessionId, Arc<PtySession>>,
    forwarders: DashMap<SessionId, JoinHandle<()>>,
    action_tasks: Mutex<Vec<JoinHandle<()>>>,
    actions: ActionRegistry,
    out_tx: mpsc::Sender<Message>,
    out_rx: Outbound,
}

impl SessionManager {
    /// Create a manager without checking the shell
    pub fn new(settings: ShellSettings, actions: ActionRegistry) -> Self {
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        Self {
            settings,
            sessions: DashMap::new(),
            forwarders: DashMap::new(),
            action_tasks: Mutex::new(Vec::new()),
            actions,
            out_tx,
            out_rx: Arc::new(tokio::sync::Mutex::new(out_rx)),
        }
    }

    /// Create a manager after making sure the shell can be started
    pub fn create(settings: ShellSettings, actions: ActionRegistry) -> Result<Self, SessionError> {
        verify_shell(&settings)?;
        Ok(Self::new(settings, actions))
    }

    /// Start a session for `id`, closing any session it replaces.
    ///
    /// On failure the error text is also sent to the operator as an output
    /// frame for `id`.
    pub fn create_new_session(&self, id: SessionId) -> Result<Arc<PtySession>, SessionError> {
        self.remove_session(&id);

        let (session, output) = match PtySession::spawn(id.clone(), &self.settings) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::warn!("Failed to create {}: {}", id, e);
                self.emit(ShellIo::new(id, e.to_string()));
                return Err(e);
            }
        };

        let forwarder = tokio::spawn(forward_output(
            output,
            session.closed(),
            self.out_tx.clone(),
        ));
        self.forwarders.insert(id.clone(), forwarder);
        self.sessions.insert(id, Arc::clone(&session));

        Ok(session)
    }

    /// Look up the session for `id`
    pub fn get_session(&self, id: &SessionId) -> Option<Arc<PtySession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close and forget the session for `id`. Returns whether one existed.
    fn remove_session(&self, id: &SessionId) -> bool {
        if let Some((_, forwarder)) = self.forwarders.remove(id) {
            forwarder.abort();
        }
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Queue a frame on the aggregate output without blocking the caller
    fn emit(&self, message: impl Into<Message>) {
        match self.out_tx.try_send(message.into()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                let out_tx = self.out_tx.clone();
                tokio::spawn(async move {
                    let _ = out_tx.send(message).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Aggregate output closed, dropping frame");
            }
        }
    }

    fn run_action(&self, name: &str, id: SessionId) {
        let follow_ups = match self.actions.dispatch(name, &id, self.get_session(&id)) {
            Ok(follow_ups) => follow_ups,
            Err(e) => {
                tracing::warn!("Command '{}' for {} failed: {}", name, id, e);
                self.emit(ShellIo::new(id, e.to_string()));
                return;
            }
        };

        let task = tokio::spawn(forward_commands(follow_ups, self.out_tx.clone()));
        let mut tasks = self.action_tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}

impl ShellManager for SessionManager {
    fn outbound(&self) -> Outbound {
        Arc::clone(&self.out_rx)
    }

    fn execute(&self, io: ShellIo) -> Result<(), SessionError> {
        let session = match self.get_session(&io.connection_id) {
            Some(session) => session,
            None => self.create_new_session(io.connection_id.clone())?,
        };

        if let Err(e) = session.execute(&io.message) {
            self.emit(ShellIo::new(io.connection_id, e.to_string()));
        }
        Ok(())
    }

    fn execute_predefined_command(&self, command: Command) {
        let id = command.connection_id.clone();
        match command.kind() {
            CommandKind::NewConnection => {
                // Failure was already reported on the aggregate output.
                let _ = self.create_new_session(id);
            }
            CommandKind::Cancel => {
                if self.remove_session(&id) {
                    tracing::info!("Cancelled {}", id);
                }
            }
            CommandKind::Action(name) => self.run_action(name, id),
        }
    }

    fn close(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.remove_session(id);
        }

        let tasks = std::mem::take(&mut *self.action_tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }

        tracing::info!("Closed {} session(s)", ids.len());
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("shell", &self.settings.shell)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// Copy one session's output onto the aggregate stream.
///
/// Stops when the session closes, after passing on whatever the session
/// produced before it closed.
async fn forward_output(
    mut output: broadcast::Receiver<ShellIo>,
    closed: WaitForCancellationFutureOwned,
    out_tx: mpsc::Sender<Message>,
) {
    tokio::pin!(closed);

    loop {
        tokio::select! {
            biased;
            received = output.recv() => match received {
                Ok(io) => {
                    if out_tx.send(io.into()).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} output frames for a slow connection", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut closed => break,
        }
    }

    while let Ok(io) = output.try_recv() {
        if out_tx.send(io.into()).await.is_err() {
            return;
        }
    }
}

/// Copy an action's follow-up commands onto the aggregate stream
async fn forward_commands(mut follow_ups: mpsc::Receiver<Command>, out_tx: mpsc::Sender<Message>) {
    while let Some(command) = follow_ups.recv().await {
        if out_tx.send(command.into()).await.is_err() {
            return;
        }
    }
}
