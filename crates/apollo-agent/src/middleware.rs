//! Connection orchestrator
//!
//! One control task ties the credential stream, the protocol client and the
//! session manager together. It owns reconnects after connection loss,
//! forced reconnects on credential rotation, and the shutdown sequence.
//! Every inbound frame is handled on this task in wire order.

use std::future::pending;
use std::pin::Pin;

use tokio::sync::watch;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use apollo_core::error::AuthError;
use apollo_core::traits::{AuthProvider, CredentialStream, RemoteEvent, RemoteTerminal, ShellManager};
use apollo_core::Credential;

use crate::state::ConnectionState;
use crate::tunnel::ExponentialBackoff;

/// Connection orchestrator
pub struct Middleware<A, T, M> {
    auth: A,
    terminal: T,
    manager: M,
    endpoint: String,
    backoff: ExponentialBackoff,
    shutdown: CancellationToken,
    state: watch::Sender<ConnectionState>,
}

impl<A, T, M> Middleware<A, T, M>
where
    A: AuthProvider,
    T: RemoteTerminal,
    M: ShellManager,
{
    /// Create an orchestrator for `endpoint`.
    ///
    /// Cancelling `shutdown` closes the connection gracefully and makes
    /// [`Middleware::start`] return.
    pub fn new(
        auth: A,
        terminal: T,
        manager: M,
        endpoint: impl Into<String>,
        backoff: ExponentialBackoff,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Authenticating);
        Self {
            auth,
            terminal,
            manager,
            endpoint: endpoint.into(),
            backoff,
            shutdown,
            state,
        }
    }

    /// Follow state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Authenticate, then serve until shutdown.
    ///
    /// Fails only if no first credential could be obtained. The session
    /// manager is closed before this returns, on every path.
    pub async fn start(mut self) -> Result<(), AuthError> {
        self.set_state(ConnectionState::Authenticating);
        let mut credentials = self.auth.subscribe();

        let first = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            item = credentials.recv() => Some(item),
        };

        let credential = match first {
            None => {
                tracing::info!("Shutdown requested before authentication");
                self.finish();
                return Ok(());
            }
            Some(Some(Ok(credential))) => credential,
            Some(Some(Err(e))) => {
                self.finish();
                return Err(e);
            }
            Some(None) => {
                self.finish();
                return Err(AuthError::StreamClosed);
            }
        };

        tracing::info!("Authenticated");
        self.serve(credentials, credential).await;
        self.finish();
        Ok(())
    }

    async fn serve(&mut self, mut credentials: CredentialStream, credential: Credential) {
        let outbound = self.manager.outbound();
        let mut current = credential;
        let mut epoch = self.terminal.listen(&self.endpoint, &current, outbound.clone());
        self.set_state(ConnectionState::Connected);

        let mut reconnect: Option<Pin<Box<Sleep>>> = None;
        let mut shutting_down = false;
        let mut credentials_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled(), if !shutting_down => {
                    tracing::info!("Shutting down");
                    shutting_down = true;
                    self.set_state(ConnectionState::ShuttingDown);
                    epoch.interrupt();
                    if reconnect.take().is_some() {
                        break;
                    }
                }

                item = credentials.recv(), if credentials_open && !shutting_down => match item {
                    Some(Ok(credential)) => {
                        tracing::debug!("Credential rotated, reconnecting");
                        epoch.interrupt();
                        current = credential;
                        reconnect = None;
                        self.backoff.reset();
                        epoch = self.terminal.listen(&self.endpoint, &current, outbound.clone());
                        self.set_state(ConnectionState::Connected);
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Credential renewal stopped: {}. Keeping the current credential", e);
                        credentials_open = false;
                    }
                    None => {
                        tracing::debug!("Credential stream ended");
                        credentials_open = false;
                    }
                },

                event = self.terminal.next_event() => match event {
                    Some(RemoteEvent::Io(io)) => {
                        self.backoff.reset();
                        if let Err(e) = self.manager.execute(io) {
                            tracing::debug!("Input dropped: {}", e);
                        }
                    }
                    Some(RemoteEvent::Command(command)) => {
                        self.backoff.reset();
                        self.manager.execute_predefined_command(command);
                    }
                    Some(RemoteEvent::Error { epoch: failed, error }) => {
                        if failed != epoch.id() {
                            tracing::debug!("Ignoring error from replaced epoch {}: {}", failed, error);
                        } else if !shutting_down {
                            let delay = self.backoff.next_delay();
                            tracing::warn!("Connection lost: {}. Reconnecting in {:?}", error, delay);
                            self.set_state(ConnectionState::Reconnecting);
                            reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                        }
                    }
                    None => {
                        tracing::error!("Protocol client stopped");
                        break;
                    }
                },

                _ = wait_for(&mut reconnect), if reconnect.is_some() => {
                    reconnect = None;
                    tracing::info!("Reconnecting to {}", self.endpoint);
                    epoch.interrupt();
                    epoch = self.terminal.listen(&self.endpoint, &current, outbound.clone());
                    self.set_state(ConnectionState::Connected);
                }

                _ = epoch.done(), if shutting_down && reconnect.is_none() => break,
            }
        }
    }

    fn finish(&self) {
        self.manager.close();
        self.set_state(ConnectionState::Shutdown);
        tracing::info!("Stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("State: {} -> {}", current, state);
            *current = state;
            true
        });
    }
}

async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
