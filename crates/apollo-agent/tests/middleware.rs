//! Orchestrator tests with fake collaborators

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use apollo_agent::tunnel::ExponentialBackoff;
use apollo_agent::{ConnectionState, Middleware};
use apollo_core::config::BackoffConfig;
use apollo_core::error::{AuthError, ConnectionError, SessionError};
use apollo_core::traits::{
    AuthProvider, CredentialStream, Epoch, Outbound, RemoteEvent, RemoteTerminal, ShellManager,
};
use apollo_core::Credential;
use apollo_protocol::{Command, Message, ShellIo};

const ENDPOINT: &str = "ws://control.test/ws";

struct FakeAuth {
    stream: Mutex<Option<CredentialStream>>,
}

impl AuthProvider for FakeAuth {
    fn subscribe(&self) -> CredentialStream {
        self.stream
            .lock()
            .unwrap()
            .take()
            .expect("subscribed twice")
    }
}

#[derive(Default)]
struct TerminalLog {
    listens: Vec<(String, String)>,
    epochs: Vec<Epoch>,
}

struct FakeTerminal {
    log: Arc<Mutex<TerminalLog>>,
    events: mpsc::Receiver<RemoteEvent>,
    complete_on_interrupt: bool,
}

#[async_trait]
impl RemoteTerminal for FakeTerminal {
    fn listen(&mut self, endpoint: &str, credential: &Credential, _outbound: Outbound) -> Epoch {
        let mut log = self.log.lock().unwrap();
        let epoch = Epoch::new(log.epochs.len() as u64 + 1);
        log.listens
            .push((endpoint.to_string(), credential.token.clone()));
        log.epochs.push(epoch.clone());

        if self.complete_on_interrupt {
            let closing = epoch.clone();
            tokio::spawn(async move {
                closing.interrupted().await;
                closing.complete();
            });
        }
        epoch
    }

    async fn next_event(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }
}

#[derive(Default)]
struct ManagerLog {
    handled: Vec<String>,
    closes: usize,
}

struct FakeManager {
    log: Arc<Mutex<ManagerLog>>,
    outbound: Outbound,
    _out_tx: mpsc::Sender<Message>,
}

impl ShellManager for FakeManager {
    fn outbound(&self) -> Outbound {
        Arc::clone(&self.outbound)
    }

    fn execute(&self, io: ShellIo) -> Result<(), SessionError> {
        self.log
            .lock()
            .unwrap()
            .handled
            .push(format!("io:{}:{}", io.connection_id.as_str(), io.message));
        Ok(())
    }

    fn execute_predefined_command(&self, command: Command) {
        self.log.lock().unwrap().handled.push(format!(
            "cmd:{}:{}",
            command.connection_id.as_str(),
            command.command
        ));
    }

    fn close(&self) {
        self.log.lock().unwrap().closes += 1;
    }
}

struct Harness {
    credentials: mpsc::Sender<Result<Credential, AuthError>>,
    events: mpsc::Sender<RemoteEvent>,
    terminal: Arc<Mutex<TerminalLog>>,
    manager: Arc<Mutex<ManagerLog>>,
    shutdown: CancellationToken,
    state: tokio::sync::watch::Receiver<ConnectionState>,
    handle: JoinHandle<Result<(), AuthError>>,
}

fn start(complete_on_interrupt: bool) -> Harness {
    let (credentials, credential_rx) = mpsc::channel(8);
    let (events, events_rx) = mpsc::channel(64);
    let (out_tx, out_rx) = mpsc::channel(8);
    let terminal = Arc::new(Mutex::new(TerminalLog::default()));
    let manager = Arc::new(Mutex::new(ManagerLog::default()));
    let shutdown = CancellationToken::new();

    let middleware = Middleware::new(
        FakeAuth {
            stream: Mutex::new(Some(credential_rx)),
        },
        FakeTerminal {
            log: Arc::clone(&terminal),
            events: events_rx,
            complete_on_interrupt,
        },
        FakeManager {
            log: Arc::clone(&manager),
            outbound: Arc::new(tokio::sync::Mutex::new(out_rx)),
            _out_tx: out_tx,
        },
        ENDPOINT,
        ExponentialBackoff::from_config(&BackoffConfig::default()),
        shutdown.clone(),
    );
    let state = middleware.subscribe_state();
    let handle = tokio::spawn(middleware.start());

    Harness {
        credentials,
        events,
        terminal,
        manager,
        shutdown,
        state,
        handle,
    }
}

fn token(value: &str) -> Credential {
    Credential::new(value, "Bearer", 3600)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not met");
}

async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

impl Harness {
    async fn join(&mut self) -> Result<(), AuthError> {
        (&mut self.handle).await.unwrap()
    }

    fn listens(&self) -> Vec<(String, String)> {
        self.terminal.lock().unwrap().listens.clone()
    }

    fn epoch(&self, index: usize) -> Epoch {
        self.terminal.lock().unwrap().epochs[index].clone()
    }

    fn closes(&self) -> usize {
        self.manager.lock().unwrap().closes
    }

    async fn wait_for_listens(&self, count: usize) {
        let terminal = Arc::clone(&self.terminal);
        wait_until(move || terminal.lock().unwrap().listens.len() >= count).await;
    }

    async fn wait_for_state(&self, state: ConnectionState) {
        let rx = self.state.clone();
        wait_until(move || *rx.borrow() == state).await;
    }
}

#[tokio::test]
async fn test_auth_failure_is_fatal_and_closes_manager() {
    let mut h = start(true);
    h.credentials
        .send(Err(AuthError::Rejected {
            status: 401,
            body: "bad secret".to_string(),
        }))
        .await
        .unwrap();

    let result = h.join().await;
    assert!(matches!(result, Err(AuthError::Rejected { status: 401, .. })));
    assert_eq!(h.terminal.lock().unwrap().listens.len(), 0);
    assert_eq!(h.manager.lock().unwrap().closes, 1);
    assert_eq!(*h.state.borrow(), ConnectionState::Shutdown);
}

#[tokio::test]
async fn test_credential_stream_closed_before_first_credential() {
    let Harness {
        credentials,
        handle,
        manager,
        ..
    } = start(true);
    drop(credentials);

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(AuthError::StreamClosed)));
    assert_eq!(manager.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn test_shutdown_before_authentication() {
    let mut h = start(true);
    h.shutdown.cancel();

    assert!(h.join().await.is_ok());
    assert_eq!(h.terminal.lock().unwrap().listens.len(), 0);
    assert_eq!(h.manager.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn test_rotation_interrupts_previous_epoch_then_listens() {
    let mut h = start(true);
    h.credentials.send(Ok(token("t1"))).await.unwrap();
    h.wait_for_listens(1).await;
    assert_eq!(h.listens(), vec![(ENDPOINT.to_string(), "t1".to_string())]);

    h.credentials.send(Ok(token("t2"))).await.unwrap();
    h.wait_for_listens(2).await;

    let first = h.epoch(0);
    let second = h.epoch(1);
    assert!(first.is_interrupted());
    assert!(!second.is_interrupted());
    assert_eq!(h.listens()[1].1, "t2");

    h.shutdown.cancel();
    assert!(h.join().await.is_ok());
    assert!(second.is_interrupted());
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn test_events_handled_in_wire_order() {
    let mut h = start(true);
    h.credentials.send(Ok(token("t1"))).await.unwrap();
    h.wait_for_listens(1).await;

    let events = vec![
        RemoteEvent::Command(Command::new("x", "new connection")),
        RemoteEvent::Io(ShellIo::new("x", "echo 1\n")),
        RemoteEvent::Io(ShellIo::new("y", "ls\n")),
        RemoteEvent::Command(Command::new("x", "cancel")),
    ];
    for event in events {
        h.events.send(event).await.unwrap();
    }

    let manager = Arc::clone(&h.manager);
    wait_until(move || manager.lock().unwrap().handled.len() == 4).await;
    assert_eq!(
        h.manager.lock().unwrap().handled,
        vec![
            "cmd:x:new connection",
            "io:x:echo 1\n",
            "io:y:ls\n",
            "cmd:x:cancel",
        ]
    );

    h.shutdown.cancel();
    assert!(h.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_interval_with_same_credential() {
    let mut h = start(true);
    h.credentials.send(Ok(token("t1"))).await.unwrap();
    h.wait_for_listens(1).await;

    h.events
        .send(RemoteEvent::Error {
            epoch: 1,
            error: ConnectionError::Read("connection reset".to_string()),
        })
        .await
        .unwrap();
    h.wait_for_state(ConnectionState::Reconnecting).await;

    tokio::time::advance(Duration::from_millis(4900)).await;
    settle().await;
    assert_eq!(h.listens().len(), 1);

    tokio::time::advance(Duration::from_millis(200)).await;
    h.wait_for_listens(2).await;
    settle().await;
    assert_eq!(h.listens().len(), 2);
    assert_eq!(h.listens()[1], (ENDPOINT.to_string(), "t1".to_string()));
    h.wait_for_state(ConnectionState::Connected).await;

    // A late error from the replaced epoch does not schedule another reconnect.
    h.events
        .send(RemoteEvent::Error {
            epoch: 1,
            error: ConnectionError::ClosedByRemote,
        })
        .await
        .unwrap();
    settle().await;
    assert_eq!(*h.state.borrow(), ConnectionState::Connected);

    h.shutdown.cancel();
    assert!(h.join().await.is_ok());
    assert_eq!(h.listens().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_backoff_does_not_wait_out_the_delay() {
    let mut h = start(true);
    h.credentials.send(Ok(token("t1"))).await.unwrap();
    h.wait_for_listens(1).await;

    h.events
        .send(RemoteEvent::Error {
            epoch: 1,
            error: ConnectionError::Dial {
                endpoint: ENDPOINT.to_string(),
                reason: "refused".to_string(),
            },
        })
        .await
        .unwrap();
    h.wait_for_state(ConnectionState::Reconnecting).await;

    let started = tokio::time::Instant::now();
    h.shutdown.cancel();
    assert!(h.join().await.is_ok());

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.listens().len(), 1);
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_epoch_done() {
    let mut h = start(false);
    h.credentials.send(Ok(token("t1"))).await.unwrap();
    h.wait_for_listens(1).await;

    h.shutdown.cancel();
    h.wait_for_state(ConnectionState::ShuttingDown).await;
    settle().await;

    let epoch = h.epoch(0);
    assert!(epoch.is_interrupted());
    assert!(!h.handle.is_finished());
    assert_eq!(h.closes(), 0);

    epoch.complete();
    assert!(h.join().await.is_ok());
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn test_renewal_failure_keeps_running() {
    let mut h = start(true);
    h.credentials.send(Ok(token("t1"))).await.unwrap();
    h.wait_for_listens(1).await;

    h.credentials
        .send(Err(AuthError::Transport("timeout".to_string())))
        .await
        .unwrap();
    settle().await;

    assert_eq!(*h.state.borrow(), ConnectionState::Connected);
    assert!(!h.handle.is_finished());

    h.shutdown.cancel();
    assert!(h.join().await.is_ok());
}
