//! Websocket protocol client
//!
//! Owns at most one connection to the control plane per epoch. Inbound
//! frames are decoded once and delivered, in wire order, on a single event
//! stream that outlives every epoch. Outbound frames are drained from the
//! session manager's aggregate output.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use apollo_core::config::AgentConfig;
use apollo_core::error::ConnectionError;
use apollo_core::traits::{Epoch, Outbound, RemoteEvent, RemoteTerminal};
use apollo_core::Credential;
use apollo_protocol::{decode, encode, Frame};

/// Buffer between the socket reader and the orchestrator.
///
/// When full, the reader stops pulling from the socket.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// `User-Agent` sent on every dial
pub fn user_agent() -> String {
    format!(
        "Apollo Agent/{} - {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Timeouts and identity used for every epoch
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Dial timeout
    pub connect_timeout: Duration,
    /// How long to wait for the peer's close frame
    pub close_timeout: Duration,
    /// `User-Agent` header value
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(1),
            user_agent: user_agent(),
        }
    }
}

impl From<&AgentConfig> for ClientSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            close_timeout: config.close_timeout,
            user_agent: user_agent(),
        }
    }
}

/// Websocket implementation of [`RemoteTerminal`]
pub struct ProtocolClient {
    settings: ClientSettings,
    events_tx: mpsc::Sender<RemoteEvent>,
    events_rx: mpsc::Receiver<RemoteEvent>,
    last_epoch: u64,
}

impl ProtocolClient {
    /// Create a client; nothing is dialed until [`RemoteTerminal::listen`]
    pub fn new(settings: ClientSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            events_tx,
            events_rx,
            last_epoch: 0,
        }
    }
}

#[async_trait]
impl RemoteTerminal for ProtocolClient {
    fn listen(&mut self, endpoint: &str, credential: &Credential, outbound: Outbound) -> Epoch {
        self.last_epoch += 1;
        let epoch = Epoch::new(self.last_epoch);

        let request = build_request(endpoint, credential, &self.settings.user_agent);
        let connection = EpochConnection {
            epoch: epoch.clone(),
            endpoint: endpoint.to_string(),
            settings: self.settings.clone(),
            events: self.events_tx.clone(),
            outbound,
        };
        tokio::spawn(connection.run(request));

        epoch
    }

    async fn next_event(&mut self) -> Option<RemoteEvent> {
        self.events_rx.recv().await
    }
}

/// Build the upgrade request with the authorization and user agent headers
pub fn build_request(
    endpoint: &str,
    credential: &Credential,
    user_agent: &str,
) -> Result<Request, ConnectionError> {
    let dial_error = |reason: String| ConnectionError::Dial {
        endpoint: endpoint.to_string(),
        reason,
    };

    let mut request = endpoint
        .into_client_request()
        .map_err(|e| dial_error(e.to_string()))?;

    let authorization = HeaderValue::from_str(&credential.authorization_header())
        .map_err(|e| dial_error(format!("invalid credential: {}", e)))?;
    let agent = HeaderValue::from_str(user_agent)
        .map_err(|e| dial_error(format!("invalid user agent: {}", e)))?;

    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION, authorization);
    headers.insert(USER_AGENT, agent);

    Ok(request)
}

/// How the write loop ended
enum WriteOutcome {
    Interrupted,
    ReadFinished(Result<(), ConnectionError>),
    Failed(ConnectionError),
}

/// Everything one epoch's background task needs
struct EpochConnection {
    epoch: Epoch,
    endpoint: String,
    settings: ClientSettings,
    events: mpsc::Sender<RemoteEvent>,
    outbound: Outbound,
}

impl EpochConnection {
    /// Run the epoch to completion, report its error if it was not
    /// interrupted, then fire `done`.
    async fn run(self, request: Result<Request, ConnectionError>) {
        let epoch = self.epoch.clone();
        let events = self.events.clone();

        let result = match request {
            Ok(request) => self.connect_and_serve(request).await,
            Err(e) => Err(e),
        };

        if let Err(error) = result {
            if !epoch.is_interrupted() {
                tracing::warn!(epoch = epoch.id(), "Connection error: {}", error);
                let _ = events
                    .send(RemoteEvent::Error {
                        epoch: epoch.id(),
                        error,
                    })
                    .await;
            }
        }

        tracing::debug!(epoch = epoch.id(), "Epoch finished");
        epoch.complete();
    }

    async fn connect_and_serve(self, request: Request) -> Result<(), ConnectionError> {
        tracing::debug!(epoch = self.epoch.id(), "Connecting to {}", self.endpoint);

        let dial = tokio::time::timeout(self.settings.connect_timeout, connect_async(request));
        let stream = tokio::select! {
            _ = self.epoch.interrupted() => return Ok(()),
            result = dial => match result {
                Err(_) => return Err(ConnectionError::Timeout(self.endpoint.clone())),
                Ok(Err(e)) => {
                    return Err(ConnectionError::Dial {
                        endpoint: self.endpoint.clone(),
                        reason: e.to_string(),
                    })
                }
                Ok(Ok((stream, _response))) => stream,
            },
        };

        tracing::info!(epoch = self.epoch.id(), "Connected to {}", self.endpoint);

        let (mut sink, source) = stream.split();
        let mut reader = tokio::spawn(read_loop(source, self.events.clone(), self.epoch.clone()));

        match self.write_loop(&mut sink, &mut reader).await {
            WriteOutcome::Interrupted => {
                self.close_handshake(&mut sink, reader).await;
                Ok(())
            }
            WriteOutcome::ReadFinished(result) => result,
            WriteOutcome::Failed(error) => {
                reader.abort();
                Err(error)
            }
        }
    }

    /// Drain outbound frames onto the socket until interrupted, the read
    /// loop ends, or a write fails.
    async fn write_loop(
        &self,
        sink: &mut WsSink,
        reader: &mut JoinHandle<Result<(), ConnectionError>>,
    ) -> WriteOutcome {
        let mut outbound = tokio::select! {
            biased;
            _ = self.epoch.interrupted() => return WriteOutcome::Interrupted,
            finished = &mut *reader => return WriteOutcome::ReadFinished(flatten(finished)),
            guard = self.outbound.lock() => guard,
        };

        loop {
            tokio::select! {
                biased;
                _ = self.epoch.interrupted() => return WriteOutcome::Interrupted,
                finished = &mut *reader => return WriteOutcome::ReadFinished(flatten(finished)),
                message = outbound.recv() => {
                    let Some(message) = message else {
                        // Session manager is gone; keep the socket until told otherwise.
                        return tokio::select! {
                            _ = self.epoch.interrupted() => WriteOutcome::Interrupted,
                            finished = &mut *reader => WriteOutcome::ReadFinished(flatten(finished)),
                        };
                    };

                    let text = match encode(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("Dropping unencodable frame: {}", e);
                            continue;
                        }
                    };

                    // A peer that stops reading can block the send indefinitely.
                    let sent = tokio::select! {
                        biased;
                        _ = self.epoch.interrupted() => return WriteOutcome::Interrupted,
                        sent = sink.send(WsMessage::Text(text)) => sent,
                    };
                    if let Err(e) = sent {
                        return WriteOutcome::Failed(ConnectionError::Write(e.to_string()));
                    }
                }
            }
        }
    }

    /// Send a normal close and give the peer `close_timeout` to answer
    async fn close_handshake(
        &self,
        sink: &mut WsSink,
        mut reader: JoinHandle<Result<(), ConnectionError>>,
    ) {
        tracing::debug!(epoch = self.epoch.id(), "Closing connection");

        let close = WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        match tokio::time::timeout(self.settings.close_timeout, sink.send(close)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to send close frame: {}", e),
            Err(_) => tracing::warn!("Timed out sending close frame"),
        }

        if tokio::time::timeout(self.settings.close_timeout, &mut reader)
            .await
            .is_err()
        {
            tracing::debug!(epoch = self.epoch.id(), "Peer did not answer close in time");
            reader.abort();
        }
    }
}

fn flatten(
    finished: Result<Result<(), ConnectionError>, tokio::task::JoinError>,
) -> Result<(), ConnectionError> {
    finished.unwrap_or_else(|e| Err(ConnectionError::Read(e.to_string())))
}

/// Read frames until the socket closes.
///
/// A close or error after an interrupt is the expected end of the close
/// handshake and is not an error.
async fn read_loop(
    mut source: WsSource,
    events: mpsc::Sender<RemoteEvent>,
    epoch: Epoch,
) -> Result<(), ConnectionError> {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!("Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(WsMessage::Close(frame)) => {
                tracing::debug!(epoch = epoch.id(), "Received close frame: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                if epoch.is_interrupted() {
                    return Ok(());
                }
                return Err(ConnectionError::Read(e.to_string()));
            }
        };

        let event = match decode(&text) {
            Ok(Frame::Io(io)) => RemoteEvent::Io(io),
            Ok(Frame::Command(command)) => RemoteEvent::Command(command),
            Ok(Frame::Unrecognized) => {
                tracing::debug!("Dropping frame with neither message nor command");
                continue;
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
                continue;
            }
        };

        if events.send(event).await.is_err() {
            return Ok(());
        }
    }

    if epoch.is_interrupted() {
        Ok(())
    } else {
        Err(ConnectionError::ClosedByRemote)
    }
}
