//! A single shell process attached to a pseudo-terminal

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use apollo_core::config::TerminalSize;
use apollo_core::error::SessionError;
use apollo_protocol::{SessionId, ShellIo};

use super::shell::{check_shell_path, ShellSettings};

/// Output frames buffered per subscriber before the slowest one lags
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

const READ_BUFFER_SIZE: usize = 4096;

/// One shell process and its terminal.
///
/// Input is queued to a dedicated writer thread, which also owns the child
/// and the PTY master and terminates the shell once input is closed. Output
/// is published on a broadcast channel so any number of consumers (the
/// session manager, an action watching for a marker) can follow it.
/// Producers never block on slow or absent subscribers.
pub struct PtySession {
    id: SessionId,
    pid: Option<u32>,
    output: broadcast::Sender<ShellIo>,
    input: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    closed: CancellationToken,
}

impl PtySession {
    /// Start `settings.shell` on a new pseudo-terminal.
    ///
    /// Also returns a receiver subscribed before the shell produced any
    /// output, so the prompt is not lost.
    pub fn spawn(
        id: SessionId,
        settings: &ShellSettings,
    ) -> Result<(Arc<Self>, broadcast::Receiver<ShellIo>), SessionError> {
        check_shell_path(&settings.shell)?;

        let spawn_error = |reason: String| SessionError::Spawn {
            shell: settings.shell.clone(),
            reason,
        };

        let pair = native_pty_system()
            .openpty(pty_size(settings.size))
            .map_err(|e| spawn_error(format!("failed to open PTY: {}", e)))?;

        let mut command = CommandBuilder::new(&settings.shell);
        for (key, value) in settings.environment() {
            command.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| spawn_error(e.to_string()))?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_error(format!("failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_error(format!("failed to take PTY writer: {}", e)))?;

        let (output, first_rx) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let session = Arc::new(Self {
            id: id.clone(),
            pid,
            output: output.clone(),
            input: Mutex::new(Some(input_tx)),
            closed: closed.clone(),
        });

        spawn_reader(id.clone(), reader, output, closed.clone())?;
        spawn_writer(
            id.clone(),
            Terminal {
                writer,
                child,
                _master: pair.master,
            },
            input_rx,
            closed,
        )?;

        tracing::info!("Started session {} ({}, pid {:?})", id, settings.shell, pid);
        Ok((session, first_rx))
    }

    /// Session id
    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    /// Process id of the shell, if the platform reports one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Follow the session's output from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ShellIo> {
        self.output.subscribe()
    }

    /// Queue `input` for the shell's stdin.
    ///
    /// Empty input is ignored. Fails once the session is closed or the
    /// shell has exited.
    pub fn execute(&self, input: &str) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.id.clone()));
        }
        if input.is_empty() {
            return Ok(());
        }

        let guard = self.input.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) if tx.send(input.as_bytes().to_vec()).is_ok() => Ok(()),
            _ => Err(SessionError::Closed(self.id.clone())),
        }
    }

    /// Whether the session was closed or its shell exited
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is closed or its shell exited
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.closed.clone().cancelled_owned()
    }

    /// Terminate the shell. Safe to call more than once.
    ///
    /// Returns immediately; the writer thread kills and reaps the process.
    pub fn close(&self) {
        self.closed.cancel();
        if self
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
        {
            tracing::debug!("Closing session {}", self.id);
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Read PTY output on a dedicated thread and publish it as frames.
///
/// A read can block indefinitely, so this runs outside the async runtime.
fn spawn_reader(
    id: SessionId,
    mut reader: Box<dyn Read + Send>,
    output: broadcast::Sender<ShellIo>,
    closed: CancellationToken,
) -> Result<(), SessionError> {
    std::thread::Builder::new()
        .name("apollo-pty-read".to_string())
        .spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            let mut pending: Vec<u8> = Vec::new();

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("PTY reader EOF for session {}", id);
                        break;
                    }
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        let text = take_utf8(&mut pending);
                        if !text.is_empty() {
                            // No subscribers is fine; output is dropped.
                            let _ = output.send(ShellIo::new(id.clone(), text));
                        }
                    }
                    Err(e) => {
                        if closed.is_cancelled() {
                            tracing::debug!("PTY reader stopped for session {}", id);
                        } else {
                            tracing::debug!("PTY reader closed for session {}: {}", id, e);
                        }
                        break;
                    }
                }
            }

            if !pending.is_empty() {
                let _ = output.send(ShellIo::new(
                    id.clone(),
                    String::from_utf8_lossy(&pending).into_owned(),
                ));
            }
            closed.cancel();
        })
        .map(|_| ())
        .map_err(SessionError::Io)
}

/// Process side of a session, owned by the writer thread
struct Terminal {
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    /// Keeps the PTY open until the shell is gone
    _master: Box<dyn MasterPty + Send>,
}

impl Terminal {
    /// Kill the shell and reap it. `kill` can block briefly.
    fn terminate(mut self, id: &SessionId) {
        if let Err(e) = self.child.kill() {
            tracing::debug!("Kill for session {} failed: {}", id, e);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!("Session {} exited with code {}", id, status.exit_code())
            }
            Ok(None) => tracing::info!("Session {} closed", id),
            Err(e) => tracing::warn!("Failed to reap session {}: {}", id, e),
        }
    }
}

/// Write queued input to the PTY on a dedicated thread, then terminate the
/// shell once the input channel closes.
fn spawn_writer(
    id: SessionId,
    mut terminal: Terminal,
    mut input: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: CancellationToken,
) -> Result<(), SessionError> {
    std::thread::Builder::new()
        .name("apollo-pty-write".to_string())
        .spawn(move || {
            while let Some(data) = input.blocking_recv() {
                let written = terminal
                    .writer
                    .write_all(&data)
                    .and_then(|_| terminal.writer.flush());
                if let Err(e) = written {
                    if !closed.is_cancelled() {
                        tracing::warn!("PTY write failed for session {}: {}", id, e);
                    }
                    closed.cancel();
                    break;
                }
            }
            terminal.terminate(&id);
        })
        .map(|_| ())
        .map_err(SessionError::Io)
}

/// Decode `pending` as UTF-8, leaving an incomplete multi-byte sequence at
/// the end for the next read. Invalid bytes are replaced with U+FFFD.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::with_capacity(pending.len());
    let mut rest: &[u8] = &pending[..];

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(invalid) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[invalid..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }

    let consumed = pending.len() - rest.len();
    pending.drain(..consumed);
    text
}
