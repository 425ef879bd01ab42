//! Script actions configured under `[[actions]]`

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use apollo_core::config::ActionConfig;
use apollo_core::error::ActionError;
use apollo_protocol::message::FINISHED;
use apollo_protocol::Command;

use super::{Action, MarkerWatcher};
use crate::pty::PtySession;

/// Writes a script into the session and reports `"finished"` once the
/// completion marker shows up in the output.
#[derive(Debug, Clone)]
pub struct ScriptAction {
    config: ActionConfig,
}

impl ScriptAction {
    /// Create an action from its configuration
    pub fn new(config: ActionConfig) -> Self {
        Self { config }
    }

    /// Text written into the session.
    ///
    /// The marker is echoed as two adjacent quoted halves so the command
    /// line the terminal echoes back never contains it verbatim.
    pub fn input(&self) -> String {
        let marker = &self.config.completion_marker;
        let mut mid = marker.len() / 2;
        while !marker.is_char_boundary(mid) {
            mid -= 1;
        }
        let (head, tail) = marker.split_at(mid);
        format!(
            "{}; echo {}{}\n",
            self.config.script.trim_end(),
            shell_quote(head),
            shell_quote(tail)
        )
    }
}

impl Action for ScriptAction {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn run(&self, session: Arc<PtySession>) -> Result<mpsc::Receiver<Command>, ActionError> {
        // Subscribe first so no output after the write is missed.
        let mut output = session.subscribe();
        session.execute(&self.input())?;

        let (tx, rx) = mpsc::channel(1);
        let name = self.config.name.clone();
        let mut watcher = MarkerWatcher::new(
            self.config.start_marker.as_deref(),
            &self.config.completion_marker,
        );

        tokio::spawn(async move {
            let id = session.session_id().clone();
            let closed = session.closed();
            tokio::pin!(closed);

            loop {
                tokio::select! {
                    received = output.recv() => match received {
                        Ok(io) => {
                            if watcher.feed(&io.message) {
                                tracing::info!("Action '{}' finished in {}", name, id);
                                let _ = tx.send(Command::new(id, FINISHED)).await;
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Action '{}' skipped {} output frames", name, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = &mut closed => break,
                }
            }

            tracing::info!("Session {} closed before action '{}' finished", id, name);
        });

        Ok(rx)
    }
}

/// Single-quote `text` for a POSIX shell
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(marker: &str) -> ScriptAction {
        ScriptAction::new(ActionConfig {
            name: "audit".to_string(),
            script: "sh audit.sh\n".to_string(),
            start_marker: None,
            completion_marker: marker.to_string(),
        })
    }

    #[test]
    fn test_input_splits_marker() {
        let input = action("audit done").input();
        assert_eq!(input, "sh audit.sh; echo 'audit'' done'\n");
        assert!(!input.contains("audit done"));
    }

    #[test]
    fn test_input_quotes_marker() {
        let input = action("it's done").input();
        assert_eq!(input, "sh audit.sh; echo 'it'\\''s'' done'\n");
    }

    #[test]
    fn test_input_multibyte_marker() {
        let input = action("fertig ✓").input();
        assert!(input.ends_with("'\n"));
        assert!(!input.contains("fertig ✓"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("abc"), "'abc'");
        assert_eq!(shell_quote("a'b"), r"'a'\''b'");
    }
}
