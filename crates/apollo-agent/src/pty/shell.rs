//! Shell selection and verification

use std::path::Path;

use apollo_core::config::{AgentConfig, TerminalSize};
use apollo_core::error::SessionError;
use apollo_protocol::SessionId;

use super::PtySession;

/// What every new session is started with
#[derive(Debug, Clone)]
pub struct ShellSettings {
    /// Absolute path of the shell binary
    pub shell: String,
    /// Extra environment, applied after `TERM`
    pub env: Vec<(String, String)>,
    /// Initial terminal size
    pub size: TerminalSize,
}

impl ShellSettings {
    /// Settings for `shell` with default environment and size
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            env: vec![],
            size: TerminalSize::default(),
        }
    }

    /// Full session environment: `TERM` first, then the configured pairs
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut env = vec![("TERM".to_string(), "xterm-256color".to_string())];
        env.extend(self.env.iter().cloned());
        env
    }
}

impl From<&AgentConfig> for ShellSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            env: config.env.clone(),
            size: config.terminal,
        }
    }
}

/// Check that `shell` names an executable file.
///
/// Cheap filesystem checks only; see [`verify_shell`] for a trial spawn.
pub fn check_shell_path(shell: &str) -> Result<(), SessionError> {
    let invalid = |reason: &str| SessionError::InvalidShell {
        shell: shell.to_string(),
        reason: reason.to_string(),
    };

    if shell.trim().is_empty() {
        return Err(invalid("no shell configured"));
    }

    let path = Path::new(shell);
    let metadata = std::fs::metadata(path).map_err(|e| invalid(&e.to_string()))?;
    if !metadata.is_file() {
        return Err(invalid("not a file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(invalid("not executable"));
        }
    }

    Ok(())
}

/// Make sure sessions can actually be started with these settings.
///
/// Runs the path checks, then spawns and immediately closes one session.
pub fn verify_shell(settings: &ShellSettings) -> Result<(), SessionError> {
    check_shell_path(&settings.shell)?;

    let (session, _output) = PtySession::spawn(SessionId::new("shell-check"), settings)?;
    session.close();

    tracing::debug!("Verified shell {}", settings.shell);
    Ok(())
}
