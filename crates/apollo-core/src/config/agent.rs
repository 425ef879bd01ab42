//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::BackoffConfig;
use super::serde_utils::duration_secs;
use super::ActionConfig;
use crate::error::ConfigError;

/// Pseudo-terminal dimensions for new sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Control plane host (and optional port), e.g. `apollo.example.com:1970`
    pub host: String,

    /// Agent id, the OAuth client id
    pub agent_id: String,

    /// OAuth client secret
    pub secret: String,

    /// Use `wss://` and `https://` instead of `ws://` and `http://`
    pub tls: bool,

    /// Websocket endpoint path
    pub ws_path: String,

    /// Token endpoint path
    pub token_path: String,

    /// Shell spawned for every session
    pub shell: String,

    /// Dial timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long to wait for the peer's close frame after sending ours
    #[serde(with = "duration_secs")]
    pub close_timeout: Duration,

    /// Renew credentials this long before they expire
    #[serde(with = "duration_secs")]
    pub token_refresh_margin: Duration,

    /// Log level when `RUST_LOG` is unset
    pub log_level: String,

    /// Extra environment variables for sessions
    pub env: Vec<(String, String)>,

    /// Terminal size for new sessions
    pub terminal: TerminalSize,

    /// Reconnect delay policy; `initial` is the reconnect interval
    pub backoff: BackoffConfig,

    /// Predefined actions, keyed by command name
    pub actions: Vec<ActionConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "localhost:1970".to_string(),
            agent_id: String::new(),
            secret: String::new(),
            tls: false,
            ws_path: "/ws".to_string(),
            token_path: "/oauth/token".to_string(),
            shell: "/bin/bash".to_string(),
            env: vec![],
            terminal: TerminalSize::default(),
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(1),
            token_refresh_margin: Duration::from_secs(30),
            log_level: "info".to_string(),
            actions: vec![],
        }
    }
}

impl AgentConfig {
    /// Websocket endpoint, e.g. `ws://localhost:1970/ws`
    pub fn websocket_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.host, self.ws_path)
    }

    /// Token endpoint, e.g. `http://localhost:1970/oauth/token`
    pub fn token_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.host, self.token_path)
    }

    /// Delay before the first reconnect attempt
    pub fn reconnect_interval(&self) -> Duration {
        self.backoff.initial
    }

    /// Check that every field the agent cannot run without is set
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("host", &self.host),
            ("agent_id", &self.agent_id),
            ("secret", &self.secret),
            ("shell", &self.shell),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(name.to_string()));
            }
        }

        self.backoff.validate()?;
        for action in &self.actions {
            action.validate()?;
        }

        Ok(())
    }
}
