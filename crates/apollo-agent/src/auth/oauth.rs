//! OAuth client-credentials provider

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use apollo_core::config::AgentConfig;
use apollo_core::error::AuthError;
use apollo_core::traits::{AuthProvider, CredentialStream};
use apollo_core::Credential;

use crate::tunnel::user_agent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
}

/// Fetches access tokens from the control plane's token endpoint and
/// renews them ahead of expiry.
///
/// A rejected or malformed response ends the stream. An unreachable
/// endpoint ends it only if no credential was ever issued; afterwards it is
/// retried every `retry_interval`.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: String,
    agent_id: String,
    secret: String,
    refresh_margin: Duration,
    retry_interval: Duration,
}

impl OAuthClient {
    /// Create a client for `token_url` authenticating as `agent_id`
    pub fn new(
        token_url: impl Into<String>,
        agent_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            token_url: token_url.into(),
            agent_id: agent_id.into(),
            secret: secret.into(),
            refresh_margin: Duration::from_secs(30),
            retry_interval: Duration::from_secs(5),
        })
    }

    /// Create a client from the agent configuration
    pub fn from_config(config: &AgentConfig) -> Result<Self, AuthError> {
        Ok(Self::new(config.token_url(), &config.agent_id, &config.secret)?
            .with_refresh_margin(config.token_refresh_margin)
            .with_retry_interval(config.reconnect_interval()))
    }

    /// Renew this long before the current credential expires
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Wait this long before retrying an unreachable endpoint
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Request one credential
    pub async fn fetch(&self) -> Result<Credential, AuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.agent_id, Some(&self.secret))
            .json(&TokenRequest {
                grant_type: "client_credentials",
            })
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(AuthError::Transport(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let credential: Credential = response
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        if credential.token.is_empty() || credential.token_type.is_empty() {
            return Err(AuthError::Malformed(
                "empty access_token or token_type".to_string(),
            ));
        }

        tracing::debug!(
            "Obtained credential, expires in {}s",
            credential.expires_in_seconds
        );
        Ok(credential)
    }

    async fn renew(self, tx: mpsc::Sender<Result<Credential, AuthError>>) {
        let mut issued = false;

        loop {
            let wait = match self.fetch().await {
                Ok(credential) => {
                    let wait = credential.refresh_after(self.refresh_margin);
                    if tx.send(Ok(credential)).await.is_err() {
                        return;
                    }
                    issued = true;
                    wait
                }
                Err(AuthError::Transport(reason)) if issued => {
                    tracing::warn!(
                        "Token renewal failed: {}. Retrying in {:?}",
                        reason,
                        self.retry_interval
                    );
                    self.retry_interval
                }
                Err(e) => {
                    tracing::error!("Authentication failed: {}", e);
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tx.closed() => return,
            }
        }
    }
}

impl AuthProvider for OAuthClient {
    fn subscribe(&self) -> CredentialStream {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(self.clone().renew(tx));
        rx
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("token_url", &self.token_url)
            .field("agent_id", &self.agent_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
