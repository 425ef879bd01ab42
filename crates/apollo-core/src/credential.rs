//! Short-lived bearer credential

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Access token issued by the token endpoint.
///
/// Immutable once issued; a newer credential supersedes it rather than
/// mutating it. Field names follow the OAuth token response.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token
    #[serde(rename = "access_token")]
    pub token: String,
    /// Token type, used as the authorization scheme (usually `Bearer`)
    pub token_type: String,
    /// Lifetime in seconds from issuance
    #[serde(rename = "expires_in")]
    pub expires_in_seconds: u64,
}

impl Credential {
    /// Create a new credential
    pub fn new(
        token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in_seconds: u64,
    ) -> Self {
        Self {
            token: token.into(),
            token_type: token_type.into(),
            expires_in_seconds,
        }
    }

    /// Value of the `Authorization` header: `"<tokenType> <token>"`
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }

    /// Lifetime of the credential
    pub fn expires_in(&self) -> Duration {
        Duration::from_secs(self.expires_in_seconds)
    }

    /// How long to wait before requesting a replacement.
    ///
    /// Renews `margin` before expiry, never sooner than one second.
    pub fn refresh_after(&self, margin: Duration) -> Duration {
        self.expires_in()
            .saturating_sub(margin)
            .max(Duration::from_secs(1))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}
