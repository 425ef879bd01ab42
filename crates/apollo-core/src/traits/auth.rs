//! Credential provider trait

use tokio::sync::mpsc;

use crate::credential::Credential;
use crate::error::AuthError;

/// Stream of renewed credentials.
///
/// An `Err` item is a hard failure; the provider stops after sending it.
pub type CredentialStream = mpsc::Receiver<Result<Credential, AuthError>>;

/// Produces a renewing stream of short-lived credentials
pub trait AuthProvider: Send + Sync {
    /// Start producing credentials.
    ///
    /// The first item is the initial credential (or the reason there is
    /// none); later items replace it ahead of expiry.
    fn subscribe(&self) -> CredentialStream;
}
