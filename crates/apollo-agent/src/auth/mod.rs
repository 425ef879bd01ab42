//! Credential acquisition

mod oauth;

pub use oauth::OAuthClient;
