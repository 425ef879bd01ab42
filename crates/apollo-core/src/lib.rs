//! apollo-core: Core abstractions and configuration for the Apollo agent
//!
//! This crate provides the configuration structures, error taxonomy,
//! credential type and the traits at the seams between the connection
//! orchestrator, the protocol client, the session manager and the
//! authentication provider.

pub mod config;
pub mod credential;
pub mod error;
pub mod net;
pub mod traits;

pub use credential::Credential;
