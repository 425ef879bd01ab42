//! Core trait definitions
//!
//! The orchestrator is written against these traits so the socket, the
//! PTY layer and the token endpoint can each be replaced by a fake.

mod auth;
mod shell;
mod terminal;

pub use auth::{AuthProvider, CredentialStream};
pub use shell::ShellManager;
pub use terminal::{Epoch, Outbound, RemoteEvent, RemoteTerminal};
