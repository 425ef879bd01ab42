//! apollo-agent: host agent for the Apollo control plane
//!
//! The agent keeps one authenticated websocket connection to the control
//! plane and exposes local shell sessions over it. Operators send terminal
//! input and control commands; every session's output is streamed back,
//! multiplexed by session id.

pub mod action;
pub mod auth;
pub mod logging;
pub mod middleware;
pub mod pty;
pub mod state;
pub mod tunnel;

pub use middleware::Middleware;
pub use state::ConnectionState;
