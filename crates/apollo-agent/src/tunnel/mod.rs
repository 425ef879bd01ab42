//! Connection to the control plane

mod client;
mod reconnect;

pub use client::{build_request, user_agent, ClientSettings, ProtocolClient};
pub use reconnect::ExponentialBackoff;
