//! apollo-protocol: Wire protocol for the Apollo agent
//!
//! Every frame on the socket is a single JSON text message. Inbound frames
//! are either terminal input (`{"connection_id", "message"}`) or control
//! commands (`{"connection_id", "command"}`); the two shapes carry no type
//! tag and are told apart structurally by [`decode`].

#![deny(rustdoc::broken_intra_doc_links)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod session;

pub use codec::{decode, encode, MAX_MESSAGE_SIZE};
pub use error::ProtocolError;
pub use frame::Frame;
pub use message::{Command, CommandKind, Message, ShellIo};
pub use session::SessionId;
