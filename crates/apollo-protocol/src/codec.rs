//! JSON text codec for websocket frames

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Message;

/// Maximum accepted size of a single text frame (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Encode an outbound message as a JSON text frame
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Decode an inbound JSON text frame.
///
/// Valid JSON that matches neither shape decodes to [`Frame::Unrecognized`];
/// only syntactically broken or oversized input is an error.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(Frame::from_value(value)?)
}
