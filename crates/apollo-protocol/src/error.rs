//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON, or not a JSON object
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame exceeds the maximum accepted size
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },
}
