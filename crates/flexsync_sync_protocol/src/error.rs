//! Codec errors.

use thiserror::Error;

/// Result type for encoding and decoding session events.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding session events.
#[derive(Debug, Error)]
pub enum CodecError {
    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The frame carried an unknown event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(u8),

    /// The frame was empty.
    #[error("empty frame")]
    EmptyFrame,
}
