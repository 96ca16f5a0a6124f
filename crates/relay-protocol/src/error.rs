//! Error types for the protocol layer.
//!
//! Each crate in the relay defines its own error enum. A `ProtocolError`
//! always means the bytes were the problem (serialization, shape, or
//! size), never the network.

/// Errors that can occur while encoding or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing required field,
    /// a wrong data type, or an unknown `action`.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The encoded message would not fit in one frame.
    #[error("message of {len} bytes exceeds the {max}-byte frame cap")]
    Oversized { len: usize, max: usize },

    /// The message is invalid at the protocol level.
    ///
    /// For frames that pass JSON parsing but violate protocol rules,
    /// e.g. no discriminant or an empty account name.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
