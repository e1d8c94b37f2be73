//! Error types for the protocol layer.
//!
//! Each crate in Boardcast defines its own error enum. A `ProtocolError`
//! always means "these bytes are not (or could not become) a valid
//! snapshot or action", never a networking or storage problem.

/// Errors that can occur while encoding or decoding.
///
/// The per-codec variants wrap the underlying serializer error so the
/// underlying cause still shows up in logs.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing to JSON failed.
    #[cfg(feature = "json")]
    #[error("json encode failed: {0}")]
    JsonEncode(#[source] serde_json::Error),

    /// The bytes are not valid JSON for the expected type.
    #[cfg(feature = "json")]
    #[error("json decode failed: {0}")]
    JsonDecode(#[source] serde_json::Error),

    /// Serializing to bincode failed.
    #[cfg(feature = "binary")]
    #[error("binary encode failed: {0}")]
    BinaryEncode(#[source] bincode::error::EncodeError),

    /// The bytes are not a valid bincode value of the expected type.
    #[cfg(feature = "binary")]
    #[error("binary decode failed: {0}")]
    BinaryDecode(#[source] bincode::error::DecodeError),

    /// The message parsed but is not a valid action, e.g. a MOVE with no
    /// coordinates.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// `true` for failures caused by a malformed inbound message (as
    /// opposed to a failure to encode our own data).
    pub fn is_decode_error(&self) -> bool {
        match self {
            #[cfg(feature = "json")]
            Self::JsonDecode(_) => true,
            #[cfg(feature = "binary")]
            Self::BinaryDecode(_) => true,
            Self::InvalidMessage(_) => true,
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }
}
