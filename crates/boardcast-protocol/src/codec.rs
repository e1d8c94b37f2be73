//! Codec trait and implementations for snapshots and actions.
//!
//! A room is bound to exactly one codec for its whole life: the same codec
//! decodes inbound actions, encodes the broadcast snapshot, and encodes
//! the persisted blob. Swapping the codec changes payload size and
//! encode/decode cost, never what the room does with the data.
//!
//! - [`JsonCodec`]: verbose text (`serde_json`), sent as text frames.
//! - [`BincodeCodec`]: compact binary (`bincode`), sent as binary frames.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Action, ActionFrame, ProtocolError, RoomState};

/// Which kind of transport frame a codec's output belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// UTF-8 text (WebSocket text frames).
    Text,
    /// Opaque bytes (WebSocket binary frames).
    Binary,
}

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a codec lives inside a room actor task
/// for as long as the room is resident.
pub trait Codec: Send + Sync + 'static {
    /// Short name, used in store keys, routes and logs.
    const NAME: &'static str;

    /// The frame type this codec's output travels in.
    const FORMAT: WireFormat;

    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns an encode error if the value can't be represented in this
    /// format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns a decode error if the bytes are malformed, truncated, or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Decodes an inbound action envelope and checks its payload.
    fn decode_action(&self, data: &[u8]) -> Result<Action, ProtocolError> {
        let frame: ActionFrame = self.decode(data)?;
        Action::try_from(frame)
    }

    /// Encodes an action the way a client would send it.
    fn encode_action(&self, action: &Action) -> Result<Vec<u8>, ProtocolError> {
        self.encode(&ActionFrame::from(action))
    }

    /// Encodes a full room snapshot.
    fn encode_state(&self, state: &RoomState) -> Result<Vec<u8>, ProtocolError> {
        self.encode(state)
    }

    /// Decodes a full room snapshot.
    fn decode_state(&self, data: &[u8]) -> Result<RoomState, ProtocolError> {
        self.decode(data)
    }

    /// Size in bytes of `value` under this codec.
    fn encoded_len<T: Serialize>(&self, value: &T) -> Result<usize, ProtocolError> {
        self.encode(value).map(|bytes| bytes.len())
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Human-readable, so snapshots can be inspected in browser DevTools and
/// logs; the tradeoff is size.
///
/// ```rust
/// use boardcast_protocol::{Action, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let action = codec
///     .decode_action(br#"{"type":"MOVE","payload":{"id":"p1","x":3,"y":4}}"#)
///     .unwrap();
/// assert_eq!(action, Action::Move { id: "p1".into(), x: 3, y: 4 });
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    const NAME: &'static str = "json";
    const FORMAT: WireFormat = WireFormat::Text;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::JsonEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::JsonDecode)
    }
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// Upper bound on the size of anything the binary codec will decode.
#[cfg(feature = "binary")]
pub const MAX_BINARY_MESSAGE: usize = 1 << 20;

/// A [`Codec`] that uses bincode's standard (varint, little-endian)
/// configuration through its serde bridge.
///
/// Field names never hit the wire, which is where most of the size win
/// over JSON comes from. Trailing bytes after a complete value are
/// rejected rather than ignored.
#[cfg(feature = "binary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[cfg(feature = "binary")]
impl BincodeCodec {
    fn config() -> impl bincode::config::Config {
        bincode::config::standard().with_limit::<MAX_BINARY_MESSAGE>()
    }
}

#[cfg(feature = "binary")]
impl Codec for BincodeCodec {
    const NAME: &'static str = "binary";
    const FORMAT: WireFormat = WireFormat::Binary;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(value, Self::config())
            .map_err(ProtocolError::BinaryEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        let (value, read) = bincode::serde::decode_from_slice(data, Self::config())
            .map_err(ProtocolError::BinaryDecode)?;
        if read != data.len() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} trailing bytes after value",
                data.len() - read
            )));
        }
        Ok(value)
    }
}
