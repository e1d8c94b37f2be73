//! Wire protocol for Boardcast.
//!
//! This crate defines what clients and rooms exchange:
//!
//! - **Types** ([`RoomState`], [`Player`], [`Action`], [`ActionFrame`],
//!   [`RoomId`]): the snapshot and the client actions.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`], [`BincodeCodec`]): how
//!   those are converted to/from bytes, for the wire and for storage alike.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer doesn't know about connections, rooms or storage.
//!
//! ```text
//! Transport (frames) → Protocol (Action / RoomState) → Room (actor)
//! ```

mod codec;
mod error;
mod types;

#[cfg(feature = "binary")]
pub use codec::{BincodeCodec, MAX_BINARY_MESSAGE};
pub use codec::{Codec, WireFormat};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    Action, ActionFrame, ActionKind, ActionPayload, BOARD_SIZE, Board, Player,
    PlayerStatus, RoomId, RoomState,
};
