//! Unified error type for Boardcast.

use boardcast_protocol::ProtocolError;
use boardcast_room::RoomError;
use boardcast_store::StoreError;
use boardcast_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls,
/// so `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum BoardcastError {
    /// A transport-level error (bind, accept, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A store-level error (I/O, invalid key).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A room-level error (stopped room, double attach).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The connection's request path names no codec/room pair.
    #[error("no route for path {0:?}")]
    UnknownRoute(String),
}
