//! Error types for the room layer.

use boardcast_protocol::RoomId;
use boardcast_transport::ConnectionId;

/// Errors that can occur during room operations.
///
/// Nothing here is ever reported to a client: the protocol has no error
/// channel. These surface to the connection handler and the manager only.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room's actor has stopped (evicted or shut down) or its
    /// mailbox is closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    /// The connection is already attached to this room.
    #[error("{0} already attached to room {1}")]
    AlreadyAttached(ConnectionId, RoomId),

    /// The connection is not attached to this room.
    #[error("{0} not attached to room {1}")]
    NotAttached(ConnectionId, RoomId),
}
