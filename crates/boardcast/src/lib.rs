//! # Boardcast
//!
//! A per-room real-time state coordinator. Clients connect over WebSocket
//! to `/json/{room}` or `/binary/{room}`, send JOIN / MOVE / END_TURN
//! actions, and receive full room snapshots. Each room is a single actor
//! that throttles broadcasts, batches snapshot writes to a durable store,
//! and recovers its last snapshot on cold start.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boardcast::prelude::*;
//!
//! # async fn run() -> Result<(), BoardcastError> {
//! let server = BoardcastServerBuilder::new()
//!     .bind("0.0.0.0:8787")
//!     .build(FileStore::open("./data").await?)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod route;
mod server;

pub use error::BoardcastError;
pub use route::{CodecKind, Route};
pub use server::{BoardcastServer, BoardcastServerBuilder, DEFAULT_BIND};

/// Everything needed to run a server or talk to rooms directly.
pub mod prelude {
    pub use crate::{
        BoardcastError, BoardcastServer, BoardcastServerBuilder, CodecKind,
        DEFAULT_BIND, Route,
    };
    pub use boardcast_protocol::{
        Action, ActionKind, BincodeCodec, Codec, JsonCodec, Player,
        PlayerStatus, ProtocolError, RoomId, RoomState,
    };
    pub use boardcast_room::{
        RoomConfig, RoomError, RoomHandle, RoomInfo, RoomManager,
    };
    pub use boardcast_store::{FileStore, MemoryStore, SnapshotStore, StoreError};
    pub use boardcast_transport::ConnectionId;
}
