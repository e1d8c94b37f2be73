//! Room layer for Boardcast.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns the
//! room's state, its attached sessions and its side-effect throttles.
//!
//! # Key types
//!
//! - [`RoomManager`]: spawns rooms on first attach, evicts idle ones
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`RoomMachine`]: the pure state transition and throttle logic
//! - [`ConnectionRegistry`]: a room's attached sessions and fan-out
//! - [`RoomConfig`]: intervals, queue sizes and the idle timeout

mod config;
mod error;
mod machine;
mod manager;
mod registry;
mod room;

pub use config::{ActorPhase, RoomConfig};
pub use error::RoomError;
pub use machine::{Effects, Moment, RoomMachine, Throttle, unix_millis};
pub use manager::{RoomManager, evict_idle_rooms, shutdown_rooms};
pub use registry::{ConnectionRegistry, FanOut, SessionSender, Snapshot};
pub use room::{RoomHandle, RoomInfo};
