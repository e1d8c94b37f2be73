//! Room configuration and actor lifecycle phases.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration shared by every room a [`RoomManager`](crate::RoomManager)
/// spawns.
///
/// The two intervals are the side-effect policies: MOVE traffic only
/// produces a broadcast when more than `broadcast_interval` has passed
/// since the last one, and only produces a store write when more than
/// `persist_interval` has passed since the last write. JOIN ignores both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Minimum gap between MOVE-triggered broadcasts.
    pub broadcast_interval: Duration,

    /// Minimum gap between MOVE-triggered snapshot writes.
    pub persist_interval: Duration,

    /// Capacity of the room's command mailbox. Senders wait when it is
    /// full; nothing is dropped.
    pub mailbox_size: usize,

    /// Capacity of each session's outbound snapshot queue. A snapshot
    /// for a session whose queue is full is dropped for that session.
    pub outbound_buffer: usize,

    /// When set, a room with no attached sessions for this long may be
    /// evicted by [`RoomManager::evict_idle`](crate::RoomManager::evict_idle).
    pub idle_timeout: Option<Duration>,

    /// When `true`, a MOVE that was held back by a throttle is flushed as
    /// soon as the throttle reopens, even if no further action arrives.
    /// Off by default: effects then only ever happen in response to an
    /// action.
    pub trailing_flush: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_millis(200),
            persist_interval: Duration::from_millis(500),
            mailbox_size: 64,
            outbound_buffer: 32,
            idle_timeout: None,
            trailing_flush: false,
        }
    }
}

impl RoomConfig {
    /// Fixes values that would make a room unusable.
    ///
    /// Channel capacities of 0 panic inside tokio, so they are raised to 1.
    pub fn validated(mut self) -> Self {
        if self.mailbox_size == 0 {
            tracing::warn!("mailbox_size of 0 is not allowed, using 1");
            self.mailbox_size = 1;
        }
        if self.outbound_buffer == 0 {
            tracing::warn!("outbound_buffer of 0 is not allowed, using 1");
            self.outbound_buffer = 1;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// ActorPhase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a room actor.
///
/// ```text
/// Loading → Ready → Stopping
/// ```
///
/// - **Loading**: reading the last snapshot from the store. Commands queue
///   in the mailbox and are not looked at yet.
/// - **Ready**: processing commands one at a time.
/// - **Stopping**: evicted or shut down; pending writes are being drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorPhase {
    Loading,
    Ready,
    Stopping,
}

impl fmt::Display for ActorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loading => "Loading",
            Self::Ready => "Ready",
            Self::Stopping => "Stopping",
        };
        f.write_str(s)
    }
}
