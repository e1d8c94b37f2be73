//! The per-room connection registry and the snapshot fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use boardcast_protocol::WireFormat;
use boardcast_transport::ConnectionId;
use tokio::sync::mpsc::{self, error::TrySendError};

/// One encoded room snapshot, ready to be written to any number of
/// connections.
///
/// Cloning shares the buffer: a broadcast encodes once and every recipient
/// gets the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    bytes: Arc<[u8]>,
    format: WireFormat,
}

impl Snapshot {
    pub fn new(bytes: Vec<u8>, format: WireFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// The snapshot as text, for text-format codecs. `None` for binary
    /// snapshots or invalid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self.format {
            WireFormat::Text => std::str::from_utf8(&self.bytes).ok(),
            WireFormat::Binary => None,
        }
    }
}

/// Outbound queue of one attached session. The connection task on the
/// other end writes whatever arrives to the socket.
pub type SessionSender = mpsc::Sender<Snapshot>;

/// The result of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanOut {
    /// Sessions whose queue accepted the snapshot.
    pub delivered: usize,
    /// Sessions skipped because their queue was full or closed.
    pub failed: usize,
}

/// The set of sessions currently attached to a room.
///
/// Only attach and detach change the set. A failed send does not remove
/// a session: it stays registered (and keeps costing a wasted send) until
/// its transport reports the detach.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<ConnectionId, SessionSender>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session. Returns `false` (and keeps the existing
    /// sender) if `conn` is already attached.
    pub fn attach(&mut self, conn: ConnectionId, sender: SessionSender) -> bool {
        match self.sessions.entry(conn) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(sender);
                true
            }
        }
    }

    /// Forgets a session. Returns whether it was attached.
    pub fn detach(&mut self, conn: ConnectionId) -> bool {
        self.sessions.remove(&conn).is_some()
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.sessions.contains_key(&conn)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Visits every attached session, in no particular order.
    pub fn for_each(&self, mut f: impl FnMut(ConnectionId, &SessionSender)) {
        for (conn, sender) in &self.sessions {
            f(*conn, sender);
        }
    }

    /// Queues `snapshot` on every attached session without waiting.
    ///
    /// A full or closed queue only affects that session; the rest still
    /// get the snapshot.
    pub fn broadcast(&self, snapshot: &Snapshot) -> FanOut {
        let mut out = FanOut::default();
        self.for_each(|conn, sender| match sender.try_send(snapshot.clone()) {
            Ok(()) => out.delivered += 1,
            Err(TrySendError::Full(_)) => {
                out.failed += 1;
                tracing::debug!(%conn, "outbound queue full, snapshot dropped");
            }
            Err(TrySendError::Closed(_)) => {
                out.failed += 1;
                tracing::debug!(%conn, "session gone, awaiting detach");
            }
        });
        out
    }
}
