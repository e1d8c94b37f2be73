//! Room manager: spawns, tracks, and evicts room actors.

use std::collections::HashMap;
use std::sync::Arc;

use boardcast_protocol::{Codec, RoomId};
use boardcast_store::SnapshotStore;
use boardcast_transport::ConnectionId;

use crate::room::spawn_room;
use crate::{RoomConfig, RoomError, RoomHandle, SessionSender};

/// Owns the live room actors for one codec.
///
/// Rooms are created lazily: the first attach to an unknown room id spawns
/// its actor, which cold-starts from the store. A room stays live until it
/// is evicted or shut down; the next attach after that starts it again
/// from its last snapshot.
///
/// This is the entry point for room operations from the server layer.
pub struct RoomManager<C: Codec + Clone, S: SnapshotStore> {
    /// Live rooms, keyed by room id.
    rooms: HashMap<RoomId, RoomHandle>,
    codec: C,
    store: Arc<S>,
    config: RoomConfig,
}

impl<C: Codec + Clone, S: SnapshotStore> RoomManager<C, S> {
    /// Creates a manager with no live rooms.
    pub fn new(codec: C, store: Arc<S>, config: RoomConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            codec,
            store,
            config: config.validated(),
        }
    }

    /// The configuration every spawned room gets.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Returns the handle of `room_id`, spawning its actor if the room is
    /// not live.
    pub fn handle(&mut self, room_id: &RoomId) -> RoomHandle {
        if let Some(handle) = self.rooms.get(room_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
            tracing::debug!(%room_id, "dropping handle of stopped room");
        }

        let handle = spawn_room(
            room_id.clone(),
            self.codec.clone(),
            Arc::clone(&self.store),
            self.config.clone(),
        );
        self.rooms.insert(room_id.clone(), handle.clone());
        tracing::info!(%room_id, codec = C::NAME, "room created");
        handle
    }

    /// Replaces `stale` with a freshly spawned room, unless the entry has
    /// already been replaced by someone else.
    ///
    /// Call this after `stale` answered [`RoomError::Unavailable`].
    pub fn respawn(&mut self, stale: &RoomHandle) -> RoomHandle {
        let room_id = stale.room_id();
        if self
            .rooms
            .get(room_id)
            .is_some_and(|current| current.same_room(stale))
        {
            self.rooms.remove(room_id);
        }
        self.handle(room_id)
    }

    /// Attaches a session to `room_id`, starting the room if needed.
    ///
    /// Returns the room's handle so the caller can route messages to it
    /// directly. A manager shared behind a lock should not use this, since
    /// it waits on the room while borrowing the manager. Take the handle
    /// with [`handle`](Self::handle) and attach through it instead.
    pub async fn attach(
        &mut self,
        room_id: &RoomId,
        conn: ConnectionId,
        sender: SessionSender,
    ) -> Result<RoomHandle, RoomError> {
        let handle = self.handle(room_id);
        match handle.attach(conn, sender.clone()).await {
            Ok(()) => Ok(handle),
            // Stopped between lookup and attach; start it again.
            Err(RoomError::Unavailable(_)) => {
                let handle = self.respawn(&handle);
                handle.attach(conn, sender).await?;
                Ok(handle)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the handle of a live room without spawning one.
    pub fn get(&self, room_id: &RoomId) -> Option<RoomHandle> {
        self.rooms
            .get(room_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Clones the handles of every tracked room.
    pub fn handles(&self) -> Vec<RoomHandle> {
        self.rooms.values().cloned().collect()
    }

    /// Drops the entries of `stopped` rooms. An entry that was respawned
    /// in the meantime is kept. Returns the ids that were dropped.
    pub fn forget_stopped(&mut self, stopped: &[RoomHandle]) -> Vec<RoomId> {
        let mut forgotten = Vec::new();
        for handle in stopped {
            let room_id = handle.room_id();
            if self
                .rooms
                .get(room_id)
                .is_some_and(|current| current.same_room(handle))
            {
                self.rooms.remove(room_id);
                forgotten.push(room_id.clone());
            }
        }
        if !forgotten.is_empty() {
            tracing::info!(
                count = forgotten.len(),
                live = self.rooms.len(),
                "evicted idle rooms"
            );
        }
        forgotten
    }

    /// Removes and returns every room handle, leaving the manager empty.
    pub fn take_all(&mut self) -> Vec<RoomHandle> {
        self.rooms.drain().map(|(_, handle)| handle).collect()
    }

    /// Stops every room that has had no attached session for the idle
    /// timeout. Returns the ids of the rooms that were evicted.
    ///
    /// Does nothing unless [`RoomConfig::idle_timeout`] is set.
    pub async fn evict_idle(&mut self) -> Vec<RoomId> {
        if self.config.idle_timeout.is_none() {
            return Vec::new();
        }
        let stopped = evict_idle_rooms(self.handles()).await;
        self.forget_stopped(&stopped)
    }

    /// Stops every room, waiting for each to drain its pending writes.
    pub async fn shutdown_all(&mut self) {
        shutdown_rooms(self.take_all()).await;
    }

    /// Returns the number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Lists the ids of all live rooms.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().cloned().collect()
    }
}

/// Asks each room to stop if it has been idle long enough. Returns the
/// handles of the rooms that are no longer running.
///
/// Needs no manager borrow, so the caller can release its lock first and
/// hand the result to [`RoomManager::forget_stopped`] afterwards.
pub async fn evict_idle_rooms(handles: Vec<RoomHandle>) -> Vec<RoomHandle> {
    let mut stopped = Vec::new();
    for handle in handles {
        match handle.evict_if_idle().await {
            Ok(true) | Err(RoomError::Unavailable(_)) => stopped.push(handle),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(room_id = %handle.room_id(), error = %e, "eviction check failed");
            }
        }
    }
    stopped
}

/// Stops each room, waiting for it to drain its pending writes.
pub async fn shutdown_rooms(handles: Vec<RoomHandle>) {
    for handle in handles {
        if let Err(e) = handle.shutdown().await {
            tracing::debug!(room_id = %handle.room_id(), error = %e, "room already stopped");
        }
    }
}
