//! Room actor: an isolated Tokio task that owns one room's state.
//!
//! Each room runs in its own task and is reachable only through its
//! mailbox. Every attach, detach and inbound message for the room goes
//! through that one queue, so actions are applied strictly one at a time
//! in arrival order and the state needs no lock.
//!
//! Side effects never make the actor wait:
//! - broadcasts are `try_send`s onto each session's outbound queue;
//! - snapshot writes are handed to a per-room writer task, which keeps
//!   only the newest one pending and writes them in order.

use std::sync::Arc;
use std::time::Instant;

use boardcast_protocol::{Codec, RoomId, RoomState};
use boardcast_store::{SnapshotStore, StoreError};
use boardcast_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::machine::{Effects, Moment, RoomMachine, unix_millis};
use crate::{
    ActorPhase, ConnectionRegistry, RoomConfig, RoomError, SessionSender,
    Snapshot,
};

/// Commands sent to a room actor through its mailbox.
///
/// Variants with a `oneshot::Sender` are request/reply; the caller waits on
/// the reply channel.
pub(crate) enum RoomCommand {
    /// A session connected to this room.
    Attach {
        conn: ConnectionId,
        sender: SessionSender,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// A session's transport closed or faulted.
    Detach {
        conn: ConnectionId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Raw bytes received from a session.
    Message { conn: ConnectionId, bytes: Vec<u8> },

    /// Request a copy of the current state.
    Inspect { reply: oneshot::Sender<RoomState> },

    /// Request room metadata.
    Info { reply: oneshot::Sender<RoomInfo> },

    /// Stop if no session has been attached for the idle timeout.
    /// Replies `true` once stopped and drained.
    EvictIfIdle { reply: oneshot::Sender<bool> },

    /// Stop unconditionally. Replies once pending writes are drained.
    Shutdown { reply: oneshot::Sender<()> },
}

/// A snapshot of room metadata (not the game state itself).
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    /// Name of the codec this room speaks (`"json"` / `"binary"`).
    pub codec: &'static str,
    pub phase: ActorPhase,
    /// Attached sessions.
    pub sessions: usize,
    /// Players that ever joined.
    pub players: usize,
    /// Fan-outs performed since the actor started.
    pub broadcasts: u64,
    /// Snapshot writes issued since the actor started. A write that a
    /// newer one replaced before it reached the store still counts.
    pub writes: u64,
    /// Inbound messages dropped because they didn't decode.
    pub decode_errors: u64,
}

/// Handle to a running room actor.
///
/// Cheap to clone. The [`RoomManager`](crate::RoomManager) keeps one per
/// room and each connection task keeps its own after attaching, so routing
/// a message never touches the manager.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Returns the room's id.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Whether the actor behind this handle has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Whether both handles reach the same actor.
    pub(crate) fn same_room(&self, other: &RoomHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Registers a session with the room (`onAttach`).
    pub async fn attach(
        &self,
        conn: ConnectionId,
        sender: SessionSender,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Attach {
            conn,
            sender,
            reply,
        })
        .await?
    }

    /// Removes a session from the room (`onDetach`).
    pub async fn detach(&self, conn: ConnectionId) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Detach { conn, reply })
            .await?
    }

    /// Delivers raw bytes from a session (`onMessage`, fire-and-forget).
    ///
    /// Waits only if the mailbox is full.
    pub async fn send_message(
        &self,
        conn: ConnectionId,
        bytes: Vec<u8>,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Message { conn, bytes })
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }

    /// Returns a copy of the room's current state.
    pub async fn snapshot(&self) -> Result<RoomState, RoomError> {
        self.request(|reply| RoomCommand::Inspect { reply }).await
    }

    /// Returns the room's metadata.
    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    /// Asks the room to stop if it has been idle long enough.
    pub(crate) async fn evict_if_idle(&self) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::EvictIfIdle { reply })
            .await
    }

    /// Stops the room after draining its pending writes.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }
}

// ---------------------------------------------------------------------------
// Snapshot writer
// ---------------------------------------------------------------------------

/// Background task persisting one room's snapshots.
///
/// Holds at most one pending snapshot. A write issued while the store is
/// still busy replaces the pending one, so a slow store costs one buffered
/// snapshot per room and the last one written is always the newest.
struct SnapshotWriter {
    tx: watch::Sender<Option<Snapshot>>,
    task: JoinHandle<()>,
}

impl SnapshotWriter {
    fn spawn<S: SnapshotStore>(
        room_id: RoomId,
        key: String,
        store: Arc<S>,
    ) -> Self {
        let (tx, mut rx) = watch::channel::<Option<Snapshot>>(None);
        let task = tokio::spawn(async move {
            // An unseen value is still reported after the sender is gone.
            while rx.changed().await.is_ok() {
                let Some(snapshot) = rx.borrow_and_update().clone() else {
                    continue;
                };
                let len = snapshot.bytes().len();
                match store.put(&key, snapshot.bytes().to_vec()).await {
                    Ok(()) => {
                        tracing::trace!(%room_id, bytes = len, "snapshot persisted");
                    }
                    // The in-memory state is still right; the next
                    // qualifying write carries it.
                    Err(e) => {
                        tracing::warn!(
                            %room_id,
                            error = %e,
                            "snapshot write failed"
                        );
                    }
                }
            }
        });
        Self { tx, task }
    }

    /// Hands over the newest snapshot, replacing one not yet written.
    /// Returns `false` if the writer task is gone.
    fn write(&self, snapshot: Snapshot) -> bool {
        self.tx.send(Some(snapshot)).is_ok()
    }

    /// Waits until the pending snapshot, if any, has been attempted.
    async fn drain(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "snapshot writer task failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Stats {
    broadcasts: u64,
    writes: u64,
    decode_errors: u64,
}

/// Why the command loop ended.
enum Exit {
    Evicted(oneshot::Sender<bool>),
    Shutdown(oneshot::Sender<()>),
    /// Every handle was dropped.
    Orphaned,
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor<C: Codec> {
    room_id: RoomId,
    codec: C,
    config: RoomConfig,
    phase: ActorPhase,
    machine: RoomMachine,
    registry: ConnectionRegistry,
    writer: SnapshotWriter,
    receiver: mpsc::Receiver<RoomCommand>,
    /// When the registry last became empty; `None` while sessions are
    /// attached.
    idle_since: Option<Instant>,
    stats: Stats,
}

impl<C: Codec> RoomActor<C> {
    /// Runs the actor loop, processing commands until evicted, shut
    /// down, or orphaned.
    async fn run(mut self) {
        tracing::info!(
            room_id = %self.room_id,
            codec = C::NAME,
            players = self.machine.state().players.len(),
            phase = %self.phase,
            "room actor ready"
        );

        let exit = loop {
            let due = if self.config.trailing_flush {
                self.machine.next_flush_due()
            } else {
                None
            };

            let cmd = match due {
                Some(due) => tokio::select! {
                    cmd = self.receiver.recv() => cmd,
                    () = tokio::time::sleep_until(due.into()) => {
                        let effects = self.machine.flush(Moment::now());
                        self.perform(effects);
                        continue;
                    }
                },
                None => self.receiver.recv().await,
            };

            let Some(cmd) = cmd else {
                break Exit::Orphaned;
            };

            match cmd {
                RoomCommand::Attach {
                    conn,
                    sender,
                    reply,
                } => {
                    let _ = reply.send(self.handle_attach(conn, sender));
                }
                RoomCommand::Detach { conn, reply } => {
                    let _ = reply.send(self.handle_detach(conn));
                }
                RoomCommand::Message { conn, bytes } => {
                    self.handle_message(conn, &bytes);
                }
                RoomCommand::Inspect { reply } => {
                    let _ = reply.send(self.machine.state().clone());
                }
                RoomCommand::Info { reply } => {
                    let _ = reply.send(self.info());
                }
                RoomCommand::EvictIfIdle { reply } => {
                    if self.is_idle(Moment::now().instant) {
                        break Exit::Evicted(reply);
                    }
                    let _ = reply.send(false);
                }
                RoomCommand::Shutdown { reply } => {
                    break Exit::Shutdown(reply);
                }
            }
        };

        let room_id = self.room_id.clone();
        self.stop().await;
        match exit {
            Exit::Evicted(reply) => {
                tracing::info!(%room_id, "idle room evicted");
                let _ = reply.send(true);
            }
            Exit::Shutdown(reply) => {
                tracing::info!(%room_id, "room shut down");
                let _ = reply.send(());
            }
            Exit::Orphaned => {
                tracing::info!(%room_id, "room orphaned, stopping");
            }
        }
    }

    fn handle_attach(
        &mut self,
        conn: ConnectionId,
        sender: SessionSender,
    ) -> Result<(), RoomError> {
        if !self.registry.attach(conn, sender) {
            return Err(RoomError::AlreadyAttached(conn, self.room_id.clone()));
        }
        self.idle_since = None;
        tracing::info!(
            room_id = %self.room_id,
            %conn,
            sessions = self.registry.len(),
            "session attached"
        );
        Ok(())
    }

    fn handle_detach(&mut self, conn: ConnectionId) -> Result<(), RoomError> {
        if !self.registry.detach(conn) {
            return Err(RoomError::NotAttached(conn, self.room_id.clone()));
        }
        if self.registry.is_empty() {
            self.idle_since = Some(Moment::now().instant);
        }
        tracing::info!(
            room_id = %self.room_id,
            %conn,
            sessions = self.registry.len(),
            "session detached"
        );
        Ok(())
    }

    fn handle_message(&mut self, conn: ConnectionId, bytes: &[u8]) {
        if !self.registry.contains(conn) {
            tracing::warn!(
                room_id = %self.room_id,
                %conn,
                "message from detached connection, ignoring"
            );
            return;
        }

        let action = match self.codec.decode_action(bytes) {
            Ok(action) => action,
            Err(e) if e.is_decode_error() => {
                self.stats.decode_errors += 1;
                tracing::warn!(
                    room_id = %self.room_id,
                    %conn,
                    error = %e,
                    "dropping undecodable action"
                );
                return;
            }
            Err(e) => {
                tracing::error!(room_id = %self.room_id, %conn, error = %e, "action decode failed");
                return;
            }
        };

        tracing::trace!(room_id = %self.room_id, %conn, kind = %action.kind(), "applying action");
        let effects = self.machine.apply(action, Moment::now());
        self.perform(effects);
    }

    /// Encodes the state once and performs whichever effects are due.
    fn perform(&mut self, effects: Effects) {
        if effects.is_none() {
            return;
        }

        let bytes = match self.codec.encode_state(self.machine.state()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    room_id = %self.room_id,
                    error = %e,
                    "failed to encode snapshot"
                );
                return;
            }
        };
        let snapshot = Snapshot::new(bytes, C::FORMAT);

        if effects.broadcast {
            let fan_out = self.registry.broadcast(&snapshot);
            self.stats.broadcasts += 1;
            tracing::debug!(
                room_id = %self.room_id,
                delivered = fan_out.delivered,
                failed = fan_out.failed,
                bytes = snapshot.bytes().len(),
                "snapshot broadcast"
            );
        }

        if effects.persist {
            if self.writer.write(snapshot) {
                self.stats.writes += 1;
            } else {
                tracing::error!(
                    room_id = %self.room_id,
                    "snapshot writer is gone, write dropped"
                );
            }
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        match (self.config.idle_timeout, self.idle_since) {
            (Some(timeout), Some(since)) => {
                self.registry.is_empty()
                    && now.saturating_duration_since(since) >= timeout
            }
            _ => false,
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            codec: C::NAME,
            phase: self.phase,
            sessions: self.registry.len(),
            players: self.machine.state().players.len(),
            broadcasts: self.stats.broadcasts,
            writes: self.stats.writes,
            decode_errors: self.stats.decode_errors,
        }
    }

    /// Persists any state the batching policy held back, then waits for
    /// the writer to finish.
    async fn stop(mut self) {
        self.phase = ActorPhase::Stopping;
        if self.machine.take_unpersisted() {
            self.perform(Effects {
                broadcast: false,
                persist: true,
            });
        }
        let RoomActor { writer, .. } = self;
        writer.drain().await;
    }
}

/// Reads and decodes the room's last snapshot.
///
/// A missing snapshot starts the room empty. A stored snapshot that does
/// not decode is copied aside to `{key}-corrupt-{unix_ms}` first, and the
/// room starts empty only once that copy is written. A failed read is an
/// error: the room must not start, or its first write would replace state
/// that may still be intact.
async fn load_state<C: Codec, S: SnapshotStore>(
    room_id: &RoomId,
    key: &str,
    codec: &C,
    store: &S,
) -> Result<RoomState, StoreError> {
    let Some(bytes) = store.get(key).await? else {
        tracing::debug!(%room_id, "no stored snapshot, starting empty");
        return Ok(RoomState::new(unix_millis()));
    };

    match codec.decode_state(&bytes) {
        Ok(state) => {
            tracing::info!(
                %room_id,
                players = state.players.len(),
                bytes = bytes.len(),
                "restored snapshot"
            );
            Ok(state)
        }
        Err(e) => {
            let now = unix_millis();
            let quarantine = format!("{key}-corrupt-{now}");
            tracing::error!(
                %room_id,
                error = %e,
                %quarantine,
                "stored snapshot does not decode, moving it aside and starting empty"
            );
            store.put(&quarantine, bytes).await?;
            Ok(RoomState::new(now))
        }
    }
}

/// Spawns a room actor and returns a handle to it.
///
/// The actor starts in [`ActorPhase::Loading`]: commands sent through the
/// handle queue in the mailbox (senders wait once `mailbox_size` is
/// reached) and are only looked at after the stored snapshot has been
/// loaded.
pub(crate) fn spawn_room<C: Codec, S: SnapshotStore>(
    room_id: RoomId,
    codec: C,
    store: Arc<S>,
    config: RoomConfig,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.mailbox_size);
    let handle = RoomHandle {
        room_id: room_id.clone(),
        sender: tx,
    };

    tokio::spawn(async move {
        let key = room_id.snapshot_key(C::NAME);
        tracing::debug!(
            %room_id,
            %key,
            phase = %ActorPhase::Loading,
            "room actor loading"
        );
        let state = match load_state(&room_id, &key, &codec, store.as_ref()).await {
            Ok(state) => state,
            // Dropping the mailbox fails every queued and later command
            // with `Unavailable`; the manager spawns a fresh load on the
            // next attach.
            Err(e) => {
                tracing::error!(
                    %room_id,
                    error = %e,
                    "snapshot load failed, room not started"
                );
                return;
            }
        };
        let machine = RoomMachine::new(state, &config);
        let writer = SnapshotWriter::spawn(room_id.clone(), key, store);

        let actor = RoomActor {
            room_id,
            codec,
            config,
            phase: ActorPhase::Ready,
            machine,
            registry: ConnectionRegistry::new(),
            writer,
            receiver: rx,
            idle_since: Some(Moment::now().instant),
            stats: Stats::default(),
        };
        actor.run().await;
    });

    handle
}
