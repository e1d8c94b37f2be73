//! `BoardcastServer` builder and server loop.
//!
//! This is the entry point for running a Boardcast server. It ties the
//! layers together: transport → routing → room managers → store.

use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;

use boardcast_protocol::{BincodeCodec, Codec, JsonCodec, RoomId};
use boardcast_room::{RoomConfig, RoomManager, evict_idle_rooms, shutdown_rooms};
use boardcast_store::SnapshotStore;
use boardcast_transport::{
    DEFAULT_HANDSHAKE_TIMEOUT, Incoming, Transport, WebSocketTransport,
};
use tokio::sync::Mutex;

use crate::BoardcastError;
use crate::handler::handle_connection;

/// The address the server binds to unless told otherwise.
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. Each codec
/// has its own manager; both write to the same store under different key
/// prefixes.
pub(crate) struct ServerState<S: SnapshotStore> {
    pub(crate) json_rooms: Mutex<RoomManager<JsonCodec, S>>,
    pub(crate) binary_rooms: Mutex<RoomManager<BincodeCodec, S>>,
    pub(crate) outbound_buffer: usize,
}

impl<S: SnapshotStore> ServerState<S> {
    async fn evict_idle(&self) {
        let json = evict_from(&self.json_rooms).await;
        let binary = evict_from(&self.binary_rooms).await;
        tracing::debug!(
            json = json.len(),
            binary = binary.len(),
            "eviction pass done"
        );
    }

    async fn shutdown_all(&self) {
        let json = self.json_rooms.lock().await.take_all();
        let binary = self.binary_rooms.lock().await.take_all();
        shutdown_rooms(json).await;
        shutdown_rooms(binary).await;
    }
}

/// Runs one eviction pass over `rooms` without holding the lock while the
/// rooms answer.
async fn evict_from<C: Codec + Clone, S: SnapshotStore>(
    rooms: &Mutex<RoomManager<C, S>>,
) -> Vec<RoomId> {
    let handles = rooms.lock().await.handles();
    let stopped = evict_idle_rooms(handles).await;
    rooms.lock().await.forget_stopped(&stopped)
}

/// Builder for configuring and starting a Boardcast server.
///
/// # Example
///
/// ```rust,no_run
/// use boardcast::prelude::*;
///
/// # async fn run() -> Result<(), BoardcastError> {
/// let server = BoardcastServerBuilder::new()
///     .bind("0.0.0.0:8787")
///     .build(MemoryStore::new())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct BoardcastServerBuilder {
    bind_addr: String,
    room_config: RoomConfig,
    eviction_interval: Duration,
    handshake_timeout: Duration,
}

impl BoardcastServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            room_config: RoomConfig::default(),
            eviction_interval: Duration::from_secs(30),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the configuration every room is spawned with.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.room_config = config;
        self
    }

    /// Sets how often idle rooms are looked for. Only used when the room
    /// config has an `idle_timeout`.
    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Sets how long a client may take to finish the WebSocket upgrade
    /// before its socket is dropped.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Binds the transport and sets up the room managers over `store`.
    pub async fn build<S: SnapshotStore>(
        self,
        store: S,
    ) -> Result<BoardcastServer<S>, BoardcastError> {
        let transport = WebSocketTransport::bind(&self.bind_addr)
            .await?
            .with_handshake_timeout(self.handshake_timeout);

        let room_config = self.room_config.validated();
        let store = Arc::new(store);
        let state = Arc::new(ServerState {
            json_rooms: Mutex::new(RoomManager::new(
                JsonCodec,
                Arc::clone(&store),
                room_config.clone(),
            )),
            binary_rooms: Mutex::new(RoomManager::new(
                BincodeCodec,
                store,
                room_config.clone(),
            )),
            outbound_buffer: room_config.outbound_buffer,
        });

        Ok(BoardcastServer {
            transport,
            state,
            eviction: room_config
                .idle_timeout
                .map(|_| self.eviction_interval.max(Duration::from_millis(1))),
        })
    }
}

impl Default for BoardcastServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Boardcast server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct BoardcastServer<S: SnapshotStore> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S>>,
    /// Period of the eviction pass; `None` when rooms never go idle.
    eviction: Option<Duration>,
}

impl<S: SnapshotStore> BoardcastServer<S> {
    /// Creates a new builder.
    pub fn builder() -> BoardcastServerBuilder {
        BoardcastServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), BoardcastError> {
        self.run_until(future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes, then stops every
    /// room after its pending snapshot writes are done.
    ///
    /// Each accepted connection gets its own task, which runs the WebSocket
    /// upgrade and then the handler.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), BoardcastError> {
        tracing::info!("Boardcast server running");

        let evictor = self.eviction.map(|period| {
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    state.evict_idle().await;
                }
            })
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(incoming) => {
                        let state = Arc::clone(&self.state);
                        // The upgrade runs here, off the accept loop.
                        tokio::spawn(async move {
                            let conn = match incoming.establish().await {
                                Ok(conn) => conn,
                                Err(e) => {
                                    tracing::debug!(error = %e, "handshake failed");
                                    return;
                                }
                            };
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("shutting down, draining rooms");
        if let Some(evictor) = evictor {
            evictor.abort();
        }
        self.state.shutdown_all().await;
        Ok(())
    }
}
