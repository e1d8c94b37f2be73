//! Per-connection handler: routing, attach, and frame pumping.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Parse the request path → codec + room (or close)
//!   2. Attach to the room through the matching manager
//!   3. Loop: forward snapshots out, forward frames in
//!   4. Detach when the peer goes away

use std::sync::Arc;

use boardcast_protocol::{Codec, RoomId, WireFormat};
use boardcast_room::{RoomError, RoomHandle, RoomManager, SessionSender, Snapshot};
use boardcast_store::SnapshotStore;
use boardcast_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::{Mutex, mpsc};

use crate::BoardcastError;
use crate::route::{CodecKind, Route};
use crate::server::ServerState;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S: SnapshotStore>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S>>,
) -> Result<(), BoardcastError> {
    let conn_id = conn.id();

    let Some(route) = Route::parse(conn.path()) else {
        tracing::warn!(%conn_id, path = conn.path(), "unknown route, closing");
        let _ = conn.close().await;
        return Err(BoardcastError::UnknownRoute(conn.path().to_owned()));
    };

    let (tx, rx) = mpsc::channel(state.outbound_buffer);
    let handle = match route.codec {
        CodecKind::Json => attach(&state.json_rooms, &route.room, conn_id, tx).await?,
        CodecKind::Binary => attach(&state.binary_rooms, &route.room, conn_id, tx).await?,
    };
    tracing::info!(
        %conn_id,
        room_id = %route.room,
        codec = %route.codec,
        "session started"
    );

    let result = pump(&conn, &handle, rx).await;

    if let Err(e) = handle.detach(conn_id).await {
        tracing::debug!(%conn_id, error = %e, "detach failed");
    }
    let _ = conn.close().await;
    result
}

/// Attaches to `room_id`, holding the manager lock only while looking up
/// the handle. A room that is still loading keeps other rooms reachable.
async fn attach<C: Codec + Clone, S: SnapshotStore>(
    rooms: &Mutex<RoomManager<C, S>>,
    room_id: &RoomId,
    conn_id: ConnectionId,
    tx: SessionSender,
) -> Result<RoomHandle, RoomError> {
    let handle = rooms.lock().await.handle(room_id);
    match handle.attach(conn_id, tx.clone()).await {
        Ok(()) => Ok(handle),
        // Stopped between lookup and attach; start it again.
        Err(RoomError::Unavailable(_)) => {
            let handle = rooms.lock().await.respawn(&handle);
            handle.attach(conn_id, tx).await?;
            Ok(handle)
        }
        Err(e) => Err(e),
    }
}

/// Moves snapshots from the room to the socket and frames from the socket
/// to the room until either side goes away.
async fn pump(
    conn: &WebSocketConnection,
    room: &RoomHandle,
    mut outbound: mpsc::Receiver<Snapshot>,
) -> Result<(), BoardcastError> {
    let conn_id = conn.id();

    loop {
        tokio::select! {
            snapshot = outbound.recv() => {
                // The room dropped our queue: it has stopped.
                let Some(snapshot) = snapshot else {
                    tracing::info!(%conn_id, room_id = %room.room_id(), "room stopped, closing");
                    break;
                };
                send_snapshot(conn, &snapshot).await?;
            }
            frame = conn.recv() => match frame {
                Ok(Some(bytes)) => {
                    if let Err(e) = room.send_message(conn_id, bytes).await {
                        tracing::info!(%conn_id, error = %e, "room gone, closing");
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(%conn_id, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    tracing::debug!(%conn_id, error = %e, "recv error");
                    break;
                }
            },
        }
    }

    Ok(())
}

/// Writes one snapshot in the frame type its codec calls for.
async fn send_snapshot(
    conn: &WebSocketConnection,
    snapshot: &Snapshot,
) -> Result<(), BoardcastError> {
    match (snapshot.format(), snapshot.as_text()) {
        (WireFormat::Text, Some(text)) => conn.send_text(text).await?,
        _ => conn.send(snapshot.bytes()).await?,
    }
    Ok(())
}
