//! Integration tests for the room system, driven through `RoomManager`
//! with an in-memory store and paused time.

use std::sync::Arc;
use std::time::Duration;

use boardcast_protocol::{
    Action, BincodeCodec, Codec, JsonCodec, Player, RoomId, RoomState,
};
use boardcast_room::{
    ActorPhase, RoomConfig, RoomError, RoomManager, SessionSender, Snapshot,
};
use boardcast_store::{MemoryStore, SnapshotStore, StoreError};
use boardcast_transport::ConnectionId;
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

fn conn(id: u64) -> ConnectionId {
    ConnectionId::new(id)
}

fn room(name: &str) -> RoomId {
    RoomId::new(name)
}

fn manager<C: Codec + Clone>(
    codec: C,
    store: &MemoryStore,
    config: RoomConfig,
) -> RoomManager<C, MemoryStore> {
    RoomManager::new(codec, Arc::new(store.clone()), config)
}

fn session() -> (SessionSender, mpsc::Receiver<Snapshot>) {
    mpsc::channel(16)
}

fn join<C: Codec>(codec: &C, id: &str) -> Vec<u8> {
    codec.encode_action(&Action::Join { id: id.into() }).unwrap()
}

fn mv<C: Codec>(codec: &C, id: &str, x: i64, y: i64) -> Vec<u8> {
    codec
        .encode_action(&Action::Move {
            id: id.into(),
            x,
            y,
        })
        .unwrap()
}

fn decode(snapshot: &Snapshot) -> RoomState {
    JsonCodec.decode_state(snapshot.bytes()).unwrap()
}

/// A store whose reads take a while, to keep a room in `Loading`.
#[derive(Clone, Default)]
struct SlowStore {
    inner: MemoryStore,
}

impl SnapshotStore for SlowStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.inner.put(key, bytes).await
    }
}

/// A store whose writes take a while, so later writes pile up behind one.
#[derive(Clone, Default)]
struct SlowWriteStore {
    inner: MemoryStore,
}

impl SnapshotStore for SlowWriteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.inner.put(key, bytes).await
    }
}

fn seeded_state(players: usize) -> RoomState {
    let mut state = RoomState::new(1);
    for n in 0..players {
        let id = format!("p{n}");
        state.players.insert(id.clone(), Player::joined(&id));
    }
    state
}

// =========================================================================
// Actions and side effects
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_join_broadcasts_and_persists_immediately() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (tx, mut rx) = session();

    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();
    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();

    let state = decode(&rx.recv().await.unwrap());
    assert_eq!(state.players["p1"], Player::joined("p1"));
    assert_eq!(handle.info().await.unwrap().writes, 1);

    mgr.shutdown_all().await;
    assert_eq!(store.writes(&lobby.snapshot_key("json")).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_move_inside_broadcast_window_is_applied_but_not_sent() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();

    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();
    let joined = decode(&rx.recv().await.unwrap());
    assert_eq!((joined.players["p1"].x, joined.players["p1"].y), (0, 0));

    handle.send_message(conn(1), mv(&JsonCodec, "p1", 3, 4)).await.unwrap();
    let state = handle.snapshot().await.unwrap();
    assert_eq!((state.players["p1"].x, state.players["p1"].y), (3, 4));
    assert!(rx.try_recv().is_err(), "MOVE right after JOIN is held back");

    tokio::time::advance(Duration::from_millis(250)).await;
    handle.send_message(conn(1), mv(&JsonCodec, "p1", 5, 6)).await.unwrap();
    let state = decode(&rx.recv().await.unwrap());
    assert_eq!((state.players["p1"].x, state.players["p1"].y), (5, 6));

    // 250ms is inside the 500ms persistence window.
    assert_eq!(handle.info().await.unwrap().writes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_session_gets_the_broadcast() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (tx1, mut rx1) = session();
    let (tx2, mut rx2) = session();

    let handle = mgr.attach(&lobby, conn(1), tx1).await.unwrap();
    mgr.attach(&lobby, conn(2), tx2).await.unwrap();
    handle.send_message(conn(2), join(&JsonCodec, "p2")).await.unwrap();

    let a = rx1.recv().await.unwrap();
    let b = rx2.recv().await.unwrap();
    assert_eq!(a.bytes(), b.bytes());
    assert!(decode(&a).players.contains_key("p2"));
}

#[tokio::test(start_paused = true)]
async fn test_full_outbound_queue_does_not_detach_session() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (slow_tx, _slow_rx) = mpsc::channel(1);
    let (tx, mut rx) = session();

    let handle = mgr.attach(&lobby, conn(1), slow_tx).await.unwrap();
    mgr.attach(&lobby, conn(2), tx).await.unwrap();

    handle.send_message(conn(2), join(&JsonCodec, "a")).await.unwrap();
    handle.send_message(conn(2), join(&JsonCodec, "b")).await.unwrap();

    assert!(decode(&rx.recv().await.unwrap()).players.contains_key("a"));
    assert!(decode(&rx.recv().await.unwrap()).players.contains_key("b"));

    let info = handle.info().await.unwrap();
    assert_eq!(info.sessions, 2);
    assert_eq!(info.broadcasts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_player_move_and_end_turn_change_nothing() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();

    let before = handle.snapshot().await.unwrap();
    handle.send_message(conn(1), mv(&JsonCodec, "ghost", 1, 1)).await.unwrap();
    handle
        .send_message(conn(1), JsonCodec.encode_action(&Action::EndTurn).unwrap())
        .await
        .unwrap();
    let after = handle.snapshot().await.unwrap();

    assert_eq!(before, after);
    assert!(rx.try_recv().is_err());
    let info = handle.info().await.unwrap();
    assert_eq!((info.broadcasts, info.writes), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_message_is_dropped_and_session_survives() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();

    handle.send_message(conn(1), b"not json".to_vec()).await.unwrap();
    handle
        .send_message(conn(1), br#"{"type":"MOVE","payload":{"id":"p1"}}"#.to_vec())
        .await
        .unwrap();

    let info = handle.info().await.unwrap();
    assert_eq!(info.decode_errors, 2);
    assert_eq!(info.sessions, 1);

    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();
    assert!(decode(&rx.recv().await.unwrap()).players.contains_key("p1"));
}

#[tokio::test(start_paused = true)]
async fn test_message_from_unattached_connection_is_ignored() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (tx, _rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();

    handle.send_message(conn(9), join(&JsonCodec, "intruder")).await.unwrap();
    assert!(handle.snapshot().await.unwrap().players.is_empty());
}

// =========================================================================
// Attach / detach
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_double_attach_and_unknown_detach_are_rejected() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (tx, _rx) = session();

    let handle = mgr.attach(&lobby, conn(1), tx.clone()).await.unwrap();
    let err = mgr.attach(&lobby, conn(1), tx).await.unwrap_err();
    assert!(matches!(err, RoomError::AlreadyAttached(c, _) if c == conn(1)));

    let err = handle.detach(conn(2)).await.unwrap_err();
    assert!(matches!(err, RoomError::NotAttached(c, _) if c == conn(2)));

    handle.detach(conn(1)).await.unwrap();
    assert_eq!(handle.info().await.unwrap().sessions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_detach_keeps_player_in_state() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let lobby = room("lobby");
    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();

    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();
    rx.recv().await.unwrap();
    handle.detach(conn(1)).await.unwrap();

    let info = handle.info().await.unwrap();
    assert_eq!(info.sessions, 0);
    assert_eq!(info.players, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rooms_are_isolated() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let (tx_a, mut rx_a) = session();
    let (tx_b, mut rx_b) = session();

    let a = mgr.attach(&room("a"), conn(1), tx_a).await.unwrap();
    let b = mgr.attach(&room("b"), conn(2), tx_b).await.unwrap();
    a.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();

    rx_a.recv().await.unwrap();
    assert!(b.snapshot().await.unwrap().players.is_empty());
    assert!(rx_b.try_recv().is_err());
    assert_eq!(mgr.room_count(), 2);
}

// =========================================================================
// Persistence and recovery
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_persists_held_back_move_and_restart_recovers_it() {
    let store = MemoryStore::new();
    let lobby = room("lobby");

    {
        let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
        let (tx, mut rx) = session();
        let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();
        handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();
        rx.recv().await.unwrap();
        handle.send_message(conn(1), mv(&JsonCodec, "p1", 7, 8)).await.unwrap();
        mgr.shutdown_all().await;
    }
    // The JOIN write may have been replaced by the shutdown write.
    let stored = store.get(&lobby.snapshot_key("json")).await.unwrap().unwrap();
    let stored = JsonCodec.decode_state(&stored).unwrap();
    assert_eq!((stored.players["p1"].x, stored.players["p1"].y), (7, 8));

    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let (tx, _rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();
    let state = handle.snapshot().await.unwrap();
    assert_eq!((state.players["p1"].x, state.players["p1"].y), (7, 8));
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_snapshot_is_moved_aside_before_starting_empty() {
    let store = MemoryStore::new();
    let lobby = room("lobby");
    let key = lobby.snapshot_key("json");
    store.put(&key, b"{ not a state".to_vec()).await.unwrap();

    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();
    assert!(handle.snapshot().await.unwrap().players.is_empty());

    let moved: Vec<String> = store
        .keys()
        .await
        .into_iter()
        .filter(|k| k.starts_with(&format!("{key}-corrupt-")))
        .collect();
    assert_eq!(moved.len(), 1);
    assert_eq!(
        store.get(&moved[0]).await.unwrap(),
        Some(b"{ not a state".to_vec())
    );

    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();
    assert!(decode(&rx.recv().await.unwrap()).players.contains_key("p1"));

    mgr.shutdown_all().await;
    // The copy is untouched by the room's own writes.
    assert_eq!(
        store.get(&moved[0]).await.unwrap(),
        Some(b"{ not a state".to_vec())
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_load_does_not_start_room_or_overwrite_state() {
    let store = MemoryStore::new();
    let lobby = room("lobby");
    let key = lobby.snapshot_key("json");
    store
        .put(&key, JsonCodec.encode_state(&seeded_state(5)).unwrap())
        .await
        .unwrap();

    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    store.set_unavailable(true);
    let (tx, _rx) = session();
    let err = mgr.attach(&lobby, conn(1), tx).await.unwrap_err();
    assert!(matches!(err, RoomError::Unavailable(_)));
    store.set_unavailable(false);
    assert_eq!(store.writes(&key).await, 1);

    // The next attach loads again and finds every player.
    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();
    assert_eq!(handle.snapshot().await.unwrap().players.len(), 5);

    handle.send_message(conn(1), join(&JsonCodec, "newbie")).await.unwrap();
    assert_eq!(decode(&rx.recv().await.unwrap()).players.len(), 6);
    mgr.shutdown_all().await;

    let stored = store.get(&key).await.unwrap().unwrap();
    let stored = JsonCodec.decode_state(&stored).unwrap();
    assert_eq!(stored.players.len(), 6);
    assert!(stored.players.contains_key("newbie"));
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_keeps_memory_state_and_broadcasts() {
    let store = MemoryStore::new();
    let lobby = room("lobby");

    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();
    store.set_unavailable(true);
    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();

    assert!(decode(&rx.recv().await.unwrap()).players.contains_key("p1"));
    assert!(handle.snapshot().await.unwrap().players.contains_key("p1"));

    mgr.shutdown_all().await;
    assert_eq!(store.writes(&lobby.snapshot_key("json")).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_writes_behind_a_slow_store_keep_only_the_newest() {
    let store = SlowWriteStore::default();
    let lobby = room("lobby");
    let key = lobby.snapshot_key("json");

    let mut mgr = RoomManager::new(JsonCodec, Arc::new(store.clone()), RoomConfig::default());
    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();
    for n in 0..5 {
        handle
            .send_message(conn(1), join(&JsonCodec, &format!("p{n}")))
            .await
            .unwrap();
        rx.recv().await.unwrap();
    }
    assert_eq!(handle.info().await.unwrap().writes, 5);

    mgr.shutdown_all().await;
    // The first write may be in flight; everything after it collapses
    // into one.
    assert!(store.inner.writes(&key).await <= 2);
    let stored = store.inner.get(&key).await.unwrap().unwrap();
    assert_eq!(JsonCodec.decode_state(&stored).unwrap().players.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_commands_sent_while_loading_are_queued() {
    let store = SlowStore::default();
    let lobby = room("lobby");
    store
        .put(&lobby.snapshot_key("json"), JsonCodec.encode_state(&seeded_state(1)).unwrap())
        .await
        .unwrap();

    let mut mgr = RoomManager::new(JsonCodec, Arc::new(store), RoomConfig::default());
    let handle = mgr.handle(&lobby);
    let (tx, mut rx) = session();

    let (attached, info) = tokio::join!(handle.attach(conn(1), tx), handle.info());
    attached.unwrap();
    assert_eq!(info.unwrap().phase, ActorPhase::Ready);

    handle.send_message(conn(1), join(&JsonCodec, "p2")).await.unwrap();
    let state = decode(&rx.recv().await.unwrap());
    assert!(state.players.contains_key("p0"));
    assert!(state.players.contains_key("p2"));
}

#[tokio::test(start_paused = true)]
async fn test_codecs_reach_equal_states_under_separate_keys() {
    let store = MemoryStore::new();
    let lobby = room("lobby");
    let mut json = manager(JsonCodec, &store, RoomConfig::default());
    let mut binary = manager(BincodeCodec, &store, RoomConfig::default());

    let (tx_j, _rx_j) = session();
    let (tx_b, _rx_b) = session();
    let hj = json.attach(&lobby, conn(1), tx_j).await.unwrap();
    let hb = binary.attach(&lobby, conn(1), tx_b).await.unwrap();

    for (id, x, y) in [("p1", 1, 2), ("p2", 3, 4), ("p1", 5, 6)] {
        hj.send_message(conn(1), join(&JsonCodec, id)).await.unwrap();
        hj.send_message(conn(1), mv(&JsonCodec, id, x, y)).await.unwrap();
        hb.send_message(conn(1), join(&BincodeCodec, id)).await.unwrap();
        hb.send_message(conn(1), mv(&BincodeCodec, id, x, y)).await.unwrap();
    }

    let a = hj.snapshot().await.unwrap();
    let b = hb.snapshot().await.unwrap();
    assert_eq!(a.players, b.players);
    assert_eq!(a.board, b.board);
    assert_eq!(a.turn, b.turn);

    json.shutdown_all().await;
    binary.shutdown_all().await;
    assert!(store.writes(&lobby.snapshot_key("json")).await > 0);
    assert!(store.writes(&lobby.snapshot_key("binary")).await > 0);
}

// =========================================================================
// Eviction
// =========================================================================

fn evicting() -> RoomConfig {
    RoomConfig {
        idle_timeout: Some(Duration::from_secs(1)),
        ..RoomConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_room_is_evicted_and_cold_starts_on_next_attach() {
    let store = MemoryStore::new();
    let lobby = room("lobby");
    let mut mgr = manager(JsonCodec, &store, evicting());

    let (tx, mut rx) = session();
    let handle = mgr.attach(&lobby, conn(1), tx).await.unwrap();
    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();
    rx.recv().await.unwrap();
    handle.detach(conn(1)).await.unwrap();

    assert!(mgr.evict_idle().await.is_empty(), "not idle long enough");

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(mgr.evict_idle().await, vec![lobby.clone()]);
    assert_eq!(mgr.room_count(), 0);
    assert!(mgr.get(&lobby).is_none());
    assert!(matches!(
        handle.info().await,
        Err(RoomError::Unavailable(_))
    ));

    let (tx, _rx) = session();
    let handle = mgr.attach(&lobby, conn(2), tx).await.unwrap();
    assert!(handle.snapshot().await.unwrap().players.contains_key("p1"));
}

#[tokio::test(start_paused = true)]
async fn test_room_with_sessions_is_never_evicted() {
    let store = MemoryStore::new();
    let lobby = room("lobby");
    let mut mgr = manager(JsonCodec, &store, evicting());
    let (tx, _rx) = session();
    mgr.attach(&lobby, conn(1), tx).await.unwrap();

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(mgr.evict_idle().await.is_empty());
    assert_eq!(mgr.room_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_is_off_without_idle_timeout() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    mgr.handle(&room("lobby"));

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert!(mgr.evict_idle().await.is_empty());
    assert_eq!(mgr.room_ids(), vec![room("lobby")]);
}

// =========================================================================
// Trailing flush
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_held_back_move_stays_unsent_without_trailing_flush() {
    let store = MemoryStore::new();
    let mut mgr = manager(JsonCodec, &store, RoomConfig::default());
    let (tx, mut rx) = session();
    let handle = mgr.attach(&room("lobby"), conn(1), tx).await.unwrap();

    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();
    rx.recv().await.unwrap();
    handle.send_message(conn(1), mv(&JsonCodec, "p1", 2, 2)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_trailing_flush_sends_held_back_move_once_window_opens() {
    let store = MemoryStore::new();
    let config = RoomConfig {
        trailing_flush: true,
        ..RoomConfig::default()
    };
    let mut mgr = manager(JsonCodec, &store, config);
    let (tx, mut rx) = session();
    let handle = mgr.attach(&room("lobby"), conn(1), tx).await.unwrap();

    handle.send_message(conn(1), join(&JsonCodec, "p1")).await.unwrap();
    rx.recv().await.unwrap();
    let start = tokio::time::Instant::now();
    handle.send_message(conn(1), mv(&JsonCodec, "p1", 2, 2)).await.unwrap();

    let state = decode(&rx.recv().await.unwrap());
    assert_eq!((state.players["p1"].x, state.players["p1"].y), (2, 2));
    assert!(start.elapsed() > Duration::from_millis(200));
}
