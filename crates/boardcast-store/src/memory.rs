//! In-memory [`SnapshotStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::{SnapshotStore, StoreError};

#[derive(Debug, Default)]
struct Slot {
    bytes: Vec<u8>,
    writes: usize,
}

/// A [`SnapshotStore`] backed by a `HashMap`.
///
/// Cloning is cheap and every clone sees the same data, which is how tests
/// simulate "the process restarted but the storage survived": drop every
/// room, keep a clone of the store, start new rooms against it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many successful `put`s have landed on `key`.
    pub async fn writes(&self, key: &str) -> usize {
        self.slots
            .lock()
            .await
            .get(key)
            .map_or(0, |slot| slot.writes)
    }

    /// Every key currently stored, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Makes every subsequent `get` and `put` fail (or succeed again), to
    /// exercise the "store unavailable" path. Stored data is kept.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self, key: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                key: key.to_owned(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "store marked unavailable",
                ),
            });
        }
        Ok(())
    }
}

impl SnapshotStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_available(key)?;
        Ok(self
            .slots
            .lock()
            .await
            .get(key)
            .map(|slot| slot.bytes.clone()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.check_available(key)?;
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_owned()).or_default();
        slot.bytes = bytes;
        slot.writes += 1;
        Ok(())
    }
}
