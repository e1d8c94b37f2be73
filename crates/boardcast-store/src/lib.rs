//! Durable snapshot storage for Boardcast.
//!
//! The room layer treats storage as one opaque blob slot per room: it
//! reads the slot once when a room actor starts and overwrites it whenever
//! the persistence policy says so. This crate provides the
//! [`SnapshotStore`] contract and two implementations:
//!
//! - [`MemoryStore`]: process-local, shared between clones. Used by tests
//!   and by servers started without a data directory.
//! - [`FileStore`]: one file per key under a data directory, replaced
//!   atomically on every write.

mod error;
mod file;
mod memory;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;

use std::future::Future;

/// Key/value persistence for encoded room snapshots.
///
/// The futures are `Send` so a room can hand writes to a background task
/// and never wait on storage I/O itself.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Reads the blob stored under `key`, or `None` if nothing was ever
    /// written there.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Replaces the blob stored under `key`.
    fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
