//! Error types for the storage layer.

/// Errors that can occur while reading or writing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying filesystem operation failed.
    #[error("store i/o failed for key {key:?}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The key can't be mapped onto this store (empty, or escapes the
    /// data directory).
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
}
