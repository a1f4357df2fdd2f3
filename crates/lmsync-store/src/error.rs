use lmsync_event::EventError;
use lmsync_pack::PackError;

/// Errors from event store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Journal framing failed (corrupt or truncated entry).
    #[error("journal framing error: {0}")]
    Pack(#[from] PackError),

    /// An event frame in the journal could not be decoded.
    #[error("event codec error: {0}")]
    Event(#[from] EventError),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The journal cannot be replayed into a consistent state.
    #[error("corrupt journal at offset {offset}: {reason}")]
    CorruptJournal { offset: u64, reason: String },

    /// Another process owns the journal.
    #[error(
        "store is in use by another process (pid {}); lock file {}",
        .pid.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
        .path.display()
    )]
    Locked {
        path: std::path::PathBuf,
        pid: Option<u32>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
