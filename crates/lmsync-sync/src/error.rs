use thiserror::Error;

use lmsync_types::EventId;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] lmsync_store::StoreError),

    #[error("pack error: {0}")]
    Pack(#[from] lmsync_pack::PackError),

    #[error("event error: {0}")]
    Event(#[from] lmsync_event::EventError),

    #[error("protocol error: {0}")]
    Protocol(#[from] lmsync_protocol::ProtocolError),

    #[error("machine token error: {0}")]
    Token(#[from] lmsync_crypto::TokenError),

    #[error("invalid machine context: {0}")]
    Context(#[from] lmsync_types::TypeError),

    #[error("agent is not activated")]
    NotActivated,

    #[error("no transport to the online web is configured")]
    NoTransport,

    #[error("a sync cycle is already running")]
    SyncInProgress,

    #[error("event not found: {0}")]
    EventNotFound(EventId),

    #[error("no replayer registered for payload type {0}")]
    NoReplayer(String),

    #[error("replay of {payload_type} failed: {reason}")]
    ReplayFailed {
        payload_type: String,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("status file {}: {reason}", .path.display())]
    StatusFile {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn replay(payload_type: &str, reason: impl Into<String>) -> Self {
        Self::ReplayFailed {
            payload_type: payload_type.to_string(),
            reason: reason.into(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
