use lmsync_event::EventError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("remote error: status={status}, message={message}")]
    Remote { status: u16, message: String },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
