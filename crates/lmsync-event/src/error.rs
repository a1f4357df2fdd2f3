use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unknown payload type: {0}")]
    UnknownPayloadType(String),

    #[error("invalid {payload_type} payload: {reason}")]
    InvalidPayload { payload_type: String, reason: String },

    #[error("unsupported event frame version: {0}")]
    UnsupportedFrameVersion(u8),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type EventResult<T> = Result<T, EventError>;
