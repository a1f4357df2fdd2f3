use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use lmsync_types::{AgentId, FacilityId};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("agent not registered: {0}")]
    AgentNotRegistered(AgentId),

    #[error("token facility {token} does not match registered facility {registered}")]
    FacilityMismatch {
        token: FacilityId,
        registered: FacilityId,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] lmsync_protocol::ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] lmsync_store::StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] lmsync_sync::SyncError),

    #[error("pack error: {0}")]
    Pack(#[from] lmsync_pack::PackError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::FacilityMismatch { .. } => StatusCode::UNAUTHORIZED,
            Self::AgentNotRegistered(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) | Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Pack(e) if e.is_corruption() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ServerError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServerError::AgentNotRegistered(AgentId::random()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServerError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServerError::Pack(lmsync_pack::PackError::Truncated { offset: 0 }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
