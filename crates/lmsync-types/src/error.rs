use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid node role: {0}")]
    InvalidRole(String),

    #[error("machine context has no agent id")]
    MissingAgent,
}
