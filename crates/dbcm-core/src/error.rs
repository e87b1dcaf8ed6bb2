use crate::types::{OrderId, Progress};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbcmError {
    #[error("permission denied: '{actor}' cannot {operation}")]
    PermissionDenied { actor: String, operation: String },

    #[error("validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("invalid transition: cannot {operation} order in state '{current}'")]
    InvalidTransition {
        operation: String,
        current: Progress,
    },

    #[error("conflict on order {id}: progress changed to '{current}'")]
    Conflict { id: OrderId, current: Progress },

    #[error("invalid progress: {0}")]
    InvalidProgress(String),

    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    #[error("invalid order kind: {0}")]
    InvalidOrderKind(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbcmError>;
