//! Error types and error codes for Vitrine
//!
//! This module defines:
//! - `VitrineError`: the error taxonomy shared by every layer
//! - `ErrorCode`: structured error codes for API responses

use serde::{Deserialize, Serialize};

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum VitrineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("exhibit '{0}' is not running")]
    NotRunning(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("lock failure: {0}")]
    LockFailure(String),

    #[error("invalid exhibit: {0}")]
    Validation(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VitrineError {
    /// Whether the failed operation may succeed when retried unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VitrineError::Transient(_) | VitrineError::Timeout(_) | VitrineError::Storage(_)
        )
    }

    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            VitrineError::NotFound(_) => RESOURCE_NOT_FOUND,
            VitrineError::AlreadyExists(_) => RESOURCE_CONFLICT,
            VitrineError::NotRunning(_) => EXHIBIT_NOT_RUNNING,
            VitrineError::Timeout(_) => TIMEOUT,
            VitrineError::Validation(_) => PARAMETER_VALIDATE_ERROR,
            VitrineError::IllegalState(_) => ILLEGAL_STATE,
            VitrineError::LockFailure(_) => LOCK_FAILURE,
            VitrineError::Storage(_) => DATA_ACCESS_ERROR,
            VitrineError::Transient(_)
            | VitrineError::Fatal(_)
            | VitrineError::Cancelled
            | VitrineError::Serialization(_) => SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, VitrineError>;

/// Error code structure for API responses
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const DATA_ACCESS_ERROR: ErrorCode<'static> = ErrorCode {
    code: 10002,
    message: "data access error",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const RESOURCE_CONFLICT: ErrorCode<'static> = ErrorCode {
    code: 20005,
    message: "resource conflict",
};

pub const ILLEGAL_STATE: ErrorCode<'static> = ErrorCode {
    code: 20006,
    message: "illegal state",
};

pub const EXHIBIT_NOT_RUNNING: ErrorCode<'static> = ErrorCode {
    code: 30001,
    message: "exhibit not running",
};

pub const LOCK_FAILURE: ErrorCode<'static> = ErrorCode {
    code: 30002,
    message: "lock failure",
};

pub const TIMEOUT: ErrorCode<'static> = ErrorCode {
    code: 30003,
    message: "timeout",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};
