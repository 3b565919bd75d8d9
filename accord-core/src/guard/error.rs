//! Scope guard errors
//!
//! Every variant is a denial. None of them is retryable; callers propagate
//! them unchanged.

use std::path::PathBuf;
use thiserror::Error;

use super::resolve::PathViolation;
use crate::error_code::ErrorCode;

#[derive(Error, Debug)]
pub enum ScopeError {
    /// The path failed containment before scope matching
    #[error("path forbidden: {path}: {violation}")]
    PathForbidden {
        path: String,
        #[source]
        violation: PathViolation,
    },

    /// The path resolved inside the base but no write scope matches it
    #[error("write not allowed by fs_write_scopes: {path}")]
    OutOfScope { path: String },

    #[error("endpoint not allowed: {endpoint}")]
    EndpointNotAllowed { endpoint: String },

    #[error("invalid charter: {}", issues.join("; "))]
    InvalidCharter { issues: Vec<String> },

    /// The atomic write failed or did not survive re-validation
    #[error("guarded write to {} failed: {reason}", path.display())]
    WriteFailed { path: PathBuf, reason: String },

    #[error("failed to read charter {}", path.display())]
    CharterRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScopeError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ScopeError::PathForbidden { .. } => ErrorCode::PathForbidden,
            ScopeError::OutOfScope { .. } | ScopeError::EndpointNotAllowed { .. } => {
                ErrorCode::ScopeDenied
            }
            ScopeError::InvalidCharter { .. } => ErrorCode::SchemaInvalid,
            ScopeError::WriteFailed { .. } | ScopeError::CharterRead { .. } => ErrorCode::IoError,
        }
    }

    /// Denials that indicate an attempted escape are logged to the security target
    pub fn log_if_security_critical(&self) {
        match self {
            ScopeError::PathForbidden { .. } => {
                tracing::error!(target: "security", "SCOPE VIOLATION: {}", self);
            }
            ScopeError::OutOfScope { .. } | ScopeError::EndpointNotAllowed { .. } => {
                tracing::warn!("denied: {}", self);
            }
            _ => {}
        }
    }
}
