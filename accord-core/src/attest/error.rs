//! Attestation error types

use std::path::PathBuf;
use thiserror::Error;

use crate::error_code::ErrorCode;

#[derive(Error, Debug)]
pub enum AttestError {
    #[error("failed to read key {}", path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key in {}: {reason}", path.display())]
    KeyParse { path: PathBuf, reason: String },

    #[error("failed to write key {}", path.display())]
    KeyWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to overwrite existing key {} (use --force)", path.display())]
    KeyExists { path: PathBuf },

    #[error("key encoding failed: {0}")]
    KeyEncode(String),

    /// Envelope JSON or base64 could not be decoded
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("failed to encode statement")]
    Encode(#[from] serde_json::Error),
}

impl AttestError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AttestError::KeyRead { .. }
            | AttestError::KeyWrite { .. }
            | AttestError::KeyExists { .. } => ErrorCode::IoError,
            AttestError::KeyParse { .. }
            | AttestError::KeyEncode(_)
            | AttestError::MalformedEnvelope { .. } => ErrorCode::SigInvalid,
            AttestError::Encode(_) => ErrorCode::StatementInvalid,
        }
    }

    pub fn log_if_security_critical(&self) {
        if let AttestError::MalformedEnvelope { .. } = self {
            tracing::error!(target: "security", "ENVELOPE REJECTED: {}", self);
        }
    }
}
