//! Ballot validation errors

use std::path::PathBuf;
use thiserror::Error;

use crate::error_code::ErrorCode;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("ballot has no candidates")]
    NoCandidates,

    #[error("duplicate candidate: {0}")]
    DuplicateCandidate(String),

    #[error("duplicate voter: {0}")]
    DuplicateVoter(String),

    #[error("invalid weight for {voter}: {value} (must be finite and >= 0)")]
    InvalidWeight { voter: String, value: f64 },

    #[error("voter {voter} ranks unknown candidate {candidate}")]
    UnknownCandidate { voter: String, candidate: String },

    #[error("voter {voter} ranks {candidate} more than once")]
    RepeatedCandidate { voter: String, candidate: String },

    #[error("voter {0} is not listed on the ballot")]
    UnlistedVoter(String),

    #[error("listed voter weight {listed} exceeds eligible weight {eligible}")]
    ExcessWeight { listed: String, eligible: String },

    #[error("quorum threshold must be within [0, 1]: {0}")]
    InvalidQuorum(f64),

    #[error("invalid ballot: {reason}")]
    Parse { reason: String },

    #[error("failed to read ballot {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TallyError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TallyError::Read { .. } => ErrorCode::IoError,
            _ => ErrorCode::SchemaInvalid,
        }
    }
}
