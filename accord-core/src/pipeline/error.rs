use std::path::PathBuf;
use thiserror::Error;

use crate::attest::AttestError;
use crate::canonical::CanonicalError;
use crate::error_code::ErrorCode;
use crate::guard::ScopeError;
use crate::tally::TallyError;

/// Any failure along a pipeline run; flattened into a record at the edge
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Attest(#[from] AttestError),

    #[error(transparent)]
    Tally(#[from] TallyError),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} changed on disk during the build")]
    HashRace { what: &'static str },

    #[error("quorum not met: participating {participating} of eligible {eligible} (threshold {threshold})")]
    QuorumFailed {
        participating: String,
        eligible: String,
        threshold: f64,
    },
}

impl PipelineError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            PipelineError::Canonical(e) => e.error_code(),
            PipelineError::Scope(e) => e.error_code(),
            PipelineError::Attest(e) => e.error_code(),
            PipelineError::Tally(e) => e.error_code(),
            PipelineError::Read { .. } => ErrorCode::IoError,
            PipelineError::HashRace { .. } => ErrorCode::HashRace,
            PipelineError::QuorumFailed { .. } => ErrorCode::QuorumFailed,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        match self {
            PipelineError::Canonical(e) => e.messages(),
            other => vec![other.to_string()],
        }
    }
}
