//! Canonicalization error types

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::error_code::ErrorCode;

/// Errors raised while turning an artifact into a canonical statement
#[derive(Error, Debug)]
pub enum CanonicalError {
    /// The metadata block is missing, unparsable or lacks required fields
    #[error("malformed metadata: {reason}")]
    MalformedMetadata { reason: String },

    /// One or more materials could not be resolved or did not match
    #[error("material check failed: {}", format_issues(.issues))]
    Materials { issues: Vec<MaterialIssue> },

    /// The file changed while it was being hashed
    #[error("file changed during hashing: {}", path.display())]
    HashRace { path: PathBuf },

    /// Failed to read a file that had to be hashed
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CanonicalError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        CanonicalError::MalformedMetadata {
            reason: reason.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            CanonicalError::MalformedMetadata { .. } => ErrorCode::MalformedMetadata,
            CanonicalError::Materials { issues } => issues
                .iter()
                .map(MaterialIssue::error_code)
                .min_by_key(|code| material_code_rank(*code))
                .unwrap_or(ErrorCode::DigestMismatch),
            CanonicalError::HashRace { .. } => ErrorCode::HashRace,
            CanonicalError::Io { .. } => ErrorCode::IoError,
        }
    }

    /// Flatten into human-readable lines for structured records
    pub fn messages(&self) -> Vec<String> {
        match self {
            CanonicalError::Materials { issues } => {
                issues.iter().map(|issue| issue.to_string()).collect()
            }
            other => vec![other.to_string()],
        }
    }
}

// Races first, then containment, then mismatches.
fn material_code_rank(code: ErrorCode) -> u8 {
    match code {
        ErrorCode::HashRace => 0,
        ErrorCode::PathForbidden => 1,
        ErrorCode::MalformedMetadata => 2,
        ErrorCode::DigestMismatch => 3,
        _ => 4,
    }
}

fn format_issues(issues: &[MaterialIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single failed material
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialIssue {
    pub name: String,
    pub kind: MaterialIssueKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialIssueKind {
    MissingName,
    Forbidden(String),
    NotFound,
    RemoteWithoutDigest,
    DigestMismatch { expected: String, actual: String },
    HashRace,
}

impl MaterialIssue {
    pub fn new(name: impl Into<String>, kind: MaterialIssueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self.kind {
            MaterialIssueKind::MissingName | MaterialIssueKind::RemoteWithoutDigest => {
                ErrorCode::MalformedMetadata
            }
            MaterialIssueKind::Forbidden(_) => ErrorCode::PathForbidden,
            MaterialIssueKind::NotFound | MaterialIssueKind::DigestMismatch { .. } => {
                ErrorCode::DigestMismatch
            }
            MaterialIssueKind::HashRace => ErrorCode::HashRace,
        }
    }
}

impl fmt::Display for MaterialIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MaterialIssueKind::MissingName => write!(f, "material missing name"),
            MaterialIssueKind::Forbidden(reason) => {
                write!(f, "material path forbidden: {}: {}", self.name, reason)
            }
            MaterialIssueKind::NotFound => write!(f, "material path not found: {}", self.name),
            MaterialIssueKind::RemoteWithoutDigest => {
                write!(f, "remote material requires digest: {}", self.name)
            }
            MaterialIssueKind::DigestMismatch { expected, actual } => write!(
                f,
                "materials digest mismatch for {} (expected {}, actual {})",
                self.name, expected, actual
            ),
            MaterialIssueKind::HashRace => {
                write!(f, "file changed during hashing: {}", self.name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_error_code_prefers_race() {
        let err = CanonicalError::Materials {
            issues: vec![
                MaterialIssue::new(
                    "a.md",
                    MaterialIssueKind::DigestMismatch {
                        expected: "00".into(),
                        actual: "11".into(),
                    },
                ),
                MaterialIssue::new("b.md", MaterialIssueKind::HashRace),
            ],
        };
        assert_eq!(err.error_code(), ErrorCode::HashRace);
        assert_eq!(err.messages().len(), 2);
    }

    #[test]
    fn test_forbidden_maps_to_path_forbidden() {
        let issue = MaterialIssue::new("../x", MaterialIssueKind::Forbidden("escapes".into()));
        assert_eq!(issue.error_code(), ErrorCode::PathForbidden);
    }
}
