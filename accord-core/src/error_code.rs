//! Stable error codes exposed to automation
//!
//! Every failure surfaced by the core carries one of these codes so that
//! downstream tooling can branch without parsing messages. The string forms
//! are part of the wire contract and must never change.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Ok,
    SigInvalid,
    SchemaInvalid,
    DigestMismatch,
    StatementInvalid,
    PathForbidden,
    /// Path resolved cleanly but no write scope or endpoint allows it
    ScopeDenied,
    HashRace,
    QuorumFailed,
    MalformedMetadata,
    IoError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::SigInvalid => "SIG_INVALID",
            ErrorCode::SchemaInvalid => "SCHEMA_INVALID",
            ErrorCode::DigestMismatch => "DIGEST_MISMATCH",
            ErrorCode::StatementInvalid => "STATEMENT_INVALID",
            ErrorCode::PathForbidden => "PATH_FORBIDDEN",
            ErrorCode::ScopeDenied => "SCOPE_DENIED",
            ErrorCode::HashRace => "HASH_RACE",
            ErrorCode::QuorumFailed => "QUORUM_FAILED",
            ErrorCode::MalformedMetadata => "MALFORMED_METADATA",
            ErrorCode::IoError => "IO_ERROR",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::Ok)
    }

    /// Race failures are the only ones a caller may retry automatically,
    /// and only by re-running the whole build.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::HashRace)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_display() {
        for code in [
            ErrorCode::Ok,
            ErrorCode::SigInvalid,
            ErrorCode::SchemaInvalid,
            ErrorCode::DigestMismatch,
            ErrorCode::StatementInvalid,
            ErrorCode::PathForbidden,
            ErrorCode::ScopeDenied,
            ErrorCode::HashRace,
            ErrorCode::QuorumFailed,
            ErrorCode::MalformedMetadata,
            ErrorCode::IoError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_only_hash_race_is_retryable() {
        assert!(ErrorCode::HashRace.is_retryable());
        assert!(!ErrorCode::PathForbidden.is_retryable());
        assert!(!ErrorCode::SigInvalid.is_retryable());
    }
}
