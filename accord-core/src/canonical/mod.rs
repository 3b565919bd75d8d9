//! Canonicalizer
//!
//! Turns an artifact with an embedded metadata block into a canonical
//! in-toto statement with exactly one subject: the artifact itself.

pub mod cache;
pub mod digest;
pub mod error;
pub mod header;
pub mod json;
pub mod materials;
pub mod statement;

use std::path::{Path, PathBuf};
use tracing::debug;

pub use cache::DigestCache;
pub use digest::{content_digest, hash_file_stable, sha256_hex, SHA256};
pub use error::{CanonicalError, MaterialIssue, MaterialIssueKind};
pub use statement::{
    DigestSet, GovernanceLink, Material, Predicate, Process, Producer, Statement, Subject, Tool,
    STATEMENT_TYPE_V1,
};

/// Builds statements for artifacts whose local materials live under `base_dir`
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    base_dir: PathBuf,
}

impl Canonicalizer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Canonicalize `bytes`, naming the subject `name` unless the header names it
    pub fn canonicalize(&self, name: &str, bytes: &[u8]) -> Result<Statement, CanonicalError> {
        self.build(name, bytes, None)
    }

    /// Same as [`Canonicalizer::canonicalize`], hashing materials through `cache`
    pub fn canonicalize_cached(
        &self,
        name: &str,
        bytes: &[u8],
        cache: &mut DigestCache,
    ) -> Result<Statement, CanonicalError> {
        self.build(name, bytes, Some(cache))
    }

    fn build(
        &self,
        name: &str,
        bytes: &[u8],
        cache: Option<&mut DigestCache>,
    ) -> Result<Statement, CanonicalError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| CanonicalError::malformed("artifact is not valid UTF-8"))?;
        let header = header::extract_header(text)?;

        let statement_type = header
            .statement_type
            .unwrap_or_else(|| STATEMENT_TYPE_V1.to_string());
        if !statement::is_supported_statement_type(&statement_type) {
            return Err(CanonicalError::malformed(format!(
                "unsupported statement type: {statement_type}"
            )));
        }
        if !statement::is_valid_predicate_type(&header.predicate_type) {
            return Err(CanonicalError::malformed(format!(
                "predicateType must be an https URI: {}",
                header.predicate_type
            )));
        }

        let mut predicate = header.predicate;
        materials::resolve_materials(&mut predicate.materials, &self.base_dir, cache)?;

        let subject_name = header.subject_name.unwrap_or_else(|| name.to_string());
        let mut digest = DigestSet::new();
        digest.insert(SHA256.to_string(), content_digest(bytes));

        let mut statement = Statement::new(
            Subject {
                name: subject_name,
                digest,
            },
            header.predicate_type,
            predicate,
        );
        statement.statement_type = statement_type;

        debug!(
            subject = %statement.subject[0].name,
            materials = statement.predicate.materials.len(),
            "canonicalized artifact"
        );
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use std::fs;
    use tempfile::TempDir;

    fn doc(materials: &str) -> String {
        format!(
            "<!--\nprovenance:\n  predicateType: https://accord.ai/schemas/doc@v1\n  predicate:\n    produced_by:\n      agent_id: AGENT-PO01\n      agent_role: orchestrator\n    process:\n      toolchain:\n        - name: accord\n          version: 0.1\n{materials}-->\n\n# Policy\n\nBody.\n"
        )
    }

    #[test]
    fn test_canonicalize_fills_subject_and_materials() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("input.md"), "source").unwrap();
        let text = doc("  materials:\n    - name: input.md\n");

        let canonicalizer = Canonicalizer::new(dir.path());
        let statement = canonicalizer.canonicalize("org/policy/p.md", text.as_bytes()).unwrap();

        assert_eq!(statement.statement_type, STATEMENT_TYPE_V1);
        assert_eq!(statement.subject.len(), 1);
        assert_eq!(statement.subject[0].name, "org/policy/p.md");
        assert_eq!(
            statement.subject[0].sha256(),
            Some(content_digest(text.as_bytes()).as_str())
        );
        assert_eq!(
            statement.predicate.materials[0].sha256(),
            Some(sha256_hex(b"source").as_str())
        );
        let tool = &statement.predicate.process.as_ref().unwrap().toolchain[0];
        assert_eq!(tool.version.as_deref(), Some("0.1"));
    }

    #[test]
    fn test_filling_material_digest_keeps_subject_digest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("input.md"), "source").unwrap();
        let canonicalizer = Canonicalizer::new(dir.path());

        let unfilled = doc("  materials:\n    - name: input.md\n      digest: {}\n");
        let filled = doc(&format!(
            "  materials:\n    - name: input.md\n      digest: {{sha256: {}}}\n",
            sha256_hex(b"source")
        ));
        let a = canonicalizer.canonicalize("p.md", unfilled.as_bytes()).unwrap();
        let b = canonicalizer.canonicalize("p.md", filled.as_bytes()).unwrap();
        assert_eq!(a.subject[0].digest, b.subject[0].digest);
    }

    #[test]
    fn test_rejects_non_https_predicate_type() {
        let dir = TempDir::new().unwrap();
        let text = doc("").replace("https://accord.ai", "http://accord.ai");
        let err = Canonicalizer::new(dir.path())
            .canonicalize("p.md", text.as_bytes())
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::MalformedMetadata);
    }

    #[test]
    fn test_deterministic_for_identical_input() {
        let dir = TempDir::new().unwrap();
        let text = doc("");
        let canonicalizer = Canonicalizer::new(dir.path());
        let a = canonicalizer.canonicalize("p.md", text.as_bytes()).unwrap();
        let b = canonicalizer.canonicalize("p.md", text.as_bytes()).unwrap();
        assert_eq!(a.to_canonical_bytes().unwrap(), b.to_canonical_bytes().unwrap());
    }
}
