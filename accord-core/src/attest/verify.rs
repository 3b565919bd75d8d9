//! Envelope verification
//!
//! Produces a structured result rather than an error. Nothing in the payload
//! is inspected until a signature has verified.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

use super::envelope::Envelope;
use super::PAYLOAD_TYPE;
use crate::canonical::digest::{content_digest, is_sha256_hex, SHA256};
use crate::canonical::materials::check_materials;
use crate::canonical::statement::{is_supported_statement_type, is_valid_predicate_type};
use crate::canonical::{CanonicalError, Statement};
use crate::error_code::ErrorCode;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub signature_ok: bool,
    pub schema_ok: bool,
    pub digest_ok: bool,
    pub statement_ok: bool,
    pub error_code: ErrorCode,
    pub errors: Vec<String>,

    /// Key id of the first signature that verified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    #[serde(skip)]
    pub statement: Option<Statement>,
}

impl VerifyResult {
    pub fn ok(&self) -> bool {
        self.signature_ok && self.schema_ok && self.digest_ok && self.statement_ok
    }

    /// A failed result with only `error_code` set, for inputs that never
    /// reached the checks (unreadable envelope, bad key)
    pub fn rejected(error_code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            signature_ok: false,
            schema_ok: false,
            digest_ok: false,
            statement_ok: false,
            error_code,
            errors: vec![error.into()],
            key_id: None,
            statement: None,
        }
    }

    fn finish(mut self) -> Self {
        self.error_code = if !self.signature_ok {
            ErrorCode::SigInvalid
        } else if !self.schema_ok {
            ErrorCode::SchemaInvalid
        } else if !self.digest_ok {
            ErrorCode::DigestMismatch
        } else if !self.statement_ok {
            ErrorCode::StatementInvalid
        } else {
            ErrorCode::Ok
        };
        self
    }

    pub fn log_if_security_critical(&self) {
        match self.error_code {
            ErrorCode::SigInvalid | ErrorCode::DigestMismatch => {
                tracing::error!(
                    target: "security",
                    "INTEGRITY VIOLATION: {}: {}",
                    self.error_code,
                    self.errors.join("; ")
                );
            }
            ErrorCode::Ok => {}
            _ => warn!(code = %self.error_code, "verification failed"),
        }
    }
}

fn signature_matches(envelope: &Envelope, public_key: &VerifyingKey) -> Option<String> {
    let message = envelope.pae();
    envelope.signatures.iter().find_map(|entry| {
        let signature = Signature::from_slice(&entry.sig).ok()?;
        public_key
            .verify(&message, &signature)
            .ok()
            .map(|_| entry.key_id.clone())
    })
}

fn schema_errors(value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(object) = value.as_object() else {
        return vec!["payload is not a JSON object".to_string()];
    };

    match object.get("_type").and_then(Value::as_str) {
        Some(t) if is_supported_statement_type(t) => {}
        Some(t) => errors.push(format!("unsupported _type: {t}")),
        None => errors.push("'_type' is a required property".to_string()),
    }

    match object.get("subject") {
        Some(Value::Array(subjects)) if !subjects.is_empty() => {
            for (i, subject) in subjects.iter().enumerate() {
                let named = subject
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| !n.is_empty());
                if !subject.is_object() || !named {
                    errors.push(format!("subject[{i}] must be an object with a name"));
                }
            }
        }
        Some(Value::Array(_)) => errors.push("subject must not be empty".to_string()),
        Some(_) => errors.push("subject must be an array".to_string()),
        None => errors.push("'subject' is a required property".to_string()),
    }

    match object.get("predicateType").and_then(Value::as_str) {
        Some(t) if is_valid_predicate_type(t) => {}
        Some(t) => errors.push(format!("predicateType must be an https URI: {t}")),
        None => errors.push("'predicateType' is a required property".to_string()),
    }

    match object.get("predicate") {
        Some(Value::Object(predicate)) => {
            let has_agent = predicate
                .get("produced_by")
                .and_then(|p| p.get("agent_id"))
                .and_then(Value::as_str)
                .is_some_and(|id| !id.is_empty());
            if !has_agent {
                errors.push("predicate.produced_by.agent_id is required".to_string());
            }
        }
        Some(_) => errors.push("predicate must be an object".to_string()),
        None => errors.push("'predicate' is a required property".to_string()),
    }
    errors
}

fn statement_errors(statement: &Statement) -> Vec<String> {
    let mut errors = Vec::new();

    let mut names = BTreeSet::new();
    for subject in &statement.subject {
        if !names.insert(subject.name.as_str()) {
            errors.push(format!("duplicate subject name: {}", subject.name));
        }
    }

    let digests = statement
        .subject
        .iter()
        .map(|s| (&s.name, &s.digest))
        .chain(statement.predicate.materials.iter().map(|m| (&m.name, &m.digest)));
    for (name, digest) in digests {
        for (algorithm, value) in digest {
            if algorithm == SHA256 && !is_sha256_hex(value) {
                errors.push(format!("digest for {name} is not 64 lowercase hex"));
            }
        }
    }

    if statement.predicate.materials.iter().any(|m| m.name.is_empty()) {
        errors.push("material missing name".to_string());
    }
    if !statement.is_canonically_ordered() {
        errors.push("subjects or materials are not in canonical order".to_string());
    }
    errors
}

/// Verify `envelope` under `public_key` against the current artifact bytes
pub fn verify(envelope: &Envelope, public_key: &VerifyingKey, artifact: &[u8]) -> VerifyResult {
    let mut result = VerifyResult {
        errors: Vec::new(),
        ..VerifyResult::rejected(ErrorCode::SigInvalid, "")
    };

    if envelope.payload_type != PAYLOAD_TYPE {
        result
            .errors
            .push(format!("unexpected payloadType: {}", envelope.payload_type));
        return result.finish();
    }
    match signature_matches(envelope, public_key) {
        Some(key_id) => {
            result.signature_ok = true;
            result.key_id = Some(key_id);
        }
        None => {
            result.errors.push("signature verification failed".to_string());
            return result.finish();
        }
    }

    let value: Value = match serde_json::from_slice(&envelope.payload) {
        Ok(value) => value,
        Err(e) => {
            result.errors.push(format!("payload is not valid JSON: {e}"));
            return result.finish();
        }
    };

    let schema = schema_errors(&value);
    result.schema_ok = schema.is_empty();
    result.errors.extend(schema);

    let claimed = value
        .get("subject")
        .and_then(|s| s.get(0))
        .and_then(|s| s.get("digest"))
        .and_then(|d| d.get(SHA256))
        .and_then(Value::as_str);
    let actual = content_digest(artifact);
    match claimed {
        Some(claimed) if claimed == actual => result.digest_ok = true,
        Some(claimed) => result.errors.push(format!(
            "subject digest mismatch (expected {claimed}, actual {actual})"
        )),
        None => result.errors.push("subject digest missing".to_string()),
    }

    if result.schema_ok {
        match serde_json::from_value::<Statement>(value) {
            Ok(statement) => {
                let problems = statement_errors(&statement);
                result.statement_ok = problems.is_empty();
                result.errors.extend(problems);
                result.statement = Some(statement);
            }
            Err(e) => {
                result.schema_ok = false;
                result.errors.push(format!("statement does not decode: {e}"));
            }
        }
    }

    let result = result.finish();
    if result.ok() {
        info!(key_id = ?result.key_id, "envelope verified");
    } else {
        result.log_if_security_critical();
    }
    result
}

/// Re-check local material digests from disk
pub fn verify_materials(statement: &Statement, base_dir: &Path) -> Result<(), CanonicalError> {
    check_materials(&statement.predicate.materials, base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::{build, AttestationKey};
    use crate::canonical::Canonicalizer;
    use tempfile::TempDir;

    const DOC: &str = "<!--\nprovenance:\n  predicateType: https://accord.ai/schemas/doc@v1\n  predicate:\n    produced_by: {agent_id: AGENT-PO01}\n-->\n# Doc\n";

    fn signed(dir: &TempDir) -> (Envelope, AttestationKey) {
        let key = AttestationKey::from_seed([9u8; 32]).unwrap();
        let statement = Canonicalizer::new(dir.path())
            .canonicalize("doc.md", DOC.as_bytes())
            .unwrap();
        (build(&statement, &key).unwrap(), key)
    }

    #[test]
    fn test_roundtrip_ok() {
        let dir = TempDir::new().unwrap();
        let (envelope, key) = signed(&dir);
        let result = verify(&envelope, &key.verifying_key(), DOC.as_bytes());
        assert!(result.ok(), "{:?}", result.errors);
        assert_eq!(result.error_code, ErrorCode::Ok);
        assert_eq!(result.key_id.as_deref(), Some(key.key_id()));
    }

    #[test]
    fn test_tampered_artifact() {
        let dir = TempDir::new().unwrap();
        let (envelope, key) = signed(&dir);
        let tampered = DOC.replace("# Doc", "# Doc (edited)");
        let result = verify(&envelope, &key.verifying_key(), tampered.as_bytes());
        assert!(result.signature_ok && result.schema_ok);
        assert!(!result.digest_ok);
        assert_eq!(result.error_code, ErrorCode::DigestMismatch);
    }

    #[test]
    fn test_wrong_key_reports_everything_false() {
        let dir = TempDir::new().unwrap();
        let (envelope, _) = signed(&dir);
        let other = AttestationKey::from_seed([10u8; 32]).unwrap();
        let result = verify(&envelope, &other.verifying_key(), DOC.as_bytes());
        assert!(!result.signature_ok && !result.schema_ok && !result.digest_ok && !result.statement_ok);
        assert_eq!(result.error_code, ErrorCode::SigInvalid);
    }

    #[test]
    fn test_tampered_payload_breaks_signature() {
        let dir = TempDir::new().unwrap();
        let (mut envelope, key) = signed(&dir);
        envelope.payload.push(b' ');
        let result = verify(&envelope, &key.verifying_key(), DOC.as_bytes());
        assert_eq!(result.error_code, ErrorCode::SigInvalid);
    }

    #[test]
    fn test_cosigned_envelope_verifies_under_either_key() {
        let dir = TempDir::new().unwrap();
        let (envelope, first) = signed(&dir);
        let second = AttestationKey::from_seed([11u8; 32]).unwrap();
        let both = envelope.cosign(&second);
        assert!(verify(&both, &first.verifying_key(), DOC.as_bytes()).ok());
        let result = verify(&both, &second.verifying_key(), DOC.as_bytes());
        assert_eq!(result.key_id.as_deref(), Some(second.key_id()));
    }

    #[test]
    fn test_schema_failure_outranks_digest() {
        let key = AttestationKey::from_seed([12u8; 32]).unwrap();
        let payload = br#"{"_type":"https://in-toto.io/Statement/v2","subject":[],"predicateType":"x","predicate":{}}"#;
        let envelope = Envelope {
            payload_type: PAYLOAD_TYPE.to_string(),
            payload: payload.to_vec(),
            signatures: Vec::new(),
        }
        .cosign(&key);
        let result = verify(&envelope, &key.verifying_key(), b"anything");
        assert!(result.signature_ok);
        assert!(!result.schema_ok);
        assert_eq!(result.error_code, ErrorCode::SchemaInvalid);
        assert!(result.errors.len() >= 4);
    }

    #[test]
    fn test_unsorted_materials_fail_statement_check() {
        let key = AttestationKey::from_seed([13u8; 32]).unwrap();
        let artifact = b"plain";
        let payload = serde_json::json!({
            "_type": "https://in-toto.io/Statement/v1",
            "subject": [{"name": "a", "digest": {"sha256": content_digest(artifact)}}],
            "predicateType": "https://x.test/p",
            "predicate": {
                "produced_by": {"agent_id": "AGENT-A"},
                "materials": [{"name": "z", "digest": {}}, {"name": "b", "digest": {}}]
            }
        });
        let envelope = Envelope {
            payload_type: PAYLOAD_TYPE.to_string(),
            payload: serde_json::to_vec(&payload).unwrap(),
            signatures: Vec::new(),
        }
        .cosign(&key);
        let result = verify(&envelope, &key.verifying_key(), artifact);
        assert!(result.digest_ok);
        assert!(!result.statement_ok);
        assert_eq!(result.error_code, ErrorCode::StatementInvalid);
    }
}
