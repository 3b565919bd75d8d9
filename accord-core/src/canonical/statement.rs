//! In-toto statement model
//!
//! The predicate is typed for the fields the core relies on (producer,
//! toolchain, governance linkage, flags, materials). Everything else in the
//! metadata block is carried through untouched in `extra`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::json::canonical_bytes;

/// Statement type written for new attestations
pub const STATEMENT_TYPE_V1: &str = "https://in-toto.io/Statement/v1";

/// Legacy statement type still accepted on input
pub const STATEMENT_TYPE_V01: &str = "https://in-toto.io/Statement/v0.1";

static STATEMENT_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://in-toto\.io/Statement/v(0\.1|1)$").expect("valid statement type regex")
});

static PREDICATE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://.+").expect("valid predicate type regex"));

/// Algorithm name -> lowercase hex digest
pub type DigestSet = BTreeMap<String, String>;

pub fn is_supported_statement_type(value: &str) -> bool {
    STATEMENT_TYPE.is_match(value)
}

pub fn is_valid_predicate_type(value: &str) -> bool {
    PREDICATE_TYPE.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,

    pub subject: Vec<Subject>,

    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,

    #[serde(default)]
    pub digest: DigestSet,
}

impl Subject {
    pub fn sha256(&self) -> Option<&str> {
        self.digest.get(super::digest::SHA256).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Producer identity (required)
    pub produced_by: Producer,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,

    /// Link back to the ballot that authorised this artifact, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceLink>,

    /// Quality and security flags, e.g. `reviewed: true`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Material>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Predicate {
    pub fn new(produced_by: Producer) -> Self {
        Self {
            produced_by,
            process: None,
            governance: None,
            flags: BTreeMap::new(),
            materials: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub agent_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Producer {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_role: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    #[serde(default)]
    pub toolchain: Vec<Tool>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,

    // YAML authors routinely write `version: 0.1` unquoted
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ballot_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quorum_met: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participating_weight: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    #[serde(alias = "uri", default)]
    pub name: String,

    #[serde(default)]
    pub digest: DigestSet,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: DigestSet::new(),
        }
    }

    pub fn sha256(&self) -> Option<&str> {
        self.digest.get(super::digest::SHA256).map(String::as_str)
    }

    /// Remote materials (`scheme://...`) cannot be hashed locally
    pub fn is_remote(&self) -> bool {
        super::header::is_remote_reference(&self.name)
    }
}

impl Statement {
    /// Build a single-subject statement
    pub fn new(
        subject: Subject,
        predicate_type: impl Into<String>,
        predicate: Predicate,
    ) -> Self {
        let mut statement = Self {
            statement_type: STATEMENT_TYPE_V1.to_string(),
            subject: vec![subject],
            predicate_type: predicate_type.into(),
            predicate,
        };
        statement.sort_canonical();
        statement
    }

    /// The subject bound to the artifact bytes at verification time
    pub fn primary_subject(&self) -> Option<&Subject> {
        self.subject.first()
    }

    /// Sort subjects and materials by name so the encoding is stable
    pub fn sort_canonical(&mut self) {
        self.subject.sort_by(|a, b| a.name.cmp(&b.name));
        self.predicate
            .materials
            .sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub fn is_canonically_ordered(&self) -> bool {
        self.subject.windows(2).all(|w| w[0].name <= w[1].name)
            && self
                .predicate
                .materials
                .windows(2)
                .all(|w| w[0].name <= w[1].name)
    }

    /// Deterministic byte encoding used as the envelope payload
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut ordered = self.clone();
        ordered.sort_canonical();
        let value = serde_json::to_value(&ordered)?;
        Ok(canonical_bytes(&value))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Statement {
        let mut predicate = Predicate::new(Producer::new("AGENT-PO01"));
        predicate.materials = vec![Material::new("z.txt"), Material::new("a.txt")];
        predicate
            .extra
            .insert("notes".to_string(), json!({"b": 1, "a": 2}));
        Statement::new(
            Subject {
                name: "doc.md".to_string(),
                digest: DigestSet::new(),
            },
            "https://accord.ai/schemas/policy@v1",
            predicate,
        )
    }

    #[test]
    fn test_new_sorts_materials() {
        let statement = sample();
        assert_eq!(statement.predicate.materials[0].name, "a.txt");
        assert!(statement.is_canonically_ordered());
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["_type"], json!(STATEMENT_TYPE_V1));
        assert_eq!(
            value["predicateType"],
            json!("https://accord.ai/schemas/policy@v1")
        );
        assert_eq!(value["predicate"]["produced_by"]["agent_id"], json!("AGENT-PO01"));
        // passthrough keys are flattened into the predicate
        assert_eq!(value["predicate"]["notes"]["a"], json!(2));
        assert!(value["predicate"].get("governance").is_none());
    }

    #[test]
    fn test_canonical_bytes_are_sorted_and_compact() {
        let bytes = sample().to_canonical_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("{\"_type\":"));
        assert!(text.contains("\"notes\":{\"a\":2,\"b\":1}"));
        assert!(!text.contains(": "));
    }

    #[test]
    fn test_type_patterns() {
        assert!(is_supported_statement_type(STATEMENT_TYPE_V1));
        assert!(is_supported_statement_type(STATEMENT_TYPE_V01));
        assert!(!is_supported_statement_type("https://in-toto.io/Statement/v2"));
        assert!(is_valid_predicate_type("https://slsa.dev/provenance/v1"));
        assert!(!is_valid_predicate_type("http://insecure.test/p"));
    }

    #[test]
    fn test_tool_version_accepts_numbers() {
        let tool: Tool = serde_json::from_value(json!({"name": "ballot", "version": 0.1})).unwrap();
        assert_eq!(tool.version.as_deref(), Some("0.1"));
    }

    #[test]
    fn test_material_accepts_uri_alias() {
        let material: Material =
            serde_json::from_value(json!({"uri": "https://example.org/x"})).unwrap();
        assert_eq!(material.name, "https://example.org/x");
        assert!(material.is_remote());
    }
}
