//! Metadata block extraction
//!
//! Artifacts carry their provenance header either inside an HTML comment
//! (`<!-- provenance: ... -->`, first such comment wins) or as a leading YAML
//! front-matter block with a `provenance` key.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::ops::Range;

use super::error::CanonicalError;
use super::statement::Predicate;

static HTML_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--(.*?)-->").expect("valid comment regex"));

static REMOTE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").expect("valid scheme regex"));

const PROVENANCE_KEY: &str = "provenance";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStyle {
    HtmlComment,
    FrontMatter,
}

/// Where the metadata block sits in the artifact and what it parsed to
#[derive(Debug, Clone)]
pub struct MetadataBlock {
    pub style: BlockStyle,
    /// Byte range of the whole block including delimiters
    pub range: Range<usize>,
    pub root: Value,
}

/// Header fields after normalisation of legacy spellings
#[derive(Debug, Clone)]
pub struct ProvenanceHeader {
    pub statement_type: Option<String>,
    pub predicate_type: String,
    /// Name of the first declared subject, if any
    pub subject_name: Option<String>,
    pub predicate: Predicate,
}

/// `scheme://...` references are never resolved on disk
pub fn is_remote_reference(name: &str) -> bool {
    REMOTE_REFERENCE.is_match(name)
}

/// Split a leading `---` front-matter block, returning its range and body
pub fn front_matter(text: &str) -> Option<(Range<usize>, &str)> {
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;
    let body_start = text.len() - rest.len();

    let mut offset = body_start;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let body = &text[body_start..offset];
            return Some((0..offset + line.len(), body));
        }
        offset += line.len();
    }
    None
}

fn mentions_provenance(body: &str) -> bool {
    body.to_lowercase().contains("provenance:")
}

fn parse_yaml_mapping(body: &str) -> Option<Value> {
    let yaml: serde_yaml_ng::Value = serde_yaml_ng::from_str(body).ok()?;
    let json = serde_json::to_value(yaml).ok()?;
    json.is_object().then_some(json)
}

/// Find the metadata block, if the artifact has one
pub fn locate_block(text: &str) -> Option<MetadataBlock> {
    if let Some((range, body)) = front_matter(text) {
        if mentions_provenance(body) {
            if let Some(root) = parse_yaml_mapping(body) {
                if root.get(PROVENANCE_KEY).is_some() {
                    return Some(MetadataBlock {
                        style: BlockStyle::FrontMatter,
                        range,
                        root,
                    });
                }
            }
        }
    }

    HTML_COMMENT.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        let body = caps.get(1)?.as_str().trim();
        if !mentions_provenance(body) {
            return None;
        }
        let root = parse_yaml_mapping(body)?;
        Some(MetadataBlock {
            style: BlockStyle::HtmlComment,
            range: whole.range(),
            root,
        })
    })
}

/// Extract and normalise the provenance header of an artifact
pub fn extract_header(text: &str) -> Result<ProvenanceHeader, CanonicalError> {
    let block = locate_block(text)
        .ok_or_else(|| CanonicalError::malformed("provenance header not found"))?;

    let provenance = match block.root.get(PROVENANCE_KEY) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) => Map::new(),
        Some(_) => {
            return Err(CanonicalError::malformed(
                "provenance block is not a mapping",
            ))
        }
        None => match block.root {
            Value::Object(map) => map,
            _ => return Err(CanonicalError::malformed("provenance block is not a mapping")),
        },
    };

    normalize(provenance)
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find_map(|value| value.as_str().map(str::to_string))
}

fn normalize(mut header: Map<String, Value>) -> Result<ProvenanceHeader, CanonicalError> {
    let statement_type = string_field(&header, &["_type", "statement_type"]);
    let predicate_type = string_field(&header, &["predicateType", "predicate_type"])
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CanonicalError::malformed("predicateType is required"))?;

    let subject_name = match header.get("subject") {
        Some(Value::Array(subjects)) => subjects
            .first()
            .and_then(Value::as_object)
            .and_then(|first| string_field(first, &["name", "uri"])),
        Some(Value::Null) | None => None,
        Some(_) => return Err(CanonicalError::malformed("subject must be a list")),
    };

    let mut predicate = match header.remove("predicate") {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(CanonicalError::malformed("predicate must be a mapping")),
        None => return Err(CanonicalError::malformed("predicate is required")),
    };
    if let Some(materials) = header.remove("materials") {
        predicate
            .entry("materials".to_string())
            .or_insert(materials);
    }

    let has_agent = predicate
        .get("produced_by")
        .and_then(|p| p.get("agent_id"))
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_agent {
        return Err(CanonicalError::malformed(
            "predicate.produced_by.agent_id is required",
        ));
    }

    let predicate: Predicate = serde_json::from_value(Value::Object(predicate))
        .map_err(|e| CanonicalError::malformed(format!("invalid predicate: {e}")))?;

    Ok(ProvenanceHeader {
        statement_type,
        predicate_type,
        subject_name,
        predicate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMENT_DOC: &str = "# Title\n\n<!--\nprovenance:\n  _type: https://in-toto.io/Statement/v1\n  predicateType: https://accord.ai/schemas/doc@v1\n  subject:\n    - uri: reports/a.md\n  predicate:\n    produced_by:\n      agent_id: AGENT-PO01\n  materials:\n    - name: inputs/x.md\n-->\n\nBody text.\n";

    #[test]
    fn test_extract_from_comment() {
        let header = extract_header(COMMENT_DOC).unwrap();
        assert_eq!(header.predicate_type, "https://accord.ai/schemas/doc@v1");
        assert_eq!(header.subject_name.as_deref(), Some("reports/a.md"));
        assert_eq!(header.predicate.produced_by.agent_id, "AGENT-PO01");
        // top-level materials move into the predicate
        assert_eq!(header.predicate.materials[0].name, "inputs/x.md");
    }

    #[test]
    fn test_extract_from_front_matter() {
        let doc = "---\nprovenance:\n  predicate_type: https://x.test/p\n  predicate:\n    produced_by: {agent_id: AGENT-A}\n    reviewer: alice\n---\nbody\n";
        let header = extract_header(doc).unwrap();
        assert_eq!(header.predicate_type, "https://x.test/p");
        assert_eq!(header.predicate.extra["reviewer"], Value::from("alice"));
        let block = locate_block(doc).unwrap();
        assert_eq!(block.style, BlockStyle::FrontMatter);
        assert_eq!(&doc[block.range.clone()], &doc[..doc.find("body").unwrap()]);
    }

    #[test]
    fn test_unwrapped_legacy_layout() {
        // no wrapping key: the whole comment body is the header
        let doc = "<!--\npredicateType: https://x.test/p\npredicate:\n  produced_by: {agent_id: AGENT-A}\n  provenance: manual\n-->\n";
        let header = extract_header(doc).unwrap();
        assert_eq!(header.predicate_type, "https://x.test/p");
        assert_eq!(header.predicate.extra["provenance"], Value::from("manual"));
    }

    #[test]
    fn test_missing_block_is_malformed() {
        let err = extract_header("# nothing here\n").unwrap_err();
        assert_eq!(err.error_code(), crate::ErrorCode::MalformedMetadata);
    }

    #[test]
    fn test_missing_agent_is_malformed() {
        let doc = "<!--\nprovenance:\n  predicateType: https://x.test/p\n  predicate:\n    produced_by: {}\n-->\n";
        let err = extract_header(doc).unwrap_err();
        assert!(err.to_string().contains("agent_id"));
    }

    #[test]
    fn test_first_provenance_comment_wins() {
        let doc = "<!-- unrelated -->\n<!--\nprovenance:\n  predicateType: https://one.test/p\n  predicate: {produced_by: {agent_id: AGENT-1}}\n-->\n<!--\nprovenance:\n  predicateType: https://two.test/p\n  predicate: {produced_by: {agent_id: AGENT-2}}\n-->\n";
        let header = extract_header(doc).unwrap();
        assert_eq!(header.predicate_type, "https://one.test/p");
    }

    #[test]
    fn test_remote_reference() {
        assert!(is_remote_reference("https://example.org/a"));
        assert!(is_remote_reference("git+ssh://host/repo"));
        assert!(!is_remote_reference("docs/a.md"));
    }
}
