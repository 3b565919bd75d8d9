//! Capability descriptors and charter loading
//!
//! A charter is a Markdown document whose YAML front-matter declares what an
//! actor may do. The descriptor built from it is immutable; `reload()`
//! re-reads the charter and returns a fresh value.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::ScopeError;
use super::pattern::ScopePattern;
use super::resolve::{canonical_base, resolve_within, CanonicalPath};
use crate::canonical::header::front_matter;

static AGENT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^AGENT-[A-Za-z0-9_-]+$").expect("valid agent id regex"));

/// Endpoint names a charter may grant
pub const KNOWN_ENDPOINTS: &[&str] = &["file", "git", "search", "browser", "db", "knowledge"];

/// Write scopes no charter may overlap
pub const FORBIDDEN_SCOPES: &[&str] = &["**/.git/**", "**/secrets/**", "**/.env", "**/keys/**"];

/// Actor id used when no charter is supplied
pub const OPERATOR_ACTOR: &str = "operator";

/// Front-matter of an actor charter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Charter {
    #[serde(default)]
    pub agent_id: Option<String>,

    #[serde(default)]
    pub mcp_allow: Vec<String>,

    #[serde(default)]
    pub fs_write_scopes: Vec<String>,

    #[serde(default)]
    pub gedi: Option<GovernanceRole>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml_ng::Value>,
}

/// Voting role declared by a charter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRole {
    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub vote_weight: Option<f64>,

    #[serde(default)]
    pub quorum: Option<f64>,

    #[serde(default)]
    pub recusal_rules: Vec<String>,
}

/// Outcome of [`validate_charter`]
#[derive(Debug, Clone, Serialize)]
pub struct CharterReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Charter {
    pub fn parse(text: &str) -> Result<Self, ScopeError> {
        let invalid = |issue: String| ScopeError::InvalidCharter {
            issues: vec![issue],
        };
        let (_, body) =
            front_matter(text).ok_or_else(|| invalid("front-matter not found".to_string()))?;
        let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(body)
            .map_err(|e| invalid(format!("front-matter is not valid YAML: {e}")))?;
        if value.is_null() {
            return Ok(Self::default());
        }
        if !value.is_mapping() {
            return Err(invalid("front-matter is not a mapping".to_string()));
        }
        serde_yaml_ng::from_value(value).map_err(|e| invalid(format!("invalid charter: {e}")))
    }

    /// Problems that make the charter unusable for enforcement
    fn required_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        match self.agent_id.as_deref() {
            None => issues.push("agent_id is required".to_string()),
            Some(id) if !AGENT_ID.is_match(id) => {
                issues.push(format!("agent_id does not match ^AGENT-[A-Za-z0-9_-]+$: {id}"))
            }
            Some(_) => {}
        }
        if self.mcp_allow.is_empty() {
            issues.push("mcp_allow must not be empty".to_string());
        }
        if self.fs_write_scopes.is_empty() {
            issues.push("fs_write_scopes must not be empty".to_string());
        }
        if self.mcp_allow.iter().any(|e| e.is_empty())
            || self.fs_write_scopes.iter().any(|s| s.is_empty())
        {
            issues.push("mcp_allow and fs_write_scopes entries must be non-empty".to_string());
        }
        for scope in &self.fs_write_scopes {
            if let Err(e) = ScopePattern::compile(scope) {
                issues.push(format!("invalid write scope {scope}: {e}"));
            }
        }
        issues
    }

    /// Guardrails reported by validation but not enforced at load time
    fn guardrail_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        let unknown: Vec<&str> = self
            .mcp_allow
            .iter()
            .map(String::as_str)
            .filter(|e| !KNOWN_ENDPOINTS.contains(e))
            .collect();
        if !unknown.is_empty() {
            issues.push(format!("mcp_allow contains unknown endpoints: {unknown:?}"));
        }

        let forbidden: Vec<ScopePattern> = FORBIDDEN_SCOPES
            .iter()
            .filter_map(|p| ScopePattern::compile(p).ok())
            .collect();
        for scope in &self.fs_write_scopes {
            let Ok(pattern) = ScopePattern::compile(scope) else {
                continue;
            };
            for denied in &forbidden {
                if pattern.overlaps(denied) {
                    issues.push(format!(
                        "fs_write_scopes overlaps with forbidden path: {scope} ~ {denied}"
                    ));
                }
            }
        }

        if let Some(gedi) = &self.gedi {
            if gedi.roles.is_empty() {
                issues.push("gedi.roles must not be empty".to_string());
            }
            match gedi.vote_weight {
                None => issues.push("gedi.vote_weight is required".to_string()),
                Some(w) if !w.is_finite() || w < 0.0 => {
                    issues.push(format!("gedi.vote_weight must be >= 0: {w}"))
                }
                Some(_) => {}
            }
            match gedi.quorum {
                None => issues.push("gedi.quorum is required".to_string()),
                Some(q) if !(0.0..=1.0).contains(&q) => {
                    issues.push(format!("gedi.quorum must be within [0, 1]: {q}"))
                }
                Some(_) => {}
            }
        }
        issues
    }
}

/// Validate a charter document, reporting every problem found
pub fn validate_charter(text: &str) -> CharterReport {
    match Charter::parse(text) {
        Ok(charter) => {
            let mut errors = charter.required_issues();
            errors.extend(charter.guardrail_issues());
            CharterReport {
                ok: errors.is_empty(),
                agent_id: charter.agent_id,
                errors,
            }
        }
        Err(ScopeError::InvalidCharter { issues }) => CharterReport {
            ok: false,
            agent_id: None,
            errors: issues,
        },
        Err(other) => CharterReport {
            ok: false,
            agent_id: None,
            errors: vec![other.to_string()],
        },
    }
}

/// What one actor may write and call, bound to a canonical base directory
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    actor_id: String,
    allowed_endpoints: BTreeSet<String>,
    write_scopes: Vec<ScopePattern>,
    base_directory: PathBuf,
    governance: Option<GovernanceRole>,
    charter_path: Option<PathBuf>,
}

impl CapabilityDescriptor {
    pub fn new<E, S>(
        actor_id: impl Into<String>,
        allowed_endpoints: E,
        write_scopes: S,
        base_directory: &Path,
    ) -> Result<Self, ScopeError>
    where
        E: IntoIterator,
        E::Item: Into<String>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        let base_directory =
            canonical_base(base_directory).map_err(|e| ScopeError::InvalidCharter {
                issues: vec![format!(
                    "base directory {} is not accessible: {e}",
                    base_directory.display()
                )],
            })?;

        let mut patterns = Vec::new();
        let mut issues = Vec::new();
        for scope in write_scopes {
            match ScopePattern::compile(scope.as_ref()) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => issues.push(format!("invalid write scope {}: {e}", scope.as_ref())),
            }
        }
        if patterns.is_empty() && issues.is_empty() {
            issues.push("no write scopes configured".to_string());
        }
        if !issues.is_empty() {
            return Err(ScopeError::InvalidCharter { issues });
        }

        Ok(Self {
            actor_id: actor_id.into(),
            allowed_endpoints: allowed_endpoints.into_iter().map(Into::into).collect(),
            write_scopes: patterns,
            base_directory,
            governance: None,
            charter_path: None,
        })
    }

    /// Unrestricted writes inside `base`, no endpoints
    pub fn operator(base_directory: &Path) -> Result<Self, ScopeError> {
        Self::new(OPERATOR_ACTOR, Vec::<String>::new(), ["**"], base_directory)
    }

    pub fn from_charter_str(text: &str, base_directory: &Path) -> Result<Self, ScopeError> {
        let charter = Charter::parse(text)?;
        let issues = charter.required_issues();
        if !issues.is_empty() {
            return Err(ScopeError::InvalidCharter { issues });
        }
        let actor_id = charter.agent_id.clone().unwrap_or_default();
        let mut descriptor = Self::new(
            actor_id,
            charter.mcp_allow.iter().cloned(),
            charter.fs_write_scopes.iter(),
            base_directory,
        )?;
        descriptor.governance = charter.gedi;
        Ok(descriptor)
    }

    pub fn from_charter_file(path: &Path, base_directory: &Path) -> Result<Self, ScopeError> {
        let text = fs::read_to_string(path).map_err(|source| ScopeError::CharterRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut descriptor = Self::from_charter_str(&text, base_directory)?;
        descriptor.charter_path = Some(path.to_path_buf());
        info!(
            actor = %descriptor.actor_id,
            scopes = descriptor.write_scopes.len(),
            endpoints = descriptor.allowed_endpoints.len(),
            "loaded charter"
        );
        Ok(descriptor)
    }

    /// Re-read the backing charter. Descriptors not loaded from a file are
    /// returned unchanged.
    pub fn reload(&self) -> Result<Self, ScopeError> {
        match &self.charter_path {
            Some(path) => Self::from_charter_file(path, &self.base_directory),
            None => Ok(self.clone()),
        }
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn allowed_endpoints(&self) -> &BTreeSet<String> {
        &self.allowed_endpoints
    }

    pub fn write_scopes(&self) -> &[ScopePattern] {
        &self.write_scopes
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn governance(&self) -> Option<&GovernanceRole> {
        self.governance.as_ref()
    }

    /// Resolve and scope-check a write target
    pub fn authorize_write(&self, requested: impl AsRef<Path>) -> Result<CanonicalPath, ScopeError> {
        let requested = requested.as_ref().to_string_lossy().into_owned();

        let resolved = resolve_within(&self.base_directory, &requested).map_err(|violation| {
            let err = ScopeError::PathForbidden {
                path: requested.clone(),
                violation,
            };
            err.log_if_security_critical();
            err
        })?;

        if self
            .write_scopes
            .iter()
            .any(|pattern| pattern.matches(&resolved.relative))
        {
            debug!(actor = %self.actor_id, path = %resolved.relative, "write allowed");
            return Ok(resolved);
        }

        let err = ScopeError::OutOfScope { path: requested };
        err.log_if_security_critical();
        Err(err)
    }

    /// Exact-membership endpoint check
    pub fn authorize_call(&self, endpoint: &str) -> Result<(), ScopeError> {
        if self.allowed_endpoints.contains(endpoint) {
            debug!(actor = %self.actor_id, endpoint, "call allowed");
            return Ok(());
        }
        let err = ScopeError::EndpointNotAllowed {
            endpoint: endpoint.to_string(),
        };
        err.log_if_security_critical();
        Err(err)
    }

    /// Run `call` only if `endpoint` is allowed
    pub fn guard_call<T, F>(&self, endpoint: &str, call: F) -> Result<T, ScopeError>
    where
        F: FnOnce() -> T,
    {
        self.authorize_call(endpoint)?;
        Ok(call())
    }
}
