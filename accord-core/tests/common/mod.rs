//! Shared fixtures for integration tests

#![allow(dead_code)]

use accord_core::attest::AttestationKey;
use accord_core::guard::CapabilityDescriptor;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const POLICY_DOC: &str = r#"<!--
provenance:
  predicateType: https://accord.ai/schemas/policy@v1
  predicate:
    produced_by:
      agent_id: AGENT-PO01
      agent_role: Policy Owner
    materials:
      - name: inputs/brief.md
      - name: https://example.org/reference
        digest:
          sha256: "0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f"
-->
# Retention policy

Records are kept for seven years.
"#;

/// A document store with one policy artifact and one local material
pub fn store() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join("org/policy")).expect("mkdir");
    fs::create_dir_all(dir.path().join("inputs")).expect("mkdir");
    fs::write(dir.path().join("inputs/brief.md"), "brief v1\n").expect("write material");
    fs::write(dir.path().join("org/policy/retention.md"), POLICY_DOC).expect("write artifact");
    dir
}

pub fn policy_owner(base: &Path) -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        "AGENT-PO01",
        ["file", "git"],
        ["org/policy/**", "attestations/**", "bus/ballots/**", "org/decisions/**"],
        base,
    )
    .expect("valid capability")
}

pub fn signing_key() -> AttestationKey {
    AttestationKey::from_seed([42u8; 32]).expect("valid seed")
}
