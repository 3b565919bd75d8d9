//! End-to-end attestation: build, verify, tamper, concurrent writers

mod common;

use accord_core::attest::{verify, Envelope};
use accord_core::pipeline::{verify_files, Pipeline};
use accord_core::ErrorCode;
use anyhow::Result;
use std::fs;
use std::path::Path;

const ARTIFACT: &str = "org/policy/retention.md";
const ENVELOPE: &str = "attestations/retention.dsse.json";

#[test]
fn test_attested_artifact_verifies_on_every_flag() -> Result<()> {
    common::init_test_logging();
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let key = common::signing_key();

    let record = Pipeline::new(&capability, &key).attest(Path::new(ARTIFACT), Path::new(ENVELOPE));
    assert!(record.ok, "{:?}", record.errors);
    assert_eq!(record.error_code, ErrorCode::Ok);

    let base = capability.base_directory();
    let envelope = Envelope::from_json(&fs::read(base.join(ENVELOPE))?)?;
    let result = verify(&envelope, &key.verifying_key(), &fs::read(base.join(ARTIFACT))?);
    assert!(result.signature_ok);
    assert!(result.schema_ok);
    assert!(result.digest_ok);
    assert!(result.statement_ok);
    assert_eq!(result.key_id.as_deref(), Some(key.key_id()));

    let statement = result.statement.expect("decoded statement");
    assert_eq!(statement.subject[0].name, ARTIFACT);
    let brief = statement
        .predicate
        .materials
        .iter()
        .find(|m| m.name == "inputs/brief.md")
        .expect("local material recorded");
    assert_eq!(brief.sha256().map(str::len), Some(64));
    Ok(())
}

#[test]
fn test_mutated_artifact_fails_digest_only() -> Result<()> {
    common::init_test_logging();
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let key = common::signing_key();

    let record = Pipeline::new(&capability, &key).attest(Path::new(ARTIFACT), Path::new(ENVELOPE));
    assert!(record.ok, "{:?}", record.errors);

    let base = capability.base_directory();
    let tampered = common::POLICY_DOC.replace("seven years", "seven days");
    fs::write(base.join(ARTIFACT), tampered)?;

    let record = verify_files(&base.join(ENVELOPE), &base.join(ARTIFACT), &key.verifying_key(), None);
    assert!(!record.ok);
    assert_eq!(record.error_code, ErrorCode::DigestMismatch);
    let flags = record.verify.expect("verify result");
    assert!(flags.signature_ok);
    assert!(!flags.digest_ok);
    Ok(())
}

#[test]
fn test_wrong_key_is_signature_failure() -> Result<()> {
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let key = common::signing_key();
    let record = Pipeline::new(&capability, &key).attest(Path::new(ARTIFACT), Path::new(ENVELOPE));
    assert!(record.ok);

    let stranger = accord_core::attest::AttestationKey::from_seed([7u8; 32])?;
    let base = capability.base_directory();
    let record = verify_files(
        &base.join(ENVELOPE),
        &base.join(ARTIFACT),
        &stranger.verifying_key(),
        Some(base),
    );
    assert_eq!(record.error_code, ErrorCode::SigInvalid);
    Ok(())
}

#[test]
fn test_cosigned_envelope_verifies_under_either_key() -> Result<()> {
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let key = common::signing_key();
    let record = Pipeline::new(&capability, &key).attest(Path::new(ARTIFACT), Path::new(ENVELOPE));
    assert!(record.ok);

    let base = capability.base_directory();
    let original = Envelope::from_json(&fs::read(base.join(ENVELOPE))?)?;
    let reviewer = accord_core::attest::AttestationKey::from_seed([9u8; 32])?;
    let cosigned = original.cosign(&reviewer);
    assert_eq!(original.signatures.len(), 1);
    assert_eq!(cosigned.signatures.len(), 2);

    let artifact = fs::read(base.join(ARTIFACT))?;
    assert!(verify(&cosigned, &key.verifying_key(), &artifact).ok());
    let result = verify(&cosigned, &reviewer.verifying_key(), &artifact);
    assert!(result.ok());
    assert_eq!(result.key_id.as_deref(), Some(reviewer.key_id()));
    Ok(())
}

#[test]
fn test_changed_material_fails_verification() -> Result<()> {
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let key = common::signing_key();
    let record = Pipeline::new(&capability, &key).attest(Path::new(ARTIFACT), Path::new(ENVELOPE));
    assert!(record.ok);

    let base = capability.base_directory();
    fs::write(base.join("inputs/brief.md"), "brief v2\n")?;
    let with_materials =
        verify_files(&base.join(ENVELOPE), &base.join(ARTIFACT), &key.verifying_key(), Some(base));
    assert_eq!(with_materials.error_code, ErrorCode::DigestMismatch);

    let without =
        verify_files(&base.join(ENVELOPE), &base.join(ARTIFACT), &key.verifying_key(), None);
    assert!(without.ok, "{:?}", without.errors);
    Ok(())
}

#[test]
fn test_concurrent_builds_leave_one_valid_envelope() -> Result<()> {
    common::init_test_logging();
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let key = common::signing_key();

    std::thread::scope(|scope| {
        for _ in 0..16 {
            scope.spawn(|| {
                let mut pipeline = Pipeline::new(&capability, &key).with_self_verify(false);
                // A racing writer may see HASH_RACE; the survivor must still verify
                let record = pipeline.attest(Path::new(ARTIFACT), Path::new(ENVELOPE));
                assert!(
                    record.ok || record.error_code == ErrorCode::HashRace,
                    "{:?}",
                    record.errors
                );
            });
        }
    });

    let base = capability.base_directory();
    let record =
        verify_files(&base.join(ENVELOPE), &base.join(ARTIFACT), &key.verifying_key(), Some(base));
    assert!(record.ok, "{:?}", record.errors);

    let leftovers: Vec<_> = fs::read_dir(base.join("attestations"))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    Ok(())
}
