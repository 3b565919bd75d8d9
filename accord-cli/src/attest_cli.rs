//! build / verify commands

use anyhow::Result;
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use accord_core::attest::{load_verifying_key, Envelope};
use accord_core::canonical::DigestCache;
use accord_core::guard::resolve::{canonical_base, resolve_within};
use accord_core::guard::ScopeError;
use accord_core::pipeline::{verify_files, Pipeline, PipelineRecord};
use accord_core::ErrorCode;

use crate::{absolutize, emit, failed, Session};

/// Envelopes end in this suffix when found by `verify --all`
const ENVELOPE_SUFFIX: &str = ".dsse.json";

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Artifacts to attest
    #[clap(required = true)]
    artifacts: Vec<PathBuf>,

    /// Envelope path (single artifact only; default: <attestation_dir>/<name>.dsse.json)
    #[clap(long)]
    out: Option<PathBuf>,

    /// Private key (default: <keys_dir>/ed25519.key)
    #[clap(long)]
    key: Option<PathBuf>,

    /// Skip verifying the written envelope
    #[clap(long)]
    no_verify: bool,

    /// Do not read or update the digest cache
    #[clap(long)]
    no_cache: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Envelope to verify
    #[clap(required_unless_present = "all")]
    envelope: Option<PathBuf>,

    /// Artifact bytes to check (default: the subject named in the envelope)
    artifact: Option<PathBuf>,

    /// Verify every envelope under the attestation directory
    #[clap(long, conflicts_with_all = ["envelope", "artifact"])]
    all: bool,

    /// Public key (default: <keys_dir>/ed25519.pub)
    #[clap(long)]
    pubkey: Option<PathBuf>,

    /// Skip re-hashing local materials
    #[clap(long)]
    no_materials: bool,
}

pub fn build(session: &Session, args: BuildArgs) -> Result<bool> {
    if args.out.is_some() && args.artifacts.len() > 1 {
        anyhow::bail!("--out can only be used with a single artifact");
    }
    let capability = match session.capability() {
        Ok(c) => c,
        Err(e) => {
            let record = failed("build", e.error_code(), &e);
            emit(&record)?;
            return Ok(false);
        }
    };
    let key = match session.signing_key(args.key.as_deref()) {
        Ok(k) => k,
        Err(e) => {
            let record = failed("build", e.error_code(), &e);
            emit(&record)?;
            return Ok(false);
        }
    };

    let config = &session.config;
    let mut pipeline = Pipeline::new(&capability, &key)
        .with_self_verify(config.self_verify && !args.no_verify);
    if let (Some(path), false) = (&config.digest_cache, args.no_cache) {
        pipeline = pipeline.with_cache(DigestCache::open(path.clone()));
    }

    let mut all_ok = true;
    for artifact in &args.artifacts {
        let artifact = absolutize(artifact)?;
        let envelope_out = match &args.out {
            Some(out) => absolutize(out)?,
            None => config.envelope_path_for(&artifact),
        };
        let record = pipeline.attest(&artifact, &envelope_out);
        if record.error_code.is_retryable() {
            warn!(artifact = %artifact.display(), "changed during build, run again once writers settle");
        }
        all_ok &= record.ok;
        emit(&record)?;
    }

    if let Some(cache) = pipeline.cache_mut() {
        if let Err(e) = cache.persist() {
            warn!(error = %e, "digest cache not saved");
        }
    }
    Ok(all_ok)
}

/// Locate the artifact an envelope claims to cover, resolved inside the base
fn claimed_artifact(envelope_path: &Path, base: &Path) -> Result<PathBuf, PipelineRecord> {
    let envelope_ref = envelope_path.to_string_lossy();
    let name = fs::read(envelope_path)
        .ok()
        .and_then(|raw| Envelope::from_json(&raw).ok())
        .and_then(|envelope| envelope.claimed_subject())
        .ok_or_else(|| {
            failed("verify", ErrorCode::SchemaInvalid, "envelope names no subject")
                .with_envelope(envelope_ref.clone())
        })?;
    let base = canonical_base(base)
        .map_err(|e| failed("verify", ErrorCode::IoError, e).with_envelope(envelope_ref.clone()))?;
    resolve_within(&base, &name)
        .map(|resolved| resolved.absolute)
        .map_err(|violation| {
            let err = ScopeError::PathForbidden {
                path: name.clone(),
                violation,
            };
            err.log_if_security_critical();
            failed("verify", err.error_code(), &err)
                .with_file(name.clone())
                .with_envelope(envelope_ref.clone())
        })
}

pub fn verify(session: &Session, args: VerifyArgs) -> Result<bool> {
    let public_key_path = session.public_key_path(args.pubkey.as_deref());
    let public_key = match load_verifying_key(&public_key_path) {
        Ok(k) => k,
        Err(e) => {
            emit(&failed("verify", e.error_code(), &e))?;
            return Ok(false);
        }
    };
    let base = &session.config.base_dir;
    let materials_base = (!args.no_materials).then_some(base.as_path());

    let pairs: Vec<(PathBuf, Option<PathBuf>)> = if args.all {
        WalkDir::new(&session.config.attestation_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(ENVELOPE_SUFFIX))
            .map(|entry| (entry.into_path(), None))
            .collect()
    } else {
        let envelope = match &args.envelope {
            Some(path) => absolutize(path)?,
            None => anyhow::bail!("an envelope path or --all is required"),
        };
        let artifact = args.artifact.as_deref().map(absolutize).transpose()?;
        vec![(envelope, artifact)]
    };
    debug!(count = pairs.len(), "verifying envelopes");

    let mut all_ok = true;
    for (envelope, artifact) in pairs {
        let artifact = match artifact {
            Some(artifact) => Ok(artifact),
            None => claimed_artifact(&envelope, base),
        };
        let record = match artifact {
            Ok(artifact) => verify_files(&envelope, &artifact, &public_key, materials_base),
            Err(record) => record,
        };
        all_ok &= record.ok;
        emit(&record)?;
    }
    Ok(all_ok)
}
