//! Pipeline orchestrator
//!
//! Sequences canonicalize, authorize, sign, write and self-verify for one
//! artifact, and the tally-to-certified-decision flow on top of it. Each
//! run yields a [`PipelineRecord`]; failures never escape as errors.

pub mod adopt;
pub mod certify;
pub mod error;
pub mod record;

pub use adopt::AdoptionTargets;
pub use error::PipelineError;
pub use record::{PipelineRecord, Trace};

use ed25519_dalek::VerifyingKey;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

use crate::attest::{self, AttestationKey, Envelope, VerifyResult};
use crate::canonical::{content_digest, Canonicalizer, DigestCache, Statement};
use crate::guard::{CapabilityDescriptor, GuardedWriter};

fn read(path: &Path) -> Result<Vec<u8>, PipelineError> {
    fs::read(path).map_err(|source| PipelineError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// What a successful attest run produced
#[derive(Debug)]
struct Attested {
    subject: String,
    subject_digest: String,
    envelope_ref: String,
    verify: Option<VerifyResult>,
}

/// Called with the artifact and envelope paths once the envelope is written
type WriteObserver<'a> = Box<dyn FnMut(&Path, &Path) + 'a>;

/// Drives attestation for one actor and one signing key
pub struct Pipeline<'a> {
    capability: &'a CapabilityDescriptor,
    key: &'a AttestationKey,
    canonicalizer: Canonicalizer,
    cache: Option<DigestCache>,
    self_verify: bool,
    on_envelope_written: Option<WriteObserver<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(capability: &'a CapabilityDescriptor, key: &'a AttestationKey) -> Self {
        Self {
            capability,
            key,
            canonicalizer: Canonicalizer::new(capability.base_directory()),
            cache: None,
            self_verify: true,
            on_envelope_written: None,
        }
    }

    pub fn with_self_verify(mut self, enabled: bool) -> Self {
        self.self_verify = enabled;
        self
    }

    pub fn with_cache(mut self, cache: DigestCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run `observer` between the envelope write and the recheck
    pub fn on_envelope_written(mut self, observer: impl FnMut(&Path, &Path) + 'a) -> Self {
        self.on_envelope_written = Some(Box::new(observer));
        self
    }

    pub fn cache_mut(&mut self) -> Option<&mut DigestCache> {
        self.cache.as_mut()
    }

    pub fn capability(&self) -> &CapabilityDescriptor {
        self.capability
    }

    /// Scope-check every target before any of them is written
    fn authorize_all(&self, targets: &[&Path]) -> Result<(), PipelineError> {
        for target in targets {
            self.capability.authorize_write(target)?;
        }
        Ok(())
    }

    fn base(&self) -> &Path {
        self.capability.base_directory()
    }

    /// Relative paths are taken from the store base
    fn locate(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base().join(path)
        }
    }

    fn subject_name(&self, artifact: &Path) -> String {
        match artifact.strip_prefix(self.base()) {
            Ok(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Attest `artifact` and write its envelope to `envelope_out`
    pub fn attest(&mut self, artifact: &Path, envelope_out: &Path) -> PipelineRecord {
        self.attest_traced(&Trace::start("build"), artifact, envelope_out)
    }

    fn attest_traced(&mut self, trace: &Trace, artifact: &Path, envelope_out: &Path) -> PipelineRecord {
        let _span = info_span!("attest", trace_id = %trace.trace_id()).entered();
        let artifact = self.locate(artifact);

        match self.run_attest(&artifact, envelope_out) {
            Ok(done) => attested_record(trace, done),
            Err(e) => {
                warn!(artifact = %artifact.display(), code = %e.error_code(), error = %e, "attest failed");
                trace
                    .failure(&e)
                    .with_file(artifact.to_string_lossy())
            }
        }
    }

    fn run_attest(&mut self, artifact: &Path, envelope_out: &Path) -> Result<Attested, PipelineError> {
        let bytes = read(artifact)?;
        let name = self.subject_name(artifact);
        let statement = match self.cache.as_mut() {
            Some(cache) => self.canonicalizer.canonicalize_cached(&name, &bytes, cache)?,
            None => self.canonicalizer.canonicalize(&name, &bytes)?,
        };
        let subject_digest = statement
            .primary_subject()
            .and_then(|s| s.sha256())
            .map(str::to_string)
            .unwrap_or_default();

        // Fail before signing if the envelope may not be written
        self.capability.authorize_write(envelope_out)?;
        let envelope = attest::build(&statement, self.key)?;
        let encoded = envelope.to_json_pretty()?;
        let written = GuardedWriter::new(self.capability).write(envelope_out, &encoded)?;
        if let Some(observer) = self.on_envelope_written.as_mut() {
            observer(artifact, &written.absolute);
        }

        let reread = read(artifact)?;
        if content_digest(&reread) != subject_digest {
            return Err(PipelineError::HashRace { what: "artifact" });
        }
        let on_disk = read(&written.absolute)?;
        if on_disk != encoded {
            return Err(PipelineError::HashRace { what: "envelope" });
        }

        let verify = if self.self_verify {
            Some(self.self_check(&Envelope::from_json(&on_disk)?, &reread))
        } else {
            None
        };

        if verify.as_ref().map_or(true, VerifyResult::ok) {
            info!(
                subject = %name,
                envelope = %written.relative,
                key_id = %self.key.key_id(),
                "artifact attested"
            );
        }
        Ok(Attested {
            subject: subject_of(&statement, name),
            subject_digest,
            envelope_ref: written.relative,
            verify,
        })
    }

    fn self_check(&self, envelope: &Envelope, artifact: &[u8]) -> VerifyResult {
        let result = attest::verify(envelope, &self.key.verifying_key(), artifact);
        with_materials(result, self.base())
    }
}

fn subject_of(statement: &Statement, fallback: String) -> String {
    statement
        .primary_subject()
        .map(|s| s.name.clone())
        .unwrap_or(fallback)
}

/// Fold a material re-check into a verify result that otherwise passed
fn with_materials(mut result: VerifyResult, base: &Path) -> VerifyResult {
    if !result.ok() {
        return result;
    }
    let Some(statement) = result.statement.as_ref() else {
        return result;
    };
    if let Err(e) = attest::verify_materials(statement, base) {
        result.digest_ok = false;
        result.error_code = e.error_code();
        result.errors.extend(e.messages());
        result.log_if_security_critical();
    }
    result
}

fn attested_record(trace: &Trace, done: Attested) -> PipelineRecord {
    let record = match done.verify {
        Some(result) => trace.verified(result),
        None => trace.success(),
    };
    record
        .with_file(done.subject)
        .with_envelope(done.envelope_ref)
        .with_detail("subject_digest", done.subject_digest)
}

/// Verify an envelope file against an artifact file.
///
/// With `materials_base`, local material digests are re-checked from disk.
pub fn verify_files(
    envelope_path: &Path,
    artifact_path: &Path,
    public_key: &VerifyingKey,
    materials_base: Option<&Path>,
) -> PipelineRecord {
    let trace = Trace::start("verify");
    let _span = info_span!("verify", trace_id = %trace.trace_id()).entered();

    let loaded = read(envelope_path).and_then(|raw| {
        let envelope = Envelope::from_json(&raw).map_err(|e| {
            e.log_if_security_critical();
            PipelineError::from(e)
        })?;
        Ok((envelope, read(artifact_path)?))
    });
    let (envelope, artifact) = match loaded {
        Ok(pair) => pair,
        Err(e) => {
            return trace
                .failure(&e)
                .with_file(artifact_path.to_string_lossy())
                .with_envelope(envelope_path.to_string_lossy())
        }
    };

    let mut result = attest::verify(&envelope, public_key, &artifact);
    if let Some(base) = materials_base {
        result = with_materials(result, base);
    }
    trace
        .verified(result)
        .with_file(artifact_path.to_string_lossy())
        .with_envelope(envelope_path.to_string_lossy())
}
