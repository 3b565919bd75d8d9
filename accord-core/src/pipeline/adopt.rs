//! Adoption of a winning draft
//!
//! Adopting certifies the decision first, then publishes the winning
//! candidate's draft as an attested document and a short attested summary
//! pointing at it. Nothing is written unless quorum was met and every target
//! is in scope.

use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::certify::{ballot_title, governance_link, metadata_block, steward_predicate};
use super::{Pipeline, PipelineError, PipelineRecord, Trace};
use crate::canonical::Material;
use crate::guard::{resolve_strict, GuardedWriter};
use crate::tally::{Ballot, TallyResult, VoteLog};

/// Where an adoption writes its documents and envelopes
#[derive(Debug, Clone)]
pub struct AdoptionTargets {
    pub decision: PathBuf,
    pub decision_envelope: PathBuf,
    pub adopted: PathBuf,
    pub adopted_envelope: PathBuf,
    pub summary: PathBuf,
    pub summary_envelope: PathBuf,
}

impl AdoptionTargets {
    fn all(&self) -> [&Path; 6] {
        [
            &self.decision,
            &self.decision_envelope,
            &self.adopted,
            &self.adopted_envelope,
            &self.summary,
            &self.summary_envelope,
        ]
    }
}

/// The winning draft as read from the store
struct Draft {
    relative: String,
    text: Option<String>,
}

impl Pipeline<'_> {
    /// Certify `result` and publish the winner's draft with a summary.
    ///
    /// The record describes the adopted document; the decision and summary
    /// are named in its detail fields.
    pub fn adopt(
        &mut self,
        ballot: &Ballot,
        result: &TallyResult,
        log: &VoteLog,
        targets: &AdoptionTargets,
    ) -> PipelineRecord {
        let trace = Trace::start("adopt");
        self.adopt_traced(&trace, ballot, result, log, targets)
            .with_detail("ballot_id", ballot.proposal_id.clone())
            .with_detail("winner", result.winner().map(str::to_string))
    }

    fn adopt_traced(
        &mut self,
        trace: &Trace,
        ballot: &Ballot,
        result: &TallyResult,
        log: &VoteLog,
        targets: &AdoptionTargets,
    ) -> PipelineRecord {
        if result.quorum_met() {
            let mut all = targets.all().to_vec();
            all.push(log.path());
            if let Err(e) = self.authorize_all(&all) {
                return trace.failure(&e);
            }
        }

        let certified = self.certify_traced(
            trace,
            ballot,
            result,
            log,
            &targets.decision,
            &targets.decision_envelope,
        );
        if !certified.ok {
            return certified;
        }
        let Some(winner) = result.winner() else {
            return certified;
        };
        let decision = certified.file.clone().unwrap_or_default();

        let writer = GuardedWriter::new(self.capability);
        let adopted = match self.write_adopted(&writer, ballot, result, winner, &decision, &targets.adopted) {
            Ok(path) => path,
            Err(e) => return trace.failure(&e),
        };
        let adopted_record = self.attest_traced(trace, &adopted, &targets.adopted_envelope);
        if !adopted_record.ok {
            return adopted_record;
        }

        let adopted_name = adopted_record.file.clone().unwrap_or_default();
        let summary = match self.write_summary(&writer, ballot, winner, &adopted_name, &targets.summary) {
            Ok(path) => path,
            Err(e) => return trace.failure(&e),
        };
        let summary_record = self.attest_traced(trace, &summary, &targets.summary_envelope);
        if !summary_record.ok {
            return summary_record;
        }

        info!(ballot = %ballot.proposal_id, winner, adopted = %adopted_name, "draft adopted");
        adopted_record
            .with_detail("decision", decision)
            .with_detail("decision_envelope", certified.envelope_ref)
            .with_detail("summary", summary_record.file)
            .with_detail("summary_envelope", summary_record.envelope_ref)
    }

    /// Read the winner's draft; a missing file is reported in the document
    fn read_draft(&self, ballot: &Ballot, winner: &str) -> Result<Option<Draft>, PipelineError> {
        let Some(name) = ballot.drafts.get(winner) else {
            return Ok(None);
        };
        let resolved = resolve_strict(self.base(), name).map_err(|violation| {
            let err = crate::guard::ScopeError::PathForbidden {
                path: name.clone(),
                violation,
            };
            err.log_if_security_critical();
            err
        })?;
        let text = match fs::read_to_string(&resolved.absolute) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(draft = %resolved.relative, error = %e, "draft not readable");
                None
            }
        };
        Ok(Some(Draft {
            relative: resolved.relative,
            text,
        }))
    }

    fn write_adopted(
        &self,
        writer: &GuardedWriter,
        ballot: &Ballot,
        result: &TallyResult,
        winner: &str,
        decision: &str,
        out: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let target = self.capability.authorize_write(out)?;
        let draft = self.read_draft(ballot, winner)?;

        let mut predicate = steward_predicate(self.capability.actor_id());
        predicate.governance = Some(governance_link(ballot, result));
        predicate.materials.push(Material::new(decision));
        if let Some(Draft { relative, text: Some(_) }) = &draft {
            predicate.materials.push(Material::new(relative.clone()));
        }
        predicate
            .materials
            .extend(ballot.materials.iter().map(Material::new));
        let header = metadata_block(&target.relative, &predicate)?;

        let (source, content) = match draft {
            Some(Draft { relative, text: Some(text) }) => (relative, text),
            Some(Draft { relative, text: None }) => {
                let note = format!("(missing reference: {relative})\n");
                (relative, note)
            }
            None => ("none".to_string(), format!("(no draft recorded for {winner})\n")),
        };
        let text = format!(
            "{header}\n# Adopted: {title}\n\n> Source draft: `{source}`\n\n{content}",
            title = ballot_title(ballot),
        );
        Ok(writer.write(out, text.as_bytes())?.absolute)
    }

    fn write_summary(
        &self,
        writer: &GuardedWriter,
        ballot: &Ballot,
        winner: &str,
        adopted: &str,
        out: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let target = self.capability.authorize_write(out)?;
        let mut predicate = steward_predicate(self.capability.actor_id());
        predicate.materials.push(Material::new(adopted));
        let header = metadata_block(&target.relative, &predicate)?;
        let text = format!(
            "{header}\n# Adopted: {title}\n\n- **Winner:** {winner}\n- **Adopted:** {at}\n",
            title = ballot_title(ballot),
            at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        Ok(writer.write(out, text.as_bytes())?.absolute)
    }
}
