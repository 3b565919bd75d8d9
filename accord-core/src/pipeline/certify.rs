//! Certified decisions
//!
//! A tally result becomes an ordinary attested document: a metadata block
//! linking the ballot, a short summary, and the canonical JSON of the result.

use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{Pipeline, PipelineError, PipelineRecord, Trace};
use crate::canonical::json::canonical_string;
use crate::canonical::{GovernanceLink, Material, Predicate, Process, Producer, Tool, STATEMENT_TYPE_V1};
use crate::guard::GuardedWriter;
use crate::tally::{Ballot, TallyError, TallyResult, VoteEvent, VoteLog};

pub const DECISION_PREDICATE_TYPE: &str = "https://accord.ai/schemas/policy@v1";
pub const DECISION_ROLE: &str = "Decision Steward";

pub fn governance_link(ballot: &Ballot, result: &TallyResult) -> GovernanceLink {
    GovernanceLink {
        ballot_id: Some(ballot.proposal_id.clone()),
        proposal_id: Some(result.proposal_id.clone()),
        rule: Some(ballot.rule.as_str().to_string()),
        winner: result.winner().map(str::to_string),
        method: Some(result.method_used().to_string()),
        quorum_met: Some(result.quorum_met()),
        participating_weight: Some(result.participating_weight.as_f64()),
        eligible_weight: Some(result.eligible_weight.as_f64()),
    }
}

/// Predicate for documents the decision steward produces
pub(super) fn steward_predicate(producer: &str) -> Predicate {
    let mut predicate = Predicate::new(Producer::new(producer).with_role(DECISION_ROLE));
    predicate.process = Some(Process {
        toolchain: vec![Tool {
            name: "accord-tally".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }],
        extra: BTreeMap::new(),
    });
    predicate
}

/// The `<!-- provenance: ... -->` block opening a generated document
pub(super) fn metadata_block(subject: &str, predicate: &Predicate) -> Result<String, PipelineError> {
    let header = json!({
        "provenance": {
            "_type": STATEMENT_TYPE_V1,
            "predicateType": DECISION_PREDICATE_TYPE,
            "subject": [{ "name": subject }],
            "predicate": predicate,
        }
    });
    let yaml = serde_yaml_ng::to_string(&header).map_err(|e| malformed(e.to_string()))?;
    if yaml.contains("-->") {
        return Err(malformed("ballot text would terminate the metadata comment".to_string()));
    }
    Ok(format!("<!--\n{yaml}-->\n"))
}

/// Render the decision document for `result`, attributed to `producer`
pub fn render_decision(
    ballot: &Ballot,
    result: &TallyResult,
    producer: &str,
    subject: &str,
) -> Result<String, PipelineError> {
    let mut predicate = steward_predicate(producer);
    predicate.governance = Some(governance_link(ballot, result));
    predicate.materials = ballot.materials.iter().map(Material::new).collect();
    let header = metadata_block(subject, &predicate)?;

    let body = serde_json::to_value(result)
        .map(|value| canonical_string(&value))
        .map_err(|e| malformed(e.to_string()))?;
    let winner = result.winner().unwrap_or("none");

    Ok(format!(
        "{header}\n# Decision: {title}\n\n\
         - Ballot: `{id}`\n\
         - Rule: {rule}\n\
         - Method: {method}\n\
         - Winner: **{winner}**\n\
         - Participating weight: {participating} of {eligible} (quorum {quorum})\n\n\
         ## Tally\n\n```json\n{body}\n```\n",
        title = ballot_title(ballot),
        id = ballot.proposal_id,
        rule = ballot.rule.as_str(),
        method = result.method_used(),
        participating = result.participating_weight,
        eligible = result.eligible_weight,
        quorum = result.quorum_threshold,
    ))
}

pub(super) fn ballot_title(ballot: &Ballot) -> &str {
    if ballot.title.is_empty() {
        &ballot.proposal_id
    } else {
        &ballot.title
    }
}

pub(super) fn malformed(reason: String) -> PipelineError {
    PipelineError::Canonical(crate::canonical::CanonicalError::MalformedMetadata { reason })
}

impl Pipeline<'_> {
    /// Certify a tally result.
    ///
    /// Without quorum an `attempt` record goes to the vote log and no
    /// document or envelope is written. Every write target is authorized
    /// before the first write, and the `tally` record is appended only once
    /// the envelope is written and rechecked.
    pub fn certify(
        &mut self,
        ballot: &Ballot,
        result: &TallyResult,
        log: &VoteLog,
        document_out: &Path,
        envelope_out: &Path,
    ) -> PipelineRecord {
        let trace = Trace::start("certify");
        self.certify_traced(&trace, ballot, result, log, document_out, envelope_out)
            .with_detail("ballot_id", ballot.proposal_id.clone())
            .with_detail("winner", result.winner().map(str::to_string))
            .with_detail("method", result.method_used())
    }

    pub(super) fn certify_traced(
        &mut self,
        trace: &Trace,
        ballot: &Ballot,
        result: &TallyResult,
        log: &VoteLog,
        document_out: &Path,
        envelope_out: &Path,
    ) -> PipelineRecord {
        let writer = GuardedWriter::new(self.capability);

        if result.proposal_id != ballot.proposal_id {
            let err = PipelineError::Tally(TallyError::Parse {
                reason: format!(
                    "result for {} does not belong to ballot {}",
                    result.proposal_id, ballot.proposal_id
                ),
            });
            return trace.failure(&err);
        }

        if !result.quorum_met() {
            let err = PipelineError::QuorumFailed {
                participating: result.participating_weight.to_string(),
                eligible: result.eligible_weight.to_string(),
                threshold: result.quorum_threshold,
            };
            warn!(ballot = %ballot.proposal_id, "{err}");
            let mut record = trace.failure(&err);
            if let Err(log_err) = log.append(&writer, VoteEvent::quorum_failed(result)) {
                log_err.log_if_security_critical();
                record.errors.push(format!("attempt not logged: {log_err}"));
            }
            return record;
        }

        let document = match self.write_decision(&writer, ballot, result, log, document_out, envelope_out) {
            Ok(document) => document,
            Err(e) => return trace.failure(&e),
        };

        let mut record = self.attest_traced(trace, &document, envelope_out);
        if !record.ok {
            return record;
        }
        if let Err(e) = log.append(&writer, VoteEvent::tallied(result)) {
            e.log_if_security_critical();
            record.ok = false;
            record.error_code = e.error_code();
            record.errors.push(format!("tally not logged: {e}"));
            return record;
        }
        info!(
            ballot = %ballot.proposal_id,
            winner = result.winner().unwrap_or("-"),
            "decision certified"
        );
        record
    }

    fn write_decision(
        &self,
        writer: &GuardedWriter,
        ballot: &Ballot,
        result: &TallyResult,
        log: &VoteLog,
        document_out: &Path,
        envelope_out: &Path,
    ) -> Result<PathBuf, PipelineError> {
        self.authorize_all(&[document_out, envelope_out, log.path()])?;
        let target = self.capability.authorize_write(document_out)?;
        let text = render_decision(ballot, result, self.capability.actor_id(), &target.relative)?;
        let written = writer.write(document_out, text.as_bytes())?;
        Ok(written.absolute)
    }
}
