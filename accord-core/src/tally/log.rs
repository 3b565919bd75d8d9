//! Append-only JSONL vote log
//!
//! One record per line. Writes go through the scope guard; reads skip lines
//! that do not parse, so a torn or hand-edited line never blocks a tally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::ballot::{Ballot, Voter, Weight};
use super::result::TallyResult;
use crate::error_code::ErrorCode;
use crate::guard::{GuardedWriter, ScopeError};

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum VoteEvent {
    Propose {
        ballot: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Vote {
        ballot: String,
        agent: String,
        ranking: Vec<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        abstain: bool,
    },
    Tally {
        ballot: String,
        winner: Option<String>,
        method: String,
        quorum_met: bool,
    },
    /// A certification that stopped before producing an envelope
    Attempt {
        ballot: String,
        error_code: ErrorCode,
        participating_weight: Weight,
        eligible_weight: Weight,
    },
}

impl VoteEvent {
    pub fn ballot(&self) -> &str {
        match self {
            VoteEvent::Propose { ballot, .. }
            | VoteEvent::Vote { ballot, .. }
            | VoteEvent::Tally { ballot, .. }
            | VoteEvent::Attempt { ballot, .. } => ballot,
        }
    }

    pub fn tallied(result: &TallyResult) -> Self {
        VoteEvent::Tally {
            ballot: result.proposal_id.clone(),
            winner: result.winner().map(str::to_string),
            method: result.method_used().to_string(),
            quorum_met: result.quorum_met(),
        }
    }

    pub fn quorum_failed(result: &TallyResult) -> Self {
        VoteEvent::Attempt {
            ballot: result.proposal_id.clone(),
            error_code: ErrorCode::QuorumFailed,
            participating_weight: result.participating_weight,
            eligible_weight: result.eligible_weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub t: DateTime<Utc>,
    #[serde(flatten)]
    pub event: VoteEvent,
}

/// Split a ranking written as `A>B>C` (commas also accepted)
pub fn parse_ranking(text: &str) -> Vec<String> {
    text.split(['>', ','])
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct VoteLog {
    path: PathBuf,
}

impl VoteLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<log_dir>/<ballot_id>.jsonl`
    pub fn for_ballot(log_dir: &Path, ballot_id: &str) -> Self {
        Self::new(log_dir.join(format!("{ballot_id}.jsonl")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, writer: &GuardedWriter, event: VoteEvent) -> Result<VoteRecord, ScopeError> {
        let record = VoteRecord {
            t: Utc::now(),
            event,
        };
        let line = serde_json::to_string(&record).map_err(|e| ScopeError::WriteFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        writer.append_line(&self.path, &line)?;
        debug!(log = %self.path.display(), ballot = record.event.ballot(), "vote log append");
        Ok(record)
    }

    /// All parseable records in file order; a missing log reads as empty
    pub fn records(&self) -> io::Result<Vec<VoteRecord>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<VoteRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    log = %self.path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping malformed vote log line"
                ),
            }
        }
        Ok(records)
    }

    /// Latest valid vote per agent for `ballot`, ordered by agent id.
    ///
    /// Votes the ballot would not accept are skipped with a warning. Weights
    /// come from the ballot, never from the log.
    pub fn collect_votes(&self, ballot: &Ballot) -> io::Result<Vec<Voter>> {
        let mut latest: BTreeMap<String, Voter> = BTreeMap::new();
        for record in self.records()? {
            let VoteEvent::Vote {
                ballot: ballot_id,
                agent,
                ranking,
                abstain,
            } = record.event
            else {
                continue;
            };
            if ballot_id != ballot.proposal_id {
                continue;
            }
            let weight = ballot
                .voters
                .iter()
                .find(|v| v.voter_id == agent)
                .map_or(Weight::ONE, |v| v.weight);
            let vote = Voter {
                voter_id: agent,
                weight,
                ranking,
                context_tags: Vec::new(),
                abstain,
            };
            if let Err(e) = ballot.check_vote(&vote) {
                warn!(
                    log = %self.path.display(),
                    ballot = %ballot_id,
                    error = %e,
                    "skipping invalid vote"
                );
                continue;
            }
            latest.insert(vote.voter_id.clone(), vote);
        }
        Ok(latest.into_values().collect())
    }
}
