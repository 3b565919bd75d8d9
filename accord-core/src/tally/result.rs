use serde::Serialize;

use super::ballot::{TallyRule, Weight};
use super::irv::IrvRound;
use super::pairwise::PairwiseMatrix;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Outcome {
    Condorcet { winner: String },
    Irv { winner: String, rounds: Vec<IrvRound> },
    Consensus { winner: String },
    NoQuorum,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TallyResult {
    pub proposal_id: String,
    pub rule: TallyRule,
    pub outcome: Outcome,
    pub pairwise_matrix: PairwiseMatrix,
    pub participating_weight: Weight,
    pub eligible_weight: Weight,
    pub quorum_threshold: f64,
    pub quorum_met: bool,
    pub recused: Vec<String>,
}

impl TallyResult {
    pub fn winner(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Condorcet { winner }
            | Outcome::Irv { winner, .. }
            | Outcome::Consensus { winner } => Some(winner),
            Outcome::NoQuorum => None,
        }
    }

    pub fn method_used(&self) -> &'static str {
        match self.outcome {
            Outcome::Condorcet { .. } => "condorcet",
            Outcome::Irv { .. } => "irv",
            Outcome::Consensus { .. } => "consensus",
            Outcome::NoQuorum => "no_quorum",
        }
    }

    pub fn quorum_met(&self) -> bool {
        self.quorum_met
    }

    pub fn rounds(&self) -> &[IrvRound] {
        match &self.outcome {
            Outcome::Irv { rounds, .. } => rounds,
            _ => &[],
        }
    }
}
