//! Ballot model
//!
//! Weights are fixed-point micro-units so sums, ties and majorities are
//! exact. They read and write as plain decimal numbers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::Path;
use tracing::warn;

use super::error::TallyError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Weight(u64);

impl Weight {
    /// Micro-units per unit of weight
    pub const SCALE: u64 = 1_000_000;
    pub const ZERO: Weight = Weight(0);
    pub const ONE: Weight = Weight(Self::SCALE);

    pub const fn from_micros(micros: u64) -> Self {
        Weight(micros)
    }

    /// `None` for negative, NaN or infinite values
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let micros = (value * Self::SCALE as f64).round();
        (micros <= u64::MAX as f64).then_some(Weight(micros as u64))
    }

    pub fn micros(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: Weight) -> Weight {
        Weight(self.0.saturating_sub(other.0))
    }
}

impl Add for Weight {
    type Output = Weight;

    fn add(self, other: Weight) -> Weight {
        Weight(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Weight {
    fn add_assign(&mut self, other: Weight) {
        *self = *self + other;
    }
}

impl Sum for Weight {
    fn sum<I: Iterator<Item = Weight>>(iter: I) -> Weight {
        iter.fold(Weight::ZERO, Add::add)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

impl Serialize for Weight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Weight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Weight::from_f64(value).ok_or_else(|| {
            serde::de::Error::custom(format!("weight must be finite and >= 0, got {value}"))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TallyRule {
    #[default]
    Condorcet,
    Irv,
    Consensus,
}

impl TallyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            TallyRule::Condorcet => "condorcet",
            TallyRule::Irv => "irv",
            TallyRule::Consensus => "consensus",
        }
    }
}

fn default_weight() -> Weight {
    Weight::ONE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(alias = "id", alias = "agent")]
    pub voter_id: String,

    #[serde(default = "default_weight")]
    pub weight: Weight,

    /// Most preferred first
    #[serde(default, alias = "preferences")]
    pub ranking: Vec<String>,

    #[serde(default)]
    pub context_tags: Vec<String>,

    #[serde(default)]
    pub abstain: bool,
}

impl Voter {
    pub fn new(voter_id: impl Into<String>, weight: Weight, ranking: &[&str]) -> Self {
        Self {
            voter_id: voter_id.into(),
            weight,
            ranking: ranking.iter().map(|c| c.to_string()).collect(),
            context_tags: Vec::new(),
            abstain: false,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.context_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Abstaining voters count toward participation only
    pub fn is_abstaining(&self) -> bool {
        self.abstain || self.ranking.is_empty()
    }

    pub fn first_choice(&self) -> Option<&str> {
        if self.abstain {
            return None;
        }
        self.ranking.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(alias = "id")]
    pub proposal_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(alias = "options")]
    pub candidates: Vec<String>,

    #[serde(default)]
    pub voters: Vec<Voter>,

    /// Defaults to the sum of listed voter weights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_weight_total: Option<Weight>,

    #[serde(default, alias = "quorum")]
    pub quorum_threshold: f64,

    #[serde(default)]
    pub recusal_rules: Vec<String>,

    #[serde(default)]
    pub rule: TallyRule,

    /// Inputs the decision depends on, recorded as materials when certified
    #[serde(default, alias = "proposal_materials", skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<String>,

    /// Draft document per candidate, base-relative, embedded on adoption
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub drafts: BTreeMap<String, String>,
}

impl Ballot {
    pub fn new(proposal_id: impl Into<String>, candidates: &[&str]) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            title: String::new(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            voters: Vec::new(),
            eligible_weight_total: None,
            quorum_threshold: 0.0,
            recusal_rules: Vec::new(),
            rule: TallyRule::default(),
            materials: Vec::new(),
            drafts: BTreeMap::new(),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, TallyError> {
        serde_yaml_ng::from_str(text).map_err(|e| TallyError::Parse {
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, TallyError> {
        let text = fs::read_to_string(path).map_err(|source| TallyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn eligible_weight(&self) -> Weight {
        self.eligible_weight_total
            .unwrap_or_else(|| self.voters.iter().map(|v| v.weight).sum())
    }

    /// True when the ballot names its electorate
    pub fn lists_voters(&self) -> bool {
        !self.voters.is_empty()
    }

    /// Check a cast vote before it is logged or counted.
    ///
    /// A ballot that lists voters only accepts votes from them.
    pub fn check_vote(&self, vote: &Voter) -> Result<(), TallyError> {
        if self.lists_voters() && !self.voters.iter().any(|v| v.voter_id == vote.voter_id) {
            return Err(TallyError::UnlistedVoter(vote.voter_id.clone()));
        }
        self.check_ranking(vote)
    }

    fn check_ranking(&self, voter: &Voter) -> Result<(), TallyError> {
        let mut ranked = BTreeSet::new();
        for candidate in &voter.ranking {
            if !self.candidates.contains(candidate) {
                return Err(TallyError::UnknownCandidate {
                    voter: voter.voter_id.clone(),
                    candidate: candidate.clone(),
                });
            }
            if !ranked.insert(candidate.as_str()) {
                return Err(TallyError::RepeatedCandidate {
                    voter: voter.voter_id.clone(),
                    candidate: candidate.clone(),
                });
            }
        }
        Ok(())
    }

    /// Merge cast votes into the ballot.
    ///
    /// Listed voters keep the weight the ballot gives them and unlisted ones
    /// are skipped. An open ballot admits every voter at weight 1. Invalid
    /// votes are skipped with a warning.
    pub fn merge_votes(&mut self, votes: impl IntoIterator<Item = Voter>) {
        let listed = self.lists_voters();
        for vote in votes {
            let checked = if listed {
                self.check_vote(&vote)
            } else {
                self.check_ranking(&vote)
            };
            if let Err(e) = checked {
                warn!(ballot = %self.proposal_id, voter = %vote.voter_id, error = %e, "ignoring vote");
                continue;
            }
            match self.voters.iter_mut().find(|v| v.voter_id == vote.voter_id) {
                Some(existing) => {
                    existing.ranking = vote.ranking;
                    existing.abstain = vote.abstain;
                }
                None => self.voters.push(Voter {
                    weight: Weight::ONE,
                    context_tags: Vec::new(),
                    ..vote
                }),
            }
        }
    }

    pub fn validate(&self) -> Result<(), TallyError> {
        if self.candidates.is_empty() {
            return Err(TallyError::NoCandidates);
        }
        let mut seen = BTreeSet::new();
        for candidate in &self.candidates {
            if !seen.insert(candidate.as_str()) {
                return Err(TallyError::DuplicateCandidate(candidate.clone()));
            }
        }
        if !self.quorum_threshold.is_finite() || !(0.0..=1.0).contains(&self.quorum_threshold) {
            return Err(TallyError::InvalidQuorum(self.quorum_threshold));
        }
        if let Some(unknown) = self.drafts.keys().find(|c| !seen.contains(c.as_str())) {
            return Err(TallyError::Parse {
                reason: format!("draft given for unknown candidate {unknown}"),
            });
        }

        let mut voter_ids = BTreeSet::new();
        for voter in &self.voters {
            if !voter_ids.insert(voter.voter_id.as_str()) {
                return Err(TallyError::DuplicateVoter(voter.voter_id.clone()));
            }
            self.check_ranking(voter)?;
        }

        let listed: Weight = self.voters.iter().map(|v| v.weight).sum();
        if let Some(eligible) = self.eligible_weight_total {
            if listed > eligible {
                return Err(TallyError::ExcessWeight {
                    listed: listed.to_string(),
                    eligible: eligible.to_string(),
                });
            }
        }
        Ok(())
    }
}
