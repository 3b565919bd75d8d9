//! Instant-runoff rounds

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

use super::ballot::{Voter, Weight};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrvRound {
    pub round: usize,
    /// First-choice weight per remaining candidate
    pub counts: BTreeMap<String, Weight>,
    pub total: Weight,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eliminated: Option<String>,
}

/// Run instant-runoff until one candidate holds a strict majority of the
/// round total or only one candidate remains.
///
/// The lowest count is eliminated each round; ties go to the byte-wise
/// smallest identifier, so the result never depends on input order.
pub fn run<'a>(
    candidates: &[String],
    voters: impl IntoIterator<Item = &'a Voter> + Clone,
) -> (String, Vec<IrvRound>) {
    let mut remaining: Vec<&str> = candidates.iter().map(String::as_str).collect();
    remaining.sort_unstable();
    let mut rounds = Vec::new();

    loop {
        let mut counts: BTreeMap<String, Weight> = remaining
            .iter()
            .map(|c| (c.to_string(), Weight::ZERO))
            .collect();
        for voter in voters.clone() {
            if voter.abstain {
                continue;
            }
            let choice = voter
                .ranking
                .iter()
                .find(|c| remaining.contains(&c.as_str()));
            if let Some(choice) = choice {
                if let Some(count) = counts.get_mut(choice) {
                    *count += voter.weight;
                }
            }
        }
        let total: Weight = counts.values().copied().sum();
        let number = rounds.len() + 1;

        let majority = counts
            .iter()
            .find(|(_, count)| count.micros() as u128 * 2 > total.micros() as u128)
            .map(|(name, _)| name.clone());
        let winner = match (majority, remaining.as_slice()) {
            (Some(name), _) => Some(name),
            (None, [only]) => Some(only.to_string()),
            _ => None,
        };

        if let Some(winner) = winner {
            trace!(round = number, winner = %winner, "irv round decided");
            rounds.push(IrvRound {
                round: number,
                counts,
                total,
                eliminated: None,
            });
            return (winner, rounds);
        }

        // BTreeMap iteration is name-ordered, so min_by_key keeps the first name on ties
        let loser = counts
            .iter()
            .min_by_key(|(_, count)| **count)
            .map(|(name, _)| name.clone())
            .unwrap_or_default();
        trace!(round = number, eliminated = %loser, "irv round");
        remaining.retain(|c| *c != loser);
        rounds.push(IrvRound {
            round: number,
            counts,
            total,
            eliminated: Some(loser),
        });
    }
}
