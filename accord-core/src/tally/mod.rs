//! Ballot tally engine
//!
//! Weighted ranked-choice voting: recusal, a quorum gate, then the ballot's
//! rule. Condorcet falls back to instant-runoff when no candidate beats
//! every other head to head. Consensus falls back the same way when first
//! choices differ.

pub mod ballot;
pub mod error;
pub mod irv;
pub mod log;
pub mod pairwise;
pub mod result;

pub use ballot::{Ballot, TallyRule, Voter, Weight};
pub use error::TallyError;
pub use irv::IrvRound;
pub use log::{parse_ranking, VoteEvent, VoteLog, VoteRecord};
pub use pairwise::PairwiseMatrix;
pub use result::{Outcome, TallyResult};

use tracing::{debug, info};

/// `participating / eligible >= threshold`, compared exactly in micro-units
fn quorum_reached(participating: Weight, eligible: Weight, threshold: f64) -> bool {
    if eligible.is_zero() {
        return false;
    }
    let threshold = match Weight::from_f64(threshold) {
        Some(t) => t.micros() as u128,
        None => return false,
    };
    participating.micros() as u128 * Weight::SCALE as u128 >= threshold * eligible.micros() as u128
}

fn recused_by(voter: &Voter, rules: &[String]) -> bool {
    voter.context_tags.iter().any(|tag| rules.contains(tag))
}

fn unanimous_first_choice<'a>(voters: &[&'a Voter]) -> Option<&'a str> {
    let mut choices = voters.iter().filter_map(|v| v.first_choice());
    let first = choices.next()?;
    choices.all(|c| c == first).then_some(first)
}

/// Tally a validated ballot.
///
/// A missed quorum is an outcome, not an error.
pub fn tally(ballot: &Ballot) -> Result<TallyResult, TallyError> {
    ballot.validate()?;

    let (recused, active): (Vec<&Voter>, Vec<&Voter>) = ballot
        .voters
        .iter()
        .partition(|v| recused_by(v, &ballot.recusal_rules));
    let recused_weight: Weight = recused.iter().map(|v| v.weight).sum();
    let eligible_weight = ballot.eligible_weight().saturating_sub(recused_weight);
    let participating_weight: Weight = active.iter().map(|v| v.weight).sum();
    let recused: Vec<String> = recused.iter().map(|v| v.voter_id.clone()).collect();

    if !recused.is_empty() {
        debug!(ballot = %ballot.proposal_id, recused = ?recused, "voters recused");
    }

    let pairwise_matrix = PairwiseMatrix::build(&ballot.candidates, active.iter().copied());
    let quorum_met = quorum_reached(
        participating_weight,
        eligible_weight,
        ballot.quorum_threshold,
    );

    let outcome = if !quorum_met {
        Outcome::NoQuorum
    } else {
        let condorcet = match ballot.rule {
            TallyRule::Condorcet => pairwise_matrix.condorcet_winner().map(|w| Outcome::Condorcet {
                winner: w.to_string(),
            }),
            TallyRule::Consensus => {
                let voting: Vec<&Voter> = active.iter().copied().filter(|v| !v.is_abstaining()).collect();
                unanimous_first_choice(&voting).map(|w| Outcome::Consensus {
                    winner: w.to_string(),
                })
            }
            TallyRule::Irv => None,
        };
        condorcet.unwrap_or_else(|| {
            let (winner, rounds) = irv::run(&ballot.candidates, active.iter().copied());
            Outcome::Irv { winner, rounds }
        })
    };

    let result = TallyResult {
        proposal_id: ballot.proposal_id.clone(),
        rule: ballot.rule,
        outcome,
        pairwise_matrix,
        participating_weight,
        eligible_weight,
        quorum_threshold: ballot.quorum_threshold,
        quorum_met,
        recused,
    };

    info!(
        ballot = %result.proposal_id,
        method = result.method_used(),
        winner = result.winner().unwrap_or("-"),
        participating = %result.participating_weight,
        eligible = %result.eligible_weight,
        "tally complete"
    );
    Ok(result)
}
