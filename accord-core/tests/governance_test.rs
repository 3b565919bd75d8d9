//! Ballots from YAML and vote log through to a certified decision

mod common;

use accord_core::guard::GuardedWriter;
use accord_core::pipeline::{verify_files, Pipeline};
use accord_core::tally::{tally, Ballot, VoteEvent, VoteLog, Voter, Weight};
use accord_core::ErrorCode;
use anyhow::Result;
use pretty_assertions::assert_eq;

const BALLOT: &str = "
proposal_id: B-RET-01
title: Retention period
options: [A, B, C]
quorum: 0.5
recusal_rules: ['author:B-RET-01']
voters:
  - id: AGENT-1
    weight: 1
    preferences: [A, B, C]
  - id: AGENT-2
    weight: 1
    preferences: [B, A, C]
  - id: AGENT-3
    weight: 1.5
    preferences: [A, C, B]
  - id: AGENT-4
    weight: 2
    context_tags: ['author:B-RET-01']
    preferences: [C, B, A]
";

fn vote(log: &VoteLog, writer: &GuardedWriter, agent: &str, ranking: &[&str]) -> Result<()> {
    log.append(
        writer,
        VoteEvent::Vote {
            ballot: "B-RET-01".into(),
            agent: agent.into(),
            ranking: ranking.iter().map(|c| c.to_string()).collect(),
            abstain: false,
        },
    )?;
    Ok(())
}

#[test]
fn test_condorcet_winner_is_order_independent() -> Result<()> {
    let ballot = Ballot::from_yaml_str(BALLOT)?;
    let expected = tally(&ballot)?;
    assert_eq!(expected.winner(), Some("A"));
    assert_eq!(expected.method_used(), "condorcet");
    assert_eq!(expected.recused, vec!["AGENT-4".to_string()]);

    let mut reversed = ballot.clone();
    reversed.voters.reverse();
    let mut rotated = ballot.clone();
    rotated.voters.rotate_left(2);

    for permuted in [reversed, rotated] {
        let result = tally(&permuted)?;
        assert_eq!(result.winner(), Some("A"));
        assert_eq!(result.pairwise_matrix, expected.pairwise_matrix);
        assert_eq!(result.participating_weight, expected.participating_weight);
    }
    Ok(())
}

#[test]
fn test_rock_paper_scissors_goes_to_irv() -> Result<()> {
    let mut ballot = Ballot::new("B-RPS", &["A", "B", "C"]);
    ballot.voters = vec![
        Voter::new("AGENT-1", Weight::ONE, &["A", "B", "C"]),
        Voter::new("AGENT-2", Weight::ONE, &["B", "C", "A"]),
        Voter::new("AGENT-3", Weight::ONE, &["C", "A", "B"]),
    ];

    let result = tally(&ballot)?;
    assert_eq!(result.method_used(), "irv");
    assert_eq!(result.winner(), Some("B"));
    let rounds = result.rounds();
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0].eliminated.as_deref(), Some("A"));
    assert_eq!(rounds[1].counts.get("B"), Some(&Weight::from_micros(2_000_000)));
    Ok(())
}

#[test]
fn test_logged_votes_certify_into_verifiable_decision() -> Result<()> {
    common::init_test_logging();
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let key = common::signing_key();
    let writer = GuardedWriter::new(&capability);
    let base = capability.base_directory();

    let mut ballot = Ballot::from_yaml_str(BALLOT)?;
    let log = VoteLog::for_ballot(&base.join("bus/ballots"), &ballot.proposal_id);
    // AGENT-2 changes their mind; the later vote wins
    vote(&log, &writer, "AGENT-2", &["B", "A", "C"])?;
    vote(&log, &writer, "AGENT-2", &["C", "B", "A"])?;
    let votes = log.collect_votes(&ballot)?;
    ballot.merge_votes(votes);
    assert_eq!(ballot.voters[1].ranking, vec!["C", "B", "A"]);

    let result = tally(&ballot)?;
    assert_eq!(result.winner(), Some("A"));

    let document = base.join("org/decisions/B-RET-01.md");
    let envelope = base.join("attestations/B-RET-01.dsse.json");
    let mut pipeline = Pipeline::new(&capability, &key);
    let record = pipeline.certify(&ballot, &result, &log, &document, &envelope);
    assert!(record.ok, "{:?}", record.errors);
    assert_eq!(record.detail.get("winner"), Some(&serde_json::json!("A")));

    let verified = verify_files(&envelope, &document, &key.verifying_key(), Some(base));
    assert!(verified.ok, "{:?}", verified.errors);

    let events: Vec<VoteEvent> = log.records()?.into_iter().map(|r| r.event).collect();
    assert!(matches!(
        events.last(),
        Some(VoteEvent::Tally { winner: Some(w), quorum_met: true, .. }) if w == "A"
    ));
    Ok(())
}

#[test]
fn test_unlisted_voter_cannot_swing_the_outcome() -> Result<()> {
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let writer = GuardedWriter::new(&capability);

    let mut ballot = Ballot::new("B-RET-01", &["A", "B"]);
    ballot.voters = vec![
        Voter::new("AGENT-1", Weight::ONE, &["A", "B"]),
        Voter::new("AGENT-2", Weight::from_f64(2.0).unwrap(), &["B", "A"]),
    ];
    ballot.eligible_weight_total = Some(Weight::from_f64(3.0).unwrap());
    let before = tally(&ballot)?;
    assert_eq!(before.winner(), Some("B"));

    let log = VoteLog::for_ballot(&capability.base_directory().join("bus/ballots"), &ballot.proposal_id);
    vote(&log, &writer, "INTRUDER", &["A"])?;
    let votes = log.collect_votes(&ballot)?;
    assert!(votes.is_empty());

    // even handed straight to the ballot, the vote is ignored
    ballot.merge_votes(vec![Voter::new("INTRUDER", Weight::from_f64(100.0).unwrap(), &["A"])]);
    let after = tally(&ballot)?;
    assert_eq!(after.winner(), Some("B"));
    assert_eq!(after.participating_weight, Weight::from_f64(3.0).unwrap());
    assert!(after.participating_weight <= after.eligible_weight);
    Ok(())
}

#[test]
fn test_invalid_logged_vote_does_not_block_tally() -> Result<()> {
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let writer = GuardedWriter::new(&capability);

    let mut ballot = Ballot::from_yaml_str(BALLOT)?;
    let log = VoteLog::for_ballot(&capability.base_directory().join("bus/ballots"), &ballot.proposal_id);
    vote(&log, &writer, "AGENT-1", &["Z", "A"])?;
    vote(&log, &writer, "AGENT-3", &["B", "B"])?;
    vote(&log, &writer, "AGENT-2", &["C", "A", "B"])?;

    let votes = log.collect_votes(&ballot)?;
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].voter_id, "AGENT-2");
    ballot.merge_votes(votes);

    let result = tally(&ballot)?;
    assert_eq!(result.winner(), Some("A"));
    assert_eq!(ballot.voters[0].ranking, vec!["A", "B", "C"]);
    Ok(())
}

#[test]
fn test_below_quorum_writes_no_decision() -> Result<()> {
    let store = common::store();
    let capability = common::policy_owner(store.path());
    let key = common::signing_key();
    let base = capability.base_directory();

    let mut ballot = Ballot::from_yaml_str(BALLOT)?;
    ballot.eligible_weight_total = Some(Weight::from_micros(20_000_000));
    let result = tally(&ballot)?;
    assert!(!result.quorum_met());
    assert_eq!(result.winner(), None);
    assert_eq!(result.method_used(), "no_quorum");

    let log = VoteLog::for_ballot(&base.join("bus/ballots"), &ballot.proposal_id);
    let document = base.join("org/decisions/B-RET-01.md");
    let envelope = base.join("attestations/B-RET-01.dsse.json");
    let record = Pipeline::new(&capability, &key).certify(&ballot, &result, &log, &document, &envelope);

    assert!(!record.ok);
    assert_eq!(record.error_code, ErrorCode::QuorumFailed);
    assert!(!document.exists());
    assert!(!envelope.exists());
    assert!(!base.join("attestations").exists());

    let records = log.records()?;
    assert_eq!(records.len(), 1);
    assert!(matches!(
        records[0].event,
        VoteEvent::Attempt { error_code: ErrorCode::QuorumFailed, .. }
    ));
    Ok(())
}
