//! Ballot commands: propose, vote, tally, certify, adopt

use anyhow::Result;
use clap::Args;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use accord_core::guard::GuardedWriter;
use accord_core::pipeline::{AdoptionTargets, Pipeline, Trace};
use accord_core::tally::{self, parse_ranking, Ballot, TallyError, TallyResult, VoteEvent, VoteLog, Voter, Weight};
use accord_core::ErrorCode;

use crate::{absolutize, emit, failed, Session};

#[derive(Args, Debug)]
pub struct ProposeArgs {
    /// Ballot definition (YAML)
    ballot: PathBuf,
}

#[derive(Args, Debug)]
pub struct VoteArgs {
    /// Ballot definition (YAML)
    ballot: PathBuf,

    /// Preference order, e.g. "A>B>C"
    #[clap(long, required_unless_present = "abstain")]
    ranking: Option<String>,

    /// Voter id (default: the acting charter's agent)
    #[clap(long)]
    agent: Option<String>,

    /// Count toward quorum without ranking anyone
    #[clap(long, conflicts_with = "ranking")]
    abstain: bool,
}

#[derive(Args, Debug)]
pub struct TallyArgs {
    /// Ballot definition (YAML)
    ballot: PathBuf,

    /// Ignore votes recorded in the vote log
    #[clap(long)]
    no_log: bool,

    /// Print a pairwise table instead of JSON
    #[clap(long)]
    table: bool,
}

#[derive(Args, Debug)]
pub struct CertifyArgs {
    /// Ballot definition (YAML)
    ballot: PathBuf,

    /// Decision document (default: org/decisions/<ballot id>.md under the base)
    #[clap(long)]
    out: Option<PathBuf>,

    /// Envelope path (default: <attestation_dir>/<document>.dsse.json)
    #[clap(long)]
    envelope: Option<PathBuf>,

    /// Private key (default: <keys_dir>/ed25519.key)
    #[clap(long)]
    key: Option<PathBuf>,

    /// Ignore votes recorded in the vote log
    #[clap(long)]
    no_log: bool,
}

#[derive(Args, Debug)]
pub struct AdoptArgs {
    /// Ballot definition (YAML)
    ballot: PathBuf,

    /// Private key (default: <keys_dir>/ed25519.key)
    #[clap(long)]
    key: Option<PathBuf>,

    /// Ignore votes recorded in the vote log
    #[clap(long)]
    no_log: bool,
}

fn ballot_failure(event: &'static str, e: &TallyError) -> Result<bool> {
    emit(&failed(event, e.error_code(), e))?;
    Ok(false)
}

/// Load a ballot and merge the latest logged votes into it
fn load_ballot(session: &Session, path: &Path, use_log: bool) -> Result<(Ballot, VoteLog), TallyError> {
    let mut ballot = Ballot::load(path)?;
    let log = VoteLog::for_ballot(&session.config.ballot_log_dir, &ballot.proposal_id);
    if use_log {
        let votes = log
            .collect_votes(&ballot)
            .map_err(|source| TallyError::Read {
                path: log.path().to_path_buf(),
                source,
            })?;
        ballot.merge_votes(votes);
    }
    Ok((ballot, log))
}

pub fn propose(session: &Session, args: ProposeArgs) -> Result<bool> {
    let (ballot, log) = match load_ballot(session, &absolutize(&args.ballot)?, false) {
        Ok(loaded) => loaded,
        Err(e) => return ballot_failure("propose", &e),
    };
    if let Err(e) = ballot.validate() {
        return ballot_failure("propose", &e);
    }
    let record = session.capability().and_then(|capability| {
        let event = VoteEvent::Propose {
            ballot: ballot.proposal_id.clone(),
            title: (!ballot.title.is_empty()).then(|| ballot.title.clone()),
        };
        log.append(&GuardedWriter::new(&capability), event)
    });
    let record = match record {
        Ok(_) => Trace::start("propose").success(),
        Err(e) => failed("propose", e.error_code(), &e),
    }
    .with_file(log.path().to_string_lossy())
    .with_detail("ballot_id", ballot.proposal_id);
    emit(&record)?;
    Ok(record.ok)
}

pub fn vote(session: &Session, args: VoteArgs) -> Result<bool> {
    let ballot = match Ballot::load(&absolutize(&args.ballot)?) {
        Ok(ballot) => ballot,
        Err(e) => return ballot_failure("vote", &e),
    };
    let capability = match session.capability() {
        Ok(c) => c,
        Err(e) => {
            emit(&failed("vote", e.error_code(), &e))?;
            return Ok(false);
        }
    };
    let agent = args
        .agent
        .unwrap_or_else(|| capability.actor_id().to_string());
    let ranking = args.ranking.as_deref().map(parse_ranking).unwrap_or_default();

    let mut cast = Voter::new(agent.clone(), Weight::ONE, &[]);
    cast.ranking = ranking.clone();
    cast.abstain = args.abstain;
    if let Err(e) = ballot.validate().and_then(|()| ballot.check_vote(&cast)) {
        let record = failed("vote", e.error_code(), &e)
            .with_detail("ballot_id", ballot.proposal_id)
            .with_detail("agent", agent);
        emit(&record)?;
        return Ok(false);
    }

    let log = VoteLog::for_ballot(&session.config.ballot_log_dir, &ballot.proposal_id);
    let event = VoteEvent::Vote {
        ballot: ballot.proposal_id.clone(),
        agent: agent.clone(),
        ranking,
        abstain: args.abstain,
    };
    let record = match log.append(&GuardedWriter::new(&capability), event) {
        Ok(_) => Trace::start("vote").success(),
        Err(e) => failed("vote", e.error_code(), &e),
    }
    .with_file(log.path().to_string_lossy())
    .with_detail("ballot_id", ballot.proposal_id)
    .with_detail("agent", agent);
    emit(&record)?;
    Ok(record.ok)
}

#[derive(Tabled)]
struct PairwiseRow {
    #[tabled(rename = "Candidate")]
    candidate: String,
    #[tabled(rename = "Beats")]
    beats: String,
    #[tabled(rename = "Loses to")]
    loses_to: String,
}

fn print_table(result: &TallyResult) {
    let matrix = &result.pairwise_matrix;
    let rows: Vec<PairwiseRow> = matrix
        .candidates()
        .iter()
        .map(|a| {
            let versus = |wanted: Ordering| {
                matrix
                    .candidates()
                    .iter()
                    .filter(|b| *b != a)
                    .filter(|b| matrix.preference(a, b).cmp(&matrix.preference(b, a)) == wanted)
                    .map(|b| format!("{b} ({}-{})", matrix.preference(a, b), matrix.preference(b, a)))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            PairwiseRow {
                candidate: a.clone(),
                beats: versus(Ordering::Greater),
                loses_to: versus(Ordering::Less),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    for round in result.rounds() {
        let counts = round
            .counts
            .iter()
            .map(|(c, w)| format!("{c}={w}"))
            .collect::<Vec<_>>()
            .join(" ");
        match &round.eliminated {
            Some(out) => println!("IRV round {}: {counts} -> eliminate {out}", round.round),
            None => println!("IRV round {}: {counts}", round.round),
        }
    }
    println!(
        "Method: {}  Winner: {}  Participation: {} of {} (quorum {})",
        result.method_used(),
        result.winner().unwrap_or("none"),
        result.participating_weight,
        result.eligible_weight,
        result.quorum_threshold
    );
}

pub fn tally(session: &Session, args: TallyArgs) -> Result<bool> {
    let (ballot, _log) = match load_ballot(session, &absolutize(&args.ballot)?, !args.no_log) {
        Ok(loaded) => loaded,
        Err(e) => return ballot_failure("tally", &e),
    };
    let result = match tally::tally(&ballot) {
        Ok(result) => result,
        Err(e) => return ballot_failure("tally", &e),
    };

    if args.table {
        print_table(&result);
        return Ok(true);
    }
    let record = Trace::start("tally")
        .success()
        .with_detail("result", serde_json::to_value(&result)?);
    emit(&record)?;
    Ok(true)
}

pub fn certify(session: &Session, args: CertifyArgs) -> Result<bool> {
    let (ballot, log) = match load_ballot(session, &absolutize(&args.ballot)?, !args.no_log) {
        Ok(loaded) => loaded,
        Err(e) => return ballot_failure("certify", &e),
    };
    let result = match tally::tally(&ballot) {
        Ok(result) => result,
        Err(e) => return ballot_failure("certify", &e),
    };
    let capability = match session.capability() {
        Ok(c) => c,
        Err(e) => {
            emit(&failed("certify", e.error_code(), &e))?;
            return Ok(false);
        }
    };
    let key = match session.signing_key(args.key.as_deref()) {
        Ok(k) => k,
        Err(e) => {
            emit(&failed("certify", e.error_code(), &e))?;
            return Ok(false);
        }
    };

    let document = match &args.out {
        Some(path) => absolutize(path)?,
        None => capability
            .base_directory()
            .join("org/decisions")
            .join(format!("{}.md", ballot.proposal_id)),
    };
    let envelope = match &args.envelope {
        Some(path) => absolutize(path)?,
        None => session.config.envelope_path_for(&document),
    };

    let mut pipeline = Pipeline::new(&capability, &key).with_self_verify(session.config.self_verify);
    let record = pipeline.certify(&ballot, &result, &log, &document, &envelope);
    if record.error_code == ErrorCode::QuorumFailed {
        tracing::warn!(ballot = %ballot.proposal_id, "ballot closed without quorum");
    }
    emit(&record)?;
    Ok(record.ok)
}

pub fn adopt(session: &Session, args: AdoptArgs) -> Result<bool> {
    let (ballot, log) = match load_ballot(session, &absolutize(&args.ballot)?, !args.no_log) {
        Ok(loaded) => loaded,
        Err(e) => return ballot_failure("adopt", &e),
    };
    let result = match tally::tally(&ballot) {
        Ok(result) => result,
        Err(e) => return ballot_failure("adopt", &e),
    };
    let capability = match session.capability() {
        Ok(c) => c,
        Err(e) => {
            emit(&failed("adopt", e.error_code(), &e))?;
            return Ok(false);
        }
    };
    let key = match session.signing_key(args.key.as_deref()) {
        Ok(k) => k,
        Err(e) => {
            emit(&failed("adopt", e.error_code(), &e))?;
            return Ok(false);
        }
    };

    let id = &ballot.proposal_id;
    let base = capability.base_directory();
    let attestations = &session.config.attestation_dir;
    let decision = base.join("org/decisions").join(format!("{id}.md"));
    let targets = AdoptionTargets {
        decision_envelope: session.config.envelope_path_for(&decision),
        decision,
        adopted: base.join("org/policy/norms").join(format!("{id}-adopted.md")),
        adopted_envelope: attestations.join(format!("{id}-adopted.dsse.json")),
        summary: base.join("bus/policy").join(format!("{id}-adopted.md")),
        summary_envelope: attestations.join(format!("{id}-adopted-summary.dsse.json")),
    };

    let mut pipeline = Pipeline::new(&capability, &key).with_self_verify(session.config.self_verify);
    let record = pipeline.adopt(&ballot, &result, &log, &targets);
    if record.error_code == ErrorCode::QuorumFailed {
        tracing::warn!(ballot = %ballot.proposal_id, "ballot closed without quorum, nothing adopted");
    }
    emit(&record)?;
    Ok(record.ok)
}
