//! Benchmarks for the tally engine and the attest pipeline
//! Target: a 200-voter ballot tallies in well under a millisecond

use accord_core::attest::AttestationKey;
use accord_core::guard::CapabilityDescriptor;
use accord_core::pipeline::Pipeline;
use accord_core::tally::{tally, Ballot, Voter, Weight};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CANDIDATES: [&str; 5] = ["A", "B", "C", "D", "E"];

/// Deterministic spread of rankings, rotated per voter
fn ballot(voters: usize, cyclic: bool) -> Ballot {
    let mut ballot = Ballot::new("BENCH", &CANDIDATES);
    ballot.quorum_threshold = 0.5;
    ballot.voters = (0..voters)
        .map(|i| {
            let shift = if cyclic { i % 3 } else { i % 5 / 4 };
            let mut ranking = CANDIDATES.to_vec();
            ranking.rotate_left(shift);
            let weight = Weight::from_micros(1_000_000 + (i as u64 % 7) * 250_000);
            Voter::new(format!("AGENT-{i}"), weight, &ranking)
        })
        .collect();
    ballot
}

fn benchmark_tally(c: &mut Criterion) {
    let condorcet = ballot(200, false);
    let cycle = ballot(200, true);

    c.bench_function("tally_condorcet_200", |b| {
        b.iter(|| {
            let result = tally(black_box(&condorcet)).unwrap();
            black_box(result);
        });
    });

    c.bench_function("tally_irv_fallback_200", |b| {
        b.iter(|| {
            let result = tally(black_box(&cycle)).unwrap();
            black_box(result);
        });
    });
}

fn benchmark_attest(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("org/policy")).unwrap();
    fs::write(
        dir.path().join("org/policy/bench.md"),
        "<!--\nprovenance:\n  predicateType: https://accord.ai/schemas/policy@v1\n  predicate:\n    produced_by: {agent_id: AGENT-BENCH}\n-->\n# Bench\n",
    )
    .unwrap();
    let capability =
        CapabilityDescriptor::new("AGENT-BENCH", ["file"], ["org/**", "attestations/**"], dir.path())
            .unwrap();
    let key = AttestationKey::from_seed([3u8; 32]).unwrap();

    c.bench_function("attest_with_self_verify", |b| {
        b.iter(|| {
            let mut pipeline = Pipeline::new(&capability, &key);
            let record = pipeline.attest(
                Path::new("org/policy/bench.md"),
                Path::new("attestations/bench.dsse.json"),
            );
            assert!(record.ok);
            black_box(record);
        });
    });
}

criterion_group!(benches, benchmark_tally, benchmark_attest);
criterion_main!(benches);
