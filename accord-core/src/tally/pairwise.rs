//! Weighted pairwise preference matrix

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use super::ballot::{Voter, Weight};

/// `counts[i][j]` is the weight of voters preferring candidate `i` over `j`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairwiseMatrix {
    candidates: Vec<String>,
    counts: Vec<Vec<Weight>>,
}

impl PairwiseMatrix {
    /// A ranked candidate beats every candidate ranked below it and every
    /// unranked one. Two unranked candidates are not compared.
    pub fn build<'a>(candidates: &[String], voters: impl IntoIterator<Item = &'a Voter>) -> Self {
        let n = candidates.len();
        let mut counts = vec![vec![Weight::ZERO; n]; n];
        let index: BTreeMap<&str, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        for voter in voters {
            if voter.is_abstaining() {
                continue;
            }
            let ranked: Vec<usize> = voter
                .ranking
                .iter()
                .filter_map(|c| index.get(c.as_str()).copied())
                .collect();
            let mut above = vec![false; n];
            for &winner in &ranked {
                above[winner] = true;
                for (loser, already_ranked) in above.iter().enumerate() {
                    if !already_ranked {
                        counts[winner][loser] += voter.weight;
                    }
                }
            }
        }

        Self {
            candidates: candidates.to_vec(),
            counts,
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    fn index_of(&self, candidate: &str) -> Option<usize> {
        self.candidates.iter().position(|c| c == candidate)
    }

    /// Weight preferring `a` over `b`; zero for unknown names
    pub fn preference(&self, a: &str, b: &str) -> Weight {
        match (self.index_of(a), self.index_of(b)) {
            (Some(i), Some(j)) => self.counts[i][j],
            _ => Weight::ZERO,
        }
    }

    /// The candidate that strictly beats every other candidate head to head
    pub fn condorcet_winner(&self) -> Option<&str> {
        let n = self.candidates.len();
        (0..n)
            .find(|&i| (0..n).all(|j| i == j || self.counts[i][j] > self.counts[j][i]))
            .map(|i| self.candidates[i].as_str())
    }
}

impl Serialize for PairwiseMatrix {
    /// Nested map `{a: {b: weight}}` with sorted keys
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.candidates.len()))?;
        let mut rows: Vec<(&String, BTreeMap<&str, Weight>)> = self
            .candidates
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let row = self
                    .candidates
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(j, b)| (b.as_str(), self.counts[i][j]))
                    .collect();
                (a, row)
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        for (candidate, row) in rows {
            map.serialize_entry(candidate, &row)?;
        }
        map.end()
    }
}
