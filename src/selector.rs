//! Winner selection
//!
//! Weighted sampling without replacement over a pool of buy orders, with a
//! configurable tie-break when every candidate carries the same weight.
//! The RNG is injected so batch runs are reproducible under test.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::index::sample;

use crate::config::TieBreak;

/// One selectable pool entry
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: u64,
    /// Positive priority weight
    pub weight: u32,
    pub created_at: DateTime<Utc>,
}

/// Weighted winner selector
#[derive(Debug, Clone, Copy)]
pub struct Selector {
    pub tie_break: TieBreak,
}

impl Selector {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    /// Pick `k` winners from `candidates`, returning their ids in draw order.
    ///
    /// - `k >= candidates.len()`: everyone wins (input order)
    /// - all weights equal: tie-break policy decides (`time` = the `k`
    ///   earliest-created, `random` = uniform without replacement)
    /// - otherwise: roulette draws without replacement, each draw uniform in
    ///   `[1, total remaining weight]`; a non-positive remaining total falls
    ///   back to uniform draws
    pub fn select<R: Rng>(&self, candidates: &[Candidate], k: usize, rng: &mut R) -> Vec<u64> {
        if candidates.is_empty() || k == 0 {
            return Vec::new();
        }
        if k >= candidates.len() {
            return candidates.iter().map(|c| c.id).collect();
        }

        let first = candidates[0].weight;
        if candidates.iter().all(|c| c.weight == first) {
            return match self.tie_break {
                TieBreak::Time => Self::earliest(candidates, k),
                TieBreak::Random => Self::uniform(candidates, k, rng),
            };
        }

        Self::roulette(candidates, k, rng)
    }

    /// The `k` earliest-created candidates; id breaks exact-timestamp ties
    /// so the result is stable
    fn earliest(candidates: &[Candidate], k: usize) -> Vec<u64> {
        let mut sorted: Vec<&Candidate> = candidates.iter().collect();
        sorted.sort_by_key(|c| (c.created_at, c.id));
        sorted.into_iter().take(k).map(|c| c.id).collect()
    }

    /// Uniform draw of `k` without replacement
    fn uniform<R: Rng>(candidates: &[Candidate], k: usize, rng: &mut R) -> Vec<u64> {
        sample(rng, candidates.len(), k)
            .into_iter()
            .map(|i| candidates[i].id)
            .collect()
    }

    /// Weighted sampling without replacement: repeat `k` times — total the
    /// remaining weight, draw uniformly in `[1, total]`, walk the remaining
    /// pool accumulating weight until the draw lands inside a candidate's
    /// interval, remove it.
    fn roulette<R: Rng>(candidates: &[Candidate], k: usize, rng: &mut R) -> Vec<u64> {
        let mut remaining: Vec<&Candidate> = candidates.iter().collect();
        let mut winners = Vec::with_capacity(k);

        for _ in 0..k {
            let total: u64 = remaining.iter().map(|c| c.weight as u64).sum();
            if total == 0 {
                // Degenerate pool; finish with uniform draws
                let idx = rng.gen_range(0..remaining.len());
                winners.push(remaining.swap_remove(idx).id);
                continue;
            }

            let draw = rng.gen_range(1..=total);
            let mut acc = 0u64;
            let mut hit = remaining.len() - 1;
            for (i, c) in remaining.iter().enumerate() {
                acc += c.weight as u64;
                if draw <= acc {
                    hit = i;
                    break;
                }
            }
            winners.push(remaining.remove(hit).id);
        }

        winners
    }
}
