//! C6 Selector (spec §4.6).
//!
//! Filters candidates below the quality floor, ranks the rest by `overall`
//! descending (stable — ties keep input order), then greedily admits up to
//! `top_k` while rejecting anything too perceptually similar to an already
//! admitted candidate.

use crate::phash;
use crate::types::Candidate;

pub struct Selector {
    quality_floor: f64,
    dedup_threshold: f64,
    top_k: usize,
}

impl Selector {
    pub fn new(quality_floor: f64, dedup_threshold: f64, top_k: usize) -> Self {
        Self {
            quality_floor,
            dedup_threshold,
            top_k,
        }
    }

    /// Consumes `candidates`, returning at most `top_k` of them in
    /// selection order (highest quality first, diversity-filtered).
    pub fn select(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut ranked: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.quality.overall >= self.quality_floor)
            .collect();
        ranked.sort_by(|a, b| {
            b.quality
                .overall
                .partial_cmp(&a.quality.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut selected: Vec<Candidate> = Vec::with_capacity(self.top_k.min(ranked.len()));
        for candidate in ranked {
            if selected.len() >= self.top_k {
                break;
            }
            let is_duplicate = selected.iter().any(|admitted| {
                phash::similarity(admitted.metadata.phash, candidate.metadata.phash)
                    >= self.dedup_threshold
            });
            if !is_duplicate {
                selected.push(candidate);
            }
        }
        selected
    }
}
