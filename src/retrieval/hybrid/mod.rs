//! Hybrid retrieval
//!
//! Weighted reciprocal rank fusion of several retrievers' ranked lists.

use crate::retrieval::{Candidate, Retriever, RetrieverHit, SearchResult};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Standard RRF constant
pub const DEFAULT_RRF_C: f32 = 60.0;

/// A retriever taking part in the ensemble
#[derive(Clone)]
pub struct EnsembleMember {
    pub retriever: Arc<dyn Retriever>,
    /// Weight applied to this retriever's reciprocal ranks
    pub weight: f32,
    /// How many results to request from this retriever
    pub top_k: usize,
}

impl EnsembleMember {
    pub fn new(retriever: Arc<dyn Retriever>, weight: f32, top_k: usize) -> Self {
        Self {
            retriever,
            weight,
            top_k,
        }
    }
}

/// Ensemble retriever that merges member lists with weighted RRF
///
/// A passage at 1-indexed position `r` in member `i`'s list contributes
/// `weight_i / (r + c)`. Passages are identified by content, so the same text
/// returned by both retrievers is merged into one candidate.
///
/// Ordering is fully determined by the member lists: fused score descending,
/// then best original rank, then the position of the first member that
/// returned the passage, then first appearance.
pub struct EnsembleRetriever {
    members: Vec<EnsembleMember>,
    /// RRF constant (typically 60)
    c: f32,
}

impl EnsembleRetriever {
    /// Create an ensemble, validating weights and per-member `top_k`
    pub fn new(members: Vec<EnsembleMember>, c: f32) -> Result<Self> {
        if members.is_empty() {
            anyhow::bail!("Ensemble needs at least one retriever");
        }
        if !c.is_finite() || c < 0.0 {
            anyhow::bail!("RRF constant must be finite and >= 0, got {}", c);
        }
        for member in &members {
            if !member.weight.is_finite() || member.weight < 0.0 {
                anyhow::bail!(
                    "Weight for retriever '{}' must be finite and >= 0, got {}",
                    member.retriever.name(),
                    member.weight
                );
            }
            if member.top_k == 0 {
                anyhow::bail!("k for retriever '{}' must be > 0", member.retriever.name());
            }
        }
        if members.iter().map(|m| m.weight).sum::<f32>() <= 0.0 {
            anyhow::bail!("Ensemble weights must not all be zero");
        }

        Ok(Self { members, c })
    }

    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    /// Query every member and merge the lists into ranked candidates
    ///
    /// A failing member fails the whole call with its own error.
    pub fn candidates(&self, query: &str) -> Result<Vec<Candidate>> {
        let mut results_lists = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let results = member
                .retriever
                .retrieve(query, member.top_k)
                .map_err(|e| {
                    tracing::error!("Retriever '{}' failed: {:#}", member.retriever.name(), e);
                    e
                })?;
            tracing::debug!(
                "Retriever '{}' returned {} results",
                member.retriever.name(),
                results.len()
            );
            results_lists.push(results);
        }

        Ok(self.reciprocal_rank_fusion(results_lists))
    }

    fn reciprocal_rank_fusion(&self, results_lists: Vec<Vec<SearchResult>>) -> Vec<Candidate> {
        // Candidates in first-appearance order, keyed by content
        let mut merged: Vec<(Candidate, usize)> = Vec::new();
        let mut by_content: HashMap<String, usize> = HashMap::new();

        for (member_idx, (member, results)) in self.members.iter().zip(results_lists).enumerate() {
            for (position, result) in results.into_iter().enumerate() {
                let rank = position + 1;
                let hit = RetrieverHit {
                    retriever: member.retriever.name().to_string(),
                    rank,
                    score: result.score,
                };
                let rrf_score = member.weight / (rank as f32 + self.c);

                let existing = by_content.get(&result.chunk.content).copied();
                match existing {
                    Some(idx) => {
                        let (candidate, _) = &mut merged[idx];
                        candidate.fused_score += rrf_score;
                        candidate.hits.push(hit);
                    }
                    None => {
                        by_content.insert(result.chunk.content.clone(), merged.len());
                        merged.push((
                            Candidate {
                                chunk: result.chunk,
                                hits: vec![hit],
                                fused_score: rrf_score,
                                rerank_score: None,
                                rank: 0,
                            },
                            member_idx,
                        ));
                    }
                }
            }
        }

        // Stable sort keeps first appearance as the last tie-break
        merged.sort_by(|(a, a_member), (b, b_member)| {
            b.fused_score
                .total_cmp(&a.fused_score)
                .then_with(|| a.best_rank().cmp(&b.best_rank()))
                .then_with(|| a_member.cmp(b_member))
        });

        merged
            .into_iter()
            .enumerate()
            .map(|(idx, (mut candidate, _))| {
                candidate.rank = idx + 1;
                candidate
            })
            .collect()
    }
}

impl Retriever for EnsembleRetriever {
    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let mut candidates = self.candidates(query)?;
        candidates.truncate(top_k);
        Ok(candidates.into_iter().map(SearchResult::from).collect())
    }

    fn name(&self) -> &str {
        "ensemble"
    }
}
