//! Weighted multi-vector retrieval for thematic queries.
//!
//! Each expansion term retrieves its own candidate pool with its weight;
//! pools merge by chunk_id. A chunk's merged score is the max over
//! contributing terms of (similarity x weight), or a capped sum when the
//! sum_cap combiner is configured.

use super::{
    sort_and_truncate, ChunkIndex, QueryVectors, RetrievalQuery, Retriever, ScoredChunk,
};
use crate::error::{NobelLmError, Result, RetrievalErrorKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// How per-term contributions combine for a chunk seen by several terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Max,
    /// Sum of contributions, capped at 1.0
    SumCap,
}

impl MergeStrategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "max" => Ok(MergeStrategy::Max),
            "sum_cap" => Ok(MergeStrategy::SumCap),
            other => Err(NobelLmError::config(format!(
                "unknown merge strategy '{}'",
                other
            ))),
        }
    }

    fn combine(&self, current: f32, contribution: f32) -> f32 {
        match self {
            MergeStrategy::Max => current.max(contribution),
            MergeStrategy::SumCap => (current + contribution).min(1.0),
        }
    }
}

/// Multi-vector retriever over the shared chunk index
pub struct ThematicRetriever {
    index: Arc<ChunkIndex>,
    top_k_per_term: usize,
    strategy: MergeStrategy,
    min_return: usize,
}

impl ThematicRetriever {
    pub fn new(
        index: Arc<ChunkIndex>,
        top_k_per_term: usize,
        strategy: MergeStrategy,
        min_return: usize,
    ) -> Self {
        Self {
            index,
            top_k_per_term,
            strategy,
            min_return,
        }
    }

    fn merged_search(&self, query: &RetrievalQuery, min_score: f32) -> Result<Vec<ScoredChunk>> {
        let vectors = match &query.vectors {
            QueryVectors::Weighted(v) => v,
            QueryVectors::Single(_) => {
                return Err(NobelLmError::retrieval(
                    RetrievalErrorKind::FilterIncompatible,
                    "ThematicRetriever requires weighted query vectors",
                ));
            }
        };
        let mut merged: HashMap<String, ScoredChunk> = HashMap::new();
        for weighted in vectors {
            let pool = self.index.search(
                &weighted.vector,
                &query.filters,
                self.top_k_per_term,
                min_score,
            )?;
            for hit in pool {
                let contribution = hit.score * weighted.weight;
                merged
                    .entry(hit.chunk.chunk_id.clone())
                    .and_modify(|existing| {
                        existing.score = self.strategy.combine(existing.score, contribution);
                    })
                    .or_insert(ScoredChunk {
                        chunk: hit.chunk,
                        score: contribution,
                    });
            }
        }
        Ok(sort_and_truncate(
            merged.into_values().collect(),
            query.top_k,
        ))
    }
}

#[async_trait]
impl Retriever for ThematicRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<ScoredChunk>> {
        let results = self.merged_search(query, query.min_score)?;
        if results.len() >= self.min_return || results.len() >= query.top_k {
            return Ok(results);
        }
        let relaxed = query.min_score / 2.0;
        debug!(
            "weighted retrieval returned {} (< {}), relaxing min_score {} -> {}",
            results.len(),
            self.min_return,
            query.min_score,
            relaxed
        );
        self.merged_search(query, relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, SourceType};
    use crate::retrieval::RetrievalFilters;
    use crate::themes::WeightedVector;

    fn chunk(id: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: format!("text of {}", id),
            source_type: SourceType::NobelLecture,
            laureate: "X".to_string(),
            year_awarded: 1990,
            country: "X".to_string(),
            country_flag: "🏳".to_string(),
            gender: "unknown".to_string(),
            category: "Literature".to_string(),
            prize_motivation: String::new(),
            specific_work_cited: false,
            embedding,
        }
    }

    fn index() -> Arc<ChunkIndex> {
        Arc::new(ChunkIndex::new(
            vec![
                chunk("a", vec![1.0, 0.0]),
                chunk("b", vec![0.0, 1.0]),
                chunk("mid", vec![0.707, 0.707]),
            ],
            2,
        ))
    }

    fn weighted(term: &str, vector: Vec<f32>, weight: f32) -> WeightedVector {
        WeightedVector {
            term: term.to_string(),
            vector,
            weight,
        }
    }

    fn query(vectors: Vec<WeightedVector>, top_k: usize, min_score: f32) -> RetrievalQuery {
        RetrievalQuery {
            vectors: QueryVectors::Weighted(vectors),
            filters: RetrievalFilters::default(),
            top_k,
            min_score,
        }
    }

    #[tokio::test]
    async fn max_merge_takes_best_contribution() {
        let r = ThematicRetriever::new(index(), 3, MergeStrategy::Max, 0);
        let q = query(
            vec![
                weighted("t1", vec![1.0, 0.0], 1.0),
                weighted("t2", vec![0.0, 1.0], 0.5),
            ],
            3,
            0.0,
        );
        let results = r.retrieve(&q).await.unwrap();
        let score_of = |id: &str| {
            results
                .iter()
                .find(|s| s.chunk.chunk_id == id)
                .map(|s| s.score)
                .unwrap()
        };
        // "mid" is seen by both terms: 0.707*1.0 vs 0.707*0.5; max wins
        assert!((score_of("mid") - 0.707).abs() < 1e-3);
        assert!((score_of("a") - 1.0).abs() < 1e-6);
        assert!((score_of("b") - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn sum_cap_merge_accumulates_and_caps() {
        let r = ThematicRetriever::new(index(), 3, MergeStrategy::SumCap, 0);
        let q = query(
            vec![
                weighted("t1", vec![1.0, 0.0], 1.0),
                weighted("t2", vec![0.0, 1.0], 1.0),
            ],
            3,
            0.0,
        );
        let results = r.retrieve(&q).await.unwrap();
        let mid = results.iter().find(|s| s.chunk.chunk_id == "mid").unwrap();
        // 0.707 + 0.707 capped at 1.0
        assert!((mid.score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn global_top_k_applies_after_merge() {
        let r = ThematicRetriever::new(index(), 3, MergeStrategy::Max, 0);
        let q = query(
            vec![
                weighted("t1", vec![1.0, 0.0], 1.0),
                weighted("t2", vec![0.0, 1.0], 1.0),
            ],
            2,
            0.0,
        );
        let results = r.retrieve(&q).await.unwrap();
        assert_eq!(results.len(), 2);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn single_vector_input_is_rejected() {
        let r = ThematicRetriever::new(index(), 3, MergeStrategy::Max, 0);
        let q = RetrievalQuery {
            vectors: QueryVectors::Single(vec![1.0, 0.0]),
            filters: RetrievalFilters::default(),
            top_k: 3,
            min_score: 0.0,
        };
        assert!(r.retrieve(&q).await.is_err());
    }

    #[tokio::test]
    async fn relaxation_applies_to_weighted_mode() {
        let r = ThematicRetriever::new(index(), 3, MergeStrategy::Max, 2);
        // floor 0.9: only "a" via t1; relaxed 0.45 admits "mid"
        let q = query(vec![weighted("t1", vec![1.0, 0.0], 1.0)], 3, 0.9);
        let results = r.retrieve(&q).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "a");
        assert_eq!(results[1].chunk.chunk_id, "mid");
    }

    #[test]
    fn strategy_parses_from_config_strings() {
        assert_eq!(MergeStrategy::parse("max").unwrap(), MergeStrategy::Max);
        assert_eq!(
            MergeStrategy::parse("sum_cap").unwrap(),
            MergeStrategy::SumCap
        );
        assert!(MergeStrategy::parse("mean").is_err());
    }
}
