//! Retrieval over the chunk store: contracts, filters, and result laws.
//!
//! Results are always sorted by descending score with `chunk_id` breaking
//! ties, and a retrieval that comes back too small is retried once with a
//! relaxed score floor. Both laws live here so every retriever variant
//! shares them.

pub mod index;
pub mod weighted;

pub use index::{ChunkIndex, VectorRetriever};
pub use weighted::{MergeStrategy, ThematicRetriever};

use crate::corpus::{Chunk, SourceType};
use crate::error::Result;
use crate::themes::WeightedVector;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Metadata equality constraints applied during retrieval. Empty filters
/// match everything.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalFilters {
    pub laureate: Option<String>,
    pub source_types: Option<Vec<SourceType>>,
    pub year_range: Option<(i32, i32)>,
}

impl RetrievalFilters {
    pub fn is_empty(&self) -> bool {
        self.laureate.is_none() && self.source_types.is_none() && self.year_range.is_none()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(laureate) = &self.laureate {
            if &chunk.laureate != laureate {
                return false;
            }
        }
        if let Some(types) = &self.source_types {
            if !types.contains(&chunk.source_type) {
                return false;
            }
        }
        if let Some((from, to)) = self.year_range {
            if chunk.year_awarded < from || chunk.year_awarded > to {
                return false;
            }
        }
        true
    }

    /// Compact description for the audit trace
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        let mut parts = Vec::new();
        if let Some(laureate) = &self.laureate {
            parts.push(format!("laureate={}", laureate));
        }
        if let Some(types) = &self.source_types {
            let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
            parts.push(format!("source_type in [{}]", names.join(",")));
        }
        if let Some((from, to)) = self.year_range {
            parts.push(format!("year in [{},{}]", from, to));
        }
        parts.join(" AND ")
    }
}

/// A retrieved chunk with its similarity score
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub score: f32,
}

/// Query vectors: a single embedding or the weighted sub-embeddings of a
/// thematic expansion
#[derive(Debug, Clone)]
pub enum QueryVectors {
    Single(Vec<f32>),
    Weighted(Vec<WeightedVector>),
}

/// One retrieval request
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub vectors: QueryVectors,
    pub filters: RetrievalFilters,
    pub top_k: usize,
    pub min_score: f32,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<ScoredChunk>>;
}

/// Sort by descending score, ties broken by chunk_id, then truncate
pub(crate) fn sort_and_truncate(mut results: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
    results.truncate(top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, laureate: &str, year: i32, source_type: SourceType) -> Arc<Chunk> {
        Arc::new(Chunk {
            chunk_id: id.to_string(),
            text: "text".to_string(),
            source_type,
            laureate: laureate.to_string(),
            year_awarded: year,
            country: "X".to_string(),
            country_flag: "🏳".to_string(),
            gender: "unknown".to_string(),
            category: "Literature".to_string(),
            prize_motivation: String::new(),
            specific_work_cited: false,
            embedding: vec![1.0, 0.0],
        })
    }

    #[test]
    fn empty_filters_match_everything() {
        let f = RetrievalFilters::default();
        assert!(f.is_empty());
        assert!(f.matches(&chunk("a", "X", 1990, SourceType::NobelLecture)));
        assert_eq!(f.summary(), "none");
    }

    #[test]
    fn laureate_filter_is_exact() {
        let f = RetrievalFilters {
            laureate: Some("Toni Morrison".to_string()),
            ..Default::default()
        };
        assert!(f.matches(&chunk("a", "Toni Morrison", 1993, SourceType::NobelLecture)));
        assert!(!f.matches(&chunk("b", "Seamus Heaney", 1995, SourceType::NobelLecture)));
    }

    #[test]
    fn source_type_and_year_filters_combine() {
        let f = RetrievalFilters {
            laureate: None,
            source_types: Some(vec![SourceType::NobelLecture]),
            year_range: Some((1990, 2000)),
        };
        assert!(f.matches(&chunk("a", "X", 1993, SourceType::NobelLecture)));
        assert!(!f.matches(&chunk("b", "X", 1985, SourceType::NobelLecture)));
        assert!(!f.matches(&chunk("c", "X", 1993, SourceType::CeremonySpeech)));
        assert!(f.summary().contains("nobel_lecture"));
    }

    #[test]
    fn ordering_law_breaks_ties_by_chunk_id() {
        let results = vec![
            ScoredChunk {
                chunk: chunk("b", "X", 1990, SourceType::NobelLecture),
                score: 0.8,
            },
            ScoredChunk {
                chunk: chunk("a", "X", 1990, SourceType::NobelLecture),
                score: 0.8,
            },
            ScoredChunk {
                chunk: chunk("c", "X", 1990, SourceType::NobelLecture),
                score: 0.9,
            },
        ];
        let sorted = sort_and_truncate(results, 10);
        let ids: Vec<&str> = sorted.iter().map(|s| s.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn truncation_respects_top_k() {
        let results = (0..10)
            .map(|i| ScoredChunk {
                chunk: chunk(&format!("c{}", i), "X", 1990, SourceType::NobelLecture),
                score: i as f32 / 10.0,
            })
            .collect();
        assert_eq!(sort_and_truncate(results, 3).len(), 3);
    }
}
