//! In-memory chunk index and the single-vector retriever.

use super::{
    sort_and_truncate, QueryVectors, RetrievalQuery, Retriever, RetrievalFilters, ScoredChunk,
};
use crate::corpus::Chunk;
use crate::error::{NobelLmError, Result, RetrievalErrorKind};
use crate::utils::math::cosine_similarity;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// The frozen chunk store: loaded once at startup, scanned with cosine
/// similarity at query time. Shared read-only across workers.
pub struct ChunkIndex {
    chunks: Vec<Arc<Chunk>>,
    dimensions: usize,
}

impl ChunkIndex {
    pub fn new(chunks: Vec<Chunk>, dimensions: usize) -> Self {
        Self {
            chunks: chunks.into_iter().map(Arc::new).collect(),
            dimensions,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn chunks(&self) -> &[Arc<Chunk>] {
        &self.chunks
    }

    /// Filtered cosine scan: every chunk passing the filters is scored,
    /// thresholded, sorted, and truncated.
    pub fn search(
        &self,
        vector: &[f32],
        filters: &RetrievalFilters,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        // The registry refuses to start on an empty corpus; this guards
        // direct construction of an index with no chunks behind it
        if self.chunks.is_empty() {
            return Err(NobelLmError::retrieval(
                RetrievalErrorKind::StoreUnavailable,
                "chunk store holds no chunks",
            ));
        }
        if vector.len() != self.dimensions {
            return Err(NobelLmError::retrieval(
                RetrievalErrorKind::FilterIncompatible,
                format!(
                    "query vector has {} dims, index holds {}",
                    vector.len(),
                    self.dimensions
                ),
            ));
        }
        let mut results = Vec::new();
        for chunk in &self.chunks {
            if !filters.matches(chunk) {
                continue;
            }
            let score = cosine_similarity(vector, &chunk.embedding);
            if score >= min_score {
                results.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                });
            }
        }
        Ok(sort_and_truncate(results, top_k))
    }
}

/// Single-vector retriever with the relaxation law: a result smaller than
/// `min_return` earns one retry with a halved score floor, and whatever
/// that finds is final. No padding, ever.
pub struct VectorRetriever {
    index: Arc<ChunkIndex>,
    min_return: usize,
}

impl VectorRetriever {
    pub fn new(index: Arc<ChunkIndex>, min_return: usize) -> Self {
        Self { index, min_return }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<ScoredChunk>> {
        let vector = match &query.vectors {
            QueryVectors::Single(v) => v,
            QueryVectors::Weighted(_) => {
                return Err(NobelLmError::retrieval(
                    RetrievalErrorKind::FilterIncompatible,
                    "VectorRetriever requires a single query vector",
                ));
            }
        };
        let results = self
            .index
            .search(vector, &query.filters, query.top_k, query.min_score)?;
        if results.len() >= self.min_return || results.len() >= query.top_k {
            return Ok(results);
        }
        // Relaxation retry: halve the floor once, then accept what exists
        let relaxed = query.min_score / 2.0;
        debug!(
            "retrieval returned {} (< {}), relaxing min_score {} -> {}",
            results.len(),
            self.min_return,
            query.min_score,
            relaxed
        );
        self.index
            .search(vector, &query.filters, query.top_k, relaxed)
    }
}
