//! Pre-computed theme keyword embeddings, one archive per embedding model.
//!
//! The archive is parallel arrays (`keywords`, `vectors`) serialized as
//! JSON: `theme_embeddings_{model}.json`. Built offline; loaded once at
//! startup; recomputed whenever the active model or the taxonomy changes.
//! Every invariant here is enforced at load time so nothing fails at
//! query time.

use super::ThemeConfig;
use crate::error::{NobelLmError, Result};
use crate::utils::math::l2_norm;
use serde::Deserialize;
use std::collections::HashMap;

const NORM_FLOOR: f32 = 0.9;
const NORM_CEIL: f32 = 1.1;

/// Load-time statistics, computable without touching queries
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThemeEmbeddingStats {
    pub count: usize,
    pub mean_norm: f32,
    pub zero_count: usize,
    pub dimensions: usize,
}

/// keyword → unit-norm vector of the active model's dimension
#[derive(Debug)]
pub struct ThemeEmbeddings {
    vectors: HashMap<String, Vec<f32>>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct Archive {
    keywords: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl ThemeEmbeddings {
    /// Archive file name for a model id
    pub fn archive_name(model_id: &str) -> String {
        format!("theme_embeddings_{}.json", model_id)
    }

    /// Load and validate the archive for `model_id` from `dir`.
    /// A missing or inconsistent archive is fatal at startup.
    pub fn load(dir: &str, model_id: &str, dimensions: usize, themes: &ThemeConfig) -> Result<Self> {
        let path = std::path::Path::new(dir).join(Self::archive_name(model_id));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            NobelLmError::config(format!(
                "cannot open theme embeddings {}: {}",
                path.display(),
                e
            ))
        })?;
        let archive: Archive = serde_json::from_str(&content).map_err(|e| {
            NobelLmError::config(format!("{}: malformed archive: {}", path.display(), e))
        })?;
        if archive.keywords.len() != archive.vectors.len() {
            return Err(NobelLmError::config(format!(
                "{}: {} keywords but {} vectors",
                path.display(),
                archive.keywords.len(),
                archive.vectors.len()
            )));
        }
        let pairs = archive
            .keywords
            .into_iter()
            .zip(archive.vectors)
            .collect::<Vec<_>>();
        Self::from_pairs(pairs, dimensions, themes)
    }

    /// Build from (keyword, vector) pairs, enforcing every load-time
    /// invariant. Used by the loader and directly by tests.
    pub fn from_pairs(
        pairs: Vec<(String, Vec<f32>)>,
        dimensions: usize,
        themes: &ThemeConfig,
    ) -> Result<Self> {
        let mut vectors: HashMap<String, Vec<f32>> = HashMap::with_capacity(pairs.len());
        for (keyword, vector) in pairs {
            if vector.len() != dimensions {
                return Err(NobelLmError::config(format!(
                    "theme embedding '{}' has dim {}, expected {}",
                    keyword,
                    vector.len(),
                    dimensions
                )));
            }
            let norm = l2_norm(&vector);
            if norm == 0.0 {
                return Err(NobelLmError::config(format!(
                    "theme embedding '{}' is a zero vector",
                    keyword
                )));
            }
            if !(NORM_FLOOR..=NORM_CEIL).contains(&norm) {
                return Err(NobelLmError::config(format!(
                    "theme embedding '{}' norm {:.4} outside [{}, {}]",
                    keyword, norm, NORM_FLOOR, NORM_CEIL
                )));
            }
            if vectors.insert(keyword.clone(), vector).is_some() {
                return Err(NobelLmError::config(format!(
                    "duplicate theme embedding for '{}'",
                    keyword
                )));
            }
        }
        // Every taxonomy keyword must carry exactly one embedding
        for keyword in themes.all_keywords() {
            if !vectors.contains_key(keyword) {
                return Err(NobelLmError::config(format!(
                    "theme keyword '{}' has no embedding; rebuild the archive",
                    keyword
                )));
            }
        }
        tracing::info!(
            "loaded {} theme embeddings ({} dims)",
            vectors.len(),
            dimensions
        );
        Ok(Self {
            vectors,
            dimensions,
        })
    }

    pub fn get(&self, keyword: &str) -> Option<&[f32]> {
        self.vectors.get(keyword).map(|v| v.as_slice())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Iterate (keyword, vector) in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.vectors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn stats(&self) -> ThemeEmbeddingStats {
        let count = self.vectors.len();
        let norms: Vec<f32> = self.vectors.values().map(|v| l2_norm(v)).collect();
        let mean_norm = if count == 0 {
            0.0
        } else {
            norms.iter().sum::<f32>() / count as f32
        };
        ThemeEmbeddingStats {
            count,
            mean_norm,
            zero_count: norms.iter().filter(|n| **n == 0.0).count(),
            dimensions: self.dimensions,
        }
    }
}
