//! Thematic expansion: one query becomes a weighted keyword set.
//!
//! Two independent producers feed a merger. The lexical producer walks the
//! keyword → theme index and pulls in every sibling keyword of a touched
//! theme. The semantic producer ranks theme keywords by cosine similarity
//! to the query embedding. The merger de-duplicates by term, keeping the
//! maximum weight.

use super::{ThemeConfig, ThemeEmbeddings};
use crate::config::ExpansionConfig;
use crate::utils::math::cosine_similarity;
use crate::utils::text::{contains_whole_word, normalize_query};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Which producer contributed a term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionSource {
    ThemeIndex,
    Semantic,
    /// Fallback when no keyword was recognized: the query itself
    RawQuery,
}

impl ExpansionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionSource::ThemeIndex => "theme_index",
            ExpansionSource::Semantic => "semantic",
            ExpansionSource::RawQuery => "raw_query",
        }
    }
}

/// One expansion term with its weight and provenance
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedTerm {
    pub term: String,
    pub weight: f32,
    pub source: ExpansionSource,
}

/// A term's embedding, weighted for multi-vector retrieval
#[derive(Debug, Clone)]
pub struct WeightedVector {
    pub term: String,
    pub vector: Vec<f32>,
    pub weight: f32,
}

/// Expansion result: ordered terms plus weighted sub-embeddings
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub terms: Vec<ExpandedTerm>,
    pub vectors: Vec<WeightedVector>,
}

pub struct ThematicExpander {
    config: ExpansionConfig,
    themes: Arc<ThemeConfig>,
    embeddings: Arc<ThemeEmbeddings>,
}

impl ThematicExpander {
    pub fn new(
        config: ExpansionConfig,
        themes: Arc<ThemeConfig>,
        embeddings: Arc<ThemeEmbeddings>,
    ) -> Self {
        Self {
            config,
            themes,
            embeddings,
        }
    }

    /// Expand a query. `query_embedding` drives semantic expansion; pass
    /// `None` to run the lexical producer alone.
    ///
    /// Deterministic: terms are ordered by descending weight, then
    /// alphabetically.
    pub fn expand(&self, query: &str, query_embedding: Option<&[f32]>) -> Expansion {
        let lexical = self.lexical_terms(query);

        // No recognized keyword: fall back to the raw query and skip
        // semantic expansion entirely
        if lexical.is_empty() {
            return Expansion {
                terms: vec![ExpandedTerm {
                    term: normalize_query(query),
                    weight: 1.0,
                    source: ExpansionSource::RawQuery,
                }],
                vectors: Vec::new(),
            };
        }

        let semantic = match query_embedding {
            Some(embedding) if self.config.semantic_enabled => self.semantic_terms(embedding),
            _ => Vec::new(),
        };

        let terms = merge_terms(lexical, semantic);
        let vectors = if self.config.semantic_enabled {
            self.weighted_vectors(&terms)
        } else {
            Vec::new()
        };
        Expansion { terms, vectors }
    }

    /// Lexical producer: candidate keywords found in the query pull in all
    /// keywords of every theme they touch, each with weight 1.0.
    pub fn lexical_terms(&self, query: &str) -> Vec<ExpandedTerm> {
        let normalized = normalize_query(query);
        let mut touched_themes: Vec<&str> = Vec::new();
        for keyword in self.themes.all_keywords() {
            if contains_whole_word(&normalized, keyword) {
                for theme in self.themes.themes_for(keyword) {
                    if !touched_themes.contains(&theme.as_str()) {
                        touched_themes.push(theme);
                    }
                }
            }
        }
        let mut terms: Vec<ExpandedTerm> = Vec::new();
        for theme in touched_themes {
            for keyword in self.themes.keywords_of(theme) {
                if !terms.iter().any(|t| t.term == *keyword) {
                    terms.push(ExpandedTerm {
                        term: keyword.clone(),
                        weight: 1.0,
                        source: ExpansionSource::ThemeIndex,
                    });
                }
            }
        }
        terms
    }

    /// Semantic producer: top-K theme keywords by cosine similarity to the
    /// query embedding, above the configured threshold, with weight
    /// max(similarity, min_weight).
    pub fn semantic_terms(&self, query_embedding: &[f32]) -> Vec<ExpandedTerm> {
        let mut scored: Vec<(&str, f32)> = self
            .embeddings
            .iter()
            .map(|(keyword, vector)| (keyword, cosine_similarity(query_embedding, vector)))
            .filter(|(_, sim)| *sim >= self.config.similarity_threshold)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(b.0))
        });
        scored.truncate(self.config.semantic_top_k);
        scored
            .into_iter()
            .map(|(keyword, sim)| ExpandedTerm {
                term: keyword.to_string(),
                weight: sim.max(self.config.min_weight),
                source: ExpansionSource::Semantic,
            })
            .collect()
    }

    /// One weighted sub-embedding per final term that has a theme vector
    fn weighted_vectors(&self, terms: &[ExpandedTerm]) -> Vec<WeightedVector> {
        terms
            .iter()
            .filter_map(|t| {
                self.embeddings.get(&t.term).map(|vector| WeightedVector {
                    term: t.term.clone(),
                    vector: vector.to_vec(),
                    weight: t.weight,
                })
            })
            .collect()
    }
}

/// De-duplicate by term keeping the max weight; on equal weight the
/// theme-index provenance wins. Output ordered by descending weight, then
/// alphabetically.
pub fn merge_terms(lexical: Vec<ExpandedTerm>, semantic: Vec<ExpandedTerm>) -> Vec<ExpandedTerm> {
    let mut by_term: HashMap<String, ExpandedTerm> = HashMap::new();
    for term in lexical.into_iter().chain(semantic) {
        match by_term.get_mut(&term.term) {
            Some(existing) => {
                if term.weight > existing.weight {
                    *existing = term;
                }
            }
            None => {
                by_term.insert(term.term.clone(), term);
            }
        }
    }
    let mut merged: Vec<ExpandedTerm> = by_term.into_values().collect();
    merged.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.term.cmp(&b.term))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn themes() -> Arc<ThemeConfig> {
        let mut map = BTreeMap::new();
        map.insert(
            "justice".to_string(),
            vec!["justice".to_string(), "law".to_string(), "equality".to_string()],
        );
        map.insert(
            "freedom".to_string(),
            vec!["freedom".to_string(), "liberty".to_string()],
        );
        Arc::new(ThemeConfig::new(map).unwrap())
    }

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn embeddings(themes: &ThemeConfig) -> Arc<ThemeEmbeddings> {
        // axis per keyword so similarities are controllable
        let pairs = vec![
            ("justice".to_string(), unit(8, 0)),
            ("law".to_string(), unit(8, 1)),
            ("equality".to_string(), unit(8, 2)),
            ("freedom".to_string(), unit(8, 3)),
            ("liberty".to_string(), unit(8, 4)),
        ];
        Arc::new(ThemeEmbeddings::from_pairs(pairs, 8, themes).unwrap())
    }

    fn expander() -> ThematicExpander {
        let t = themes();
        let e = embeddings(&t);
        ThematicExpander::new(ExpansionConfig::default(), t, e)
    }

    #[test]
    fn lexical_producer_pulls_in_theme_siblings() {
        let terms = expander().lexical_terms("what do laureates say about justice");
        let names: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        assert!(names.contains(&"justice"));
        assert!(names.contains(&"law"));
        assert!(names.contains(&"equality"));
        assert!(!names.contains(&"freedom"));
        assert!(terms.iter().all(|t| t.weight == 1.0));
        assert!(terms.iter().all(|t| t.source == ExpansionSource::ThemeIndex));
    }

    #[test]
    fn two_keywords_touch_two_themes() {
        let terms = expander().lexical_terms("justice and freedom");
        let names: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        assert!(names.contains(&"justice"));
        assert!(names.contains(&"freedom"));
        assert!(names.contains(&"liberty"));
    }

    #[test]
    fn semantic_producer_ranks_by_similarity_and_floors_weight() {
        let ex = expander();
        // Query embedding leaning toward "justice" (axis 0) and a little
        // toward "law" (axis 1)
        let mut q = vec![0.0; 8];
        q[0] = 0.9;
        q[1] = 0.45;
        let terms = ex.semantic_terms(&q);
        assert_eq!(terms[0].term, "justice");
        assert!(terms[0].weight > terms[1].weight);
        assert!(terms.iter().all(|t| t.weight >= 0.3));
        assert!(terms.iter().all(|t| t.source == ExpansionSource::Semantic));
        // axis-2..4 keywords are orthogonal and below the 0.3 threshold
        assert!(terms.iter().all(|t| t.term == "justice" || t.term == "law"));
    }

    #[test]
    fn merge_keeps_max_weight_per_term() {
        let lexical = vec![ExpandedTerm {
            term: "justice".to_string(),
            weight: 1.0,
            source: ExpansionSource::ThemeIndex,
        }];
        let semantic = vec![
            ExpandedTerm {
                term: "justice".to_string(),
                weight: 0.7,
                source: ExpansionSource::Semantic,
            },
            ExpandedTerm {
                term: "witness".to_string(),
                weight: 0.5,
                source: ExpansionSource::Semantic,
            },
        ];
        let merged = merge_terms(lexical, semantic);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].term, "justice");
        assert_eq!(merged[0].weight, 1.0);
        assert_eq!(merged[0].source, ExpansionSource::ThemeIndex);
        assert_eq!(merged[1].term, "witness");
    }

    #[test]
    fn ordering_is_weight_desc_then_alphabetical() {
        let merged = merge_terms(
            vec![
                ExpandedTerm {
                    term: "b".to_string(),
                    weight: 1.0,
                    source: ExpansionSource::ThemeIndex,
                },
                ExpandedTerm {
                    term: "a".to_string(),
                    weight: 1.0,
                    source: ExpansionSource::ThemeIndex,
                },
            ],
            vec![ExpandedTerm {
                term: "c".to_string(),
                weight: 0.4,
                source: ExpansionSource::Semantic,
            }],
        );
        let names: Vec<&str> = merged.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn unrecognized_query_falls_back_to_raw_query() {
        let ex = expander();
        let expansion = ex.expand("tell me about bicycles", Some(&unit(8, 0)));
        assert_eq!(expansion.terms.len(), 1);
        assert_eq!(expansion.terms[0].source, ExpansionSource::RawQuery);
        assert_eq!(expansion.terms[0].weight, 1.0);
        assert!(expansion.vectors.is_empty());
    }

    #[test]
    fn full_expansion_is_deterministic() {
        let ex = expander();
        let mut q = vec![0.0; 8];
        q[0] = 1.0;
        let a = ex.expand("justice and freedom", Some(&q));
        let b = ex.expand("justice and freedom", Some(&q));
        let terms_a: Vec<(&str, u32)> = a
            .terms
            .iter()
            .map(|t| (t.term.as_str(), t.weight.to_bits()))
            .collect();
        let terms_b: Vec<(&str, u32)> = b
            .terms
            .iter()
            .map(|t| (t.term.as_str(), t.weight.to_bits()))
            .collect();
        assert_eq!(terms_a, terms_b);
        assert_eq!(a.vectors.len(), b.vectors.len());
    }

    #[test]
    fn expansion_vectors_carry_term_weights() {
        let ex = expander();
        let expansion = ex.expand("justice", None);
        assert!(!expansion.vectors.is_empty());
        for v in &expansion.vectors {
            let term = expansion.terms.iter().find(|t| t.term == v.term).unwrap();
            assert_eq!(v.weight, term.weight);
            assert_eq!(v.vector.len(), 8);
        }
    }
}
