//! Theme taxonomy: curated theme → keyword lists and the derived
//! keyword → theme index.

pub mod embeddings;
pub mod expansion;

pub use embeddings::{ThemeEmbeddingStats, ThemeEmbeddings};
pub use expansion::{ExpandedTerm, Expansion, ExpansionSource, ThematicExpander, WeightedVector};

use crate::error::{NobelLmError, Result};
use crate::utils::text::normalize_query;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Curated theme taxonomy. Keywords may be multi-word; matching against
/// queries is whole-word and case-insensitive. A keyword may belong to
/// several themes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeConfig {
    /// theme name → keywords (stored normalized)
    themes: BTreeMap<String, Vec<String>>,
    /// keyword → theme names, derived at construction
    #[serde(skip)]
    keyword_index: HashMap<String, Vec<String>>,
}

impl ThemeConfig {
    pub fn new(themes: BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut normalized: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (theme, keywords) in themes {
            if keywords.is_empty() {
                return Err(NobelLmError::config(format!(
                    "theme '{}' has no keywords",
                    theme
                )));
            }
            let mut kws: Vec<String> = keywords.iter().map(|k| normalize_query(k)).collect();
            kws.sort();
            kws.dedup();
            normalized.insert(theme, kws);
        }
        let mut config = Self {
            themes: normalized,
            keyword_index: HashMap::new(),
        };
        config.rebuild_index();
        Ok(config)
    }

    /// Load from a TOML file of `[themes]` tables, or fall back to the
    /// built-in taxonomy.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => {
                #[derive(Deserialize)]
                struct ThemeFile {
                    themes: BTreeMap<String, Vec<String>>,
                }
                let content = std::fs::read_to_string(path).map_err(|e| {
                    NobelLmError::config(format!("cannot open theme config {}: {}", path, e))
                })?;
                let file: ThemeFile = toml::from_str(&content).map_err(|e| {
                    NobelLmError::config(format!("{}: malformed theme config: {}", path, e))
                })?;
                Self::new(file.themes)
            }
            None => Self::new(default_themes()),
        }
    }

    fn rebuild_index(&mut self) {
        self.keyword_index.clear();
        for (theme, keywords) in &self.themes {
            for kw in keywords {
                self.keyword_index
                    .entry(kw.clone())
                    .or_default()
                    .push(theme.clone());
            }
        }
    }

    /// Themes a keyword belongs to; empty when the keyword is unknown
    pub fn themes_for(&self, keyword: &str) -> &[String] {
        self.keyword_index
            .get(&normalize_query(keyword))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All keywords of a theme
    pub fn keywords_of(&self, theme: &str) -> &[String] {
        self.themes
            .get(theme)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Every keyword across all themes, deduplicated, sorted
    pub fn all_keywords(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.keyword_index.keys().map(|s| s.as_str()).collect();
        all.sort_unstable();
        all
    }

    pub fn theme_count(&self) -> usize {
        self.themes.len()
    }

    pub fn keyword_count(&self) -> usize {
        self.keyword_index.len()
    }
}

/// Built-in taxonomy used when no theme config file is supplied
pub fn default_themes() -> BTreeMap<String, Vec<String>> {
    let mut themes = BTreeMap::new();
    let mut add = |name: &str, keywords: &[&str]| {
        themes.insert(
            name.to_string(),
            keywords.iter().map(|k| k.to_string()).collect(),
        );
    };
    add(
        "justice",
        &["justice", "injustice", "law", "rights", "equality", "fairness", "oppression"],
    );
    add(
        "freedom",
        &["freedom", "liberty", "liberation", "independence", "censorship", "tyranny"],
    );
    add(
        "war_and_peace",
        &["war", "peace", "conflict", "violence", "reconciliation", "battlefield"],
    );
    add(
        "exile",
        &["exile", "displacement", "homeland", "refugee", "emigration", "borders"],
    );
    add(
        "memory",
        &["memory", "remembrance", "forgetting", "nostalgia", "the past", "history"],
    );
    add(
        "death",
        &["death", "mortality", "grief", "loss", "mourning", "the grave"],
    );
    add(
        "love",
        &["love", "desire", "passion", "tenderness", "devotion", "the heart"],
    );
    add(
        "hope",
        &["hope", "despair", "renewal", "faith", "endurance", "consolation"],
    );
    add(
        "language",
        &["language", "words", "writing", "storytelling", "poetry", "silence", "the word"],
    );
    add(
        "identity",
        &["identity", "belonging", "race", "heritage", "selfhood", "roots"],
    );
    add(
        "truth",
        &["truth", "lies", "deception", "witness", "testimony", "conscience"],
    );
    add(
        "nature",
        &["nature", "landscape", "earth", "seasons", "wilderness", "the sea"],
    );
    add(
        "human_condition",
        &["suffering", "dignity", "solitude", "human condition", "compassion", "cruelty"],
    );
    themes
}
