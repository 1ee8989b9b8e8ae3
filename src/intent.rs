//! Cue-scored intent classification.
//!
//! The classifier is a pure function over (query, cue set, laureate index):
//! every cue that matches adds its weight to its target intent, the highest
//! total wins, and ties resolve in a fixed priority order. Classification is
//! total; a query matching nothing is `qa` with confidence 0.

use crate::config::Config;
use crate::corpus::LaureateIndex;
use crate::error::{NobelLmError, Result};
use crate::utils::text::{contains_whole_word, normalize_query};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Query intents, mutually exclusive. Order here is the tie priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FactualMetadata,
    Scoped,
    Thematic,
    Generative,
    Qa,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FactualMetadata => "factual_metadata",
            Intent::Scoped => "scoped",
            Intent::Thematic => "thematic",
            Intent::Generative => "generative",
            Intent::Qa => "qa",
        }
    }

    /// Tie-break priority: lower wins
    fn priority(&self) -> u8 {
        match self {
            Intent::FactualMetadata => 0,
            Intent::Scoped => 1,
            Intent::Thematic => 2,
            Intent::Generative => 3,
            Intent::Qa => 4,
        }
    }
}

/// Thematic sub-classification; selects the prompt template variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThematicSubtype {
    Synthesis,
    Enumerative,
    Analytical,
    Exploratory,
}

impl ThematicSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThematicSubtype::Synthesis => "synthesis",
            ThematicSubtype::Enumerative => "enumerative",
            ThematicSubtype::Analytical => "analytical",
            ThematicSubtype::Exploratory => "exploratory",
        }
    }
}

/// One scoring cue: a pattern, a weight, and the intent it votes for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cue {
    pub id: String,
    pub intent: Intent,
    pub weight: f32,
    #[serde(flatten)]
    pub pattern: CuePattern,
}

/// Pattern kinds. `LaureateEntity` matches any laureate name from the index
/// and also produces the scoped entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CuePattern {
    Regex { pattern: String },
    Keywords { keywords: Vec<String> },
    LaureateEntity,
}

struct CompiledCue {
    id: String,
    intent: Intent,
    weight: f32,
    matcher: Matcher,
}

enum Matcher {
    Regex(regex::Regex),
    Keywords(Vec<String>),
    LaureateEntity,
}

/// Result of classification; everything the router and audit trace need
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
    pub matched_cues: Vec<String>,
    pub scoped_entity: Option<String>,
    pub thematic_subtype: Option<ThematicSubtype>,
    pub subtype_confidence: Option<f32>,
    pub subtype_cues: Vec<String>,
}

pub struct IntentClassifier {
    cues: Vec<CompiledCue>,
    laureates: Arc<LaureateIndex>,
}

impl IntentClassifier {
    /// Build from config: the optional cue file overrides the built-in set
    pub fn from_config(config: &Config, laureates: Arc<LaureateIndex>) -> Result<Self> {
        let cues = match &config.system.intent_cues_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    NobelLmError::config(format!("cannot open intent cues {}: {}", path, e))
                })?;
                serde_json::from_str(&content).map_err(|e| {
                    NobelLmError::config(format!("{}: malformed cue file: {}", path, e))
                })?
            }
            None => default_cues(),
        };
        Self::new(cues, laureates)
    }

    pub fn new(cues: Vec<Cue>, laureates: Arc<LaureateIndex>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(cues.len());
        for cue in cues {
            if cue.weight <= 0.0 {
                return Err(NobelLmError::config(format!(
                    "cue '{}' has non-positive weight {}",
                    cue.id, cue.weight
                )));
            }
            let matcher = match cue.pattern {
                CuePattern::Regex { pattern } => {
                    let re = regex::Regex::new(&pattern).map_err(|e| {
                        NobelLmError::config(format!("cue '{}' regex: {}", cue.id, e))
                    })?;
                    Matcher::Regex(re)
                }
                CuePattern::Keywords { keywords } => {
                    Matcher::Keywords(keywords.iter().map(|k| normalize_query(k)).collect())
                }
                CuePattern::LaureateEntity => Matcher::LaureateEntity,
            };
            compiled.push(CompiledCue {
                id: cue.id,
                intent: cue.intent,
                weight: cue.weight,
                matcher,
            });
        }
        Ok(Self {
            cues: compiled,
            laureates,
        })
    }

    /// Classify a query. Total: never fails.
    pub fn classify(&self, query: &str) -> Classification {
        let normalized = normalize_query(query);
        let mut scores: Vec<(Intent, f32)> = vec![
            (Intent::FactualMetadata, 0.0),
            (Intent::Scoped, 0.0),
            (Intent::Thematic, 0.0),
            (Intent::Generative, 0.0),
            (Intent::Qa, 0.0),
        ];
        let mut matched_cues = Vec::new();
        let mut scoped_entity: Option<String> = None;

        for cue in &self.cues {
            let hit = match &cue.matcher {
                Matcher::Regex(re) => re.is_match(&normalized),
                Matcher::Keywords(keywords) => keywords
                    .iter()
                    .any(|k| contains_whole_word(&normalized, k)),
                Matcher::LaureateEntity => {
                    if let Some(record) = self.laureates.find_in_query(&normalized) {
                        scoped_entity.get_or_insert_with(|| record.laureate.clone());
                        true
                    } else {
                        false
                    }
                }
            };
            if hit {
                matched_cues.push(cue.id.clone());
                if let Some(entry) = scores.iter_mut().find(|(i, _)| *i == cue.intent) {
                    entry.1 += cue.weight;
                }
            }
        }

        let total: f32 = scores.iter().map(|(_, s)| s.max(0.0)).sum();
        let (intent, win_score) = scores
            .iter()
            .copied()
            .max_by(|(ia, sa), (ib, sb)| {
                sa.partial_cmp(sb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // on equal score, lower priority value wins
                    .then(ib.priority().cmp(&ia.priority()))
            })
            .unwrap_or((Intent::Qa, 0.0));

        let (intent, confidence) = if total > 0.0 && win_score > 0.0 {
            (intent, win_score / total)
        } else {
            (Intent::Qa, 0.0)
        };

        // Scoped entity is only meaningful for the scoped intent
        let scoped_entity = if intent == Intent::Scoped {
            scoped_entity
        } else {
            None
        };

        let (thematic_subtype, subtype_confidence, subtype_cues) = if intent == Intent::Thematic {
            let (st, conf, cues) = classify_subtype(&normalized);
            (Some(st), Some(conf), cues)
        } else {
            (None, None, Vec::new())
        };

        Classification {
            intent,
            confidence,
            matched_cues,
            scoped_entity,
            thematic_subtype,
            subtype_confidence,
            subtype_cues,
        }
    }
}

/// Subtype cue table from the classification contract
const SUBTYPE_CUES: &[(ThematicSubtype, &[&str])] = &[
    (
        ThematicSubtype::Enumerative,
        &["list", "examples", "which laureates", "name some"],
    ),
    (
        ThematicSubtype::Analytical,
        &["compare", "contrast", "differ", "versus"],
    ),
    (
        ThematicSubtype::Exploratory,
        &["context", "background", "why", "how did"],
    ),
];

fn classify_subtype(normalized: &str) -> (ThematicSubtype, f32, Vec<String>) {
    let mut best: Option<(ThematicSubtype, usize)> = None;
    let mut total_hits = 0usize;
    let mut fired = Vec::new();
    for (subtype, cues) in SUBTYPE_CUES {
        let hits: Vec<&str> = cues
            .iter()
            .copied()
            .filter(|c| contains_whole_word(normalized, c))
            .collect();
        total_hits += hits.len();
        fired.extend(hits.iter().map(|c| c.to_string()));
        if !hits.is_empty() && best.map(|(_, n)| hits.len() > n).unwrap_or(true) {
            best = Some((*subtype, hits.len()));
        }
    }
    match best {
        Some((subtype, hits)) => (subtype, hits as f32 / total_hits as f32, fired),
        // Default when thematic but no subtype cue fires
        None => (ThematicSubtype::Synthesis, 1.0, Vec::new()),
    }
}

/// Built-in cue set; an external JSON file replaces it wholesale
pub fn default_cues() -> Vec<Cue> {
    fn kw(id: &str, intent: Intent, weight: f32, keywords: &[&str]) -> Cue {
        Cue {
            id: id.to_string(),
            intent,
            weight,
            pattern: CuePattern::Keywords {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            },
        }
    }
    fn rx(id: &str, intent: Intent, weight: f32, pattern: &str) -> Cue {
        Cue {
            id: id.to_string(),
            intent,
            weight,
            pattern: CuePattern::Regex {
                pattern: pattern.to_string(),
            },
        }
    }

    vec![
        // factual metadata
        kw(
            "meta.who_won",
            Intent::FactualMetadata,
            3.0,
            &["who won", "who received", "who was awarded"],
        ),
        rx(
            "meta.award_year",
            Intent::FactualMetadata,
            2.0,
            r"\b(in|of)\s+(18|19|20)\d{2}\b",
        ),
        // Outweighs the laureate-entity cue: "when did X win" is metadata
        kw(
            "meta.when_where",
            Intent::FactualMetadata,
            3.5,
            &["when did", "what year", "which year", "where is", "where was"],
        ),
        kw(
            "meta.aggregation",
            Intent::FactualMetadata,
            2.5,
            &["how many", "which country", "most laureates", "the most"],
        ),
        // scoped
        Cue {
            id: "scoped.laureate_name".to_string(),
            intent: Intent::Scoped,
            weight: 3.0,
            pattern: CuePattern::LaureateEntity,
        },
        rx(
            "scoped.said_about",
            Intent::Scoped,
            1.0,
            r"what did .+ (say|write|think|believe)",
        ),
        // thematic
        kw(
            "thematic.across_corpus",
            Intent::Thematic,
            2.5,
            &[
                "what do laureates",
                "laureates say",
                "across laureates",
                "do laureates",
            ],
        ),
        kw(
            "thematic.theme_words",
            Intent::Thematic,
            1.5,
            &["theme", "themes", "say about", "talk about", "speak about"],
        ),
        kw(
            "thematic.recurrence",
            Intent::Thematic,
            1.5,
            &["common", "recurring", "shared", "collectively"],
        ),
        // generative
        rx(
            "generative.write_a",
            Intent::Generative,
            2.5,
            r"\b(write|compose|draft)\b",
        ),
        kw(
            "generative.voice",
            Intent::Generative,
            2.0,
            &["in the tone of", "in the style of", "in the voice of", "as if"],
        ),
        kw(
            "generative.forms",
            Intent::Generative,
            1.0,
            &["email", "letter", "speech", "reflection"],
        ),
        // qa analytic markers (weak; qa also wins as the zero-score default)
        kw(
            "qa.analytic",
            Intent::Qa,
            0.5,
            &["analyze", "explain", "significance"],
        ),
    ]
}
