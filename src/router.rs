//! Query routing: classification → route decision.
//!
//! The router turns a classification into one of two paths: a pure metadata
//! answer, or a retrieval pass parameterized by template family, filters,
//! and whether thematic expansion runs first.

use crate::corpus::LaureateIndex;
use crate::intent::{Classification, Intent, ThematicSubtype};
use crate::retrieval::RetrievalFilters;
use crate::utils::text::{contains_whole_word, normalize_query};
use serde::Serialize;
use std::sync::Arc;

/// Template family; the two-level `{family}_{variant}` identifier of the
/// prompt catalog, with its default retrieval depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFamily {
    QaFactual,
    QaAnalytical,
    QaComparative,
    ScopedLaureate,
    ScopedWork,
    ThematicSynthesis,
    ThematicEnumerative,
    ThematicComparative,
    ThematicContextual,
    GenerativeEmail,
    GenerativeSpeech,
    GenerativeReflection,
}

impl TemplateFamily {
    /// Catalog key for this family's template
    pub fn template_id(&self) -> &'static str {
        match self {
            TemplateFamily::QaFactual => "qa_factual",
            TemplateFamily::QaAnalytical => "qa_analytical",
            TemplateFamily::QaComparative => "qa_comparative",
            TemplateFamily::ScopedLaureate => "scoped_laureate",
            TemplateFamily::ScopedWork => "scoped_work",
            TemplateFamily::ThematicSynthesis => "thematic_synthesis_clean",
            TemplateFamily::ThematicEnumerative => "thematic_enumerative",
            TemplateFamily::ThematicComparative => "thematic_comparative",
            TemplateFamily::ThematicContextual => "thematic_contextual",
            TemplateFamily::GenerativeEmail => "generative_email",
            TemplateFamily::GenerativeSpeech => "generative_speech",
            TemplateFamily::GenerativeReflection => "generative_reflection",
        }
    }

    /// Default retrieval depth for this family
    pub fn default_top_k(&self) -> usize {
        match self {
            TemplateFamily::QaFactual => 5,
            TemplateFamily::QaAnalytical => 8,
            TemplateFamily::QaComparative => 10,
            TemplateFamily::ScopedLaureate => 6,
            TemplateFamily::ScopedWork => 8,
            TemplateFamily::ThematicSynthesis => 12,
            TemplateFamily::ThematicEnumerative => 10,
            TemplateFamily::ThematicComparative => 12,
            TemplateFamily::ThematicContextual => 10,
            TemplateFamily::GenerativeEmail => 10,
            TemplateFamily::GenerativeSpeech => 12,
            TemplateFamily::GenerativeReflection => 8,
        }
    }
}

/// Outcome of routing
#[derive(Debug, Clone, Serialize)]
pub enum RouteDecision {
    /// Answerable from laureate records alone; retrieval is skipped entirely
    Metadata,
    /// Retrieval path
    Retrieval {
        family: TemplateFamily,
        filters: RetrievalFilters,
        /// Thematic expansion runs before embedding
        expand: bool,
    },
}

pub struct QueryRouter {
    laureates: Arc<LaureateIndex>,
}

impl QueryRouter {
    pub fn new(laureates: Arc<LaureateIndex>) -> Self {
        Self { laureates }
    }

    pub fn route(&self, query: &str, classification: &Classification) -> RouteDecision {
        let normalized = normalize_query(query);
        match classification.intent {
            Intent::FactualMetadata => RouteDecision::Metadata,
            Intent::Scoped => {
                let family = if names_work_title(query) {
                    TemplateFamily::ScopedWork
                } else {
                    TemplateFamily::ScopedLaureate
                };
                // Restrict retrieval to the identified laureate; resolve
                // through the index so surname mentions normalize
                let laureate = classification
                    .scoped_entity
                    .as_deref()
                    .and_then(|name| self.laureates.resolve(name))
                    .map(|r| r.laureate.clone())
                    .or_else(|| classification.scoped_entity.clone());
                RouteDecision::Retrieval {
                    family,
                    filters: RetrievalFilters {
                        laureate,
                        ..RetrievalFilters::default()
                    },
                    expand: false,
                }
            }
            Intent::Thematic => {
                let family = match classification
                    .thematic_subtype
                    .unwrap_or(ThematicSubtype::Synthesis)
                {
                    ThematicSubtype::Synthesis => TemplateFamily::ThematicSynthesis,
                    ThematicSubtype::Enumerative => TemplateFamily::ThematicEnumerative,
                    ThematicSubtype::Analytical => TemplateFamily::ThematicComparative,
                    ThematicSubtype::Exploratory => TemplateFamily::ThematicContextual,
                };
                RouteDecision::Retrieval {
                    family,
                    filters: RetrievalFilters::default(),
                    expand: true,
                }
            }
            // Generative retrieval runs over the full corpus, unfiltered
            Intent::Generative => RouteDecision::Retrieval {
                family: generative_family(&normalized),
                filters: RetrievalFilters::default(),
                expand: false,
            },
            Intent::Qa => self.qa_route(query),
        }
    }

    /// The default analytic route; also the fallback when a
    /// factual-metadata query matches no metadata rule.
    pub fn qa_route(&self, query: &str) -> RouteDecision {
        RouteDecision::Retrieval {
            family: qa_family(&normalize_query(query)),
            filters: RetrievalFilters::default(),
            expand: false,
        }
    }
}

/// A work title is taken to be named when the query carries a quoted phrase
fn names_work_title(query: &str) -> bool {
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}'), ('\u{2018}', '\u{2019}')] {
        if let Some(start) = query.find(open) {
            if query[start + open.len_utf8()..].contains(close) {
                return true;
            }
        }
    }
    false
}

fn generative_family(normalized: &str) -> TemplateFamily {
    if contains_whole_word(normalized, "email") || contains_whole_word(normalized, "letter") {
        TemplateFamily::GenerativeEmail
    } else if contains_whole_word(normalized, "speech") {
        TemplateFamily::GenerativeSpeech
    } else {
        TemplateFamily::GenerativeReflection
    }
}

fn qa_family(normalized: &str) -> TemplateFamily {
    let analytical = ["analyze", "analyse", "why", "how"];
    let comparative = ["compare", "contrast"];
    if analytical.iter().any(|c| contains_whole_word(normalized, c)) {
        TemplateFamily::QaAnalytical
    } else if comparative.iter().any(|c| contains_whole_word(normalized, c)) {
        TemplateFamily::QaComparative
    } else {
        TemplateFamily::QaFactual
    }
}
