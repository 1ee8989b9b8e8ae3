//! Versioned prompt template catalog and the prompt builder.
//!
//! Templates are keyed by `{family}_{variant}`. The built-in catalog ships
//! the full set in code; a JSON file replaces it wholesale when configured.
//! Building a prompt is a pure function of its inputs: no time, no
//! randomness, no unfilled placeholders.

use crate::error::{NobelLmError, Result};
use crate::intent::Intent;
use crate::retrieval::ScoredChunk;
use crate::router::TemplateFamily;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How sources should be cited in the synthesized answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    Inline,
    Footnote,
}

/// One catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub template_id: String,
    pub version: String,
    pub intent: Intent,
    pub tags: Vec<String>,
    /// Default number of chunks rendered into {context}
    pub chunk_count: usize,
    pub citation_style: CitationStyle,
    #[serde(default)]
    pub tone_preference: Option<String>,
    pub template: String,
}

impl PromptTemplate {
    /// Reflective templates run at a higher sampling temperature
    pub fn is_reflective(&self) -> bool {
        self.tags.iter().any(|t| t == "reflective" || t == "generative")
    }
}

static PLACEHOLDER_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex compiles"));

const KNOWN_PLACEHOLDERS: &[&str] = &["query", "context", "laureate"];

/// The versioned catalog
pub struct TemplateCatalog {
    templates: HashMap<String, PromptTemplate>,
}

impl TemplateCatalog {
    /// Load from a JSON override file or fall back to the built-in set
    pub fn load(path: Option<&str>) -> Result<Self> {
        let templates: Vec<PromptTemplate> = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    NobelLmError::config(format!("cannot open prompt catalog {}: {}", path, e))
                })?;
                serde_json::from_str(&content).map_err(|e| {
                    NobelLmError::config(format!("{}: malformed prompt catalog: {}", path, e))
                })?
            }
            None => builtin_templates(),
        };
        Self::new(templates)
    }

    pub fn new(templates: Vec<PromptTemplate>) -> Result<Self> {
        let mut map = HashMap::with_capacity(templates.len());
        for template in templates {
            validate_template(&template)?;
            if map
                .insert(template.template_id.clone(), template)
                .is_some()
            {
                return Err(NobelLmError::config("duplicate template_id in catalog"));
            }
        }
        // Every routable family must resolve
        for family in ALL_FAMILIES {
            if !map.contains_key(family.template_id()) {
                return Err(NobelLmError::config(format!(
                    "catalog is missing template '{}'",
                    family.template_id()
                )));
            }
        }
        Ok(Self { templates: map })
    }

    pub fn get(&self, template_id: &str) -> Option<&PromptTemplate> {
        self.templates.get(template_id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

const ALL_FAMILIES: &[TemplateFamily] = &[
    TemplateFamily::QaFactual,
    TemplateFamily::QaAnalytical,
    TemplateFamily::QaComparative,
    TemplateFamily::ScopedLaureate,
    TemplateFamily::ScopedWork,
    TemplateFamily::ThematicSynthesis,
    TemplateFamily::ThematicEnumerative,
    TemplateFamily::ThematicComparative,
    TemplateFamily::ThematicContextual,
    TemplateFamily::GenerativeEmail,
    TemplateFamily::GenerativeSpeech,
    TemplateFamily::GenerativeReflection,
];

fn validate_template(template: &PromptTemplate) -> Result<()> {
    for capture in PLACEHOLDER_RE.captures_iter(&template.template) {
        let name = &capture[1];
        if !KNOWN_PLACEHOLDERS.contains(&name) {
            return Err(NobelLmError::config(format!(
                "template '{}' uses undefined placeholder '{{{}}}'",
                template.template_id, name
            )));
        }
    }
    if !template.template.contains("{query}") || !template.template.contains("{context}") {
        return Err(NobelLmError::config(format!(
            "template '{}' must use {{query}} and {{context}}",
            template.template_id
        )));
    }
    if template.chunk_count == 0 {
        return Err(NobelLmError::config(format!(
            "template '{}' has chunk_count 0",
            template.template_id
        )));
    }
    Ok(())
}

/// Result of prompt construction
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub template_id: String,
    pub prompt_text: String,
    pub citation_style: CitationStyle,
    pub chunk_count: usize,
    pub tone_preference: Option<String>,
    pub reflective: bool,
}

pub struct PromptBuilder {
    catalog: Arc<TemplateCatalog>,
}

impl PromptBuilder {
    pub fn new(catalog: Arc<TemplateCatalog>) -> Self {
        Self { catalog }
    }

    /// Deterministic: same inputs, same prompt.
    pub fn build(
        &self,
        family: TemplateFamily,
        chunks: &[ScoredChunk],
        query: &str,
        scoped_entity: Option<&str>,
    ) -> Result<BuiltPrompt> {
        let template = self
            .catalog
            .get(family.template_id())
            .ok_or_else(|| NobelLmError::Internal {
                message: format!("template '{}' vanished from catalog", family.template_id()),
            })?;

        let take = template.chunk_count.min(chunks.len());
        let context = render_context(&chunks[..take]);

        let mut text = template
            .template
            .replace("{query}", query)
            .replace("{context}", &context);
        if text.contains("{laureate}") {
            let laureate = scoped_entity.ok_or_else(|| NobelLmError::Internal {
                message: format!(
                    "template '{}' needs a laureate but none was scoped",
                    template.template_id
                ),
            })?;
            text = text.replace("{laureate}", laureate);
        }

        Ok(BuiltPrompt {
            template_id: template.template_id.clone(),
            prompt_text: text,
            citation_style: template.citation_style,
            chunk_count: take,
            tone_preference: template.tone_preference.clone(),
            reflective: template.is_reflective(),
        })
    }
}

/// Render chunk blocks in retrieval order: attribution line, then the text,
/// blocks separated by blank lines.
fn render_context(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for (i, scored) in chunks.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let c = &scored.chunk;
        out.push_str(&format!(
            "[{}] {}, {} ({})\n{}",
            i + 1,
            c.laureate,
            c.year_awarded,
            c.source_type.as_str(),
            c.text
        ));
    }
    out
}

/// The built-in catalog: one template per routable family
pub fn builtin_templates() -> Vec<PromptTemplate> {
    fn t(
        id: &str,
        intent: Intent,
        tags: &[&str],
        chunk_count: usize,
        citation_style: CitationStyle,
        tone: Option<&str>,
        template: &str,
    ) -> PromptTemplate {
        PromptTemplate {
            template_id: id.to_string(),
            version: "1.0.0".to_string(),
            intent,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            chunk_count,
            citation_style,
            tone_preference: tone.map(|s| s.to_string()),
            template: template.to_string(),
        }
    }

    vec![
        t(
            "qa_factual",
            Intent::Qa,
            &["qa", "factual"],
            5,
            CitationStyle::Inline,
            None,
            "Answer the question using only the passages below. Cite passages inline by their bracketed number. If the passages do not contain the answer, say so.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nAnswer:",
        ),
        t(
            "qa_analytical",
            Intent::Qa,
            &["qa", "analytical"],
            8,
            CitationStyle::Inline,
            None,
            "Give an analytical answer grounded in the passages below. Explain the reasoning, not just the conclusion, and cite passages inline by number.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nAnalysis:",
        ),
        t(
            "qa_comparative",
            Intent::Qa,
            &["qa", "comparative"],
            10,
            CitationStyle::Inline,
            None,
            "Compare the perspectives found in the passages below as they bear on the question. Note where the passages agree and where they differ, citing each inline by number.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nComparison:",
        ),
        t(
            "scoped_laureate",
            Intent::Scoped,
            &["scoped"],
            6,
            CitationStyle::Inline,
            None,
            "The passages below are from {laureate}'s Nobel materials. Answer the question about {laureate} using only these passages, citing them inline by number.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nAnswer:",
        ),
        t(
            "scoped_work",
            Intent::Scoped,
            &["scoped", "work"],
            8,
            CitationStyle::Inline,
            None,
            "The passages below are from {laureate}'s Nobel materials and discuss the named work. Answer the question with close attention to what is said about the work itself, citing passages inline by number.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nAnswer:",
        ),
        t(
            "thematic_synthesis_clean",
            Intent::Thematic,
            &["thematic", "synthesis"],
            12,
            CitationStyle::Inline,
            None,
            "Synthesize what the laureates below say about the theme in the question. Weave their voices into one coherent account, citing passages inline by number. Do not invent views absent from the passages.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nSynthesis:",
        ),
        t(
            "thematic_enumerative",
            Intent::Thematic,
            &["thematic", "enumerative"],
            10,
            CitationStyle::Footnote,
            None,
            "List the laureates in the passages below who speak to the question, one entry per laureate, each with a one-sentence summary of their view and a footnote-style citation.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nLaureates:",
        ),
        t(
            "thematic_comparative",
            Intent::Thematic,
            &["thematic", "comparative"],
            12,
            CitationStyle::Inline,
            None,
            "Contrast how the laureates below treat the theme in the question. Organize by point of disagreement rather than by laureate, citing passages inline by number.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nContrast:",
        ),
        t(
            "thematic_contextual",
            Intent::Thematic,
            &["thematic", "contextual"],
            10,
            CitationStyle::Inline,
            None,
            "Answer the question with historical and biographical context drawn from the passages below. Anchor every contextual claim to a passage, cited inline by number.\n\nQuestion: {query}\n\nPassages:\n{context}\n\nContext:",
        ),
        t(
            "generative_email",
            Intent::Generative,
            &["generative", "email"],
            10,
            CitationStyle::Footnote,
            Some("humble"),
            "Write the email requested below in the voice of a Nobel literature laureate, drawing tone and turns of phrase from the passages. Keep it humble and gracious. Do not quote the passages verbatim.\n\nRequest: {query}\n\nPassages for tone:\n{context}\n\nEmail:",
        ),
        t(
            "generative_speech",
            Intent::Generative,
            &["generative", "speech"],
            12,
            CitationStyle::Footnote,
            Some("ceremonial"),
            "Write the speech requested below in the register of a Nobel banquet address, echoing the cadence of the passages. Do not quote the passages verbatim.\n\nRequest: {query}\n\nPassages for tone:\n{context}\n\nSpeech:",
        ),
        t(
            "generative_reflection",
            Intent::Generative,
            &["generative", "reflective"],
            8,
            CitationStyle::Footnote,
            Some("contemplative"),
            "Write the reflection requested below in the contemplative voice of the passages. Let their imagery inform yours without copying it.\n\nRequest: {query}\n\nPassages for tone:\n{context}\n\nReflection:",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, SourceType};

    fn scored(id: &str, laureate: &str, year: i32, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Arc::new(Chunk {
                chunk_id: id.to_string(),
                text: text.to_string(),
                source_type: SourceType::NobelLecture,
                laureate: laureate.to_string(),
                year_awarded: year,
                country: "X".to_string(),
                country_flag: "🏳".to_string(),
                gender: "unknown".to_string(),
                category: "Literature".to_string(),
                prize_motivation: String::new(),
                specific_work_cited: false,
                embedding: vec![0.0; 4],
            }),
            score: 0.9,
        }
    }

    fn builder() -> PromptBuilder {
        PromptBuilder::new(Arc::new(TemplateCatalog::load(None).unwrap()))
    }

    #[test]
    fn builtin_catalog_covers_every_family() {
        let catalog = TemplateCatalog::load(None).unwrap();
        assert_eq!(catalog.len(), 12);
        for family in ALL_FAMILIES {
            assert!(catalog.get(family.template_id()).is_some(), "{:?}", family);
        }
    }

    #[test]
    fn built_prompt_substitutes_all_placeholders() {
        let chunks = vec![scored("a", "Toni Morrison", 1993, "Language alone protects us.")];
        let built = builder()
            .build(
                TemplateFamily::ThematicSynthesis,
                &chunks,
                "What do laureates say about language?",
                None,
            )
            .unwrap();
        assert_eq!(built.template_id, "thematic_synthesis_clean");
        assert!(built.prompt_text.contains("What do laureates say about language?"));
        assert!(built.prompt_text.contains("Language alone protects us."));
        assert!(built.prompt_text.contains("Toni Morrison, 1993"));
        assert!(!built.prompt_text.contains("{query}"));
        assert!(!built.prompt_text.contains("{context}"));
    }

    #[test]
    fn scoped_template_requires_a_laureate() {
        let chunks = vec![scored("a", "Toni Morrison", 1993, "text")];
        let builder = builder();
        let err = builder.build(
            TemplateFamily::ScopedLaureate,
            &chunks,
            "What did she say about race?",
            None,
        );
        assert!(err.is_err());

        let ok = builder
            .build(
                TemplateFamily::ScopedLaureate,
                &chunks,
                "What did she say about race?",
                Some("Toni Morrison"),
            )
            .unwrap();
        assert!(ok.prompt_text.contains("Toni Morrison's Nobel materials"));
    }

    #[test]
    fn chunk_list_truncates_to_template_count() {
        let chunks: Vec<ScoredChunk> = (0..20)
            .map(|i| scored(&format!("c{}", i), "X", 1990, "words"))
            .collect();
        let built = builder()
            .build(TemplateFamily::QaFactual, &chunks, "q", None)
            .unwrap();
        assert_eq!(built.chunk_count, 5);

        let built = builder()
            .build(TemplateFamily::QaFactual, &chunks[..2], "q", None)
            .unwrap();
        assert_eq!(built.chunk_count, 2);
    }

    #[test]
    fn building_is_pure() {
        let chunks = vec![scored("a", "X", 1990, "stable text")];
        let b = builder();
        let one = b
            .build(TemplateFamily::QaFactual, &chunks, "same question", None)
            .unwrap();
        let two = b
            .build(TemplateFamily::QaFactual, &chunks, "same question", None)
            .unwrap();
        assert_eq!(one.prompt_text, two.prompt_text);
    }

    #[test]
    fn generative_email_carries_humble_tone() {
        let chunks = vec![scored("a", "X", 1990, "tone text")];
        let built = builder()
            .build(TemplateFamily::GenerativeEmail, &chunks, "write an email", None)
            .unwrap();
        assert_eq!(built.tone_preference.as_deref(), Some("humble"));
        assert!(built.reflective);
    }

    #[test]
    fn undefined_placeholder_is_rejected_at_load() {
        let mut templates = builtin_templates();
        templates[0].template = "Q: {query}\nC: {context}\nBad: {chunks}".to_string();
        assert!(TemplateCatalog::new(templates).is_err());
    }

    #[test]
    fn missing_family_is_rejected_at_load() {
        let mut templates = builtin_templates();
        templates.pop();
        assert!(TemplateCatalog::new(templates).is_err());
    }

    #[test]
    fn context_blocks_are_separated_and_ordered() {
        let chunks = vec![
            scored("a", "First Author", 1950, "first text"),
            scored("b", "Second Author", 1960, "second text"),
        ];
        let rendered = render_context(&chunks);
        let first = rendered.find("First Author").unwrap();
        let second = rendered.find("Second Author").unwrap();
        assert!(first < second);
        assert!(rendered.contains("\n\n"));
        assert!(rendered.starts_with("[1] "));
    }
}
