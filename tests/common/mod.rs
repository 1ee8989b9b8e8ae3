//! Shared test harness: the full pipeline over a small in-memory corpus
//! with deterministic embeddings, a canned LLM, and an in-memory audit sink.
#![allow(dead_code)]

use async_trait::async_trait;
use nobellm::audit::MemorySink;
use nobellm::config::Config;
use nobellm::corpus::{Chunk, LaureateIndex, LaureateRecord, SourceType};
use nobellm::embedding::{Embedder, HashEmbedder};
use nobellm::error::Result;
use nobellm::intent::{default_cues, IntentClassifier};
use nobellm::llm::{ChatCompleter, Completion, CompletionParams, TokenUsage};
use nobellm::metadata::MetadataHandler;
use nobellm::orchestrator::Orchestrator;
use nobellm::prompts::{PromptBuilder, TemplateCatalog};
use nobellm::retrieval::{ChunkIndex, MergeStrategy, ThematicRetriever, VectorRetriever};
use nobellm::router::QueryRouter;
use nobellm::themes::{ThemeConfig, ThemeEmbeddings, ThematicExpander};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DIMS: usize = 64;

/// Canned LLM: never touches the network, echoes nothing sensitive
pub struct FakeLlm;

#[async_trait]
impl ChatCompleter for FakeLlm {
    async fn complete(&self, prompt: &str, _params: &CompletionParams) -> Result<Completion> {
        let prompt_tokens = (prompt.chars().count() as u32).div_ceil(4);
        Ok(Completion {
            answer_text: "Dear committee, I accept with humility and gratitude.".to_string(),
            model_id: "fake-llm".to_string(),
            token_usage: TokenUsage {
                prompt_tokens,
                completion_tokens: 12,
                total_tokens: prompt_tokens + 12,
                estimated: true,
            },
            cost_estimate: 0.0,
            latency_ms: 1,
        })
    }

    fn model_id(&self) -> &str {
        "fake-llm"
    }
}

/// An embedding stub that declares one dimension but returns another,
/// mimicking a misdeployed remote service
pub struct WrongShapeEmbedder {
    pub declared: usize,
    pub actual: usize,
}

#[async_trait]
impl Embedder for WrongShapeEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.5; self.actual])
    }

    fn dimensions(&self) -> usize {
        self.declared
    }

    fn endpoint(&self) -> &str {
        "stub://wrong-shape"
    }
}

pub fn laureate_records() -> Vec<LaureateRecord> {
    let record = |name: &str, year: i32, country: &str, flag: &str, gender: &str| LaureateRecord {
        laureate: name.to_string(),
        year_awarded: year,
        country: country.to_string(),
        country_flag: flag.to_string(),
        gender: gender.to_string(),
        category: "Literature".to_string(),
        prize_motivation: format!("for the writing of {}", name),
    };
    vec![
        record("William Faulkner", 1949, "United States", "🇺🇸", "male"),
        record("Mikhail Sholokhov", 1965, "Russia", "🇷🇺", "male"),
        record("Toni Morrison", 1993, "United States", "🇺🇸", "female"),
        record("Seamus Heaney", 1995, "Ireland", "🇮🇪", "male"),
    ]
}

/// Chunks whose embeddings are anchored to known texts so retrieval
/// behaves predictably: a chunk anchored to a query string scores ~1.0
/// against that query's embedding.
async fn test_chunks(embedder: &HashEmbedder) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut add = |id: &str,
                   laureate: &str,
                   year: i32,
                   country: &str,
                   source_type: SourceType,
                   text: &str,
                   embedding: Vec<f32>| {
        chunks.push(Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            source_type,
            laureate: laureate.to_string(),
            year_awarded: year,
            country: country.to_string(),
            country_flag: "🏳".to_string(),
            gender: "unknown".to_string(),
            category: "Literature".to_string(),
            prize_motivation: "for testing".to_string(),
            specific_work_cited: false,
            embedding,
        });
    };

    add(
        "1993_morrison_nobel_lecture_0",
        "Toni Morrison",
        1993,
        "United States",
        SourceType::NobelLecture,
        "Oppressive language does more than represent violence; it is violence.",
        embedder.embed("What did Toni Morrison say about race?").await.unwrap(),
    );
    add(
        "1993_morrison_nobel_lecture_1",
        "Toni Morrison",
        1993,
        "United States",
        SourceType::NobelLecture,
        "Narrative is radical, creating us at the very moment it is being created.",
        embedder.embed("narrative and creation").await.unwrap(),
    );
    add(
        "1949_faulkner_acceptance_speech_0",
        "William Faulkner",
        1949,
        "United States",
        SourceType::AcceptanceSpeech,
        "The poet's voice need not merely be the record of man, it can be one of the props to help him endure.",
        embedder.embed("justice").await.unwrap(),
    );
    add(
        "1995_heaney_nobel_lecture_0",
        "Seamus Heaney",
        1995,
        "Ireland",
        SourceType::NobelLecture,
        "The form of the poem is crucial to poetry's power to persuade that vulnerable part of our consciousness.",
        embedder.embed("law").await.unwrap(),
    );
    add(
        "1993_morrison_ceremony_speech_0",
        "Toni Morrison",
        1993,
        "United States",
        SourceType::CeremonySpeech,
        "She was rewarded for the courage to free language from the fetters of race.",
        embedder.embed("freedom").await.unwrap(),
    );
    add(
        "1965_sholokhov_nobel_lecture_0",
        "Mikhail Sholokhov",
        1965,
        "Russia",
        SourceType::NobelLecture,
        "I speak for the writers who hold that liberty is the first condition of honest art.",
        embedder.embed("liberty").await.unwrap(),
    );
    for i in 0..3 {
        add(
            &format!("1949_faulkner_banquet_{}", i),
            "William Faulkner",
            1949,
            "United States",
            SourceType::AcceptanceSpeech,
            "I decline to accept the end of man; I believe that man will not merely endure: he will prevail.",
            embedder
                .embed("Write a job acceptance email in the tone of a Nobel laureate.")
                .await
                .unwrap(),
        );
    }
    add(
        "1995_heaney_ceremony_speech_0",
        "Seamus Heaney",
        1995,
        "Ireland",
        SourceType::CeremonySpeech,
        "A poetry of the everyday miraculous and the living past.",
        embedder.embed("weather patterns over the atlantic").await.unwrap(),
    );
    chunks
}

fn test_themes() -> ThemeConfig {
    let mut map = BTreeMap::new();
    map.insert(
        "justice".to_string(),
        vec![
            "justice".to_string(),
            "law".to_string(),
            "equality".to_string(),
        ],
    );
    map.insert(
        "freedom".to_string(),
        vec!["freedom".to_string(), "liberty".to_string()],
    );
    ThemeConfig::new(map).unwrap()
}

async fn test_theme_embeddings(
    themes: &ThemeConfig,
    embedder: &HashEmbedder,
) -> ThemeEmbeddings {
    let mut pairs = Vec::new();
    for keyword in themes.all_keywords() {
        pairs.push((keyword.to_string(), embedder.embed(keyword).await.unwrap()));
    }
    ThemeEmbeddings::from_pairs(pairs, DIMS, themes).unwrap()
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    // The harness corpus is tiny; keep the floor permissive
    config.retrieval.default_score_threshold = 0.2;
    config.retrieval.min_return = 2;
    config
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub sink: Arc<MemorySink>,
}

/// Build the full pipeline with the standard fakes
pub async fn harness() -> Harness {
    harness_with_embedder(Arc::new(HashEmbedder::new(DIMS))).await
}

/// Build the pipeline with a caller-supplied embedder (fault injection)
pub async fn harness_with_embedder(embedder: Arc<dyn Embedder>) -> Harness {
    let config = Arc::new(test_config());
    let hash = HashEmbedder::new(DIMS);

    let laureates = Arc::new(LaureateIndex::new(laureate_records()));
    let themes = Arc::new(test_themes());
    let theme_embeddings = Arc::new(test_theme_embeddings(&themes, &hash).await);

    let classifier = Arc::new(IntentClassifier::new(default_cues(), laureates.clone()).unwrap());
    let router = Arc::new(QueryRouter::new(laureates.clone()));
    let metadata = Arc::new(MetadataHandler::new(laureates.clone()));
    let expander = Arc::new(ThematicExpander::new(
        config.expansion.clone(),
        themes,
        theme_embeddings,
    ));

    let index = Arc::new(ChunkIndex::new(test_chunks(&hash).await, DIMS));
    let vector_retriever = Arc::new(VectorRetriever::new(
        index.clone(),
        config.retrieval.min_return,
    ));
    let thematic_retriever = Arc::new(ThematicRetriever::new(
        index,
        config.retrieval.top_k_per_term,
        MergeStrategy::Max,
        config.retrieval.min_return,
    ));

    let prompt_builder = Arc::new(PromptBuilder::new(Arc::new(
        TemplateCatalog::load(None).unwrap(),
    )));
    let sink = Arc::new(MemorySink::new());

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        classifier,
        router,
        metadata,
        expander,
        embedder,
        vector_retriever,
        thematic_retriever,
        prompt_builder,
        Arc::new(FakeLlm),
        sink.clone(),
    ));

    Harness { orchestrator, sink }
}

/// Convenience: a plain request with no overrides
pub fn request(query: &str) -> nobellm::orchestrator::QueryRequest {
    nobellm::orchestrator::QueryRequest {
        query: query.to_string(),
        model_id: None,
        score_threshold: None,
        top_k: None,
    }
}
