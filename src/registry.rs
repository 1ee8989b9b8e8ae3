//! Service registry: every component built once at startup, dependencies
//! passed down explicitly. All configuration errors surface here, before
//! the server binds; nothing in this file may fail at query time.

use crate::audit::{AuditSink, FileAuditSink};
use crate::config::Config;
use crate::corpus::{load_chunks, load_laureates, LaureateIndex};
use crate::embedding::create_embedder;
use crate::error::{NobelLmError, Result};
use crate::intent::IntentClassifier;
use crate::llm::{ChatCompleter, OpenAiCompatClient};
use crate::metadata::MetadataHandler;
use crate::orchestrator::Orchestrator;
use crate::prompts::{PromptBuilder, TemplateCatalog};
use crate::retrieval::{ChunkIndex, MergeStrategy, ThematicRetriever, VectorRetriever};
use crate::router::QueryRouter;
use crate::themes::{ThemeConfig, ThemeEmbeddings, ThematicExpander};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Read-only facts about the running service, for /info and the CLI
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub model_id: String,
    pub dimensions: usize,
    pub chunk_count: usize,
    pub laureate_count: usize,
    pub theme_count: usize,
    pub theme_keyword_count: usize,
    pub template_count: usize,
    pub embedding_endpoint: String,
    pub llm_model_id: String,
}

pub struct ServiceRegistry {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub info: ServiceInfo,
}

impl ServiceRegistry {
    /// Build everything from configuration. Fails fast on any
    /// inconsistency: corpus dimensions, theme archive coherence, template
    /// placeholders, missing keys.
    pub fn initialize(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let dimensions = config.system.dimensions()?;

        // Frozen corpus
        let chunks = load_chunks(&config.system.corpus_path, dimensions)?;
        let chunk_count = chunks.len();
        let laureates = Arc::new(LaureateIndex::new(load_laureates(
            &config.system.laureate_path,
        )?));

        // Theme taxonomy and its per-model embedding archive
        let themes = Arc::new(ThemeConfig::load(
            config.system.theme_config_path.as_deref(),
        )?);
        let theme_embeddings = Arc::new(ThemeEmbeddings::load(
            &config.system.theme_embeddings_dir,
            &config.system.model_id,
            dimensions,
            &themes,
        )?);
        let stats = theme_embeddings.stats();
        info!(
            "theme embeddings: count={} mean_norm={:.4} zero={}",
            stats.count, stats.mean_norm, stats.zero_count
        );

        // Pipeline components
        let classifier = Arc::new(IntentClassifier::from_config(&config, laureates.clone())?);
        let router = Arc::new(QueryRouter::new(laureates.clone()));
        let metadata = Arc::new(MetadataHandler::new(laureates.clone()));
        let expander = Arc::new(ThematicExpander::new(
            config.expansion.clone(),
            themes.clone(),
            theme_embeddings,
        ));
        let embedder = create_embedder(&config)?;

        let index = Arc::new(ChunkIndex::new(chunks, dimensions));
        let merge_strategy = MergeStrategy::parse(&config.retrieval.merge_strategy)?;
        let vector_retriever = Arc::new(VectorRetriever::new(
            index.clone(),
            config.retrieval.min_return,
        ));
        let thematic_retriever = Arc::new(ThematicRetriever::new(
            index,
            config.retrieval.top_k_per_term,
            merge_strategy,
            config.retrieval.min_return,
        ));

        let catalog = Arc::new(TemplateCatalog::load(
            config.system.prompt_catalog_path.as_deref(),
        )?);
        let template_count = catalog.len();
        let prompt_builder = Arc::new(PromptBuilder::new(catalog));

        let llm_api_key = config.runtime.llm_api_key.clone().ok_or_else(|| {
            NobelLmError::config("LLM_API_KEY is required to start the service")
        })?;
        let llm: Arc<dyn ChatCompleter> =
            Arc::new(OpenAiCompatClient::new(config.llm.clone(), llm_api_key)?);

        let sink: Arc<dyn AuditSink> = Arc::new(FileAuditSink::new(&config.system.audit_log_dir)?);

        let info = ServiceInfo {
            model_id: config.system.model_id.clone(),
            dimensions,
            chunk_count,
            laureate_count: laureates.len(),
            theme_count: themes.theme_count(),
            theme_keyword_count: themes.keyword_count(),
            template_count,
            embedding_endpoint: embedder.endpoint().to_string(),
            llm_model_id: config.llm.model_id.clone(),
        };
        info!(
            "service ready: model={} chunks={} laureates={} themes={}",
            info.model_id, info.chunk_count, info.laureate_count, info.theme_count
        );

        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            classifier,
            router,
            metadata,
            expander,
            embedder,
            vector_retriever,
            thematic_retriever,
            prompt_builder,
            llm,
            sink,
        ));

        Ok(Self {
            config,
            orchestrator,
            info,
        })
    }
}
