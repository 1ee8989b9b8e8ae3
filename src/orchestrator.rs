//! The query pipeline state machine.
//!
//! One orchestrator instance serves all queries. Per query it owns a
//! QueryContext exclusively; components receive read-only views and return
//! values the orchestrator merges. Every stage transition emits an audit
//! event, every error is caught exactly once at the top, and exactly one
//! trace persists per query, success or not.

use crate::audit::{AuditEvent, AuditSink, ChunkScoreRecord, TermRecord, TraceBuilder};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{NobelLmError, Result};
use crate::intent::{Classification, Intent, IntentClassifier};
use crate::llm::{ChatCompleter, Completion, CompletionParams};
use crate::metadata::{MetadataAnswer, MetadataHandler};
use crate::prompts::{BuiltPrompt, PromptBuilder};
use crate::retrieval::{QueryVectors, RetrievalQuery, Retriever, ScoredChunk};
use crate::router::{QueryRouter, RouteDecision};
use crate::themes::{Expansion, ThematicExpander};
use crate::utils::text::snippet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Pipeline stages, for timeouts and error attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classify,
    Metadata,
    Expand,
    Embed,
    Retrieve,
    Prompt,
    Generate,
    Assemble,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Metadata => "metadata",
            Stage::Expand => "expand",
            Stage::Embed => "embed",
            Stage::Retrieve => "retrieve",
            Stage::Prompt => "prompt",
            Stage::Generate => "generate",
            Stage::Assemble => "assemble",
        }
    }
}

/// Incoming query, after JSON deserialization
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// One cited source in the response
#[derive(Debug, Clone, Serialize)]
pub struct SourceDoc {
    pub chunk_id: String,
    pub laureate: String,
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_flag: Option<String>,
    pub source_type: String,
    pub score: f32,
    pub text_snippet: String,
    pub text_full: String,
}

/// Successful response envelope
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub answer_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_answer: Option<MetadataAnswer>,
    pub sources: Vec<SourceDoc>,
    pub trace_id: String,
}

/// Result of one handled query; the trace id is available either way
pub struct QueryOutcome {
    pub trace_id: String,
    pub intent: Option<Intent>,
    pub result: Result<QueryResponse>,
}

/// Per-query mutable context, owned exclusively by the orchestrator.
/// Immutable once the response is assembled.
struct QueryContext {
    query: String,
    top_k_override: Option<usize>,
    score_threshold_override: Option<f32>,
    classification: Option<Classification>,
    expansion: Option<Expansion>,
    query_embedding: Option<Vec<f32>>,
    retrieved: Vec<ScoredChunk>,
    prompt: Option<BuiltPrompt>,
    completion: Option<Completion>,
    latency_ms_by_stage: HashMap<&'static str, u64>,
}

impl QueryContext {
    fn new(request: &QueryRequest) -> Self {
        Self {
            query: request.query.clone(),
            top_k_override: request.top_k,
            score_threshold_override: request.score_threshold,
            classification: None,
            expansion: None,
            query_embedding: None,
            retrieved: Vec::new(),
            prompt: None,
            completion: None,
            latency_ms_by_stage: HashMap::new(),
        }
    }
}

struct StageError {
    stage: Stage,
    error: NobelLmError,
}

impl StageError {
    fn new(stage: Stage, error: NobelLmError) -> Self {
        Self { stage, error }
    }
}

pub struct Orchestrator {
    config: Arc<Config>,
    config_hash: String,
    classifier: Arc<IntentClassifier>,
    router: Arc<QueryRouter>,
    metadata: Arc<MetadataHandler>,
    expander: Arc<ThematicExpander>,
    embedder: Arc<dyn Embedder>,
    vector_retriever: Arc<dyn Retriever>,
    thematic_retriever: Arc<dyn Retriever>,
    prompt_builder: Arc<PromptBuilder>,
    llm: Arc<dyn ChatCompleter>,
    sink: Arc<dyn AuditSink>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        classifier: Arc<IntentClassifier>,
        router: Arc<QueryRouter>,
        metadata: Arc<MetadataHandler>,
        expander: Arc<ThematicExpander>,
        embedder: Arc<dyn Embedder>,
        vector_retriever: Arc<dyn Retriever>,
        thematic_retriever: Arc<dyn Retriever>,
        prompt_builder: Arc<PromptBuilder>,
        llm: Arc<dyn ChatCompleter>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        let config_hash = config.snapshot_hash();
        Self {
            config,
            config_hash,
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
        }
    }

    /// Handle one query end to end. Exactly one audit trace is persisted,
    /// whatever happens.
    pub async fn handle_query(&self, request: QueryRequest) -> QueryOutcome {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let mut trace = TraceBuilder::new(trace_id.clone());
        trace.record(AuditEvent::QueryReceived {
            query: request.query.clone(),
            length: request.query.chars().count(),
            config_hash: self.config_hash.clone(),
        });

        let mut context = QueryContext::new(&request);
        let deadline =
            std::time::Duration::from_millis(self.config.runtime.request_timeout_ms);
        let run = self.run_pipeline(&request, &mut context, &mut trace);
        let result = match tokio::time::timeout(deadline, run).await {
            Ok(inner) => inner,
            Err(_) => Err(StageError::new(
                Stage::Generate,
                NobelLmError::Timeout {
                    stage: "request".to_string(),
                    timeout_ms: self.config.runtime.request_timeout_ms,
                },
            )),
        };

        let intent = context.classification.as_ref().map(|c| c.intent);
        let result = match result {
            Ok(response) => {
                info!(
                    trace_id = %trace_id,
                    answer_type = response.answer_type,
                    sources = response.sources.len(),
                    expanded_terms = context.expansion.as_ref().map(|e| e.terms.len()),
                    embedding_dim = context.query_embedding.as_ref().map(|v| v.len()),
                    tokens = context
                        .completion
                        .as_ref()
                        .map(|c| c.token_usage.total_tokens),
                    stage_latencies = ?context.latency_ms_by_stage,
                    "query complete"
                );
                Ok(response)
            }
            Err(StageError { stage, error }) => {
                warn!(
                    "query failed at stage {}: {} ({})",
                    stage.as_str(),
                    error,
                    trace_id
                );
                trace.record(AuditEvent::Error {
                    kind: error.kind_label().to_string(),
                    stage: stage.as_str().to_string(),
                    message: error.to_string(),
                });
                Err(error)
            }
        };

        let finished = trace.finish();
        if let Err(e) = self.sink.persist(&finished).await {
            // The trace must never take the response down with it
            warn!("failed to persist audit trace {}: {}", trace_id, e);
        }

        QueryOutcome {
            trace_id,
            intent,
            result,
        }
    }

    async fn run_pipeline(
        &self,
        request: &QueryRequest,
        context: &mut QueryContext,
        trace: &mut TraceBuilder,
    ) -> std::result::Result<QueryResponse, StageError> {
        self.validate(request)
            .map_err(|e| StageError::new(Stage::Classify, e))?;

        // RECEIVED -> CLASSIFIED
        let classification = self.classifier.classify(&context.query);
        trace.record(AuditEvent::IntentClassified {
            intent: classification.intent.as_str().to_string(),
            confidence: classification.confidence,
            cues: classification.matched_cues.clone(),
        });
        if let (Some(subtype), Some(conf)) = (
            classification.thematic_subtype,
            classification.subtype_confidence,
        ) {
            trace.record(AuditEvent::ThematicSubtypeDetected {
                subtype: subtype.as_str().to_string(),
                confidence: conf,
                cues: classification.subtype_cues.clone(),
            });
        }
        info!(
            intent = classification.intent.as_str(),
            confidence = classification.confidence,
            "classified query"
        );
        let route = self.router.route(&context.query, &classification);
        context.classification = Some(classification);

        match route {
            RouteDecision::Metadata => {
                // CLASSIFIED -> METADATA_ANSWERED -> DONE
                if let Some(answer) = self.metadata.answer(&context.query) {
                    trace.record(AuditEvent::AnswerAssembled {
                        answer_length: answer.answer.chars().count(),
                        source_count: 0,
                    });
                    return Ok(QueryResponse {
                        answer: answer.answer.clone(),
                        answer_type: "metadata",
                        metadata_answer: Some(answer),
                        sources: Vec::new(),
                        trace_id: trace.trace_id().to_string(),
                    });
                }
                // No metadata rule matched; fall through to the qa path
                let fallback = self.router.qa_route(&context.query);
                self.run_retrieval_path(fallback, context, trace).await
            }
            retrieval @ RouteDecision::Retrieval { .. } => {
                self.run_retrieval_path(retrieval, context, trace).await
            }
        }
    }

    async fn run_retrieval_path(
        &self,
        route: RouteDecision,
        context: &mut QueryContext,
        trace: &mut TraceBuilder,
    ) -> std::result::Result<QueryResponse, StageError> {
        let (family, filters, expand) = match route {
            RouteDecision::Retrieval {
                family,
                filters,
                expand,
            } => (family, filters, expand),
            RouteDecision::Metadata => {
                return Err(StageError::new(
                    Stage::Retrieve,
                    NobelLmError::Internal {
                        message: "metadata route reached the retrieval path".to_string(),
                    },
                ));
            }
        };

        // CLASSIFIED -> [EXPANDED] -> EMBEDDED
        let embed_start = Instant::now();
        let query_embedding = self
            .stage_timeout(
                Stage::Embed,
                self.config.embedding.timeout_ms,
                self.embedder.embed(&context.query),
            )
            .await?;
        let embed_latency = embed_start.elapsed().as_millis() as u64;
        context.latency_ms_by_stage.insert("embed", embed_latency);
        // Shape enforcement: a service returning the wrong dimension must
        // fail here, before any retrieval is attempted
        if query_embedding.len() != self.embedder.dimensions() {
            return Err(StageError::new(
                Stage::Embed,
                NobelLmError::embedding(
                    crate::error::EmbeddingErrorKind::Shape,
                    format!(
                        "embedding has {} dims, active model declares {}",
                        query_embedding.len(),
                        self.embedder.dimensions()
                    ),
                ),
            ));
        }

        let vectors = if expand {
            let expansion = self
                .expander
                .expand(&context.query, Some(&query_embedding));
            trace.record(AuditEvent::ExpansionDone {
                terms: expansion
                    .terms
                    .iter()
                    .map(|t| TermRecord {
                        term: t.term.clone(),
                        weight: t.weight,
                        source: t.source.as_str().to_string(),
                    })
                    .collect(),
            });
            let vectors = if expansion.vectors.is_empty() {
                QueryVectors::Single(query_embedding.clone())
            } else {
                QueryVectors::Weighted(expansion.vectors.clone())
            };
            context.expansion = Some(expansion);
            vectors
        } else {
            QueryVectors::Single(query_embedding.clone())
        };
        trace.record(AuditEvent::EmbeddingDone {
            dimension: query_embedding.len(),
            latency_ms: embed_latency,
            endpoint: self.embedder.endpoint().to_string(),
        });
        context.query_embedding = Some(query_embedding);

        // EMBEDDED -> RETRIEVED
        let top_k = context
            .top_k_override
            .unwrap_or_else(|| family.default_top_k());
        let min_score = context
            .score_threshold_override
            .unwrap_or(self.config.retrieval.default_score_threshold);
        let retrieval_query = RetrievalQuery {
            vectors,
            filters: filters.clone(),
            top_k,
            min_score,
        };
        let retriever = match &retrieval_query.vectors {
            QueryVectors::Weighted(_) => &self.thematic_retriever,
            QueryVectors::Single(_) => &self.vector_retriever,
        };
        let retrieve_start = Instant::now();
        let retrieved = self
            .stage_timeout(
                Stage::Retrieve,
                self.config.retrieval.timeout_ms,
                retriever.retrieve(&retrieval_query),
            )
            .await?;
        context
            .latency_ms_by_stage
            .insert("retrieve", retrieve_start.elapsed().as_millis() as u64);
        trace.record(AuditEvent::RetrievalDone {
            chunks: retrieved
                .iter()
                .map(|s| ChunkScoreRecord {
                    chunk_id: s.chunk.chunk_id.clone(),
                    score: s.score,
                })
                .collect(),
            filter_summary: filters.summary(),
            top_k,
        });
        context.retrieved = retrieved;

        // RETRIEVED -> PROMPTED
        let scoped_entity = context
            .classification
            .as_ref()
            .and_then(|c| c.scoped_entity.clone());
        let prompt = self
            .prompt_builder
            .build(
                family,
                &context.retrieved,
                &context.query,
                scoped_entity.as_deref(),
            )
            .map_err(|e| StageError::new(Stage::Prompt, e))?;
        trace.record(AuditEvent::PromptBuilt {
            template_id: prompt.template_id.clone(),
            chunk_count: prompt.chunk_count,
            prompt_length: prompt.prompt_text.chars().count(),
        });

        // PROMPTED -> GENERATED
        let params = CompletionParams {
            model_id: None,
            max_tokens: None,
            temperature: Some(if prompt.reflective {
                self.config.llm.reflective_temperature
            } else {
                self.config.llm.temperature
            }),
        };
        let generate_start = Instant::now();
        let completion = self
            .stage_timeout(
                Stage::Generate,
                self.config.llm.timeout_ms,
                self.llm.complete(&prompt.prompt_text, &params),
            )
            .await?;
        context
            .latency_ms_by_stage
            .insert("generate", generate_start.elapsed().as_millis() as u64);
        trace.record(AuditEvent::LlmCalled {
            model_id: completion.model_id.clone(),
            token_usage: completion.token_usage.clone(),
            latency_ms: completion.latency_ms,
            cost_estimate: completion.cost_estimate,
        });
        context.prompt = Some(prompt);

        // GENERATED -> DONE
        let sources: Vec<SourceDoc> = context
            .retrieved
            .iter()
            .take(context.prompt.as_ref().map(|p| p.chunk_count).unwrap_or(0))
            .map(|s| SourceDoc {
                chunk_id: s.chunk.chunk_id.clone(),
                laureate: s.chunk.laureate.clone(),
                year: s.chunk.year_awarded,
                country: Some(s.chunk.country.clone()),
                country_flag: Some(s.chunk.country_flag.clone()),
                source_type: s.chunk.source_type.as_str().to_string(),
                score: s.score,
                text_snippet: snippet(&s.chunk.text, 200),
                text_full: s.chunk.text.clone(),
            })
            .collect();
        let answer = completion.answer_text.clone();
        context.completion = Some(completion);
        trace.record(AuditEvent::AnswerAssembled {
            answer_length: answer.chars().count(),
            source_count: sources.len(),
        });

        Ok(QueryResponse {
            answer,
            answer_type: "rag",
            metadata_answer: None,
            sources,
            trace_id: trace.trace_id().to_string(),
        })
    }

    fn validate(&self, request: &QueryRequest) -> Result<()> {
        let trimmed = request.query.trim();
        if trimmed.is_empty() {
            return Err(NobelLmError::validation("query must not be empty"));
        }
        let length = request.query.chars().count();
        let max = self.config.system.max_query_length;
        if length > max {
            return Err(NobelLmError::validation(format!(
                "query is {} chars, max {}",
                length, max
            )));
        }
        if let Some(top_k) = request.top_k {
            if !(1..=50).contains(&top_k) {
                return Err(NobelLmError::validation(format!(
                    "top_k {} outside [1,50]",
                    top_k
                )));
            }
        }
        if let Some(threshold) = request.score_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(NobelLmError::validation(format!(
                    "score_threshold {} outside [0,1]",
                    threshold
                )));
            }
        }
        if let Some(model_id) = &request.model_id {
            if model_id != &self.config.system.model_id {
                return Err(NobelLmError::validation(format!(
                    "model '{}' is not active; this deployment serves '{}'",
                    model_id, self.config.system.model_id
                )));
            }
        }
        Ok(())
    }

    async fn stage_timeout<T>(
        &self,
        stage: Stage,
        timeout_ms: u64,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> std::result::Result<T, StageError> {
        match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), fut).await {
            Ok(result) => result.map_err(|e| StageError::new(stage, e)),
            Err(_) => Err(StageError::new(
                stage,
                NobelLmError::Timeout {
                    stage: stage.as_str().to_string(),
                    timeout_ms,
                },
            )),
        }
    }
}
