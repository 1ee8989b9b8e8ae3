//! Structured audit logging: one trace per query, persisted atomically.
//!
//! Every stage writes a typed event with a millisecond offset from request
//! start. The finished trace is a single JSON object appended to the daily
//! `audit_log_YYYY-MM-DD.jsonl`. Partial traces still persist; they end in
//! an `error` event instead of `answer_assembled`.

use crate::error::{NobelLmError, Result};
use crate::llm::TokenUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Mutex;

/// A term recorded by the expansion stage
#[derive(Debug, Clone, Serialize)]
pub struct TermRecord {
    pub term: String,
    pub weight: f32,
    pub source: String,
}

/// A retrieved chunk id with its score
#[derive(Debug, Clone, Serialize)]
pub struct ChunkScoreRecord {
    pub chunk_id: String,
    pub score: f32,
}

/// The audit event vocabulary; one variant per pipeline stage
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    QueryReceived {
        query: String,
        length: usize,
        config_hash: String,
    },
    IntentClassified {
        intent: String,
        confidence: f32,
        cues: Vec<String>,
    },
    ThematicSubtypeDetected {
        subtype: String,
        confidence: f32,
        cues: Vec<String>,
    },
    ExpansionDone {
        terms: Vec<TermRecord>,
    },
    EmbeddingDone {
        dimension: usize,
        latency_ms: u64,
        endpoint: String,
    },
    RetrievalDone {
        chunks: Vec<ChunkScoreRecord>,
        filter_summary: String,
        top_k: usize,
    },
    PromptBuilt {
        template_id: String,
        chunk_count: usize,
        prompt_length: usize,
    },
    LlmCalled {
        model_id: String,
        token_usage: TokenUsage,
        latency_ms: u64,
        cost_estimate: f64,
    },
    AnswerAssembled {
        answer_length: usize,
        source_count: usize,
    },
    Error {
        kind: String,
        stage: String,
        message: String,
    },
}

impl AuditEvent {
    /// Wire name of the event, as serialized in the `event` tag
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::QueryReceived { .. } => "query_received",
            AuditEvent::IntentClassified { .. } => "intent_classified",
            AuditEvent::ThematicSubtypeDetected { .. } => "thematic_subtype_detected",
            AuditEvent::ExpansionDone { .. } => "expansion_done",
            AuditEvent::EmbeddingDone { .. } => "embedding_done",
            AuditEvent::RetrievalDone { .. } => "retrieval_done",
            AuditEvent::PromptBuilt { .. } => "prompt_built",
            AuditEvent::LlmCalled { .. } => "llm_called",
            AuditEvent::AnswerAssembled { .. } => "answer_assembled",
            AuditEvent::Error { .. } => "error",
        }
    }
}

/// An event stamped with its offset from request start
#[derive(Debug, Clone, Serialize)]
pub struct TimedEvent {
    pub offset_ms: u64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// One query's complete journey
#[derive(Debug, Clone, Serialize)]
pub struct AuditTrace {
    pub trace_id: String,
    pub started_at: DateTime<Utc>,
    pub events: Vec<TimedEvent>,
}

impl AuditTrace {
    pub fn has_event(&self, name: &str) -> bool {
        self.events.iter().any(|e| e.event.name() == name)
    }

    pub fn first_event(&self) -> Option<&TimedEvent> {
        self.events.first()
    }

    pub fn last_event(&self) -> Option<&TimedEvent> {
        self.events.last()
    }
}

/// Incremental trace assembly with a monotonic clock
pub struct TraceBuilder {
    trace_id: String,
    started_at: DateTime<Utc>,
    start: Instant,
    events: Vec<TimedEvent>,
}

impl TraceBuilder {
    pub fn new(trace_id: String) -> Self {
        Self {
            trace_id,
            started_at: Utc::now(),
            start: Instant::now(),
            events: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record(&mut self, event: AuditEvent) {
        self.events.push(TimedEvent {
            offset_ms: self.start.elapsed().as_millis() as u64,
            event,
        });
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish(self) -> AuditTrace {
        AuditTrace {
            trace_id: self.trace_id,
            started_at: self.started_at,
            events: self.events,
        }
    }
}

/// Where finished traces go. The sink serializes writes so each trace is
/// emitted atomically.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist(&self, trace: &AuditTrace) -> Result<()>;
}

/// Append-only daily JSONL files in the configured directory
pub struct FileAuditSink {
    dir: PathBuf,
    // (date string, open handle); rotated when the date changes
    current: Mutex<Option<(String, std::fs::File)>>,
}

impl FileAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            NobelLmError::config(format!(
                "cannot create audit log dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    pub fn file_name(date: &str) -> String {
        format!("audit_log_{}.jsonl", date)
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn persist(&self, trace: &AuditTrace) -> Result<()> {
        let line = serde_json::to_string(trace)?;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut guard = self.current.lock().await;
        let needs_rotation = match guard.as_ref() {
            Some((date, _)) => date != &today,
            None => true,
        };
        if needs_rotation {
            let path = self.dir.join(Self::file_name(&today));
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            *guard = Some((today, file));
        }
        let (_, file) = guard.as_mut().expect("rotation just set the handle");
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory sink for tests and one-shot CLI runs
#[derive(Default)]
pub struct MemorySink {
    traces: Mutex<Vec<AuditTrace>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn traces(&self) -> Vec<AuditTrace> {
        self.traces.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn persist(&self, trace: &AuditTrace) -> Result<()> {
        self.traces.lock().await.push(trace.clone());
        Ok(())
    }
}
