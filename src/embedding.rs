//! Embedding providers: the remote service client and a deterministic
//! local embedder for tests and development.
//!
//! The remote service scales by container cold-start; bursting it causes
//! timeouts. The pacing policy here is a hard contract: the first N calls
//! are serialized with a minimum inter-call spacing, after which calls may
//! run with bounded concurrency.

use crate::config::{Config, EmbeddingClientConfig};
use crate::error::{EmbeddingErrorKind, NobelLmError, Result};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tracing::{debug, info};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch, preserving order. The default embeds sequentially;
    /// the remote client overrides this with its paced fan-out.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize;

    /// Where embeddings come from, for the audit trace
    fn endpoint(&self) -> &str {
        "local"
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    api_key: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Serialization window for cold-start protection
struct Pacer {
    gate: Arc<Mutex<PaceState>>,
    warmup_calls: usize,
    spacing: std::time::Duration,
}

struct PaceState {
    calls: usize,
    last_call: Option<Instant>,
}

impl Pacer {
    fn new(config: &EmbeddingClientConfig) -> Self {
        Self {
            gate: Arc::new(Mutex::new(PaceState {
                calls: 0,
                last_call: None,
            })),
            warmup_calls: config.warmup_calls,
            spacing: std::time::Duration::from_millis(config.call_spacing_ms),
        }
    }

    /// Admit one call. During warmup the returned guard is held across the
    /// HTTP round-trip, serializing callers and enforcing the spacing.
    async fn admit(&self) -> Option<OwnedMutexGuard<PaceState>> {
        let mut state = self.gate.clone().lock_owned().await;
        if state.calls >= self.warmup_calls {
            return None;
        }
        if let Some(last) = state.last_call {
            let since = last.elapsed();
            if since < self.spacing {
                tokio::time::sleep(self.spacing - since).await;
            }
        }
        state.calls += 1;
        state.last_call = Some(Instant::now());
        Some(state)
    }
}

/// Client for the remote embedding microservice
pub struct RemoteEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    dims: usize,
    config: EmbeddingClientConfig,
    pacer: Pacer,
    fanout: Arc<Semaphore>,
}

impl RemoteEmbedder {
    pub fn new(
        url: String,
        api_key: String,
        dims: usize,
        config: EmbeddingClientConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                NobelLmError::config(format!("failed to build embedding HTTP client: {}", e))
            })?;
        let fanout = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Ok(Self {
            client,
            url,
            api_key,
            dims,
            pacer: Pacer::new(&config),
            config,
            fanout,
        })
    }

    fn validate_input(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(NobelLmError::embedding(
                EmbeddingErrorKind::InvalidInput,
                "input text is empty",
            ));
        }
        let chars = text.chars().count();
        if chars > self.config.max_input_chars {
            return Err(NobelLmError::embedding(
                EmbeddingErrorKind::InvalidInput,
                format!(
                    "input is {} chars, max {}",
                    chars, self.config.max_input_chars
                ),
            ));
        }
        Ok(())
    }

    async fn call_once(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbedRequest {
            api_key: &self.api_key,
            text,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() || e.is_connect() {
                    EmbeddingErrorKind::Transient
                } else {
                    EmbeddingErrorKind::Permanent
                };
                NobelLmError::embedding(kind, format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let excerpt: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            let kind = match status.as_u16() {
                502 | 503 | 504 => EmbeddingErrorKind::Transient,
                _ => EmbeddingErrorKind::Permanent,
            };
            return Err(NobelLmError::embedding(
                kind,
                format!("service returned {}: {}", status, excerpt),
            ));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            NobelLmError::embedding(
                EmbeddingErrorKind::Permanent,
                format!("malformed response: {}", e),
            )
        })?;
        if parsed.embedding.len() != self.dims {
            return Err(NobelLmError::embedding(
                EmbeddingErrorKind::Shape,
                format!(
                    "service returned {} dims, active model expects {}",
                    parsed.embedding.len(),
                    self.dims
                ),
            ));
        }
        Ok(parsed.embedding)
    }

    async fn call_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        match self.call_once(text).await {
            Ok(v) => Ok(v),
            Err(NobelLmError::Embedding {
                kind: EmbeddingErrorKind::Transient,
                message,
            }) => {
                debug!("transient embedding failure, retrying once: {}", message);
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.retry_backoff_ms,
                ))
                .await;
                self.call_once(text).await
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.validate_input(text)?;
        let _permit = self
            .fanout
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| NobelLmError::Internal {
                message: "embedding semaphore closed".to_string(),
            })?;
        // Held across the call while in the warmup window
        let _serial = self.pacer.admit().await;
        self.call_with_retry(text).await
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // The per-call pacing above already serializes the warmup window;
        // past it, join the batch under the concurrency bound.
        let mut handles = Vec::with_capacity(texts.len());
        for text in texts {
            handles.push(self.embed(text));
        }
        futures_util::future::try_join_all(handles).await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Deterministic local embedder: sha256-driven unit-norm vectors.
/// No network; identical input yields identical output.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};
        let mut out = Vec::with_capacity(self.dims);
        let mut i: u32 = 0;
        while out.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(i.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks(4) {
                if out.len() >= self.dims {
                    break;
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(chunk);
                let val = u32::from_le_bytes(bytes);
                let v01 = (val as f32) / (u32::MAX as f32 + 1.0);
                out.push(v01 * 2.0 - 1.0);
            }
            i = i.wrapping_add(1);
        }
        // Normalize to unit length to emulate real embeddings
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(NobelLmError::embedding(
                EmbeddingErrorKind::InvalidInput,
                "input text is empty",
            ));
        }
        Ok(self.generate(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Bounded read-through cache in front of another embedder. Identical
/// queries re-embed identically by contract, so caching is semantics-free.
pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl Embedder for CachingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.lock().await.get(text) {
            return Ok(hit.clone());
        }
        let vector = self.inner.embed(text).await?;
        self.cache
            .lock()
            .await
            .put(text.to_string(), vector.clone());
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }
}

/// Build the configured embedder: remote by default, the hash embedder
/// when EMBEDDER_PROVIDER=hash (development only).
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let dims = config.system.dimensions()?;
    let inner: Arc<dyn Embedder> = match config.runtime.embedder_provider.as_str() {
        "hash" => {
            info!("Using deterministic hash embeddings ({} dims)", dims);
            Arc::new(HashEmbedder::new(dims))
        }
        "remote" => {
            let api_key = config.runtime.embedding_api_key.clone().ok_or_else(|| {
                NobelLmError::config("EMBEDDING_API_KEY is required for the remote embedder")
            })?;
            info!(
                "Using remote embeddings at {} (model={}, dims={})",
                config.runtime.embedding_service_url, config.system.model_id, dims
            );
            Arc::new(RemoteEmbedder::new(
                config.runtime.embedding_service_url.clone(),
                api_key,
                dims,
                config.embedding.clone(),
            )?)
        }
        other => {
            return Err(NobelLmError::config(format!(
                "unknown embedder provider '{}'; expected remote|hash",
                other
            )));
        }
    };
    Ok(Arc::new(CachingEmbedder::new(
        inner,
        config.embedding.cache_max,
    )))
}
