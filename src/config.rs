//! Layered configuration: `nobellm.toml` plus environment overrides

use crate::error::{NobelLmError, Result};
use serde::{Deserialize, Serialize};

/// Embedding model registry. The active model fixes the dimension every
/// loaded vector must match.
pub const KNOWN_MODELS: &[(&str, usize)] = &[("bge-large", 1024), ("miniLM", 384)];

/// Dimension for a known model id
pub fn model_dimensions(model_id: &str) -> Option<usize> {
    KNOWN_MODELS
        .iter()
        .find(|(id, _)| *id == model_id)
        .map(|(_, d)| *d)
}

/// Main configuration structure loaded from nobellm.toml and environment variables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub embedding: EmbeddingClientConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// System-level configuration: active model, data paths, query limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    pub model_id: String,
    pub max_query_length: usize,
    pub corpus_path: String,
    pub laureate_path: String,
    pub theme_embeddings_dir: String,
    pub audit_log_dir: String,
    /// Optional overrides; the built-in defaults apply when unset
    pub theme_config_path: Option<String>,
    pub intent_cues_path: Option<String>,
    pub prompt_catalog_path: Option<String>,
}

impl SystemConfig {
    /// Dimension of the active model. Unknown ids are a ConfigError.
    pub fn dimensions(&self) -> Result<usize> {
        model_dimensions(&self.model_id).ok_or_else(|| {
            NobelLmError::config(format!(
                "unknown model_id '{}'; known: {:?}",
                self.model_id,
                KNOWN_MODELS.iter().map(|(id, _)| *id).collect::<Vec<_>>()
            ))
        })
    }
}

/// Retrieval tuning: top_k, score floors, relaxation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub default_score_threshold: f32,
    /// Below this many results, one relaxation retry runs with a halved threshold
    pub min_return: usize,
    /// Per-term candidate pool in weighted multi-vector mode
    pub top_k_per_term: usize,
    /// "max" or "sum_cap"
    pub merge_strategy: String,
    pub timeout_ms: u64,
}

/// Thematic expansion tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpansionConfig {
    /// Top-K theme keywords ranked by similarity to the query embedding
    pub semantic_top_k: usize,
    pub similarity_threshold: f32,
    /// Floor applied to semantic term weights
    pub min_weight: f32,
    pub semantic_enabled: bool,
}

/// Remote embedding service client tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingClientConfig {
    pub timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_input_chars: usize,
    /// First N calls are serialized with `call_spacing_ms` between them; the
    /// remote scales by container cold-start and bursting causes timeouts.
    pub warmup_calls: usize,
    pub call_spacing_ms: u64,
    pub max_concurrency: usize,
    /// Bounded query-embedding cache entries
    pub cache_max: usize,
}

/// Per-model pricing: USD per 1k tokens
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelPricing {
    pub model_id: String,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// LLM provider client tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub model_id: String,
    pub api_url: String,
    pub max_tokens: u32,
    /// Default sampling temperature; reflective templates raise it
    pub temperature: f32,
    pub reflective_temperature: f32,
    pub timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub pricing: Vec<ModelPricing>,
}

impl LlmConfig {
    pub fn pricing_for(&self, model_id: &str) -> Option<&ModelPricing> {
        self.pricing.iter().find(|p| p.model_id == model_id)
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub embedding_service_url: String,
    pub embedding_api_key: Option<String>,
    pub llm_api_key: Option<String>,
    pub log_level: String,
    pub http_bind: std::net::SocketAddr,
    /// Whole-request deadline
    pub request_timeout_ms: u64,
    /// "remote" or "hash" (deterministic local embedder for dev)
    pub embedder_provider: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            embedding_service_url: "https://localhost:8502/embed".to_string(),
            embedding_api_key: None,
            llm_api_key: None,
            log_level: "nobellm=info".to_string(),
            http_bind: "127.0.0.1:8080"
                .parse()
                .expect("default bind address should parse"),
            request_timeout_ms: 90_000,
            embedder_provider: "remote".to_string(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            model_id: "bge-large".to_string(),
            max_query_length: 1000,
            corpus_path: "data/chunks.jsonl".to_string(),
            laureate_path: "data/laureates.json".to_string(),
            theme_embeddings_dir: "data".to_string(),
            audit_log_dir: "logs".to_string(),
            theme_config_path: None,
            intent_cues_path: None,
            prompt_catalog_path: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            default_score_threshold: 0.2,
            min_return: 3,
            top_k_per_term: 10,
            merge_strategy: "max".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            semantic_top_k: 8,
            similarity_threshold: 0.3,
            min_weight: 0.3,
            semantic_enabled: true,
        }
    }
}

impl Default for EmbeddingClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry_backoff_ms: 2_000,
            max_input_chars: 2_000,
            warmup_calls: 3,
            call_spacing_ms: 250,
            max_concurrency: 3,
            cache_max: 2_048,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_id: "gpt-4o-mini".to_string(),
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            max_tokens: 1_024,
            temperature: 0.2,
            reflective_temperature: 0.8,
            timeout_ms: 60_000,
            retry_backoff_ms: 2_000,
            pricing: vec![
                ModelPricing {
                    model_id: "gpt-4o-mini".to_string(),
                    input_per_1k: 0.000_15,
                    output_per_1k: 0.000_6,
                },
                ModelPricing {
                    model_id: "gpt-4o".to_string(),
                    input_per_1k: 0.002_5,
                    output_per_1k: 0.01,
                },
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            retrieval: RetrievalConfig::default(),
            expansion: ExpansionConfig::default(),
            embedding: EmbeddingClientConfig::default(),
            llm: LlmConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables.
    /// Uses NOBELLM_CONFIG or defaults to "nobellm.toml".
    pub fn load() -> Result<Self> {
        // .env bootstrap; missing file is fine
        let _ = dotenvy::dotenv();

        let config_path =
            std::env::var("NOBELLM_CONFIG").unwrap_or_else(|_| "nobellm.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            toml::from_str(&content)
                .map_err(|e| NobelLmError::config(format!("{}: {}", config_path, e)))?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        // Env-first overrides
        if let Ok(model_id) = std::env::var("MODEL_ID") {
            config.system.model_id = model_id;
        }
        if let Some(top_k) = env_parse::<usize>("DEFAULT_TOP_K") {
            config.retrieval.default_top_k = top_k;
        }
        if let Some(thresh) = env_parse::<f32>("DEFAULT_SCORE_THRESHOLD") {
            config.retrieval.default_score_threshold = thresh;
        }
        if let Some(max_len) = env_parse::<usize>("MAX_QUERY_LENGTH") {
            config.system.max_query_length = max_len;
        }
        if let Ok(dir) = std::env::var("AUDIT_LOG_DIR") {
            config.system.audit_log_dir = dir;
        }
        if let Ok(path) = std::env::var("CORPUS_PATH") {
            config.system.corpus_path = path;
        }
        if let Ok(path) = std::env::var("LAUREATE_PATH") {
            config.system.laureate_path = path;
        }
        if let Ok(dir) = std::env::var("THEME_EMBEDDINGS_DIR") {
            config.system.theme_embeddings_dir = dir;
        }
        if let Ok(path) = std::env::var("THEME_CONFIG_PATH") {
            config.system.theme_config_path = Some(path);
        }
        if let Ok(path) = std::env::var("INTENT_CUES_PATH") {
            config.system.intent_cues_path = Some(path);
        }
        if let Ok(path) = std::env::var("PROMPT_CATALOG_PATH") {
            config.system.prompt_catalog_path = Some(path);
        }
        if let Ok(model_id) = std::env::var("LLM_MODEL_ID") {
            config.llm.model_id = model_id;
        }

        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Inconsistencies here are fatal; nothing in this
    /// list may surface at query time.
    pub fn validate(&mut self) -> Result<()> {
        self.system.dimensions()?;

        if self.system.max_query_length == 0 {
            return Err(NobelLmError::config("max_query_length must be positive"));
        }
        if self.retrieval.default_top_k == 0 || self.retrieval.default_top_k > 50 {
            tracing::warn!(
                "default_top_k {} out of [1,50], clamping",
                self.retrieval.default_top_k
            );
            self.retrieval.default_top_k = self.retrieval.default_top_k.clamp(1, 50);
        }
        if !(0.0..=1.0).contains(&self.retrieval.default_score_threshold) {
            return Err(NobelLmError::config(format!(
                "default_score_threshold {} outside [0,1]",
                self.retrieval.default_score_threshold
            )));
        }
        match self.retrieval.merge_strategy.as_str() {
            "max" | "sum_cap" => {}
            other => {
                return Err(NobelLmError::config(format!(
                    "merge_strategy '{}' is not one of max|sum_cap",
                    other
                )));
            }
        }
        if self.embedding.max_concurrency == 0 {
            self.embedding.max_concurrency = 1;
        }
        if self.llm.pricing_for(&self.llm.model_id).is_none() {
            tracing::warn!(
                "no pricing entry for llm model '{}'; cost estimates will be zero",
                self.llm.model_id
            );
        }
        Ok(())
    }

    /// Stable hash of the query-relevant configuration, recorded on every
    /// audit trace so replays can detect drift.
    pub fn snapshot_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let snapshot = serde_json::json!({
            "model_id": self.system.model_id,
            "max_query_length": self.system.max_query_length,
            "default_top_k": self.retrieval.default_top_k,
            "default_score_threshold": self.retrieval.default_score_threshold,
            "merge_strategy": self.retrieval.merge_strategy,
            "semantic_top_k": self.expansion.semantic_top_k,
            "similarity_threshold": self.expansion.similarity_threshold,
            "llm_model_id": self.llm.model_id,
        });
        let mut hasher = Sha256::new();
        hasher.update(snapshot.to_string().as_bytes());
        let digest = hasher.finalize();
        format!("{:x}", digest)[..16].to_string()
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let mut cfg = Self {
            embedding_service_url: std::env::var("EMBEDDING_SERVICE_URL")
                .unwrap_or_else(|_| "https://localhost:8502/embed".to_string()),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "nobellm=info".to_string()),
            http_bind: "127.0.0.1:8080"
                .parse()
                .expect("default bind address should parse"),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS").unwrap_or(90_000),
            embedder_provider: std::env::var("EMBEDDER_PROVIDER")
                .unwrap_or_else(|_| "remote".to_string()),
        };
        if let Some(bind) = std::env::var("HTTP_BIND")
            .ok()
            .and_then(|v| v.parse::<std::net::SocketAddr>().ok())
        {
            cfg.http_bind = bind;
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
