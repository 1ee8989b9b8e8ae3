//! Domain-specific error types for the NobelLM query pipeline

use serde_json::json;
use thiserror::Error;

/// Sub-kinds for embedding service failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingErrorKind {
    /// Input rejected before any call was made (empty, too long)
    InvalidInput,
    /// Response dimension did not match the active model
    Shape,
    /// Retryable transport failure (502/503/504, timeout)
    Transient,
    /// Non-retryable provider failure (auth, 4xx)
    Permanent,
}

impl EmbeddingErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingErrorKind::InvalidInput => "EmbeddingError.InvalidInput",
            EmbeddingErrorKind::Shape => "EmbeddingError.Shape",
            EmbeddingErrorKind::Transient => "EmbeddingError.Transient",
            EmbeddingErrorKind::Permanent => "EmbeddingError.Permanent",
        }
    }
}

/// Sub-kinds for retrieval failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalErrorKind {
    StoreUnavailable,
    FilterIncompatible,
}

impl RetrievalErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalErrorKind::StoreUnavailable => "RetrievalError.StoreUnavailable",
            RetrievalErrorKind::FilterIncompatible => "RetrievalError.FilterIncompatible",
        }
    }
}

/// Sub-kinds for LLM provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 5xx or connection failure; retried once
    Transient,
    /// Upstream 429; retried once, surfaced as 429 so clients can back off
    RateLimited,
    /// Auth or malformed request; surfaced immediately
    Permanent,
    /// Per-request budget exceeded
    Timeout,
}

impl LlmErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmErrorKind::Transient => "LLMError.Transient",
            LlmErrorKind::RateLimited => "LLMError.RateLimited",
            LlmErrorKind::Permanent => "LLMError.Permanent",
            LlmErrorKind::Timeout => "LLMError.Timeout",
        }
    }
}

/// Main error type for the query pipeline
#[derive(Error, Debug)]
pub enum NobelLmError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Startup-only: inconsistent or missing configuration. Never raised at
    /// query time; the registry refuses to start instead.
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Embedding error ({}): {message}", kind.as_str())]
    Embedding {
        kind: EmbeddingErrorKind,
        message: String,
    },

    #[error("Retrieval error ({}): {message}", kind.as_str())]
    Retrieval {
        kind: RetrievalErrorKind,
        message: String,
    },

    #[error("LLM error ({}): {message}", kind.as_str())]
    Llm {
        kind: LlmErrorKind,
        message: String,
    },

    #[error("Timeout: {stage} exceeded {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NobelLmError {
    pub fn validation(message: impl Into<String>) -> Self {
        NobelLmError::Validation {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        NobelLmError::Config {
            message: message.into(),
        }
    }

    pub fn embedding(kind: EmbeddingErrorKind, message: impl Into<String>) -> Self {
        NobelLmError::Embedding {
            kind,
            message: message.into(),
        }
    }

    pub fn retrieval(kind: RetrievalErrorKind, message: impl Into<String>) -> Self {
        NobelLmError::Retrieval {
            kind,
            message: message.into(),
        }
    }

    pub fn llm(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        NobelLmError::Llm {
            kind,
            message: message.into(),
        }
    }

    /// Stable kind label used in the wire error envelope and audit traces
    pub fn kind_label(&self) -> &'static str {
        match self {
            NobelLmError::Validation { .. } => "ValidationError",
            NobelLmError::Config { .. } => "ConfigError",
            NobelLmError::Embedding { kind, .. } => kind.as_str(),
            NobelLmError::Retrieval { kind, .. } => kind.as_str(),
            NobelLmError::Llm { kind, .. } => kind.as_str(),
            NobelLmError::Timeout { .. } => "Timeout",
            NobelLmError::Serialization { .. } => "SerializationError",
            NobelLmError::Internal { .. } => "InternalError",
        }
    }

    /// Short, non-technical message safe to show to users. Provider details
    /// stay in the audit trace.
    pub fn user_message(&self) -> &'static str {
        match self {
            NobelLmError::Validation { .. } => "The query was invalid.",
            NobelLmError::Config { .. } => "The service is misconfigured.",
            NobelLmError::Embedding { .. } => "The query could not be processed right now.",
            NobelLmError::Retrieval { .. } => "The archive could not be searched right now.",
            NobelLmError::Llm {
                kind: LlmErrorKind::RateLimited,
                ..
            } => "The service is handling too many requests; try again shortly.",
            NobelLmError::Llm { .. } => "An answer could not be generated right now.",
            NobelLmError::Timeout { .. } => "The request took too long and was cancelled.",
            NobelLmError::Serialization { .. } | NobelLmError::Internal { .. } => {
                "Something went wrong on our side."
            }
        }
    }

    /// HTTP status for the wire envelope: 400 validation, 404 service
    /// unavailable, 429 rate-limit, 504 timeouts, 5xx the rest
    pub fn http_status(&self) -> u16 {
        match self {
            NobelLmError::Validation { .. } => 400,
            NobelLmError::Llm {
                kind: LlmErrorKind::RateLimited,
                ..
            } => 429,
            NobelLmError::Llm {
                kind: LlmErrorKind::Timeout,
                ..
            } => 504,
            NobelLmError::Timeout { .. } => 504,
            NobelLmError::Embedding {
                kind: EmbeddingErrorKind::Transient,
                ..
            } => 502,
            NobelLmError::Retrieval {
                kind: RetrievalErrorKind::StoreUnavailable,
                ..
            } => 404,
            _ => 500,
        }
    }

    /// Wire error envelope body: `{ "error": { kind, message }, "trace_id" }`
    pub fn to_wire(&self, trace_id: &str) -> serde_json::Value {
        json!({
            "error": {
                "kind": self.kind_label(),
                "message": self.user_message(),
            },
            "trace_id": trace_id,
        })
    }
}

impl From<serde_json::Error> for NobelLmError {
    fn from(err: serde_json::Error) -> Self {
        NobelLmError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for NobelLmError {
    fn from(err: std::io::Error) -> Self {
        NobelLmError::Internal {
            message: format!("I/O failure: {}", err),
        }
    }
}

impl From<reqwest::Error> for NobelLmError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            EmbeddingErrorKind::Transient
        } else {
            EmbeddingErrorKind::Permanent
        };
        NobelLmError::Embedding {
            kind,
            message: format!("HTTP request failed: {}", err),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, NobelLmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_are_stable() {
        let e = NobelLmError::embedding(EmbeddingErrorKind::Shape, "512 != 1024");
        assert_eq!(e.kind_label(), "EmbeddingError.Shape");
        let e = NobelLmError::llm(LlmErrorKind::Timeout, "deadline");
        assert_eq!(e.kind_label(), "LLMError.Timeout");
        assert_eq!(e.http_status(), 504);
    }

    #[test]
    fn rate_limited_surfaces_as_429() {
        let e = NobelLmError::llm(LlmErrorKind::RateLimited, "429 from provider");
        assert_eq!(e.kind_label(), "LLMError.RateLimited");
        assert_eq!(e.http_status(), 429);
        // Retryable 5xx stays a plain server error
        let e = NobelLmError::llm(LlmErrorKind::Transient, "502 from provider");
        assert_eq!(e.http_status(), 500);
    }

    #[test]
    fn unavailable_store_surfaces_as_404() {
        let e = NobelLmError::retrieval(RetrievalErrorKind::StoreUnavailable, "no chunks loaded");
        assert_eq!(e.http_status(), 404);
        let e = NobelLmError::retrieval(RetrievalErrorKind::FilterIncompatible, "dim mismatch");
        assert_eq!(e.http_status(), 500);
    }

    #[test]
    fn validation_maps_to_400() {
        let e = NobelLmError::validation("empty query");
        assert_eq!(e.http_status(), 400);
        let wire = e.to_wire("t-1");
        assert_eq!(wire["error"]["kind"], "ValidationError");
        assert_eq!(wire["trace_id"], "t-1");
    }

    #[test]
    fn user_messages_do_not_leak_details() {
        let e = NobelLmError::llm(
            LlmErrorKind::Permanent,
            "401 unauthorized: bad key sk-abc123",
        );
        assert!(!e.user_message().contains("sk-abc123"));
    }
}
