//! Thin HTTP surface over the orchestrator.
//!
//! Validation, status mapping, and counters only; everything interesting
//! happens in the pipeline. Health, info, and metrics are plain JSON.

use crate::intent::Intent;
use crate::orchestrator::{Orchestrator, QueryRequest};
use crate::registry::ServiceRegistry;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Process metrics: atomic counters, the only shared mutable state the
/// API layer owns.
#[derive(Default)]
pub struct Metrics {
    pub queries_total: AtomicU64,
    pub failures_total: AtomicU64,
    pub metadata_answers: AtomicU64,
    pub rag_answers: AtomicU64,
    per_intent: [AtomicU64; 5],
}

impl Metrics {
    fn intent_slot(intent: Intent) -> usize {
        match intent {
            Intent::FactualMetadata => 0,
            Intent::Scoped => 1,
            Intent::Thematic => 2,
            Intent::Generative => 3,
            Intent::Qa => 4,
        }
    }

    pub fn record_intent(&self, intent: Intent) {
        self.per_intent[Self::intent_slot(intent)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn intent_counts(&self) -> serde_json::Value {
        json!({
            "factual_metadata": self.per_intent[0].load(Ordering::Relaxed),
            "scoped": self.per_intent[1].load(Ordering::Relaxed),
            "thematic": self.per_intent[2].load(Ordering::Relaxed),
            "generative": self.per_intent[3].load(Ordering::Relaxed),
            "qa": self.per_intent[4].load(Ordering::Relaxed),
        })
    }
}

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<Metrics>,
    pub info: Arc<serde_json::Value>,
}

impl HttpState {
    pub fn from_registry(registry: &ServiceRegistry) -> Self {
        Self {
            orchestrator: registry.orchestrator.clone(),
            metrics: Arc::new(Metrics::default()),
            info: Arc::new(serde_json::to_value(&registry.info).unwrap_or(json!({}))),
        }
    }
}

/// Build the router: POST /query, GET /health, GET /info
pub fn build_router(state: HttpState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

/// Info endpoint: service facts plus live counters
pub async fn info_handler(State(state): State<HttpState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        json!({
            "service": *state.info,
            "metrics": {
                "queries_total": state.metrics.queries_total.load(Ordering::Relaxed),
                "failures_total": state.metrics.failures_total.load(Ordering::Relaxed),
                "metadata_answers": state.metrics.metadata_answers.load(Ordering::Relaxed),
                "rag_answers": state.metrics.rag_answers.load(Ordering::Relaxed),
                "by_intent": state.metrics.intent_counts(),
            }
        })
        .to_string(),
    )
}

/// The query endpoint
pub async fn query_handler(
    State(state): State<HttpState>,
    Json(request): Json<QueryRequest>,
) -> impl IntoResponse {
    state.metrics.queries_total.fetch_add(1, Ordering::Relaxed);

    let outcome = state.orchestrator.handle_query(request).await;
    if let Some(intent) = outcome.intent {
        state.metrics.record_intent(intent);
    }

    match outcome.result {
        Ok(response) => {
            match response.answer_type {
                "metadata" => state
                    .metrics
                    .metadata_answers
                    .fetch_add(1, Ordering::Relaxed),
                _ => state.metrics.rag_answers.fetch_add(1, Ordering::Relaxed),
            };
            (StatusCode::OK, Json(serde_json::to_value(&response).unwrap_or(json!({})))).into_response()
        }
        Err(error) => {
            state.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
            let status = StatusCode::from_u16(error.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(error.to_wire(&outcome.trace_id))).into_response()
        }
    }
}

/// Bind and serve until shutdown
pub async fn serve(registry: ServiceRegistry) -> crate::error::Result<()> {
    let bind = registry.config.runtime.http_bind;
    let state = HttpState::from_registry(&registry);
    let app = build_router(state);
    info!("listening on http://{}", bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::NobelLmError::Internal {
            message: format!("server error: {}", e),
        })
}
