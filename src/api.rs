//! REST endpoints: thin wrappers around the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::pipeline::types::{EmailEvent, RawMessage};
use crate::pipeline::{EventSink, ScoringOrchestrator};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ScoringOrchestrator>,
    /// When set, every scored event is also appended here.
    pub sink: Option<Arc<dyn EventSink>>,
}

/// Build the API router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/score", post(score))
        .route("/score/batch", post(score_batch))
        .route("/cache/stats", get(cache_stats))
        .route("/cache", delete(clear_cache))
        .route("/stats", get(stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Body of `POST /score` and each entry of `POST /score/batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreRequest {
    pub sender: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl From<ScoreRequest> for RawMessage {
    fn from(req: ScoreRequest) -> Self {
        let mut msg = RawMessage::new(req.sender, req.recipients, req.subject, req.body);
        msg.headers = req.headers;
        msg
    }
}

/// One entry of a batch response.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum BatchEntry {
    Scored(Box<EmailEvent>),
    Failed { error: String, risk_level: &'static str },
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

impl ApiState {
    async fn record(&self, event: &EmailEvent) {
        if let Some(sink) = &self.sink
            && let Err(e) = sink.append(event).await
        {
            warn!(id = %event.message_id, error = %e, "Failed to write event");
        }
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let client = state.orchestrator.client();
    Json(serde_json::json!({
        "status": "ok",
        "service": "phishguard",
        "mode": state.orchestrator.mode().as_str(),
        "classification_available": client.is_some(),
        "cache_enabled": client.is_some_and(|c| c.has_cache()),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ── Scoring ─────────────────────────────────────────────────────────────

async fn score(State(state): State<ApiState>, Json(req): Json<ScoreRequest>) -> Response {
    let message = RawMessage::from(req);
    match state.orchestrator.score(&message).await {
        Ok(event) => {
            state.record(&event).await;
            Json(event).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn score_batch(
    State(state): State<ApiState>,
    Json(requests): Json<Vec<ScoreRequest>>,
) -> Response {
    let messages: Vec<RawMessage> = requests.into_iter().map(RawMessage::from).collect();

    let results = match state.orchestrator.score_batch(&messages).await {
        Ok(results) => results,
        Err(e @ PipelineError::BatchTooLarge { .. }) => {
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let mut entries = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(event) => {
                state.record(&event).await;
                entries.push(BatchEntry::Scored(Box::new(event)));
            }
            Err(e) => entries.push(BatchEntry::Failed {
                error: e.to_string(),
                risk_level: "unknown",
            }),
        }
    }

    let total = entries.len();
    Json(serde_json::json!({ "results": entries, "total": total })).into_response()
}

// ── Cache and stats ─────────────────────────────────────────────────────

async fn cache_stats(State(state): State<ApiState>) -> Response {
    let Some(client) = state.orchestrator.client() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Classification not available");
    };
    Json(client.stats().await).into_response()
}

async fn clear_cache(State(state): State<ApiState>) -> Response {
    let Some(cache) = state.orchestrator.client().and_then(|c| c.cache()) else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Cache not available");
    };
    match cache.clear().await {
        Ok(()) => {
            info!(backend = cache.backend(), "Cache cleared via API");
            Json(serde_json::json!({ "message": "Cache cleared successfully" })).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to clear cache: {e}"),
        ),
    }
}

async fn stats(State(state): State<ApiState>) -> impl IntoResponse {
    let classification = match state.orchestrator.client() {
        Some(client) => serde_json::to_value(client.stats().await).unwrap_or_default(),
        None => serde_json::Value::Null,
    };
    Json(serde_json::json!({
        "mode": state.orchestrator.mode().as_str(),
        "classification": classification,
    }))
}
