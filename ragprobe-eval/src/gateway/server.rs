//! HTTP gateway server built on axum.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EvalError;
use crate::harness::{GoldenOptions, Harness};
use crate::jobs::{JobKind, LocalJobQueue};
use crate::progress::NoProgress;
use crate::rerank::{RerankRequest, RerankService};
use crate::satisfaction::{SatisfactionParams, goals, personas};

/// Header carrying the caller's correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Thread-safe shared gateway state for axum handlers.
pub type SharedState = Arc<AppState>;

/// Everything the handlers need: the pipelines, the job queue and the reranker.
pub struct AppState {
    harness: Arc<Harness>,
    queue: LocalJobQueue,
    reranker: Arc<RerankService>,
    started_at: chrono::DateTime<Utc>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("jobs", &self.queue.len())
            .field("active_jobs", &self.queue.active_count())
            .finish()
    }
}

impl AppState {
    /// Queue and reranker are sized from the harness configuration.
    pub fn new(harness: Harness) -> Self {
        let reranker = RerankService::new(harness.config().reranker.clone());
        Self::with_reranker(harness, reranker)
    }

    pub fn with_reranker(harness: Harness, reranker: RerankService) -> Self {
        let server = &harness.config().server;
        let queue = LocalJobQueue::new(server.workers, server.max_finished_jobs);
        Self {
            harness: Arc::new(harness),
            queue,
            reranker: Arc::new(reranker),
            started_at: Utc::now(),
        }
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    pub fn queue(&self) -> &LocalJobQueue {
        &self.queue
    }

    /// Uptime in seconds since the state was created.
    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Error body `{"detail": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<EvalError> for ApiError {
    fn from(e: EvalError) -> Self {
        if e.is_validation() {
            Self::bad_request(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse an optional JSON body; an empty body yields the default.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))
}

/// Build an axum Router with every evaluation route.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/evaluate-job", post(submit_golden_job))
        .route("/evaluate-job/{id}", get(job_status))
        .route("/evaluate-single-turn", post(evaluate_single_turn))
        .route("/rag-level-job", post(submit_retrieval_job))
        .route("/rag-level-job/{id}", get(job_status))
        .route("/user-satisfaction-job", post(submit_satisfaction_job))
        .route("/user-satisfaction-job/{id}", get(job_status))
        .route("/evaluate-user-satisfaction", post(evaluate_user_satisfaction))
        .route("/user-satisfaction/personas", get(list_personas))
        .route("/user-satisfaction/goals", get(list_goals))
        .route("/rerank", post(rerank_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_jobs": state.queue.active_count(),
        "uptime_secs": state.uptime_secs(),
    }))
}

async fn job_status(State(state): State<SharedState>, Path(id): Path<String>) -> impl IntoResponse {
    Json(state.queue.status(&id))
}

async fn submit_golden_job(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let harness = state.harness.clone();
    let options = GoldenOptions::from_config(harness.config());
    let job_id = state
        .queue
        .submit(JobKind::Golden, request_id(&headers), move |ctx| async move {
            let report = harness.run_golden(&options, ctx.rid(), &ctx).await?;
            Ok(serde_json::to_value(report)?)
        });
    Json(json!({"job_id": job_id}))
}

async fn evaluate_single_turn(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let rid = request_id(&headers).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let options = GoldenOptions::from_config(state.harness.config());
    match state.harness.run_golden(&options, &rid, &NoProgress).await {
        Ok(report) => Json(serde_json::to_value(report).unwrap_or(Value::Null)),
        Err(e) => {
            warn!(rid = %rid, error = %e, "Single-turn evaluation failed");
            Json(json!({"error": e.to_string(), "rid": rid}))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalJobPayload {
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default, rename = "topK")]
    top_k_camel: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn submit_retrieval_job(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload: RetrievalJobPayload = optional_body(&body)?;
    let top_k = payload
        .top_k
        .filter(|n| *n > 0)
        .or(payload.top_k_camel);
    let harness = state.harness.clone();
    let job_id = state
        .queue
        .submit(JobKind::Retrieval, request_id(&headers), move |ctx| async move {
            let report = harness.run_retrieval(top_k, payload.limit, &ctx).await;
            Ok(serde_json::to_value(report)?)
        });
    Ok(Json(json!({"job_id": job_id})))
}

async fn submit_satisfaction_job(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let params: SatisfactionParams = optional_body(&body)?;
    let request = state.harness.validate_satisfaction(&params)?;
    info!(persona = %request.persona_key, goal = request.goal.id, turns = request.turns, "Satisfaction job accepted");

    let harness = state.harness.clone();
    let job_id = state
        .queue
        .submit(JobKind::Satisfaction, request_id(&headers), move |ctx| async move {
            let report = harness.run_satisfaction(&request, Some(ctx.rid()), &ctx).await?;
            Ok(serde_json::to_value(report)?)
        });
    Ok(Json(json!({"job_id": job_id})))
}

async fn evaluate_user_satisfaction(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let params: SatisfactionParams = optional_body(&body)?;
    let request = state.harness.validate_satisfaction(&params)?;
    let rid = request_id(&headers);
    let report = state
        .harness
        .run_satisfaction(&request, rid.as_deref(), &NoProgress)
        .await?;
    Ok(Json(serde_json::to_value(report).map_err(EvalError::from)?))
}

/// Registry entries carry their lookup key as `id` and the entity's own id as `slug`.
fn listing<T: serde::Serialize>(key: &str, slug: &str, entity: &T) -> Value {
    let mut value = serde_json::to_value(entity).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("slug".into(), Value::String(slug.to_string()));
        obj.insert("id".into(), Value::String(key.to_string()));
    }
    value
}

async fn list_personas() -> impl IntoResponse {
    let items: Vec<Value> = personas().map(|(key, p)| listing(key, p.id, p)).collect();
    Json(json!({"personas": items}))
}

async fn list_goals() -> impl IntoResponse {
    let items: Vec<Value> = goals().map(|(key, g)| listing(key, g.id, g)).collect();
    Json(json!({"goals": items}))
}

async fn rerank_handler(
    State(state): State<SharedState>,
    Json(request): Json<RerankRequest>,
) -> Result<Json<Value>, ApiError> {
    let response = state.reranker.rerank(request).await?;
    Ok(Json(serde_json::to_value(response).map_err(EvalError::from)?))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Start the gateway on the configured address.
///
/// Runs until interrupted with Ctrl-C.
pub async fn run(state: SharedState) -> Result<(), std::io::Error> {
    let (host, port) = {
        let server = &state.harness.config().server;
        (server.host.clone(), server.port)
    };
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
