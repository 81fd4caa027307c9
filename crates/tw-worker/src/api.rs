//! Admin HTTP API
//!
//! Operator endpoints for inspecting and retrying deliveries and reading worker stats.
//! `/metrics` is mounted by the binary, which owns the Prometheus recorder.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tw_common::{Delivery, DeliveryAttempt, DeliveryStatus};
use tw_delivery::{DeliveryError, DeliveryTracker};

use crate::pool::WorkerPool;
use crate::stats::PoolStats;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;
/// An operator retry without a body grants one more attempt.
const DEFAULT_ADDITIONAL_ATTEMPTS: u32 = 1;

#[derive(Clone)]
pub struct AdminState {
    pub tracker: Arc<DeliveryTracker>,
    pub pool: Arc<WorkerPool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub worker_running: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    pub additional_attempts: Option<u32>,
}

pub struct ApiError(DeliveryError);

impl From<DeliveryError> for ApiError {
    fn from(e: DeliveryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DeliveryError::NotFound { .. } => StatusCode::NOT_FOUND,
            DeliveryError::NotRetryable { .. }
            | DeliveryError::NoAttemptsRemaining { .. }
            | DeliveryError::Terminal { .. }
            | DeliveryError::AttemptConflict { .. } => StatusCode::CONFLICT,
            DeliveryError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Admin request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    let running = state.pool.is_running();
    Json(HealthResponse {
        status: if running { "UP" } else { "DEGRADED" }.to_string(),
        worker_running: running,
    })
}

async fn failed_deliveries(
    State(state): State<AdminState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Delivery>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    Ok(Json(state.tracker.list_by_status(DeliveryStatus::Failed, limit).await?))
}

async fn get_delivery(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Delivery>, ApiError> {
    Ok(Json(state.tracker.get(&id).await?))
}

async fn delivery_attempts(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DeliveryAttempt>>, ApiError> {
    state.tracker.get(&id).await?;
    Ok(Json(state.tracker.list_attempts(&id).await?))
}

async fn retry_delivery(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    body: Option<Json<RetryRequest>>,
) -> Result<Json<Delivery>, ApiError> {
    let additional = body.and_then(|Json(r)| r.additional_attempts).unwrap_or(DEFAULT_ADDITIONAL_ATTEMPTS);
    let delivery = state.tracker.retry_failed(&id, additional).await?;
    info!(delivery_id = %id, additional_attempts = additional, "Delivery reopened by operator");
    Ok(Json(delivery))
}

async fn worker_stats(State(state): State<AdminState>) -> Json<PoolStats> {
    Json(state.pool.stats())
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/deliveries/failed", get(failed_deliveries))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/attempts", get(delivery_attempts))
        .route("/deliveries/:id/retry", post(retry_delivery))
        .route("/worker/stats", get(worker_stats))
        .with_state(state)
}
