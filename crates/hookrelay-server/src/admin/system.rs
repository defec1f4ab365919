//! Operational endpoints: cache control, queue inspection and health.

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hookrelay_delivery::{DeliveryJob, JobStatus, QueueStats};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_JOB_LIMIT: usize = 50;
const MAX_JOB_LIMIT: usize = 500;

pub async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.resolver.clear().await;
    info!(removed, "Resolution cache cleared");
    Json(json!({ "message": "Cache cleared successfully", "removed": removed }))
}

pub async fn invalidate_cache_entry(
    State(state): State<AppState>,
    Path(phone_number_id): Path<String>,
) -> Json<serde_json::Value> {
    let invalidated = state.resolver.invalidate(&phone_number_id).await;
    Json(json!({ "phone_number_id": phone_number_id, "invalidated": invalidated }))
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
    pub key_list: Vec<String>,
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let cache = state.resolver.cache();
    let stats = cache.stats().await;
    Json(CacheStatsResponse {
        hits: stats.hits,
        misses: stats.misses,
        keys: stats.keys,
        key_list: cache.keys().await,
    })
}

pub async fn queue_stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    Ok(Json(state.queue.stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub status: String,
    pub limit: Option<usize>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<JobsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<DeliveryJob>>> {
    let Query(query) = query?;
    let status: JobStatus = query.status.parse().map_err(ApiError::bad_request)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_JOB_LIMIT)
        .clamp(1, MAX_JOB_LIMIT);
    Ok(Json(state.queue.list_by_status(status, limit).await?))
}

pub async fn get_job(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<DeliveryJob>> {
    let Path(id) = path?;
    state
        .queue
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {id} not found")))
}

/// Catalog ping plus cache and queue statistics. 503 when the catalog or the
/// queue cannot be reached.
pub async fn health(State(state): State<AppState>) -> Response {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    let checks = async {
        state.catalog().ping().await.map_err(|e| e.to_string())?;
        state.queue.stats().await.map_err(|e| e.to_string())
    };

    match checks.await {
        Ok(queue) => {
            let cache = state.resolver.cache().stats().await;
            let body = json!({
                "status": "healthy",
                "timestamp": timestamp,
                "database": "connected",
                "cache": { "hits": cache.hits, "misses": cache.misses, "keys": cache.keys },
                "queue": queue,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(error) => {
            warn!(%error, "Health check failed");
            let body = json!({
                "status": "unhealthy",
                "timestamp": timestamp,
                "error": error,
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}
