// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{
    extract::{Path, State},
    Json,
};
use drover_domain::JobCounts;
use drover_scheduler::Queue;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorResponse};
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueResponse {
    pub id: String,
    pub label: String,
    /// `cron` or `daemon`
    pub processor: String,
    /// Seconds per processing run, 0 when unbounded
    pub processing_time: u64,
}

impl From<&Queue> for QueueResponse {
    fn from(queue: &Queue) -> Self {
        Self {
            id: queue.id().to_string(),
            label: queue.label().to_string(),
            processor: queue.processor().as_str().to_string(),
            processing_time: queue.processing_time(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountsResponse {
    pub queued: u64,
    pub processing: u64,
    pub success: u64,
    pub failure: u64,
    pub total: u64,
}

impl From<JobCounts> for CountsResponse {
    fn from(counts: JobCounts) -> Self {
        Self {
            queued: counts.queued,
            processing: counts.processing,
            success: counts.success,
            failure: counts.failure,
            total: counts.total(),
        }
    }
}

/// List configured queues.
#[utoipa::path(
    get,
    path = "/api/v1/queues",
    responses(
        (status = 200, description = "Configured queues", body = Vec<QueueResponse>)
    ),
    tag = "queues"
)]
pub async fn list_queues(State(state): State<AppState>) -> Json<Vec<QueueResponse>> {
    Json(
        state
            .queues
            .iter()
            .map(|queue| QueueResponse::from(queue.as_ref()))
            .collect(),
    )
}

/// Count a queue's jobs per state.
#[utoipa::path(
    get,
    path = "/api/v1/queues/{id}/counts",
    params(("id" = String, Path, description = "Queue id")),
    responses(
        (status = 200, description = "Job counts", body = CountsResponse),
        (status = 404, description = "Unknown queue", body = ErrorResponse),
        (status = 503, description = "Backend unavailable", body = ErrorResponse)
    ),
    tag = "queues"
)]
pub async fn queue_counts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CountsResponse>, ApiError> {
    let queue = state.queue(&id)?;
    let counts = queue.count_jobs().await?;
    Ok(Json(counts.into()))
}
