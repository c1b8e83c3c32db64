// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use drover_domain::{Job, JobId, JobState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ErrorResponse};
use crate::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct EnqueueJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default = "empty_payload")]
    #[schema(value_type = Object)]
    pub payload: Value,
    /// Seconds before the job becomes claimable
    #[serde(default)]
    pub delay: u64,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueJobResponse {
    pub id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobResponse {
    pub id: Option<String>,
    pub queue_id: Option<String>,
    #[serde(rename = "type")]
    pub job_type: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub state: String,
    pub message: Option<String>,
    pub num_retries: u32,
    pub available: i64,
    pub processed: i64,
    pub expires: i64,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id().map(|id| id.to_string()),
            queue_id: job.queue_id().map(str::to_string),
            job_type: job.job_type().to_string(),
            payload: Value::Object(job.payload().clone()),
            state: job.state().to_string(),
            message: job.message().map(str::to_string),
            num_retries: job.num_retries(),
            available: job.available_time(),
            processed: job.processed_time(),
            expires: job.expires_time(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Only jobs in this state (`queued`, `processing`, `success`, `failure`)
    pub state: Option<String>,
    /// Maximum number of jobs returned, at most 1000
    pub limit: Option<usize>,
}

/// Enqueue a job.
#[utoipa::path(
    post,
    path = "/api/v1/queues/{id}/jobs",
    params(("id" = String, Path, description = "Queue id")),
    request_body = EnqueueJobRequest,
    responses(
        (status = 201, description = "Job enqueued", body = EnqueueJobResponse),
        (status = 400, description = "Invalid job", body = ErrorResponse),
        (status = 404, description = "Unknown queue", body = ErrorResponse),
        (status = 503, description = "Backend unavailable", body = ErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn enqueue_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EnqueueJobRequest>,
) -> Result<(StatusCode, Json<EnqueueJobResponse>), ApiError> {
    let queue = state.queue(&id)?;
    let job_id = queue
        .enqueue_delayed(request.job_type, request.payload, request.delay)
        .await?;
    info!(target: "api", queue_id = %id, job_id = %job_id, "job enqueued over http");
    Ok((
        StatusCode::CREATED,
        Json(EnqueueJobResponse {
            id: job_id.to_string(),
        }),
    ))
}

/// List a queue's jobs, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/queues/{id}/jobs",
    params(("id" = String, Path, description = "Queue id"), ListJobsQuery),
    responses(
        (status = 200, description = "Jobs", body = Vec<JobResponse>),
        (status = 400, description = "Unknown state filter", body = ErrorResponse),
        (status = 404, description = "Unknown queue", body = ErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let queue = state.queue(&id)?;
    let filter = query
        .state
        .as_deref()
        .map(str::parse::<JobState>)
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let jobs = queue.backend().list_jobs(filter, limit).await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

/// Fetch one job.
#[utoipa::path(
    get,
    path = "/api/v1/queues/{id}/jobs/{job_id}",
    params(
        ("id" = String, Path, description = "Queue id"),
        ("job_id" = String, Path, description = "Job id")
    ),
    responses(
        (status = 200, description = "Job found", body = JobResponse),
        (status = 404, description = "Unknown queue or job", body = ErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path((id, job_id)): Path<(String, String)>,
) -> Result<Json<JobResponse>, ApiError> {
    let queue = state.queue(&id)?;
    let job_id = JobId::new(job_id);
    match queue.backend().load_job(&job_id).await? {
        Some(job) => Ok(Json(job.into())),
        None => Err(ApiError::NotFound(format!("job not found: {job_id}"))),
    }
}

/// Delete one job regardless of its state.
#[utoipa::path(
    delete,
    path = "/api/v1/queues/{id}/jobs/{job_id}",
    params(
        ("id" = String, Path, description = "Queue id"),
        ("job_id" = String, Path, description = "Job id")
    ),
    responses(
        (status = 204, description = "Job deleted"),
        (status = 404, description = "Unknown queue or job", body = ErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn delete_job(
    State(state): State<AppState>,
    Path((id, job_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let queue = state.queue(&id)?;
    let job_id = JobId::new(job_id);
    if queue.backend().delete_job(&job_id).await? {
        info!(target: "api", queue_id = %id, job_id = %job_id, "job deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("job not found: {job_id}")))
    }
}
