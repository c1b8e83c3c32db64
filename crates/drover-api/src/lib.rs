// SPDX-License-Identifier: GPL-3.0-or-later
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use drover_scheduler::{Queue, QueueSet};
use error::{ApiError, ErrorResponse};
use handlers::jobs::{
    delete_job, enqueue_job, get_job, list_jobs, EnqueueJobRequest, EnqueueJobResponse,
    JobResponse, __path_delete_job, __path_enqueue_job, __path_get_job, __path_list_jobs,
};
use handlers::queues::{
    list_queues, queue_counts, CountsResponse, QueueResponse, __path_list_queues,
    __path_queue_counts,
};
use serde::Serialize;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub queues: Arc<QueueSet>,
}

impl AppState {
    pub fn new(queues: Arc<QueueSet>) -> Self {
        Self { queues }
    }

    pub(crate) fn queue(&self, id: &str) -> Result<Arc<Queue>, ApiError> {
        self.queues
            .get(id)
            .ok_or_else(|| ApiError::UnknownQueue(id.to_string()))
    }
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
    queues: usize,
}

/// Liveness check.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        queues: state.queues.len(),
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_queues,
        queue_counts,
        enqueue_job,
        list_jobs,
        get_job,
        delete_job,
    ),
    components(
        schemas(
            HealthResponse,
            QueueResponse,
            CountsResponse,
            EnqueueJobRequest,
            EnqueueJobResponse,
            JobResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "queues", description = "Queue inspection endpoints"),
        (name = "jobs", description = "Job producer and admin endpoints")
    ),
    info(
        title = "Drover API",
        version = "0.1.0",
        description = "Durable background job queue",
    )
)]
struct ApiDoc;

pub fn router(state: AppState) -> Router {
    info!(target: "api", queues = state.queues.len(), "building router");

    let api_v1 = Router::new()
        .route("/queues", get(list_queues))
        .route("/queues/:id/counts", get(queue_counts))
        .route("/queues/:id/jobs", get(list_jobs).post(enqueue_job))
        .route("/queues/:id/jobs/:job_id", get(get_job).delete(delete_job));

    let openapi = ApiDoc::openapi();

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", openapi))
        .with_state(state)
}
