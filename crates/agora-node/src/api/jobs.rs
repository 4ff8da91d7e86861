//! Job API endpoints.

use agora_core::{Address, AgoraError, JobEvent, JobId, Role};
use agora_state::Job;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::{api_error, ApiError};
use crate::handler::OutcomeStats;
use crate::queue::Enqueued;
use crate::state::AppState;

/// Request to open a job with a provider.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateJobRequest {
    pub provider: Address,
    #[serde(default)]
    pub evaluator: Option<Address>,
    /// Human price in the network's base fare.
    pub price: Decimal,
    pub requirement: serde_json::Value,
    /// Defaults to now plus the configured job expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct InitiateJobResponse {
    pub id: JobId,
    pub message: String,
}

/// A job with its phase spelled out and our roles in it.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub phase_name: String,
    pub roles: Vec<Role>,
}

impl JobView {
    fn new(job: Job, wallet: &Address) -> Self {
        Self {
            phase_name: job.phase().to_string(),
            roles: job.roles_of(wallet),
            job,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub job_id: JobId,
    pub status: String,
}

/// List locally tracked jobs.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobView>> {
    let wallet = state.orchestrator.wallet().clone();
    let jobs = state.orchestrator.list_jobs().await;
    Json(jobs.into_iter().map(|job| JobView::new(job, &wallet)).collect())
}

/// Get one job. Reading it applies a lapsed expiry.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<JobView>, ApiError> {
    let job = state
        .orchestrator
        .get_job(id)
        .await
        .ok_or_else(|| api_error(AgoraError::JobNotFound(id)))?;
    Ok(Json(JobView::new(job, state.orchestrator.wallet())))
}

/// Open a new job as client.
pub async fn initiate_job(
    State(state): State<AppState>,
    Json(req): Json<InitiateJobRequest>,
) -> Result<(StatusCode, Json<InitiateJobResponse>), ApiError> {
    let orchestrator = &state.orchestrator;
    let request = orchestrator
        .request(req.provider, req.evaluator, req.price, req.requirement, req.expires_at)
        .map_err(api_error)?;
    let id = orchestrator.initiate(request).await.map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateJobResponse {
            id,
            message: "Job initiated".to_string(),
        }),
    ))
}

/// Accept a pushed job record.
pub async fn push_event(
    State(state): State<AppState>,
    Json(event): Json<JobEvent>,
) -> Result<(StatusCode, Json<PushResponse>), ApiError> {
    let job_id = event.job.id;
    let status = match state.orchestrator.ingest(event).await {
        Enqueued::Queued => "queued",
        Enqueued::Merged => "merged",
        Enqueued::Deferred => "deferred",
        Enqueued::Dropped => {
            return Err((StatusCode::SERVICE_UNAVAILABLE, "job queue is full".to_string()));
        }
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(PushResponse {
            job_id,
            status: status.to_string(),
        }),
    ))
}

/// Pass/fail counts for finished jobs.
pub async fn get_stats(State(state): State<AppState>) -> Json<OutcomeStats> {
    Json(state.orchestrator.stats().await)
}
