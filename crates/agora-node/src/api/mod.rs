//! HTTP and websocket API.

use agora_core::AgoraError;
use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod agents;
pub mod health;
pub mod jobs;
pub mod ws;

/// Error half of every handler result.
pub type ApiError = (StatusCode, String);

/// Map a domain error onto an HTTP status.
pub fn api_error(err: AgoraError) -> ApiError {
    let status = match &err {
        AgoraError::JobNotFound(_) | AgoraError::NotFound { .. } => StatusCode::NOT_FOUND,
        AgoraError::InvalidRequest(_)
        | AgoraError::InvalidFare(_)
        | AgoraError::InvalidTopK(_)
        | AgoraError::AmbiguousRankingMode => StatusCode::BAD_REQUEST,
        AgoraError::InvalidTransition { .. }
        | AgoraError::AlreadyResolved { .. }
        | AgoraError::DuplicateMemo { .. } => StatusCode::CONFLICT,
        AgoraError::Ledger { .. }
        | AgoraError::Registry(_)
        | AgoraError::RetriesExhausted { .. }
        | AgoraError::ConnectionError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        // Jobs
        .route("/api/v1/jobs", get(jobs::list_jobs).post(jobs::initiate_job))
        .route("/api/v1/jobs/:id", get(jobs::get_job))
        .route("/api/v1/events", post(jobs::push_event))
        .route("/api/v1/stats", get(jobs::get_stats))
        // Discovery
        .route("/api/v1/agents/search", post(agents::search_agents))
        // Phase-change stream
        .route("/ws/jobs/:id", get(ws::job_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
