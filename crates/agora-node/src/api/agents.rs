//! Agent discovery endpoint.

use agora_core::{AgentSortKey, OnlineFilter};
use agora_discovery::{DiscoveryQuery, RankedAgent, DEFAULT_TOP_K};
use axum::{extract::State, Json};
use serde::Deserialize;

use crate::api::{api_error, ApiError};
use crate::state::AppState;

/// Agent search request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchAgentsRequest {
    pub keyword: String,
    pub cluster: Option<String>,
    pub online: OnlineFilter,
    pub rerank: bool,
    pub sort_by: Vec<AgentSortKey>,
    pub top_k: Option<i64>,
    pub threshold: Option<f64>,
}

/// Search the registry and rank the candidates for this node's wallet.
pub async fn search_agents(
    State(state): State<AppState>,
    Json(req): Json<SearchAgentsRequest>,
) -> Result<Json<Vec<RankedAgent>>, ApiError> {
    let query = DiscoveryQuery {
        keyword: req.keyword,
        cluster: req.cluster,
        online: req.online,
        caller_wallet: Some(state.orchestrator.wallet().clone()),
        rerank: req.rerank,
        sort_by: req.sort_by,
        top_k: req.top_k.unwrap_or(DEFAULT_TOP_K),
        threshold: req.threshold.unwrap_or(state.config.similarity_threshold),
    };

    let registry = state.orchestrator.registry();
    let ranked = state
        .ranker
        .discover(registry.as_ref(), &query)
        .await
        .map_err(api_error)?;

    tracing::debug!(keyword = %query.keyword, results = ranked.len(), "agent search");
    Ok(Json(ranked))
}
