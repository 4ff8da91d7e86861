//! Application state.

use std::sync::Arc;

use agora_discovery::{DiscoveryRanker, LexicalSimilarity, SimilarityService};

use crate::config::NodeConfig;
use crate::orchestrator::JobOrchestrator;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NodeConfig>,

    /// Owns the job table, queue and phase-change broadcast.
    pub orchestrator: Arc<JobOrchestrator>,

    pub ranker: DiscoveryRanker,
}

impl AppState {
    pub fn new(config: Arc<NodeConfig>, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self::with_similarity(config, orchestrator, Arc::new(LexicalSimilarity::new()))
    }

    /// Use a custom similarity backend for agent search.
    pub fn with_similarity(
        config: Arc<NodeConfig>,
        orchestrator: Arc<JobOrchestrator>,
        similarity: Arc<dyn SimilarityService>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            ranker: DiscoveryRanker::new(similarity),
        }
    }
}
