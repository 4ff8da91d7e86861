//! Multi-stage agent discovery.
//!
//! Stages run in a fixed order: cluster and online filter, match (exact
//! name, then exact wallet, then semantic similarity), self-exclusion,
//! ranking, truncation. Query validation happens before any scoring call.

use std::cmp::Ordering;
use std::sync::Arc;

use agora_core::{
    Address, Agent, AgentSearch, AgentSortKey, AgoraError, OnlineFilter, RegistryService, Result,
};
use serde::{Deserialize, Serialize};

use crate::similarity::SimilarityService;

/// Default number of agents returned.
pub const DEFAULT_TOP_K: i64 = 5;

/// Default minimum similarity score for a semantic match (exclusive).
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// A buyer's discovery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryQuery {
    pub keyword: String,

    /// Exact, case-sensitive cluster tag.
    pub cluster: Option<String>,

    pub online: OnlineFilter,

    /// Wallet of the caller, never returned in results.
    pub caller_wallet: Option<Address>,

    /// Order by similarity score.
    pub rerank: bool,

    /// Order by metrics; the first key is primary.
    pub sort_by: Vec<AgentSortKey>,

    pub top_k: i64,

    /// Semantic matches must score strictly above this.
    pub threshold: f64,
}

impl Default for DiscoveryQuery {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            cluster: None,
            online: OnlineFilter::All,
            caller_wallet: None,
            rerank: false,
            sort_by: Vec::new(),
            top_k: DEFAULT_TOP_K,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl DiscoveryQuery {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn online(mut self, online: OnlineFilter) -> Self {
        self.online = online;
        self
    }

    pub fn caller(mut self, wallet: impl Into<Address>) -> Self {
        self.caller_wallet = Some(wallet.into());
        self
    }

    pub fn rerank(mut self) -> Self {
        self.rerank = true;
        self
    }

    pub fn sort_by(mut self, keys: Vec<AgentSortKey>) -> Self {
        self.sort_by = keys;
        self
    }

    pub fn top_k(mut self, top_k: i64) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn validate(&self) -> Result<usize> {
        if self.rerank && !self.sort_by.is_empty() {
            return Err(AgoraError::AmbiguousRankingMode);
        }
        if self.top_k <= 0 {
            return Err(AgoraError::InvalidTopK(self.top_k));
        }
        Ok(usize::try_from(self.top_k).unwrap_or(usize::MAX))
    }

    /// Registry-side search parameters for this query.
    pub fn search(&self) -> AgentSearch {
        AgentSearch {
            keyword: self.keyword.clone(),
            cluster: self.cluster.clone(),
            online: self.online,
        }
    }
}

/// How a candidate survived the match stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Name,
    Wallet,
    Semantic,
    /// Empty keyword: every filtered candidate is kept.
    Browse,
}

/// A discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAgent {
    pub agent: Agent,
    pub matched_by: MatchKind,
    /// Similarity score, when one was computed.
    pub score: Option<f64>,
}

/// Selects and orders provider agents for a query.
#[derive(Clone)]
pub struct DiscoveryRanker {
    similarity: Arc<dyn SimilarityService>,
}

impl DiscoveryRanker {
    pub fn new(similarity: Arc<dyn SimilarityService>) -> Self {
        Self { similarity }
    }

    /// Search the registry and rank the candidates.
    pub async fn discover(
        &self,
        registry: &dyn RegistryService,
        query: &DiscoveryQuery,
    ) -> Result<Vec<RankedAgent>> {
        query.validate()?;
        let candidates = registry.search_agents(&query.search()).await?;
        self.rank(query, candidates).await
    }

    /// Run every stage over a candidate snapshot.
    pub async fn rank(&self, query: &DiscoveryQuery, candidates: Vec<Agent>) -> Result<Vec<RankedAgent>> {
        let top_k = query.validate()?;

        let filtered: Vec<Agent> = candidates
            .into_iter()
            .filter(|a| query.cluster.is_none() || a.cluster == query.cluster)
            .filter(|a| query.online.admits(a.metrics.is_online))
            .collect();

        let mut matched = self.match_candidates(query, filtered).await?;

        if let Some(caller) = &query.caller_wallet {
            matched.retain(|r| &r.agent.wallet != caller);
        }

        if query.rerank {
            self.rerank(&query.keyword, &mut matched).await?;
        } else if !query.sort_by.is_empty() {
            matched.sort_by(|a, b| compare_metrics(&query.sort_by, &a.agent, &b.agent));
        }

        matched.truncate(top_k);
        tracing::debug!(keyword = %query.keyword, results = matched.len(), "discovery ranked");
        Ok(matched)
    }

    async fn match_candidates(&self, query: &DiscoveryQuery, candidates: Vec<Agent>) -> Result<Vec<RankedAgent>> {
        let keyword = query.keyword.trim();
        let wrap = |agents: Vec<Agent>, kind: MatchKind| -> Vec<RankedAgent> {
            agents
                .into_iter()
                .map(|agent| RankedAgent {
                    agent,
                    matched_by: kind,
                    score: None,
                })
                .collect()
        };

        if keyword.is_empty() {
            return Ok(wrap(candidates, MatchKind::Browse));
        }

        let by_name: Vec<Agent> = candidates
            .iter()
            .filter(|a| a.name.eq_ignore_ascii_case(keyword) || a.name.to_lowercase() == keyword.to_lowercase())
            .cloned()
            .collect();
        if !by_name.is_empty() {
            return Ok(wrap(by_name, MatchKind::Name));
        }

        let wallet = Address::new(keyword);
        let by_wallet: Vec<Agent> = candidates.iter().filter(|a| a.wallet == wallet).cloned().collect();
        if !by_wallet.is_empty() {
            return Ok(wrap(by_wallet, MatchKind::Wallet));
        }

        let mut semantic = Vec::new();
        for agent in candidates {
            let score = self.similarity.similarity(keyword, &agent.search_corpus()).await?;
            if score > query.threshold {
                semantic.push(RankedAgent {
                    agent,
                    matched_by: MatchKind::Semantic,
                    score: Some(score),
                });
            }
        }
        Ok(semantic)
    }

    async fn rerank(&self, keyword: &str, matched: &mut [RankedAgent]) -> Result<()> {
        let keyword = keyword.trim();
        if !keyword.is_empty() {
            for ranked in matched.iter_mut().filter(|r| r.score.is_none()) {
                ranked.score = Some(
                    self.similarity
                        .similarity(keyword, &ranked.agent.search_corpus())
                        .await?,
                );
            }
        }
        matched.sort_by(|a, b| match (a.score, b.score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        Ok(())
    }
}

fn compare_metrics(keys: &[AgentSortKey], a: &Agent, b: &Agent) -> Ordering {
    keys.iter()
        .map(|key| compare_metric(*key, a, b))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn compare_metric(key: AgentSortKey, a: &Agent, b: &Agent) -> Ordering {
    let (ma, mb) = (&a.metrics, &b.metrics);
    match key {
        AgentSortKey::SuccessfulJobCount => mb.successful_job_count.cmp(&ma.successful_job_count),
        AgentSortKey::UniqueBuyerCount => mb.unique_buyer_count.cmp(&ma.unique_buyer_count),
        AgentSortKey::SuccessRate => mb.success_rate().total_cmp(&ma.success_rate()),
        AgentSortKey::IsOnline => mb.is_online.cmp(&ma.is_online),
        AgentSortKey::MinsFromLastOnline => match (ma.last_online, mb.last_online) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::LexicalSimilarity;
    use agora_core::AgentMetrics;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn agent(id: u64, name: &str, wallet: &str, description: &str) -> Agent {
        Agent {
            id,
            name: name.to_string(),
            description: description.to_string(),
            wallet: Address::new(wallet),
            cluster: None,
            offerings: Vec::new(),
            metrics: AgentMetrics::default(),
        }
    }

    /// Counts calls and scores every corpus the same.
    struct FixedSimilarity {
        score: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SimilarityService for FixedSimilarity {
        async fn similarity(&self, _keyword: &str, _corpus: &str) -> Result<f64> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.score)
        }
    }

    fn fixed(score: f64) -> Arc<FixedSimilarity> {
        Arc::new(FixedSimilarity {
            score,
            calls: AtomicUsize::new(0),
        })
    }

    fn lexical() -> DiscoveryRanker {
        DiscoveryRanker::new(Arc::new(LexicalSimilarity::new()))
    }

    #[tokio::test]
    async fn test_exact_name_wins_over_similarity() {
        let ranker = DiscoveryRanker::new(fixed(0.99));
        let candidates = vec![agent(1, "Foo", "0xAAA", ""), agent(2, "Bar", "0xBBB", "")];

        let results = ranker.rank(&DiscoveryQuery::new("Foo"), candidates).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent.name, "Foo");
        assert_eq!(results[0].matched_by, MatchKind::Name);
    }

    #[tokio::test]
    async fn test_name_match_is_case_insensitive() {
        let results = lexical()
            .rank(&DiscoveryQuery::new("foo"), vec![agent(1, "FOO", "0xa", "")])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_wallet_match() {
        let results = lexical()
            .rank(
                &DiscoveryQuery::new("0xBBB"),
                vec![agent(1, "Foo", "0xAAA", ""), agent(2, "Bar", "0xbbb", "")],
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].matched_by, MatchKind::Wallet);
    }

    #[tokio::test]
    async fn test_semantic_threshold_is_exclusive() {
        let candidates = vec![
            agent(1, "Meteo", "0xa", "weather forecasts"),
            agent(2, "Stormy", "0xb", "weather"),
            agent(3, "Taxman", "0xc", "tax returns"),
        ];
        let results = lexical()
            .rank(&DiscoveryQuery::new("weather forecasts"), candidates)
            .await
            .unwrap();
        // Stormy scores exactly 0.5
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent.name, "Meteo");
        assert_eq!(results[0].score, Some(1.0));
    }

    #[tokio::test]
    async fn test_excludes_caller_even_when_top_ranked() {
        let candidates = vec![
            agent(1, "Me", "0xME", "weather forecasts"),
            agent(2, "Other", "0xother", "weather forecasts daily"),
        ];
        let query = DiscoveryQuery::new("weather forecasts").caller("0xme").rerank();
        let results = lexical().rank(&query, candidates).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent.name, "Other");
    }

    #[tokio::test]
    async fn test_ambiguous_ranking_checked_before_scoring() {
        let similarity = fixed(0.9);
        let ranker = DiscoveryRanker::new(similarity.clone());
        let query = DiscoveryQuery::new("weather")
            .rerank()
            .sort_by(vec![AgentSortKey::SuccessRate]);

        let err = ranker.rank(&query, vec![agent(1, "A", "0xa", "")]).await.unwrap_err();
        assert_eq!(err, AgoraError::AmbiguousRankingMode);
        assert_eq!(similarity.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_top_k() {
        for top_k in [0, -3] {
            let err = lexical()
                .rank(&DiscoveryQuery::new("x").top_k(top_k), Vec::new())
                .await
                .unwrap_err();
            assert_eq!(err, AgoraError::InvalidTopK(top_k));
        }
    }

    #[tokio::test]
    async fn test_cluster_filter_is_case_sensitive() {
        let mut a = agent(1, "A", "0xa", "");
        a.cluster = Some("hedge".into());
        let mut b = agent(2, "B", "0xb", "");
        b.cluster = Some("Hedge".into());

        let results = lexical()
            .rank(&DiscoveryQuery::default().cluster("hedge"), vec![a, b])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent.id, 1);
    }

    #[tokio::test]
    async fn test_manual_sort_with_tie_break() {
        let mut a = agent(1, "A", "0xa", "");
        a.metrics.successful_job_count = 5;
        a.metrics.unique_buyer_count = 1;
        let mut b = agent(2, "B", "0xb", "");
        b.metrics.successful_job_count = 5;
        b.metrics.unique_buyer_count = 3;
        let mut c = agent(3, "C", "0xc", "");
        c.metrics.successful_job_count = 9;

        let query = DiscoveryQuery::default().sort_by(vec![
            AgentSortKey::SuccessfulJobCount,
            AgentSortKey::UniqueBuyerCount,
        ]);
        let results = lexical().rank(&query, vec![a, b, c]).await.unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.agent.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_recently_online_first() {
        let now = Utc::now();
        let mut a = agent(1, "A", "0xa", "");
        a.metrics.last_online = Some(now - Duration::hours(3));
        let b = agent(2, "B", "0xb", "");
        let mut c = agent(3, "C", "0xc", "");
        c.metrics.last_online = Some(now - Duration::minutes(1));

        let query = DiscoveryQuery::default().sort_by(vec![AgentSortKey::MinsFromLastOnline]);
        let results = lexical().rank(&query, vec![a, b, c]).await.unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.agent.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_discover_through_registry() {
        let registry = agora_state::SandboxLedger::new("0xbuyer");
        registry.register_agent(agent(1, "Foo", "0xAAA", "translation")).await;
        registry.register_agent(agent(2, "Foo Bar", "0xBBB", "translation")).await;
        registry.register_agent(agent(3, "Buyer", "0xbuyer", "foo")).await;

        let query = DiscoveryQuery::new("foo").caller("0xbuyer");
        let results = lexical().discover(&registry, &query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent.id, 1);
    }

    #[tokio::test]
    async fn test_truncation_and_online_filter() {
        let mut candidates: Vec<Agent> = (1..=8).map(|i| agent(i, &format!("A{i}"), &format!("0x{i}"), "")).collect();
        for a in candidates.iter_mut().take(6) {
            a.metrics.is_online = true;
        }
        let query = DiscoveryQuery::default().online(OnlineFilter::Online);
        let results = lexical().rank(&query, candidates).await.unwrap();
        assert_eq!(results.len(), DEFAULT_TOP_K as usize);
        assert!(results.iter().all(|r| r.agent.metrics.is_online));
    }
}
