//! HTTP client for the agent and job registry.

use agora_core::{
    Address, Agent, AgentSearch, AgoraError, JobId, JobRecord, Memo, MemoId, OnlineFilter,
    RegistryService, Result,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Registry responses wrap their payload in `{ "data": ... }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Client for the registry's REST API.
#[derive(Clone)]
pub struct RegistryClient {
    /// Base URL of the registry, without a trailing slash.
    base_url: String,

    /// Wallet sent with calls that are scoped to the caller.
    wallet: Address,

    http_client: reqwest::Client,
}

impl RegistryClient {
    pub fn new(url: &str, wallet: impl Into<Address>) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            wallet: wallet.into(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        not_found: Option<JobId>,
    ) -> Result<T> {
        let response = self
            .http_client
            .get(url)
            .query(query)
            .header("wallet-address", self.wallet.as_str())
            .send()
            .await
            .map_err(|e| AgoraError::Registry(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            if let Some(job_id) = not_found {
                return Err(AgoraError::JobNotFound(job_id));
            }
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgoraError::Registry(format!("{url} returned {status}: {error_text}")));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| AgoraError::SerializationError(e.to_string()))?;
        Ok(envelope.data)
    }
}

/// Query parameters for an agent search.
pub(crate) fn search_params(search: &AgentSearch) -> Vec<(&'static str, String)> {
    let mut params = vec![("search", search.keyword.clone())];
    if let Some(cluster) = &search.cluster {
        params.push(("filters[cluster]", cluster.clone()));
    }
    match search.online {
        OnlineFilter::All => {}
        OnlineFilter::Online => params.push(("filters[isOnline]", "true".to_string())),
        OnlineFilter::Offline => params.push(("filters[isOnline]", "false".to_string())),
    }
    params
}

#[async_trait]
impl RegistryService for RegistryClient {
    async fn search_agents(&self, search: &AgentSearch) -> Result<Vec<Agent>> {
        let url = format!("{}/agents/v3/search", self.base_url);
        let agents: Vec<Agent> = self.get(&url, &search_params(search), None).await?;
        tracing::debug!(keyword = %search.keyword, count = agents.len(), "registry search");
        Ok(agents)
    }

    async fn get_job_by_id(&self, job_id: JobId) -> Result<JobRecord> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        self.get(&url, &[], Some(job_id)).await
    }

    async fn get_memo_by_id(&self, job_id: JobId, memo_id: MemoId) -> Result<Memo> {
        let url = format!("{}/jobs/{}/memos/{}", self.base_url, job_id, memo_id);
        let mut memo: Memo = self.get(&url, &[], Some(job_id)).await?;
        memo.job_id = job_id;
        Ok(memo)
    }

    async fn active_jobs(&self, page: u32, page_size: u32) -> Result<Vec<JobRecord>> {
        let url = format!("{}/jobs/active", self.base_url);
        let query = [
            ("pagination[page]", page.to_string()),
            ("pagination[pageSize]", page_size.to_string()),
        ];
        self.get(&url, &query, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = RegistryClient::new("https://registry.example/api/", "0xABC");
        assert_eq!(client.base_url(), "https://registry.example/api");
    }

    #[test]
    fn test_search_params() {
        let search = AgentSearch {
            keyword: "weather".into(),
            cluster: Some("hedge".into()),
            online: OnlineFilter::Online,
        };
        let params = search_params(&search);
        assert_eq!(
            params,
            vec![
                ("search", "weather".to_string()),
                ("filters[cluster]", "hedge".to_string()),
                ("filters[isOnline]", "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_envelope_decode() {
        let json = r#"{"data": [{"id": 1, "name": "Foo", "walletAddress": "0xAAA"}]}"#;
        let envelope: Envelope<Vec<Agent>> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data[0].wallet, Address::new("0xaaa"));
    }
}
