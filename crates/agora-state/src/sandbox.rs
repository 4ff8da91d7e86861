//! In-memory ledger and registry.
//!
//! Stands in for the job contract and the registry service when the node runs
//! without external endpoints. Several wallets can share one sandbox through
//! [`SandboxLedger::for_wallet`].

use std::collections::HashMap;
use std::sync::Arc;

use agora_core::{
    Address, Agent, AgentSearch, AgoraError, JobId, JobPhase, JobRecord, JobRequest,
    LedgerGateway, Memo, MemoId, MemoType, PayableDetails, RegistryService, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Default)]
struct SandboxState {
    jobs: HashMap<JobId, JobRecord>,
    memo_jobs: HashMap<MemoId, JobId>,
    agents: Vec<Agent>,
    decimals: HashMap<Address, u8>,
    approvals: Vec<(Address, Address, u128)>,
    next_job_id: JobId,
    next_memo_id: MemoId,
    failures_left: u32,
}

/// Shared in-memory ledger acting on behalf of one wallet.
#[derive(Clone)]
pub struct SandboxLedger {
    state: Arc<RwLock<SandboxState>>,
    wallet: Address,
}

impl SandboxLedger {
    pub fn new(wallet: impl Into<Address>) -> Self {
        Self {
            state: Arc::new(RwLock::new(SandboxState::default())),
            wallet: wallet.into(),
        }
    }

    /// A handle to the same sandbox signing as `wallet`.
    pub fn for_wallet(&self, wallet: impl Into<Address>) -> Self {
        Self {
            state: Arc::clone(&self.state),
            wallet: wallet.into(),
        }
    }

    pub fn wallet(&self) -> &Address {
        &self.wallet
    }

    /// Register a token precision readable through `read_contract`.
    pub async fn with_token(self, token: impl Into<Address>, decimals: u8) -> Self {
        self.state.write().await.decimals.insert(token.into(), decimals);
        self
    }

    pub async fn register_agent(&self, agent: Agent) {
        self.state.write().await.agents.push(agent);
    }

    /// Make the next `count` ledger calls fail with a retryable error.
    pub async fn inject_failures(&self, count: u32) {
        self.state.write().await.failures_left = count;
    }

    /// Allowances approved so far as `(owner, token, amount)`.
    pub async fn approvals(&self) -> Vec<(Address, Address, u128)> {
        self.state.read().await.approvals.clone()
    }

    /// Insert or replace a job record directly.
    pub async fn put_job(&self, record: JobRecord) {
        let mut state = self.state.write().await;
        for memo in &record.memos {
            state.memo_jobs.insert(memo.id, record.id);
        }
        state.next_job_id = state.next_job_id.max(record.id);
        state.jobs.insert(record.id, record);
    }

    fn take_failure(state: &mut SandboxState, operation: &str) -> Result<()> {
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(AgoraError::ledger(operation, "injected failure"));
        }
        Ok(())
    }

    fn post_memo(
        state: &mut SandboxState,
        job_id: JobId,
        memo: impl FnOnce(MemoId) -> Memo,
    ) -> Result<MemoId> {
        if !state.jobs.contains_key(&job_id) {
            return Err(AgoraError::ledger_fatal("create_memo", format!("job {job_id} does not exist")));
        }
        state.next_memo_id += 1;
        let memo_id = state.next_memo_id;
        let memo = memo(memo_id);
        state.memo_jobs.insert(memo_id, job_id);
        if let Some(record) = state.jobs.get_mut(&job_id) {
            record.memos.push(memo);
        }
        Ok(memo_id)
    }
}

#[async_trait]
impl LedgerGateway for SandboxLedger {
    async fn create_job(&self, request: &JobRequest) -> Result<JobId> {
        let mut state = self.state.write().await;
        Self::take_failure(&mut state, "create_job")?;

        state.next_job_id += 1;
        let job_id = state.next_job_id;
        let record = JobRecord {
            id: job_id,
            client: self.wallet.clone(),
            provider: request.provider.clone(),
            evaluator: request.evaluator.clone(),
            price: request.price,
            price_token: request.fare_amount.fare.token.clone(),
            phase: JobPhase::Request,
            memos: Vec::new(),
            context: serde_json::Map::new(),
            contract_address: None,
            created_at: Some(Utc::now()),
            expires_at: Some(request.expires_at),
        };
        state.jobs.insert(job_id, record);
        tracing::debug!(job_id, "sandbox job created");
        Ok(job_id)
    }

    async fn sign_memo(&self, memo_id: MemoId, approve: bool, reason: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        Self::take_failure(&mut state, "sign_memo")?;

        let job_id = *state
            .memo_jobs
            .get(&memo_id)
            .ok_or_else(|| AgoraError::ledger_fatal("sign_memo", format!("memo {memo_id} does not exist")))?;
        let record = state
            .jobs
            .get_mut(&job_id)
            .ok_or(AgoraError::JobNotFound(job_id))?;
        let memo = record
            .memos
            .iter_mut()
            .find(|m| m.id == memo_id)
            .ok_or_else(|| AgoraError::memo_not_found(memo_id))?;

        memo.resolve(approve, reason.map(str::to_string))?;
        if approve && record.phase.can_transition_to(memo.next_phase) {
            record.phase = memo.next_phase;
        }
        Ok(())
    }

    async fn create_memo(
        &self,
        job_id: JobId,
        content: &str,
        memo_type: MemoType,
        _is_secured: bool,
        next_phase: JobPhase,
    ) -> Result<MemoId> {
        let mut state = self.state.write().await;
        Self::take_failure(&mut state, "create_memo")?;
        let sender = self.wallet.clone();
        Self::post_memo(&mut state, job_id, |id| {
            Memo::new(id, job_id, memo_type, next_phase, sender, content)
        })
    }

    async fn create_payable_memo(
        &self,
        job_id: JobId,
        content: &str,
        payable: &PayableDetails,
        memo_type: MemoType,
        next_phase: JobPhase,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<MemoId> {
        let mut state = self.state.write().await;
        Self::take_failure(&mut state, "create_payable_memo")?;
        let sender = self.wallet.clone();
        Self::post_memo(&mut state, job_id, |id| {
            let memo = Memo::new(id, job_id, memo_type, next_phase, sender, content)
                .with_payable(payable.clone());
            match expires_at {
                Some(expiry) => memo.with_expiry(expiry),
                None => memo,
            }
        })
    }

    async fn approve_allowance(&self, token: &Address, amount: u128) -> Result<()> {
        let mut state = self.state.write().await;
        Self::take_failure(&mut state, "approve_allowance")?;
        state.approvals.push((self.wallet.clone(), token.clone(), amount));
        Ok(())
    }

    async fn read_contract(
        &self,
        contract: &Address,
        method: &str,
        _args: &[serde_json::Value],
    ) -> Result<serde_json::Value> {
        let mut state = self.state.write().await;
        Self::take_failure(&mut state, "read_contract")?;
        match method {
            "decimals" => state
                .decimals
                .get(contract)
                .map(|d| serde_json::Value::from(*d))
                .ok_or_else(|| AgoraError::ledger_fatal("read_contract", format!("{contract} is not a token"))),
            other => Err(AgoraError::ledger_fatal(
                "read_contract",
                format!("unsupported method {other}"),
            )),
        }
    }
}

#[async_trait]
impl RegistryService for SandboxLedger {
    async fn search_agents(&self, search: &AgentSearch) -> Result<Vec<Agent>> {
        let state = self.state.read().await;
        let keyword = search.keyword.to_lowercase();
        let agents = state
            .agents
            .iter()
            .filter(|a| search.cluster.is_none() || a.cluster == search.cluster)
            .filter(|a| search.online.admits(a.metrics.is_online))
            .filter(|a| keyword.is_empty() || a.search_corpus().to_lowercase().contains(&keyword) || a.wallet.as_str() == keyword)
            .cloned()
            .collect();
        Ok(agents)
    }

    async fn get_job_by_id(&self, job_id: JobId) -> Result<JobRecord> {
        self.state
            .read()
            .await
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(AgoraError::JobNotFound(job_id))
    }

    async fn get_memo_by_id(&self, job_id: JobId, memo_id: MemoId) -> Result<Memo> {
        let state = self.state.read().await;
        let record = state.jobs.get(&job_id).ok_or(AgoraError::JobNotFound(job_id))?;
        record
            .memos
            .iter()
            .find(|m| m.id == memo_id)
            .cloned()
            .ok_or_else(|| AgoraError::memo_not_found(memo_id))
    }

    async fn active_jobs(&self, page: u32, page_size: u32) -> Result<Vec<JobRecord>> {
        let state = self.state.read().await;
        let mut jobs: Vec<&JobRecord> = state
            .jobs
            .values()
            .filter(|r| !r.phase.is_terminal())
            .filter(|r| {
                r.client == self.wallet
                    || r.provider == self.wallet
                    || r.evaluator.as_ref() == Some(&self.wallet)
            })
            .collect();
        jobs.sort_by_key(|r| r.id);

        let size = page_size.max(1) as usize;
        let skip = page.saturating_sub(1) as usize * size;
        Ok(jobs.into_iter().skip(skip).take(size).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Fare, FareAmount};
    use rust_decimal_macros::dec;

    fn request(provider: &str) -> JobRequest {
        JobRequest {
            provider: Address::new(provider),
            evaluator: None,
            price: dec!(1),
            fare_amount: FareAmount::new(1_000_000, Fare::new("0xusdc", 6)),
            requirement: serde_json::json!({}),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memo_flow_moves_record_phase() {
        let client = SandboxLedger::new("0xclient");
        let provider = client.for_wallet("0xprovider");

        let job_id = client.create_job(&request("0xprovider")).await.unwrap();
        let memo_id = client
            .create_memo(job_id, "{}", MemoType::Message, false, JobPhase::Negotiation)
            .await
            .unwrap();
        provider.sign_memo(memo_id, true, Some("ok")).await.unwrap();

        let record = provider.get_job_by_id(job_id).await.unwrap();
        assert_eq!(record.phase, JobPhase::Negotiation);
        assert_eq!(record.memos[0].sender, Address::new("0xclient"));
        assert!(record.memos[0].is_approved());

        assert!(provider.sign_memo(memo_id, false, None).await.is_err());
    }

    #[tokio::test]
    async fn test_active_jobs_are_scoped_to_wallet() {
        let client = SandboxLedger::new("0xclient");
        client.create_job(&request("0xp1")).await.unwrap();
        client.create_job(&request("0xp2")).await.unwrap();

        assert_eq!(client.active_jobs(1, 10).await.unwrap().len(), 2);
        assert_eq!(client.active_jobs(2, 1).await.unwrap()[0].id, 2);
        assert_eq!(client.for_wallet("0xp1").active_jobs(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_retryable() {
        let ledger = SandboxLedger::new("0xclient").with_token("0xusdc", 6).await;
        ledger.inject_failures(1).await;

        let err = ledger.read_contract(&Address::new("0xusdc"), "decimals", &[]).await.unwrap_err();
        assert!(err.is_retryable());
        let decimals = ledger.read_contract(&Address::new("0xusdc"), "decimals", &[]).await.unwrap();
        assert_eq!(decimals, serde_json::json!(6));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let ledger = SandboxLedger::new("0xclient");
        assert_eq!(
            ledger.get_job_by_id(42).await.unwrap_err(),
            AgoraError::JobNotFound(42)
        );
    }
}
