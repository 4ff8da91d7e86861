//! Bounded exponential backoff for ledger and registry calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agora_core::{
    Address, Agent, AgentSearch, AgoraError, JobId, JobPhase, JobRecord, JobRequest, LedgerGateway,
    Memo, MemoId, MemoType, PayableDetails, RegistryService, Result,
};
use agora_sdk::ledger::with_call_nonce;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// How many times to try a call and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// delay = base_delay * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `call` until it succeeds, fails permanently, or the cap is hit.
    ///
    /// Non-retryable errors are returned as-is. Exhaustion returns
    /// [`AgoraError::RetriesExhausted`] carrying the last error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    tracing::error!(operation, attempts = attempt, error = %err, "retries exhausted");
                    return Err(AgoraError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Ledger gateway that retries transient failures.
pub struct RetryingLedger {
    inner: Arc<dyn LedgerGateway>,
    policy: RetryPolicy,
}

impl RetryingLedger {
    pub fn new(inner: Arc<dyn LedgerGateway>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Retry one logical write. Every attempt shares a fresh call nonce, so
    /// the relay sees one idempotency key per call.
    async fn run<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_call_nonce(Uuid::new_v4().to_string(), self.policy.run(operation, call)).await
    }
}

#[async_trait]
impl LedgerGateway for RetryingLedger {
    async fn create_job(&self, request: &JobRequest) -> Result<JobId> {
        let inner = &self.inner;
        self.run("create_job", || inner.create_job(request)).await
    }

    async fn sign_memo(&self, memo_id: MemoId, approve: bool, reason: Option<&str>) -> Result<()> {
        let inner = &self.inner;
        self
            .run("sign_memo", || inner.sign_memo(memo_id, approve, reason))
            .await
    }

    async fn create_memo(
        &self,
        job_id: JobId,
        content: &str,
        memo_type: MemoType,
        is_secured: bool,
        next_phase: JobPhase,
    ) -> Result<MemoId> {
        let inner = &self.inner;
        self
            .run("create_memo", || {
                inner.create_memo(job_id, content, memo_type, is_secured, next_phase)
            })
            .await
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
        let inner = &self.inner;
        self
            .run("create_payable_memo", || {
                inner.create_payable_memo(job_id, content, payable, memo_type, next_phase, expires_at)
            })
            .await
    }

    async fn approve_allowance(&self, token: &Address, amount: u128) -> Result<()> {
        let inner = &self.inner;
        self
            .run("approve_allowance", || inner.approve_allowance(token, amount))
            .await
    }

    async fn read_contract(
        &self,
        contract: &Address,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value> {
        let inner = &self.inner;
        self
            .run("read_contract", || inner.read_contract(contract, method, args))
            .await
    }
}

/// Registry service that retries transient failures.
///
/// `JobNotFound` is terminal and returned on the first attempt.
pub struct RetryingRegistry {
    inner: Arc<dyn RegistryService>,
    policy: RetryPolicy,
}

impl RetryingRegistry {
    pub fn new(inner: Arc<dyn RegistryService>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl RegistryService for RetryingRegistry {
    async fn search_agents(&self, search: &AgentSearch) -> Result<Vec<Agent>> {
        let inner = &self.inner;
        self.policy.run("search_agents", || inner.search_agents(search)).await
    }

    async fn get_job_by_id(&self, job_id: JobId) -> Result<JobRecord> {
        let inner = &self.inner;
        self.policy.run("get_job_by_id", || inner.get_job_by_id(job_id)).await
    }

    async fn get_memo_by_id(&self, job_id: JobId, memo_id: MemoId) -> Result<Memo> {
        let inner = &self.inner;
        self.policy
            .run("get_memo_by_id", || inner.get_memo_by_id(job_id, memo_id))
            .await
    }

    async fn active_jobs(&self, page: u32, page_size: u32) -> Result<Vec<JobRecord>> {
        let inner = &self.inner;
        self.policy
            .run("active_jobs", || inner.active_jobs(page, page_size))
            .await
    }
}
