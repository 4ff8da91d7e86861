//! Collaborator interfaces: the ledger gateway and the registry service.
//!
//! The core never signs or settles anything itself. It decides which calls to
//! make and hands them to these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::error::Result;
use crate::memo::{Memo, PayableDetails};
use crate::record::{JobRecord, JobRequest};
use crate::types::{Address, JobId, JobPhase, MemoId, MemoType};

/// Account signing and transaction submission against the job contract.
///
/// Every method may fail with [`AgoraError::Ledger`](crate::AgoraError::Ledger);
/// failures are retryable unless flagged otherwise.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Open a job on the contract and return its id.
    async fn create_job(&self, request: &JobRequest) -> Result<JobId>;

    /// Approve or reject a memo.
    async fn sign_memo(&self, memo_id: MemoId, approve: bool, reason: Option<&str>) -> Result<()>;

    /// Post a memo proposing `next_phase`.
    async fn create_memo(
        &self,
        job_id: JobId,
        content: &str,
        memo_type: MemoType,
        is_secured: bool,
        next_phase: JobPhase,
    ) -> Result<MemoId>;

    /// Post a memo that moves funds once approved.
    async fn create_payable_memo(
        &self,
        job_id: JobId,
        content: &str,
        payable: &PayableDetails,
        memo_type: MemoType,
        next_phase: JobPhase,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<MemoId>;

    /// Allow the job contract to pull `amount` base units of `token`.
    async fn approve_allowance(&self, token: &Address, amount: u128) -> Result<()>;

    /// Call a read-only contract method.
    async fn read_contract(
        &self,
        contract: &Address,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value>;
}

/// Online-status filter applied during discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineFilter {
    #[default]
    All,
    Online,
    Offline,
}

impl OnlineFilter {
    pub fn admits(&self, is_online: bool) -> bool {
        match self {
            OnlineFilter::All => true,
            OnlineFilter::Online => is_online,
            OnlineFilter::Offline => !is_online,
        }
    }
}

/// Registry search parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSearch {
    pub keyword: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub online: OnlineFilter,
}

/// Read access to agent and job records.
///
/// Failures are [`AgoraError::Registry`](crate::AgoraError::Registry) except
/// for unknown jobs, which are [`AgoraError::JobNotFound`](crate::AgoraError::JobNotFound).
#[async_trait]
pub trait RegistryService: Send + Sync {
    async fn search_agents(&self, search: &AgentSearch) -> Result<Vec<Agent>>;

    async fn get_job_by_id(&self, job_id: JobId) -> Result<JobRecord>;

    async fn get_memo_by_id(&self, job_id: JobId, memo_id: MemoId) -> Result<Memo>;

    /// Jobs in a non-terminal phase that involve our wallet.
    async fn active_jobs(&self, page: u32, page_size: u32) -> Result<Vec<JobRecord>>;
}
