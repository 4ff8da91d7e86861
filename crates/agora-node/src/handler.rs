//! User callbacks and outcome accounting.

use agora_core::{Address, JobPhase, Memo, Role};
use agora_negotiate::Deliverable;
use agora_state::Job;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What to do with a job that needs our attention.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAction {
    /// Approve the pending memo. On a request this also proposes TRANSACTION.
    Accept { reason: Option<String> },
    /// Accept a request and ask the client for `amount` of `token` on top
    /// of the price.
    AcceptWithFunds {
        amount: Decimal,
        token: Address,
        reason: Option<String>,
    },
    /// Decline and close the job as REJECTED.
    Reject { reason: Option<String> },
    /// Approve allowances and confirm the transaction.
    Pay { reason: Option<String> },
    /// Post the deliverable.
    Deliver(Deliverable),
    /// Leave the job as it is.
    Ignore,
}

/// Callbacks invoked by the orchestrator.
///
/// Errors are logged and leave the job at its last valid phase.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// A counterparty memo awaits our signature, or a paid job awaits delivery.
    async fn on_new_task(&self, job: &Job, memo: Option<&Memo>) -> anyhow::Result<TaskAction>;

    /// Judge a deliverable as the job's evaluator. Called once per job.
    async fn on_evaluate(&self, job: &Job, deliverable: Option<&str>) -> anyhow::Result<bool>;
}

/// Handler used when the node runs without custom callbacks.
///
/// As provider it accepts (or rejects) requests; as client it pays once the
/// provider accepts; as evaluator it accepts every deliverable. It never
/// produces deliverables.
#[derive(Debug, Clone, Copy)]
pub struct DefaultHandler {
    pub auto_accept: bool,
}

impl DefaultHandler {
    pub fn new(auto_accept: bool) -> Self {
        Self { auto_accept }
    }
}

#[async_trait]
impl JobHandler for DefaultHandler {
    async fn on_new_task(&self, job: &Job, memo: Option<&Memo>) -> anyhow::Result<TaskAction> {
        let Some(memo) = memo else {
            return Ok(TaskAction::Ignore);
        };
        let action = match memo.next_phase {
            JobPhase::Negotiation if self.auto_accept => TaskAction::Accept { reason: None },
            JobPhase::Negotiation => TaskAction::Reject {
                reason: Some("not accepting new jobs".to_string()),
            },
            JobPhase::Transaction => TaskAction::Pay { reason: None },
            _ => TaskAction::Ignore,
        };
        tracing::debug!(job_id = job.id, memo_id = memo.id, ?action, "default handler");
        Ok(action)
    }

    async fn on_evaluate(&self, _job: &Job, _deliverable: Option<&str>) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Decides whether a finished job counts as a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomePolicy {
    /// Only COMPLETED passes.
    #[default]
    CompletedOnly,
    /// A job the provider accepted passes even if the evaluator later
    /// rejected the deliverable.
    ProviderAccepted,
}

impl OutcomePolicy {
    /// `None` while the job is still running.
    pub fn is_pass(&self, job: &Job) -> Option<bool> {
        if !job.is_terminal() {
            return None;
        }
        let completed = job.phase() == JobPhase::Completed;
        Some(match self {
            OutcomePolicy::CompletedOnly => completed,
            OutcomePolicy::ProviderAccepted => {
                completed || job.history().iter().any(|c| c.to == JobPhase::Transaction)
            }
        })
    }
}

/// Pass/fail counts for finished jobs, per role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub passed: u64,
    pub failed: u64,
    pub as_client: u64,
    pub as_provider: u64,
    pub as_evaluator: u64,
}

impl OutcomeStats {
    pub fn record(&mut self, pass: bool, roles: &[Role]) {
        if pass {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        for role in roles {
            match role {
                Role::Client => self.as_client += 1,
                Role::Provider => self.as_provider += 1,
                Role::Evaluator => self.as_evaluator += 1,
            }
        }
    }
}
