//! Participant actions on a job.
//!
//! A [`JobSession`] turns decisions (accept, pay, deliver, evaluate) into
//! ledger calls for one wallet. It works on a snapshot of the job and never
//! mutates local state; the new memos come back through the registry.

use std::sync::Arc;

use agora_core::{
    Address, AgoraError, JobId, JobPhase, JobRequest, LedgerGateway, Memo, MemoId, MemoType,
    PayableDetails, Result,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use agora_state::Job;

use crate::fares::FareBook;
use crate::payment::{Approval, PaymentReconciler};
use crate::protocol::Deliverable;

/// How long the client has to sign a funds request.
const FUNDS_REQUEST_WINDOW_MINUTES: i64 = 5;

/// Result of opening a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Initiated {
    pub job_id: JobId,
    /// Memo carrying the requirement, proposing NEGOTIATION.
    pub memo_id: MemoId,
}

/// Ledger-facing actions for one wallet.
#[derive(Clone)]
pub struct JobSession {
    wallet: Address,
    ledger: Arc<dyn LedgerGateway>,
    fares: Arc<FareBook>,
    reconciler: PaymentReconciler,
}

impl JobSession {
    pub fn new(wallet: impl Into<Address>, ledger: Arc<dyn LedgerGateway>, fares: Arc<FareBook>) -> Self {
        Self {
            wallet: wallet.into(),
            ledger,
            fares,
            reconciler: PaymentReconciler::new(),
        }
    }

    pub fn wallet(&self) -> &Address {
        &self.wallet
    }

    pub fn fares(&self) -> &FareBook {
        &self.fares
    }

    /// Open a job and post the requirement memo.
    pub async fn initiate(&self, request: &JobRequest) -> Result<Initiated> {
        if request.provider == self.wallet {
            return Err(AgoraError::InvalidRequest(
                "provider address cannot be the same as the client".to_string(),
            ));
        }

        let job_id = self.ledger.create_job(request).await?;
        let content = serde_json::to_string(&request.requirement)?;
        let memo_id = self
            .ledger
            .create_memo(job_id, &content, MemoType::Message, true, JobPhase::Negotiation)
            .await?;

        tracing::info!(job_id, memo_id, provider = %request.provider, "job initiated");
        Ok(Initiated { job_id, memo_id })
    }

    /// Accept the negotiation memo and propose TRANSACTION.
    pub async fn accept(&self, job: &Job, reason: Option<&str>) -> Result<MemoId> {
        let memo = self.latest_pending(job, JobPhase::Negotiation)?;
        self.ledger.sign_memo(memo.id, true, reason).await?;

        let content = format!("Job {} accepted. {}", job.id, reason.unwrap_or_default());
        let memo_id = self
            .ledger
            .create_memo(
                job.id,
                content.trim(),
                MemoType::Message,
                true,
                JobPhase::Transaction,
            )
            .await?;
        tracing::info!(job_id = job.id, memo_id, "job accepted");
        Ok(memo_id)
    }

    /// Accept negotiation and ask the client for extra funds with the
    /// TRANSACTION proposal.
    pub async fn accept_with_funds(
        &self,
        job: &Job,
        amount: Decimal,
        token: &Address,
        reason: Option<&str>,
    ) -> Result<MemoId> {
        let memo = self.latest_pending(job, JobPhase::Negotiation)?;
        let fare = self.fares.fare(token).await?;
        let payable = PayableDetails {
            amount: fare.to_base_units(amount)?,
            fee_amount: 0,
            token: fare.token.clone(),
            recipient: self.wallet.clone(),
        };

        self.ledger.sign_memo(memo.id, true, reason).await?;
        let content = format!("Job {} accepted. {}", job.id, reason.unwrap_or_default());
        self.ledger
            .create_payable_memo(
                job.id,
                content.trim(),
                &payable,
                MemoType::PayableRequest,
                JobPhase::Transaction,
                Some(Utc::now() + Duration::minutes(FUNDS_REQUEST_WINDOW_MINUTES)),
            )
            .await
    }

    /// Decline the latest pending memo and close the job as REJECTED.
    pub async fn reject(&self, job: &Job, reason: Option<&str>) -> Result<MemoId> {
        let pending = job
            .latest_memo()
            .filter(|m| m.is_pending())
            .ok_or_else(|| AgoraError::InvalidRequest(format!("job {} has no pending memo", job.id)))?;
        self.close_rejected(job, pending.id, reason).await
    }

    /// Pay the job price plus any pending transfers and confirm TRANSACTION.
    ///
    /// Approvals are computed before any ledger call, so an invalid amount
    /// leaves nothing approved. Allowance approvals set, not add, so a
    /// retried payment approves the same totals.
    pub async fn pay_and_accept(&self, job: &Job, reason: Option<&str>) -> Result<Vec<Approval>> {
        let memo = self.latest_pending(job, JobPhase::Transaction)?;
        if memo.is_lapsed(Utc::now()) {
            return Err(AgoraError::InvalidRequest(format!(
                "memo {} on job {} is past its signing window",
                memo.id, job.id
            )));
        }

        let price_fare = self.fares.fare(&job.price_token).await?;
        let mut obligations = self.reconciler.obligations_for(job, &price_fare)?;
        for obligation in &mut obligations {
            obligation.fare = self.fares.resolve(obligation.fare.clone()).await?;
        }
        let approvals = self.reconciler.reconcile(&obligations)?;

        for approval in &approvals {
            if approval.amount.amount > 0 {
                self.ledger
                    .approve_allowance(approval.token(), approval.amount.amount)
                    .await?;
            }
        }
        self.ledger.sign_memo(memo.id, true, reason).await?;

        let content = format!("Payment made. {}", reason.unwrap_or_default());
        self.ledger
            .create_memo(job.id, content.trim(), MemoType::Message, true, JobPhase::Evaluation)
            .await?;

        tracing::info!(job_id = job.id, approvals = approvals.len(), "job paid");
        Ok(approvals)
    }

    /// Confirm payment and post the deliverable, proposing COMPLETED.
    pub async fn deliver(&self, job: &Job, deliverable: &Deliverable) -> Result<MemoId> {
        if let Ok(payment) = self.latest_pending(job, JobPhase::Evaluation) {
            self.ledger.sign_memo(payment.id, true, None).await?;
        } else if job.phase() != JobPhase::Evaluation {
            return Err(AgoraError::InvalidRequest(format!(
                "job {} is not awaiting delivery",
                job.id
            )));
        }

        let content = serde_json::to_string(deliverable)?;
        let memo_id = self
            .ledger
            .create_memo(job.id, &content, MemoType::ObjectUrl, true, JobPhase::Completed)
            .await?;
        tracing::info!(job_id = job.id, memo_id, "deliverable posted");
        Ok(memo_id)
    }

    /// Judge the deliverable. Rejection closes the job as REJECTED.
    pub async fn evaluate(&self, job: &Job, accept: bool, reason: Option<&str>) -> Result<()> {
        let memo = self.latest_pending(job, JobPhase::Completed)?;
        let default_reason = format!(
            "Job {} delivery {}",
            job.id,
            if accept { "accepted" } else { "rejected" }
        );
        let reason = reason.unwrap_or(&default_reason);

        if accept {
            self.ledger.sign_memo(memo.id, true, Some(reason)).await?;
        } else {
            self.close_rejected(job, memo.id, Some(reason)).await?;
        }
        tracing::info!(job_id = job.id, accept, "deliverable evaluated");
        Ok(())
    }

    async fn close_rejected(&self, job: &Job, memo_id: MemoId, reason: Option<&str>) -> Result<MemoId> {
        let content = format!("Job {} rejected. {}", job.id, reason.unwrap_or_default());
        let content = content.trim();

        self.ledger.sign_memo(memo_id, false, Some(content)).await?;
        let rejection = self
            .ledger
            .create_memo(job.id, content, MemoType::Message, false, JobPhase::Rejected)
            .await?;
        self.ledger.sign_memo(rejection, true, Some(content)).await?;

        tracing::info!(job_id = job.id, memo_id, "job rejected");
        Ok(rejection)
    }

    fn latest_pending<'a>(&self, job: &'a Job, target: JobPhase) -> Result<&'a Memo> {
        job.memos()
            .latest_for(target)
            .filter(|m| m.is_pending())
            .ok_or_else(|| {
                AgoraError::InvalidRequest(format!(
                    "job {} has no pending memo proposing {}",
                    job.id, target
                ))
            })
    }
}
