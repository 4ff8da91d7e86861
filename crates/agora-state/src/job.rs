//! Local view of a job: parties, price, phase and memo log.

use std::collections::HashSet;

use agora_core::{
    Address, AgoraError, JobId, JobPhase, JobRecord, Memo, MemoId, Result, Role,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::MemoLedger;

/// The addresses taking part in a job. Immutable once the job exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parties {
    pub client: Address,
    pub provider: Address,
    pub evaluator: Option<Address>,
}

impl Parties {
    pub fn new(client: impl Into<Address>, provider: impl Into<Address>) -> Self {
        Self {
            client: client.into(),
            provider: provider.into(),
            evaluator: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: impl Into<Address>) -> Self {
        let evaluator = evaluator.into();
        self.evaluator = (!evaluator.is_zero()).then_some(evaluator);
        self
    }

    /// The party that judges the deliverable. Defaults to the client.
    pub fn evaluator_or_client(&self) -> &Address {
        self.evaluator.as_ref().unwrap_or(&self.client)
    }

    /// Every role `address` holds in this job.
    pub fn roles_of(&self, address: &Address) -> Vec<Role> {
        let mut roles = Vec::new();
        if &self.client == address {
            roles.push(Role::Client);
        }
        if &self.provider == address {
            roles.push(Role::Provider);
        }
        if self.evaluator_or_client() == address {
            roles.push(Role::Evaluator);
        }
        roles
    }

    pub fn is_party(&self, address: &Address) -> bool {
        !self.roles_of(address).is_empty()
    }

    /// Returns true if `sender` may post a memo proposing `target`.
    pub fn authorizes(&self, sender: &Address, target: JobPhase) -> bool {
        match target {
            JobPhase::Negotiation | JobPhase::Evaluation => sender == &self.client,
            JobPhase::Transaction | JobPhase::Completed => sender == &self.provider,
            JobPhase::Rejected | JobPhase::Expired => self.is_party(sender),
            JobPhase::Request => false,
        }
    }

    /// The party expected to sign a memo proposing `target`.
    ///
    /// `None` means any party may sign.
    pub fn signer_for(&self, target: JobPhase) -> Option<&Address> {
        match target {
            JobPhase::Negotiation | JobPhase::Evaluation => Some(&self.provider),
            JobPhase::Transaction => Some(&self.client),
            JobPhase::Completed => Some(self.evaluator_or_client()),
            JobPhase::Request | JobPhase::Rejected | JobPhase::Expired => None,
        }
    }
}

/// One applied phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub from: JobPhase,
    pub to: JobPhase,
    /// Memo that drove the transition; `None` for lazy expiry.
    pub memo_id: Option<MemoId>,
    pub at: DateTime<Utc>,
}

/// Parameters for creating a job in REQUEST.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub parties: Parties,
    pub price: Decimal,
    pub price_token: Address,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub contract_address: Option<Address>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new(id: JobId, parties: Parties, price: Decimal, price_token: impl Into<Address>) -> Self {
        Self {
            id,
            parties,
            price,
            price_token: price_token.into(),
            context: serde_json::Map::new(),
            contract_address: None,
            expires_at: None,
        }
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn contract_address(mut self, contract: impl Into<Address>) -> Self {
        self.contract_address = Some(contract.into());
        self
    }

    pub fn context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

impl From<&JobRecord> for JobSpec {
    fn from(record: &JobRecord) -> Self {
        let mut parties = Parties::new(record.client.clone(), record.provider.clone());
        if let Some(evaluator) = record.evaluator() {
            parties = parties.with_evaluator(evaluator.clone());
        }
        Self {
            id: record.id,
            parties,
            price: record.price,
            price_token: record.price_token.clone(),
            context: record.context.clone(),
            contract_address: record.contract_address.clone(),
            expires_at: record.expires_at,
        }
    }
}

/// A commerce job between a client and a provider.
///
/// The phase only changes through [`JobStateMachine`](crate::JobStateMachine).
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub parties: Parties,
    /// Human price in the payment token.
    pub price: Decimal,
    pub price_token: Address,
    pub(crate) phase: JobPhase,
    pub(crate) memos: MemoLedger,
    pub(crate) history: Vec<PhaseChange>,
    #[serde(skip)]
    pub(crate) consumed: HashSet<MemoId>,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub contract_address: Option<Address>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn from_spec(spec: JobSpec) -> Self {
        Self {
            id: spec.id,
            parties: spec.parties,
            price: spec.price,
            price_token: spec.price_token,
            phase: JobPhase::Request,
            memos: MemoLedger::new(spec.id),
            history: Vec::new(),
            consumed: HashSet::new(),
            context: spec.context,
            contract_address: spec.contract_address,
            created_at: Utc::now(),
            expires_at: spec.expires_at,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn memos(&self) -> &MemoLedger {
        &self.memos
    }

    pub fn history(&self) -> &[PhaseChange] {
        &self.history
    }

    /// Returns true if the memo already drove a transition.
    pub fn is_consumed(&self, memo_id: MemoId) -> bool {
        self.consumed.contains(&memo_id)
    }

    /// Returns true once the expiry timestamp has passed.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expiry| expiry <= now)
    }

    pub fn latest_memo(&self) -> Option<&Memo> {
        self.memos.latest()
    }

    /// Append a newly observed memo.
    pub fn append_memo(&mut self, memo: Memo) -> Result<()> {
        self.memos.append(memo)
    }

    /// Approve or reject a pending memo. Does not move the phase.
    pub fn resolve_memo(&mut self, memo_id: MemoId, approved: bool, reason: Option<String>) -> Result<()> {
        self.memos.resolve(memo_id, approved, reason).map(|_| ())
    }

    /// Merge a registry record into the local memo log.
    ///
    /// New memos are appended in record order and status changes of known
    /// memos are adopted. Returns the number of memos that changed.
    pub fn sync_from(&mut self, record: &JobRecord) -> Result<usize> {
        if record.id != self.id {
            return Err(AgoraError::InvalidRequest(format!(
                "record for job {} cannot update job {}",
                record.id, self.id
            )));
        }

        let mut changed = 0;
        for memo in &record.memos {
            match self.memos.get(memo.id) {
                Some(known) if known.status == memo.status => {}
                Some(_) => {
                    self.memos.observe_status(memo.id, memo.status)?;
                    changed += 1;
                }
                None => {
                    let mut memo = memo.clone();
                    memo.job_id = self.id;
                    self.memos.append(memo)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    fn negotiation_payload(&self) -> Option<&agora_core::StructuredContent> {
        self.memos
            .iter()
            .find(|m| m.next_phase == JobPhase::Negotiation)?
            .structured_content
            .as_ref()
    }

    /// The buyer's requirement from the negotiation memo.
    pub fn requirement(&self) -> Option<&serde_json::Value> {
        let payload = self.negotiation_payload()?;
        payload
            .get("serviceRequirement")
            .or_else(|| payload.get("requirement"))
    }

    /// The offering name from the negotiation memo.
    pub fn service_name(&self) -> Option<&str> {
        let payload = self.negotiation_payload()?;
        payload
            .get("serviceName")
            .or_else(|| payload.get("name"))
            .and_then(|v| v.as_str())
    }

    /// Content of the memo proposing completion.
    pub fn deliverable(&self) -> Option<&str> {
        self.memos
            .iter()
            .find(|m| m.next_phase == JobPhase::Completed)
            .map(|m| m.content.as_str())
    }

    /// Roles `address` holds in this job.
    pub fn roles_of(&self, address: &Address) -> Vec<Role> {
        self.parties.roles_of(address)
    }
}
