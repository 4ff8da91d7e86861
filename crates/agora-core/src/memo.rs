//! Memos: signed proposals attached to a job.
//!
//! A memo proposes moving its job to `next_phase`. Its status leaves
//! PENDING exactly once, when the expected signer approves or rejects it,
//! or when it lapses.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AgoraError, Result};
use crate::types::{Address, JobId, JobPhase, MemoId, MemoStatus, MemoType};

/// Structured memo content, present only when the raw content is a JSON object.
pub type StructuredContent = serde_json::Map<String, serde_json::Value>;

/// A signed proposal attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "MemoRecord")]
pub struct Memo {
    /// Ledger-assigned identifier.
    pub id: MemoId,

    /// Job this memo belongs to.
    pub job_id: JobId,

    pub memo_type: MemoType,

    pub status: MemoStatus,

    /// Phase the job moves to once this memo is approved.
    pub next_phase: JobPhase,

    /// Address that posted the memo.
    #[serde(rename = "senderAddress")]
    pub sender: Address,

    /// Raw content as posted.
    pub content: String,

    /// Parsed content. Derived from `content`, never sent on the wire.
    #[serde(skip_serializing)]
    pub structured_content: Option<StructuredContent>,

    /// Reason given by the signer, if any.
    pub signed_reason: Option<String>,

    /// Time after which the memo can no longer be signed.
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub expiry: Option<DateTime<Utc>>,

    /// Funds moved when a payable memo is approved.
    #[serde(rename = "payableDetails")]
    pub payable: Option<PayableDetails>,

    pub created_at: DateTime<Utc>,
}

/// Wire shape of a memo, before structured content is derived.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoRecord {
    id: MemoId,
    #[serde(default)]
    job_id: JobId,
    memo_type: MemoType,
    status: MemoStatus,
    next_phase: JobPhase,
    #[serde(rename = "senderAddress")]
    sender: Address,
    #[serde(default)]
    content: String,
    #[serde(default)]
    signed_reason: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    expiry: Option<DateTime<Utc>>,
    #[serde(default, rename = "payableDetails")]
    payable: Option<PayableDetails>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

impl From<MemoRecord> for Memo {
    fn from(record: MemoRecord) -> Self {
        let structured_content = parse_structured(&record.content);
        Memo {
            id: record.id,
            job_id: record.job_id,
            memo_type: record.memo_type,
            status: record.status,
            next_phase: record.next_phase,
            sender: record.sender,
            content: record.content,
            structured_content,
            signed_reason: record.signed_reason,
            expiry: record.expiry,
            payable: record.payable,
            created_at: record.created_at,
        }
    }
}

/// Funds attached to a payable memo, in token base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayableDetails {
    #[serde(with = "base_units")]
    pub amount: u128,

    #[serde(with = "base_units", default)]
    pub fee_amount: u128,

    /// Token contract the amount is denominated in.
    pub token: Address,

    pub recipient: Address,
}

fn parse_structured(content: &str) -> Option<StructuredContent> {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

impl Memo {
    /// Create a pending memo.
    pub fn new(
        id: MemoId,
        job_id: JobId,
        memo_type: MemoType,
        next_phase: JobPhase,
        sender: impl Into<Address>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id,
            job_id,
            memo_type,
            status: MemoStatus::Pending,
            next_phase,
            sender: sender.into(),
            structured_content: parse_structured(&content),
            content,
            signed_reason: None,
            expiry: None,
            payable: None,
            created_at: Utc::now(),
        }
    }

    /// Set the status (for memos read back from the registry).
    pub fn with_status(mut self, status: MemoStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_payable(mut self, payable: PayableDetails) -> Self {
        self.payable = Some(payable);
        self
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == MemoStatus::Pending
    }

    pub fn is_approved(&self) -> bool {
        self.status == MemoStatus::Approved
    }

    /// Returns true if the memo's own signing window has passed.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map_or(false, |expiry| expiry <= now)
    }

    /// The `type` key of the structured content.
    pub fn payload_type(&self) -> Option<&str> {
        self.structured_content
            .as_ref()?
            .get("type")
            .and_then(|v| v.as_str())
    }

    /// Decode the `data` key of the structured content.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        let data = self.structured_content.as_ref()?.get("data")?;
        serde_json::from_value(data.clone()).ok()
    }

    /// Approve or reject the memo.
    pub fn resolve(&mut self, approved: bool, reason: Option<String>) -> Result<()> {
        let status = if approved {
            MemoStatus::Approved
        } else {
            MemoStatus::Rejected
        };
        self.settle(status)?;
        self.signed_reason = reason;
        Ok(())
    }

    /// Mark the memo as lapsed.
    pub fn expire(&mut self) -> Result<()> {
        self.settle(MemoStatus::Expired)
    }

    fn settle(&mut self, status: MemoStatus) -> Result<()> {
        if self.status.is_resolved() {
            return Err(AgoraError::AlreadyResolved {
                memo_id: self.id,
                status: self.status,
            });
        }
        self.status = status;
        Ok(())
    }
}

/// Serialize base-unit amounts as decimal strings; accept strings or numbers.
pub mod base_units {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(n as u128),
        }
    }
}
