//! Common types used across the Agora protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ledger-assigned job identifier.
pub type JobId = u64;

/// Ledger-assigned memo identifier.
pub type MemoId = u64;

/// A wallet or contract address.
///
/// Addresses compare case-insensitively; the canonical form is lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create an address, normalizing it to lowercase.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Address(raw.as_ref().trim().to_ascii_lowercase())
    }

    /// The all-zero address used when no evaluator is set on-chain.
    pub fn zero() -> Self {
        Address::new("0x0000000000000000000000000000000000000000")
    }

    pub fn is_zero(&self) -> bool {
        self.0.trim_start_matches("0x").chars().all(|c| c == '0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Address::new(raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Address::new(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Phase of a job.
///
/// Jobs flow REQUEST → NEGOTIATION → TRANSACTION → EVALUATION → COMPLETED;
/// REJECTED and EXPIRED can be reached from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum JobPhase {
    Request,
    Negotiation,
    Transaction,
    Evaluation,
    Completed,
    Rejected,
    Expired,
}

impl JobPhase {
    /// Returns true if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Rejected | JobPhase::Expired
        )
    }

    /// The designated successor on the happy path.
    pub fn successor(&self) -> Option<JobPhase> {
        match self {
            JobPhase::Request => Some(JobPhase::Negotiation),
            JobPhase::Negotiation => Some(JobPhase::Transaction),
            JobPhase::Transaction => Some(JobPhase::Evaluation),
            JobPhase::Evaluation => Some(JobPhase::Completed),
            _ => None,
        }
    }

    /// Returns true if moving from `self` to `next` is structurally allowed.
    pub fn can_transition_to(&self, next: JobPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(next, JobPhase::Rejected | JobPhase::Expired) || self.successor() == Some(next)
    }

    /// Phases a memo may target from `self`, in preference order.
    pub fn reachable(&self) -> Vec<JobPhase> {
        if self.is_terminal() {
            return Vec::new();
        }
        let mut phases: Vec<JobPhase> = self.successor().into_iter().collect();
        phases.push(JobPhase::Rejected);
        phases.push(JobPhase::Expired);
        phases
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Request => "REQUEST",
            JobPhase::Negotiation => "NEGOTIATION",
            JobPhase::Transaction => "TRANSACTION",
            JobPhase::Evaluation => "EVALUATION",
            JobPhase::Completed => "COMPLETED",
            JobPhase::Rejected => "REJECTED",
            JobPhase::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for JobPhase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JobPhase::Request),
            1 => Ok(JobPhase::Negotiation),
            2 => Ok(JobPhase::Transaction),
            3 => Ok(JobPhase::Evaluation),
            4 => Ok(JobPhase::Completed),
            5 => Ok(JobPhase::Rejected),
            6 => Ok(JobPhase::Expired),
            other => Err(format!("unknown job phase {other}")),
        }
    }
}

impl From<JobPhase> for u8 {
    fn from(phase: JobPhase) -> Self {
        phase as u8
    }
}

/// Kind of memo attached to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MemoType {
    /// Plain text or structured message.
    Message,
    ContextUrl,
    ImageUrl,
    VoiceUrl,
    /// File or deliverable reference.
    ObjectUrl,
    TxHash,
    /// Provider asks the client to pay funds.
    PayableRequest,
    /// Direct transfer attached to the memo.
    PayableTransfer,
    /// Transfer held in escrow until the memo is signed.
    PayableTransferEscrow,
    Notification,
}

impl MemoType {
    /// Returns true if the memo moves funds when approved.
    pub fn is_payable(&self) -> bool {
        matches!(
            self,
            MemoType::PayableRequest | MemoType::PayableTransfer | MemoType::PayableTransferEscrow
        )
    }
}

impl TryFrom<u8> for MemoType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MemoType::Message),
            1 => Ok(MemoType::ContextUrl),
            2 => Ok(MemoType::ImageUrl),
            3 => Ok(MemoType::VoiceUrl),
            4 => Ok(MemoType::ObjectUrl),
            5 => Ok(MemoType::TxHash),
            6 => Ok(MemoType::PayableRequest),
            7 => Ok(MemoType::PayableTransfer),
            8 => Ok(MemoType::PayableTransferEscrow),
            9 => Ok(MemoType::Notification),
            other => Err(format!("unknown memo type {other}")),
        }
    }
}

impl From<MemoType> for u8 {
    fn from(memo_type: MemoType) -> Self {
        memo_type as u8
    }
}

/// Resolution status of a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl MemoStatus {
    /// Returns true once the memo has left PENDING.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, MemoStatus::Pending)
    }
}

impl fmt::Display for MemoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoStatus::Pending => "PENDING",
            MemoStatus::Approved => "APPROVED",
            MemoStatus::Rejected => "REJECTED",
            MemoStatus::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}

/// Role a participant plays in a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Provider,
    Evaluator,
}
