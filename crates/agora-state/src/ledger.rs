//! Append-only memo log for a single job.

use std::collections::HashMap;

use agora_core::{AgoraError, JobId, JobPhase, Memo, MemoId, MemoStatus, Result};
use serde::Serialize;

/// Ordered memos of one job.
///
/// Memos are ordered by arrival. Once appended a memo is only ever mutated
/// by its single status change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoLedger {
    /// Job every memo must belong to.
    job_id: JobId,

    /// Memos in arrival order.
    entries: Vec<Memo>,

    /// memo id -> position in `entries`.
    #[serde(skip)]
    index: HashMap<MemoId, usize>,
}

impl MemoLedger {
    /// Create an empty ledger for a job.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a ledger from memos already in arrival order.
    pub fn from_memos(job_id: JobId, memos: impl IntoIterator<Item = Memo>) -> Result<Self> {
        let mut ledger = Self::new(job_id);
        for memo in memos {
            ledger.append(memo)?;
        }
        Ok(ledger)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Append a memo to the end of the log.
    pub fn append(&mut self, memo: Memo) -> Result<()> {
        if memo.job_id != self.job_id {
            return Err(AgoraError::InvalidMemo {
                memo_id: memo.id,
                message: format!("belongs to job {}, not {}", memo.job_id, self.job_id),
            });
        }
        if self.index.contains_key(&memo.id) {
            return Err(AgoraError::DuplicateMemo {
                job_id: self.job_id,
                memo_id: memo.id,
            });
        }

        tracing::debug!(
            job_id = self.job_id,
            memo_id = memo.id,
            next_phase = %memo.next_phase,
            "memo appended"
        );
        self.index.insert(memo.id, self.entries.len());
        self.entries.push(memo);
        Ok(())
    }

    /// Approve or reject a pending memo.
    pub fn resolve(&mut self, memo_id: MemoId, approved: bool, reason: Option<String>) -> Result<&Memo> {
        let memo = self.get_mut(memo_id)?;
        memo.resolve(approved, reason)?;
        Ok(memo)
    }

    /// Mark a pending memo as expired.
    pub fn expire(&mut self, memo_id: MemoId) -> Result<&Memo> {
        let memo = self.get_mut(memo_id)?;
        memo.expire()?;
        Ok(memo)
    }

    /// Adopt a status observed elsewhere (e.g. the registry).
    ///
    /// Pending memos take the new status; resolved memos must agree with it.
    pub fn observe_status(&mut self, memo_id: MemoId, status: MemoStatus) -> Result<()> {
        let memo = self.get_mut(memo_id)?;
        if memo.status == status {
            return Ok(());
        }
        match status {
            MemoStatus::Pending => Err(AgoraError::AlreadyResolved {
                memo_id,
                status: memo.status,
            }),
            MemoStatus::Approved => memo.resolve(true, None),
            MemoStatus::Rejected => memo.resolve(false, None),
            MemoStatus::Expired => memo.expire(),
        }
    }

    fn get_mut(&mut self, memo_id: MemoId) -> Result<&mut Memo> {
        let position = *self
            .index
            .get(&memo_id)
            .ok_or_else(|| AgoraError::memo_not_found(memo_id))?;
        Ok(&mut self.entries[position])
    }

    pub fn get(&self, memo_id: MemoId) -> Option<&Memo> {
        self.index.get(&memo_id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, memo_id: MemoId) -> bool {
        self.index.contains_key(&memo_id)
    }

    /// Most recently appended memo.
    pub fn latest(&self) -> Option<&Memo> {
        self.entries.last()
    }

    /// Most recently appended memo targeting `phase`.
    pub fn latest_for(&self, phase: JobPhase) -> Option<&Memo> {
        self.entries.iter().rev().find(|m| m.next_phase == phase)
    }

    /// Most recently appended APPROVED memo targeting `phase`.
    pub fn latest_approved_for(&self, phase: JobPhase) -> Option<&Memo> {
        self.entries
            .iter()
            .rev()
            .find(|m| m.next_phase == phase && m.is_approved())
    }

    /// Memos still awaiting a signature, in arrival order.
    pub fn pending(&self) -> impl Iterator<Item = &Memo> {
        self.entries.iter().filter(|m| m.is_pending())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Memo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a MemoLedger {
    type Item = &'a Memo;
    type IntoIter = std::slice::Iter<'a, Memo>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
