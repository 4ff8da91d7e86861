//! Pure phase derivation from a memo sequence.

use agora_core::{JobPhase, MemoId, Result};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::job::{Job, JobSpec, Parties};
use crate::ledger::MemoLedger;
use crate::machine::JobStateMachine;

/// Outcome of replaying a memo log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replay {
    /// Phase the memo sequence leads to.
    pub phase: JobPhase,

    /// Memos that drove a transition, in application order.
    pub applied: Vec<MemoId>,
}

/// Derive the phase a memo log leads to, ignoring wall-clock expiry.
///
/// Replaying the same memos in the same order always yields the same result.
pub fn replay(ledger: &MemoLedger, parties: &Parties) -> Result<Replay> {
    let spec = JobSpec::new(ledger.job_id(), parties.clone(), Decimal::ZERO, parties.client.clone());
    let mut job = Job::from_spec(spec);
    for memo in ledger {
        job.memos.append(memo.clone())?;
    }

    JobStateMachine::new().settle(&mut job, false);

    Ok(Replay {
        phase: job.phase,
        applied: job.history.iter().filter_map(|c| c.memo_id).collect(),
    })
}

/// Returns true if `job`'s phase agrees with a replay of its memos.
///
/// Jobs that expired lazily are consistent when the replay has not moved
/// past the phase they expired from.
pub fn is_consistent(job: &Job) -> Result<bool> {
    let replayed = replay(job.memos(), &job.parties)?;
    if job.phase() == JobPhase::Expired {
        let expired_from = job
            .history()
            .iter()
            .rev()
            .find(|c| c.to == JobPhase::Expired && c.memo_id.is_none())
            .map(|c| c.from);
        if let Some(from) = expired_from {
            return Ok(replayed.phase == from || replayed.phase == JobPhase::Expired);
        }
    }
    Ok(replayed.phase == job.phase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Memo, MemoType};

    fn ledger(steps: &[(MemoId, JobPhase, &str, bool)]) -> MemoLedger {
        let mut ledger = MemoLedger::new(3);
        for (id, next, sender, approve) in steps {
            ledger
                .append(Memo::new(*id, 3, MemoType::Message, *next, *sender, ""))
                .unwrap();
            ledger.resolve(*id, *approve, None).unwrap();
        }
        ledger
    }

    #[test]
    fn test_replay_is_deterministic() {
        let parties = Parties::new("0xc", "0xp");
        let memos = ledger(&[
            (1, JobPhase::Negotiation, "0xc", true),
            (2, JobPhase::Transaction, "0xp", false),
            (3, JobPhase::Transaction, "0xp", true),
            (4, JobPhase::Evaluation, "0xc", true),
        ]);

        let first = replay(&memos, &parties).unwrap();
        let second = replay(&memos, &parties).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.phase, JobPhase::Evaluation);
        assert_eq!(first.applied, vec![1, 3, 4]);
    }

    #[test]
    fn test_replay_matches_live_machine() {
        let parties = Parties::new("0xc", "0xp");
        let machine = JobStateMachine::new();
        let mut job = machine
            .create(JobSpec::new(3, parties.clone(), Decimal::ONE, "0xusdc"))
            .unwrap();
        for memo in &ledger(&[
            (1, JobPhase::Negotiation, "0xc", true),
            (2, JobPhase::Rejected, "0xp", true),
        ]) {
            job.append_memo(memo.clone()).unwrap();
        }
        machine.advance(&mut job);

        assert_eq!(job.phase(), JobPhase::Rejected);
        assert!(is_consistent(&job).unwrap());
    }
}
