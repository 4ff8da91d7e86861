//! Memo-driven phase transitions.
//!
//! A transition P -> Q applies only when Q is reachable from P and the most
//! recent APPROVED memo proposing Q was posted by a party allowed to propose
//! it. Expiry is evaluated lazily whenever a job is observed.

use std::sync::Arc;

use agora_core::{AgoraError, JobPhase, MemoId, Result};
use chrono::{DateTime, Utc};

use crate::job::{Job, JobSpec, PhaseChange};

/// Callback fired when a job enters EVALUATION.
pub trait EvaluationHook: Send + Sync {
    fn on_evaluation(&self, job: &Job);
}

/// Validates and applies phase transitions.
#[derive(Clone, Default)]
pub struct JobStateMachine {
    hook: Option<Arc<dyn EvaluationHook>>,
}

impl std::fmt::Debug for JobStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStateMachine")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl JobStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the hook invoked once per job on entering EVALUATION.
    pub fn with_evaluation_hook(mut self, hook: Arc<dyn EvaluationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Create a job in REQUEST.
    pub fn create(&self, spec: JobSpec) -> Result<Job> {
        if spec.parties.client == spec.parties.provider {
            return Err(AgoraError::InvalidRequest(format!(
                "job {} has the same client and provider",
                spec.id
            )));
        }
        if spec.price.is_sign_negative() && !spec.price.is_zero() {
            return Err(AgoraError::InvalidRequest(format!(
                "job {} has negative price {}",
                spec.id, spec.price
            )));
        }
        tracing::debug!(job_id = spec.id, "job created in REQUEST");
        Ok(Job::from_spec(spec))
    }

    /// Apply the transition proposed by `memo_id`.
    pub fn apply(&self, job: &mut Job, memo_id: MemoId) -> Result<JobPhase> {
        self.apply_at(job, memo_id, Utc::now())
    }

    pub fn apply_at(&self, job: &mut Job, memo_id: MemoId, now: DateTime<Utc>) -> Result<JobPhase> {
        self.observe_at(job, now);
        self.apply_memo(job, memo_id, true)
    }

    /// Force expiry if the job's deadline has passed. Returns the current phase.
    pub fn observe(&self, job: &mut Job) -> JobPhase {
        self.observe_at(job, Utc::now())
    }

    pub fn observe_at(&self, job: &mut Job, now: DateTime<Utc>) -> JobPhase {
        if !job.is_terminal() && job.is_past_expiry(now) {
            tracing::info!(job_id = job.id, from = %job.phase, "job expired");
            Self::record(job, JobPhase::Expired, None, now);
        }
        job.phase
    }

    /// Apply every applicable approved memo until the phase settles.
    ///
    /// Returns the transitions made, including a lazy expiry.
    pub fn advance(&self, job: &mut Job) -> Vec<PhaseChange> {
        self.advance_at(job, Utc::now())
    }

    pub fn advance_at(&self, job: &mut Job, now: DateTime<Utc>) -> Vec<PhaseChange> {
        let before = job.history.len();
        self.observe_at(job, now);
        self.settle(job, true);
        job.history[before..].to_vec()
    }

    /// Apply approved memos in arrival order until none applies.
    pub(crate) fn settle(&self, job: &mut Job, fire_hooks: bool) {
        loop {
            if job.is_terminal() {
                return;
            }
            let candidate = job
                .memos
                .iter()
                .filter(|m| m.is_approved() && !job.consumed.contains(&m.id))
                .filter(|m| job.phase.can_transition_to(m.next_phase))
                .map(|m| m.id)
                .find(|&id| self.check(job, id).is_ok());

            match candidate {
                Some(memo_id) => {
                    // check passed, so apply cannot fail
                    if self.apply_memo(job, memo_id, fire_hooks).is_err() {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    fn invalid(job: &Job, to: JobPhase, reason: impl Into<String>) -> AgoraError {
        AgoraError::InvalidTransition {
            job_id: job.id,
            from: job.phase,
            to,
            reason: reason.into(),
        }
    }

    /// Validate a transition without mutating the job.
    fn check(&self, job: &Job, memo_id: MemoId) -> Result<JobPhase> {
        let memo = job
            .memos
            .get(memo_id)
            .ok_or_else(|| AgoraError::memo_not_found(memo_id))?;
        let target = memo.next_phase;

        if !memo.is_approved() {
            return Err(Self::invalid(
                job,
                target,
                format!("memo {} is {}", memo_id, memo.status),
            ));
        }
        if !job.phase.can_transition_to(target) {
            return Err(Self::invalid(job, target, "phase is not reachable"));
        }
        if let Some(latest) = job.memos.latest_approved_for(target) {
            if latest.id != memo_id {
                return Err(Self::invalid(
                    job,
                    target,
                    format!("memo {} is superseded by memo {}", memo_id, latest.id),
                ));
            }
        }
        if !job.parties.authorizes(&memo.sender, target) {
            return Err(Self::invalid(
                job,
                target,
                format!("{} may not propose {}", memo.sender, target),
            ));
        }
        Ok(target)
    }

    fn apply_memo(&self, job: &mut Job, memo_id: MemoId, fire_hooks: bool) -> Result<JobPhase> {
        if job.consumed.contains(&memo_id) {
            return Ok(job.phase);
        }
        let target = self.check(job, memo_id)?;

        tracing::info!(job_id = job.id, memo_id, from = %job.phase, to = %target, "phase transition");
        Self::record(job, target, Some(memo_id), Utc::now());

        if fire_hooks && target == JobPhase::Evaluation {
            if let Some(hook) = &self.hook {
                hook.on_evaluation(job);
            }
        }
        Ok(job.phase)
    }

    fn record(job: &mut Job, to: JobPhase, memo_id: Option<MemoId>, at: DateTime<Utc>) {
        job.history.push(PhaseChange {
            from: job.phase,
            to,
            memo_id,
            at,
        });
        if let Some(id) = memo_id {
            job.consumed.insert(id);
        }
        job.phase = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Parties;
    use agora_core::{Memo, MemoType};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CLIENT: &str = "0xclient";
    const PROVIDER: &str = "0xprovider";

    fn new_job(machine: &JobStateMachine) -> Job {
        let spec = JobSpec::new(1, Parties::new(CLIENT, PROVIDER), dec!(10), "0xusdc")
            .expires_at(Utc::now() + Duration::days(1));
        machine.create(spec).unwrap()
    }

    fn approved(job: &mut Job, id: MemoId, next: JobPhase, sender: &str) {
        job.append_memo(Memo::new(id, 1, MemoType::Message, next, sender, ""))
            .unwrap();
        job.resolve_memo(id, true, None).unwrap();
    }

    #[test]
    fn test_happy_path() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);

        approved(&mut job, 1, JobPhase::Negotiation, CLIENT);
        assert_eq!(machine.apply(&mut job, 1).unwrap(), JobPhase::Negotiation);
        approved(&mut job, 2, JobPhase::Transaction, PROVIDER);
        assert_eq!(machine.apply(&mut job, 2).unwrap(), JobPhase::Transaction);
        approved(&mut job, 3, JobPhase::Evaluation, CLIENT);
        assert_eq!(machine.apply(&mut job, 3).unwrap(), JobPhase::Evaluation);
        approved(&mut job, 4, JobPhase::Completed, PROVIDER);
        assert_eq!(machine.apply(&mut job, 4).unwrap(), JobPhase::Completed);

        assert_eq!(job.history().len(), 4);
        assert!(job.is_terminal());
    }

    #[test]
    fn test_reapply_is_noop() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);
        approved(&mut job, 1, JobPhase::Negotiation, CLIENT);

        machine.apply(&mut job, 1).unwrap();
        assert_eq!(machine.apply(&mut job, 1).unwrap(), JobPhase::Negotiation);
        assert_eq!(job.history().len(), 1);
    }

    #[test]
    fn test_skipping_a_phase_fails() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);
        approved(&mut job, 1, JobPhase::Transaction, PROVIDER);

        let err = machine.apply(&mut job, 1).unwrap_err();
        assert!(matches!(
            err,
            AgoraError::InvalidTransition {
                from: JobPhase::Request,
                to: JobPhase::Transaction,
                ..
            }
        ));
        assert_eq!(job.phase(), JobPhase::Request);
    }

    #[test]
    fn test_pending_memo_does_not_transition() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);
        job.append_memo(Memo::new(1, 1, MemoType::Message, JobPhase::Negotiation, CLIENT, ""))
            .unwrap();

        assert!(machine.apply(&mut job, 1).is_err());
        assert_eq!(job.phase(), JobPhase::Request);
    }

    #[test]
    fn test_unauthorized_sender() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);
        approved(&mut job, 1, JobPhase::Negotiation, PROVIDER);
        assert!(machine.apply(&mut job, 1).is_err());

        approved(&mut job, 2, JobPhase::Rejected, "0xstranger");
        assert!(machine.apply(&mut job, 2).is_err());
        assert_eq!(job.phase(), JobPhase::Request);
    }

    #[test]
    fn test_superseded_memo() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);
        approved(&mut job, 1, JobPhase::Negotiation, CLIENT);
        approved(&mut job, 2, JobPhase::Negotiation, CLIENT);

        assert!(machine.apply(&mut job, 1).is_err());
        assert_eq!(machine.apply(&mut job, 2).unwrap(), JobPhase::Negotiation);
    }

    #[test]
    fn test_rejection_from_any_phase() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);
        approved(&mut job, 1, JobPhase::Negotiation, CLIENT);
        machine.apply(&mut job, 1).unwrap();
        approved(&mut job, 2, JobPhase::Rejected, PROVIDER);

        assert_eq!(machine.apply(&mut job, 2).unwrap(), JobPhase::Rejected);

        approved(&mut job, 3, JobPhase::Transaction, PROVIDER);
        assert!(machine.apply(&mut job, 3).is_err());
    }

    #[test]
    fn test_expiry_wins_over_approved_memo() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);
        approved(&mut job, 1, JobPhase::Negotiation, CLIENT);
        machine.apply(&mut job, 1).unwrap();
        approved(&mut job, 2, JobPhase::Transaction, PROVIDER);

        let later = Utc::now() + Duration::days(2);
        assert_eq!(machine.observe_at(&mut job, later), JobPhase::Expired);
        assert!(machine.apply_at(&mut job, 2, later).is_err());
        assert_eq!(job.history().last().unwrap().memo_id, None);
    }

    #[test]
    fn test_advance_applies_in_order() {
        let machine = JobStateMachine::new();
        let mut job = new_job(&machine);
        // approvals observed out of phase order
        approved(&mut job, 1, JobPhase::Negotiation, CLIENT);
        approved(&mut job, 2, JobPhase::Transaction, PROVIDER);
        approved(&mut job, 3, JobPhase::Evaluation, CLIENT);

        let changes = machine.advance(&mut job);
        assert_eq!(changes.len(), 3);
        assert_eq!(job.phase(), JobPhase::Evaluation);
        assert!(machine.advance(&mut job).is_empty());
    }

    struct CountingHook(AtomicUsize);

    impl EvaluationHook for CountingHook {
        fn on_evaluation(&self, _job: &Job) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_evaluation_hook_fires_once() {
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let machine = JobStateMachine::new().with_evaluation_hook(hook.clone());
        let mut job = new_job(&machine);
        approved(&mut job, 1, JobPhase::Negotiation, CLIENT);
        approved(&mut job, 2, JobPhase::Transaction, PROVIDER);
        approved(&mut job, 3, JobPhase::Evaluation, CLIENT);

        machine.advance(&mut job);
        machine.apply(&mut job, 3).unwrap();
        machine.advance(&mut job);
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_rejects_self_dealing() {
        let machine = JobStateMachine::new();
        let spec = JobSpec::new(1, Parties::new(CLIENT, CLIENT), dec!(1), "0xusdc");
        assert!(matches!(machine.create(spec), Err(AgoraError::InvalidRequest(_))));
    }
}
