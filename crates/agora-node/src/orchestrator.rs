//! Job orchestration loop.
//!
//! Job records arrive from two sources, periodic polls of the registry and
//! push events. Both feed one de-duplicating [`JobQueue`]. Workers take jobs
//! off the queue, merge the record into the local job, advance the state
//! machine and invoke the user's [`JobHandler`] when the job needs us.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use agora_core::{
    Address, AgoraError, FareAmount, JobEvent, JobId, JobPhase, JobRecord, JobRequest,
    LedgerGateway, Memo, Offering, RegistryService, Result,
};
use agora_negotiate::{FareBook, JobSession};
use agora_sdk::JobEventStream;
use agora_state::{replay, EvaluationHook, Job, JobSpec, JobStateMachine, Parties, PhaseWatch};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::handler::{JobHandler, OutcomePolicy, OutcomeStats, TaskAction};
use crate::queue::{Enqueued, JobQueue};
use crate::retry::{RetryingLedger, RetryingRegistry};

/// Callback a job needs from us right now.
#[derive(Debug, Clone, PartialEq)]
enum Callback {
    NewTask(Option<Memo>),
    Evaluate,
}

/// Jobs waiting on this wallet's verdict. Filled by the state machine when a
/// job enters EVALUATION, drained once the verdict is signed.
struct EvaluationTracker {
    wallet: Address,
    awaiting: DashSet<JobId>,
}

impl EvaluationHook for EvaluationTracker {
    fn on_evaluation(&self, job: &Job) {
        if job.parties.evaluator_or_client() == &self.wallet {
            debug!(job_id = job.id, "awaiting our evaluation");
            self.awaiting.insert(job.id);
        }
    }
}

/// Drives jobs for one wallet.
pub struct JobOrchestrator {
    wallet: Address,
    registry: Arc<dyn RegistryService>,
    ledger: Arc<dyn LedgerGateway>,
    session: JobSession,
    machine: JobStateMachine,
    handler: Arc<dyn JobHandler>,
    queue: JobQueue,
    jobs: DashMap<JobId, Arc<Mutex<Job>>>,
    watch: PhaseWatch,
    policy: OutcomePolicy,
    stats: RwLock<OutcomeStats>,
    counted: Mutex<HashSet<JobId>>,
    evaluations: Arc<EvaluationTracker>,
    workers: Arc<Semaphore>,
    poll_interval: Duration,
    page_size: u32,
    job_expiry: chrono::Duration,
}

impl JobOrchestrator {
    /// Build an orchestrator. Ledger and registry calls are wrapped in the
    /// configured retry policy.
    pub fn new(
        config: &NodeConfig,
        wallet: Address,
        ledger: Arc<dyn LedgerGateway>,
        registry: Arc<dyn RegistryService>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let retry = config.retry.policy();
        let ledger: Arc<dyn LedgerGateway> = Arc::new(RetryingLedger::new(ledger, retry));
        let registry: Arc<dyn RegistryService> = Arc::new(RetryingRegistry::new(registry, retry));
        let fares = Arc::new(FareBook::new(config.network.base_fare(), ledger.clone()));
        let evaluations = Arc::new(EvaluationTracker {
            wallet: wallet.clone(),
            awaiting: DashSet::new(),
        });

        Self {
            session: JobSession::new(wallet.clone(), ledger.clone(), fares),
            wallet,
            registry,
            ledger,
            machine: JobStateMachine::new().with_evaluation_hook(evaluations.clone()),
            handler,
            queue: JobQueue::new(config.queue_capacity),
            jobs: DashMap::new(),
            watch: PhaseWatch::default(),
            policy: config.outcome_policy,
            stats: RwLock::new(OutcomeStats::default()),
            counted: Mutex::new(HashSet::new()),
            evaluations,
            workers: Arc::new(Semaphore::new(config.concurrency.max(1))),
            poll_interval: config.poll_interval(),
            page_size: config.page_size.max(1),
            job_expiry: config.default_job_expiry(),
        }
    }

    pub fn wallet(&self) -> &Address {
        &self.wallet
    }

    pub fn registry(&self) -> Arc<dyn RegistryService> {
        self.registry.clone()
    }

    pub fn watch(&self) -> &PhaseWatch {
        &self.watch
    }

    pub fn fares(&self) -> &FareBook {
        self.session.fares()
    }

    /// Run the poll loop and the worker pool until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        info!("🔧 Orchestrator started for {}", self.wallet);
        tokio::spawn(self.clone().poll_loop());

        loop {
            let (job_id, record) = self.queue.pop().await;
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                return;
            };
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.process(job_id, record).await {
                    warn!(job_id, error = %e, "job processing failed");
                }
                this.queue.complete(job_id).await;
                drop(permit);
            });
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(count) => debug!(count, "polled active jobs"),
                Err(e) => warn!(error = %e, "polling active jobs failed"),
            }
        }
    }

    /// Feed push events into the queue until the stream closes.
    pub async fn consume(self: Arc<Self>, mut stream: JobEventStream) {
        while let Some(event) = stream.next().await {
            self.ingest(event).await;
        }
        warn!("push stream ended");
    }

    /// Queue a pushed job record.
    pub async fn ingest(&self, event: JobEvent) -> Enqueued {
        debug!(job_id = event.job.id, event = ?event.event, "push event");
        self.queue.push(event.job.id, Some(event.job)).await
    }

    /// Queue a job to be fetched and processed.
    pub async fn enqueue(&self, job_id: JobId, record: Option<JobRecord>) -> Enqueued {
        self.queue.push(job_id, record).await
    }

    /// Page through the registry's active jobs and queue each one.
    ///
    /// Locally known jobs that dropped out of the active set are queued for
    /// a direct fetch so their final phase is observed.
    pub async fn poll_once(&self) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut page = 1;
        loop {
            let records = self.registry.active_jobs(page, self.page_size).await?;
            let count = records.len();
            for record in records {
                seen.insert(record.id);
                self.queue.push(record.id, Some(record)).await;
            }
            if count < self.page_size as usize {
                break;
            }
            page += 1;
        }

        let mut stale = Vec::new();
        for entry in self.jobs.iter() {
            if !seen.contains(entry.key()) {
                stale.push((*entry.key(), entry.value().clone()));
            }
        }
        for (job_id, job) in stale {
            if !job.lock().await.is_terminal() {
                self.queue.push(job_id, None).await;
            }
        }
        Ok(seen.len())
    }

    /// Open a job with `request.provider` and track it locally in REQUEST.
    pub async fn initiate(&self, request: JobRequest) -> Result<JobId> {
        let started = self.session.initiate(&request).await?;

        let mut parties = Parties::new(self.wallet.clone(), request.provider.clone());
        if let Some(evaluator) = &request.evaluator {
            parties = parties.with_evaluator(evaluator.clone());
        }
        let spec = JobSpec::new(
            started.job_id,
            parties,
            request.price,
            request.fare_amount.fare.token.clone(),
        )
        .expires_at(request.expires_at);
        let job = self.machine.create(spec)?;
        self.jobs.insert(started.job_id, Arc::new(Mutex::new(job)));

        info!("📨 Job {} initiated with {}", started.job_id, request.provider);
        Ok(started.job_id)
    }

    /// Build a request priced in the base fare.
    pub fn request(
        &self,
        provider: Address,
        evaluator: Option<Address>,
        price: Decimal,
        requirement: serde_json::Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<JobRequest> {
        let fare_amount = FareAmount::from_human(price, self.fares().base().clone())?;
        Ok(JobRequest {
            provider,
            evaluator,
            price,
            fare_amount,
            requirement,
            expires_at: expires_at.unwrap_or_else(|| Utc::now() + self.job_expiry),
        })
    }

    /// Build a request for one of a provider's offerings.
    pub fn request_for_offering(
        &self,
        offering: &Offering,
        requirement: serde_json::Value,
        evaluator: Option<Address>,
    ) -> Result<JobRequest> {
        offering.job_request(
            requirement,
            self.fares().base(),
            evaluator,
            Utc::now() + self.job_expiry,
        )
    }

    /// Snapshot of a local job. Observing it applies a lapsed expiry.
    pub async fn get_job(&self, job_id: JobId) -> Option<Job> {
        let entry = self.jobs.get(&job_id).map(|e| e.value().clone())?;
        let mut job = entry.lock().await;
        let before = job.history().len();
        self.machine.observe(&mut job);
        self.watch.publish(job.id, &job.history()[before..]);
        let snapshot = job.clone();
        drop(job);

        self.record_outcome(&snapshot).await;
        Some(snapshot)
    }

    /// Snapshots of every local job, by id.
    pub async fn list_jobs(&self) -> Vec<Job> {
        let entries: Vec<Arc<Mutex<Job>>> = self.jobs.iter().map(|e| e.value().clone()).collect();
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            jobs.push(entry.lock().await.clone());
        }
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub async fn stats(&self) -> OutcomeStats {
        self.stats.read().await.clone()
    }

    /// Process one job: sync, advance, call back, act.
    ///
    /// Handler failures are logged and leave the job untouched. A successful
    /// action re-queues the job so the memos it produced are picked up.
    pub async fn process(&self, job_id: JobId, record: Option<JobRecord>) -> Result<()> {
        let record = match record {
            Some(record) => record,
            None => self.registry.get_job_by_id(job_id).await?,
        };
        let job = self.sync(&record).await?;

        let Some(callback) = self.select(&job).await else {
            return Ok(());
        };

        let acted = match callback {
            Callback::Evaluate => self.evaluate(&job).await?,
            Callback::NewTask(memo) => {
                let action = match self.handler.on_new_task(&job, memo.as_ref()).await {
                    Ok(action) => action,
                    Err(e) => {
                        warn!(job_id, error = %e, "on_new_task failed");
                        return Ok(());
                    }
                };
                self.act(&job, memo.as_ref(), action).await?
            }
        };

        if acted {
            self.queue.push(job_id, None).await;
        }
        Ok(())
    }

    async fn sync(&self, record: &JobRecord) -> Result<Job> {
        let entry = match self.jobs.get(&record.id).map(|e| e.value().clone()) {
            Some(entry) => entry,
            None => {
                let job = self.machine.create(JobSpec::from(record))?;
                self.jobs
                    .entry(record.id)
                    .or_insert_with(|| Arc::new(Mutex::new(job)))
                    .value()
                    .clone()
            }
        };

        let mut job = entry.lock().await;
        let changed = job.sync_from(record)?;
        let changes = self.machine.advance(&mut job);
        if changed > 0 {
            debug!(job_id = job.id, changed, "memos synced");
        }
        for change in &changes {
            info!("🔁 Job {} {} -> {}", job.id, change.from, change.to);
        }
        self.watch.publish(job.id, &changes);
        let snapshot = job.clone();
        drop(job);

        if !changes.is_empty() {
            match replay::is_consistent(&snapshot) {
                Ok(true) => {}
                Ok(false) => warn!(job_id = snapshot.id, phase = %snapshot.phase(), "phase disagrees with memo replay"),
                Err(e) => warn!(job_id = snapshot.id, error = %e, "memo replay failed"),
            }
        }

        self.record_outcome(&snapshot).await;
        Ok(snapshot)
    }

    async fn select(&self, job: &Job) -> Option<Callback> {
        if job.is_terminal() {
            return None;
        }
        let delivery = job.memos().latest_for(JobPhase::Completed);

        if job.phase() == JobPhase::Evaluation
            && delivery.is_some_and(|m| m.is_pending())
            && self.evaluations.awaiting.contains(&job.id)
        {
            return Some(Callback::Evaluate);
        }

        if let Some(memo) = job.latest_memo() {
            if memo.is_pending()
                && memo.sender != self.wallet
                && memo.next_phase != JobPhase::Completed
                && job.parties.signer_for(memo.next_phase) == Some(&self.wallet)
            {
                return Some(Callback::NewTask(Some(memo.clone())));
            }
        }

        // Paid, but the deliverable never made it out.
        if job.phase() == JobPhase::Evaluation && job.parties.provider == self.wallet && delivery.is_none() {
            return Some(Callback::NewTask(None));
        }
        None
    }

    async fn evaluate(&self, job: &Job) -> Result<bool> {
        let accept = match self.handler.on_evaluate(job, job.deliverable()).await {
            Ok(accept) => accept,
            Err(e) => {
                warn!(job_id = job.id, error = %e, "on_evaluate failed");
                return Ok(false);
            }
        };
        self.session.evaluate(job, accept, None).await?;
        self.evaluations.awaiting.remove(&job.id);
        info!("⚖️ Job {} evaluated: {}", job.id, if accept { "accepted" } else { "rejected" });
        Ok(true)
    }

    async fn act(&self, job: &Job, memo: Option<&Memo>, action: TaskAction) -> Result<bool> {
        match action {
            TaskAction::Ignore => return Ok(false),
            TaskAction::Accept { reason } => match memo {
                Some(memo) if memo.next_phase == JobPhase::Negotiation => {
                    self.session.accept(job, reason.as_deref()).await?;
                }
                Some(memo) => {
                    self.ledger.sign_memo(memo.id, true, reason.as_deref()).await?;
                }
                None => {
                    return Err(AgoraError::InvalidRequest(format!(
                        "job {} has no memo to accept",
                        job.id
                    )))
                }
            },
            TaskAction::AcceptWithFunds { amount, token, reason } => match memo {
                Some(memo) if memo.next_phase == JobPhase::Negotiation => {
                    self.session
                        .accept_with_funds(job, amount, &token, reason.as_deref())
                        .await?;
                    info!("💸 Job {} accepted, requesting {} of {}", job.id, amount, token);
                }
                _ => {
                    return Err(AgoraError::InvalidRequest(format!(
                        "job {} has no request to accept with funds",
                        job.id
                    )))
                }
            },
            TaskAction::Reject { reason } => {
                self.session.reject(job, reason.as_deref()).await?;
            }
            TaskAction::Pay { reason } => {
                self.session.pay_and_accept(job, reason.as_deref()).await?;
            }
            TaskAction::Deliver(deliverable) => {
                self.session.deliver(job, &deliverable).await?;
            }
        }
        debug!(job_id = job.id, "task action applied");
        Ok(true)
    }

    async fn record_outcome(&self, job: &Job) {
        let Some(pass) = self.policy.is_pass(job) else {
            return;
        };
        self.evaluations.awaiting.remove(&job.id);
        if !self.counted.lock().await.insert(job.id) {
            return;
        }
        self.stats
            .write()
            .await
            .record(pass, &job.roles_of(&self.wallet));
        info!(
            "🏁 Job {} finished in {} ({})",
            job.id,
            job.phase(),
            if pass { "pass" } else { "fail" }
        );
    }

    /// Process queued jobs until the queue is empty.
    #[cfg(test)]
    pub(crate) async fn drain(&self) {
        while let Some((job_id, record)) = self.queue.try_pop().await {
            if let Err(e) = self.process(job_id, record).await {
                warn!(job_id, error = %e, "job processing failed");
            }
            self.queue.complete(job_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_negotiate::Deliverable;
    use agora_state::{PhaseFilter, SandboxLedger};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CLIENT: &str = "0xclient";
    const PROVIDER: &str = "0xprovider";

    /// Accepts requests and delivers a fixed report once paid.
    struct Reporter;

    #[async_trait]
    impl JobHandler for Reporter {
        async fn on_new_task(&self, _job: &Job, memo: Option<&Memo>) -> anyhow::Result<TaskAction> {
            Ok(match memo.map(|m| m.next_phase) {
                Some(JobPhase::Negotiation) => TaskAction::Accept { reason: None },
                Some(JobPhase::Evaluation) | None => {
                    TaskAction::Deliver(Deliverable::url("https://example.org/report"))
                }
                _ => TaskAction::Ignore,
            })
        }

        async fn on_evaluate(&self, _job: &Job, _deliverable: Option<&str>) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    struct Failing;

    #[async_trait]
    impl JobHandler for Failing {
        async fn on_new_task(&self, _job: &Job, _memo: Option<&Memo>) -> anyhow::Result<TaskAction> {
            anyhow::bail!("handler crashed")
        }

        async fn on_evaluate(&self, _job: &Job, _deliverable: Option<&str>) -> anyhow::Result<bool> {
            anyhow::bail!("handler crashed")
        }
    }

    /// Evaluator that rejects every deliverable.
    struct Picky;

    #[async_trait]
    impl JobHandler for Picky {
        async fn on_new_task(&self, _job: &Job, memo: Option<&Memo>) -> anyhow::Result<TaskAction> {
            Ok(match memo.map(|m| m.next_phase) {
                Some(JobPhase::Transaction) => TaskAction::Pay { reason: None },
                _ => TaskAction::Ignore,
            })
        }

        async fn on_evaluate(&self, _job: &Job, _deliverable: Option<&str>) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    /// Provider that asks for extra funds in the base fare.
    struct Upsell;

    #[async_trait]
    impl JobHandler for Upsell {
        async fn on_new_task(&self, job: &Job, memo: Option<&Memo>) -> anyhow::Result<TaskAction> {
            Ok(match memo.map(|m| m.next_phase) {
                Some(JobPhase::Negotiation) => TaskAction::AcceptWithFunds {
                    amount: dec!(0.5),
                    token: job.price_token.clone(),
                    reason: Some("needs a second source".to_string()),
                },
                _ => TaskAction::Ignore,
            })
        }

        async fn on_evaluate(&self, _job: &Job, _deliverable: Option<&str>) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    /// Holds each task briefly and records how many ran at once.
    #[derive(Default)]
    struct Overlap {
        active: std::sync::Mutex<HashSet<JobId>>,
        seen: std::sync::Mutex<HashSet<JobId>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        same_job_overlaps: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Overlap {
        async fn on_new_task(&self, job: &Job, _memo: Option<&Memo>) -> anyhow::Result<TaskAction> {
            if !self.active.lock().unwrap().insert(job.id) {
                self.same_job_overlaps.fetch_add(1, Ordering::SeqCst);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(50)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.active.lock().unwrap().remove(&job.id);
            self.seen.lock().unwrap().insert(job.id);
            Ok(TaskAction::Ignore)
        }

        async fn on_evaluate(&self, _job: &Job, _deliverable: Option<&str>) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn config(policy: OutcomePolicy) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.retry.base_delay_ms = 1;
        config.outcome_policy = policy;
        config
    }

    fn orchestrator(sandbox: &SandboxLedger, wallet: &str, handler: Arc<dyn JobHandler>, policy: OutcomePolicy) -> JobOrchestrator {
        let handle = Arc::new(sandbox.for_wallet(wallet));
        JobOrchestrator::new(&config(policy), Address::new(wallet), handle.clone(), handle, handler)
    }

    async fn round(orchestrators: &[&JobOrchestrator]) {
        for orchestrator in orchestrators {
            orchestrator.poll_once().await.unwrap();
            orchestrator.drain().await;
        }
    }

    async fn start(client: &JobOrchestrator) -> JobId {
        let request = client
            .request(
                Address::new(PROVIDER),
                None,
                dec!(2),
                serde_json::json!({"name": "weather", "requirement": "Oslo"}),
                None,
            )
            .unwrap();
        client.initiate(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_job_between_two_nodes() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(crate::handler::DefaultHandler::new(true)), OutcomePolicy::CompletedOnly);
        let provider = orchestrator(&sandbox, PROVIDER, Arc::new(Reporter), OutcomePolicy::CompletedOnly);

        let job_id = start(&client).await;
        assert_eq!(client.get_job(job_id).await.unwrap().phase(), JobPhase::Request);

        for _ in 0..4 {
            round(&[&provider, &client]).await;
        }

        let done = client.get_job(job_id).await.unwrap();
        assert_eq!(done.phase(), JobPhase::Completed);
        assert!(done.deliverable().unwrap().contains("example.org"));
        assert_eq!(provider.get_job(job_id).await.unwrap().phase(), JobPhase::Completed);

        assert_eq!(client.stats().await.passed, 1);
        assert_eq!(client.stats().await.as_client, 1);
        assert_eq!(provider.stats().await.as_provider, 1);

        let approvals = sandbox.approvals().await;
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].2, 2_000_000);
    }

    #[tokio::test]
    async fn test_evaluator_rejection_and_outcome_policy() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);
        let provider = orchestrator(&sandbox, PROVIDER, Arc::new(Reporter), OutcomePolicy::ProviderAccepted);

        let job_id = start(&client).await;
        for _ in 0..4 {
            round(&[&provider, &client]).await;
        }

        assert_eq!(client.get_job(job_id).await.unwrap().phase(), JobPhase::Rejected);
        assert_eq!(client.stats().await.failed, 1);
        assert_eq!(provider.stats().await.passed, 1);
    }

    #[tokio::test]
    async fn test_handler_failure_leaves_job_in_place() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);
        let provider = orchestrator(&sandbox, PROVIDER, Arc::new(Failing), OutcomePolicy::CompletedOnly);

        let job_id = start(&client).await;
        round(&[&provider]).await;

        let job = provider.get_job(job_id).await.unwrap();
        assert_eq!(job.phase(), JobPhase::Request);
        assert!(job.latest_memo().unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_refuses_own_wallet_as_provider() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);
        let request = client
            .request(Address::new(CLIENT), None, dec!(1), serde_json::json!({}), None)
            .unwrap();
        assert!(matches!(client.initiate(request).await, Err(AgoraError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_expiry_observed_on_read() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);
        let request = client
            .request(
                Address::new(PROVIDER),
                None,
                dec!(1),
                serde_json::json!({}),
                Some(Utc::now() - chrono::Duration::seconds(5)),
            )
            .unwrap();
        let job_id = client.initiate(request).await.unwrap();

        let mut events = client.watch().subscribe(PhaseFilter::job(job_id)).await;
        let job = client.get_job(job_id).await.unwrap();
        assert_eq!(job.phase(), JobPhase::Expired);

        let event = events.receiver.recv().await.unwrap();
        assert_eq!(event.to, JobPhase::Expired);
        assert_eq!(client.stats().await.failed, 1);
    }

    #[tokio::test]
    async fn test_push_event_is_processed() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);
        let provider = orchestrator(&sandbox, PROVIDER, Arc::new(Reporter), OutcomePolicy::CompletedOnly);
        let job_id = start(&client).await;

        let record = sandbox.get_job_by_id(job_id).await.unwrap();
        let event = JobEvent {
            event: agora_core::JobEventKind::NewTask,
            job: record,
        };
        assert_eq!(provider.ingest(event).await, Enqueued::Queued);
        provider.drain().await;

        assert_eq!(provider.get_job(job_id).await.unwrap().phase(), JobPhase::Negotiation);
    }

    #[tokio::test]
    async fn test_evaluation_tracked_through_hook() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);
        let provider = orchestrator(&sandbox, PROVIDER, Arc::new(Reporter), OutcomePolicy::CompletedOnly);

        let job_id = start(&client).await;
        round(&[&provider, &client]).await;
        round(&[&provider]).await;
        assert!(!provider.evaluations.awaiting.contains(&job_id));

        // a node that never saw the job still owes the verdict
        let restarted = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);
        let record = sandbox.get_job_by_id(job_id).await.unwrap();
        let job = restarted.sync(&record).await.unwrap();
        assert_eq!(job.phase(), JobPhase::Evaluation);
        assert!(restarted.evaluations.awaiting.contains(&job_id));

        restarted.process(job_id, None).await.unwrap();
        assert!(!restarted.evaluations.awaiting.contains(&job_id));
        restarted.drain().await;
        assert_eq!(restarted.get_job(job_id).await.unwrap().phase(), JobPhase::Rejected);
    }

    #[tokio::test]
    async fn test_accept_with_funds_action() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);
        let provider = orchestrator(&sandbox, PROVIDER, Arc::new(Upsell), OutcomePolicy::CompletedOnly);

        let job_id = start(&client).await;
        round(&[&provider, &client]).await;

        let job = client.get_job(job_id).await.unwrap();
        assert_eq!(job.phase(), JobPhase::Transaction);
        let request = job
            .memos()
            .iter()
            .find(|m| m.memo_type == agora_core::MemoType::PayableRequest)
            .unwrap();
        assert!(request.expiry.is_some());

        let approvals = sandbox.approvals().await;
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].2, 2_500_000);
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency_per_job() {
        let sandbox = SandboxLedger::new(CLIENT);
        let client = orchestrator(&sandbox, CLIENT, Arc::new(Picky), OutcomePolicy::CompletedOnly);

        let handler = Arc::new(Overlap::default());
        let mut config = config(OutcomePolicy::CompletedOnly);
        config.concurrency = 2;
        let handle = Arc::new(sandbox.for_wallet(PROVIDER));
        let provider = Arc::new(JobOrchestrator::new(
            &config,
            Address::new(PROVIDER),
            handle.clone(),
            handle,
            handler.clone(),
        ));

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(start(&client).await);
        }

        let worker = tokio::spawn(provider.clone().run());
        for &job_id in &ids {
            let record = sandbox.get_job_by_id(job_id).await.unwrap();
            provider.enqueue(job_id, Some(record.clone())).await;
            provider.enqueue(job_id, Some(record)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        for &job_id in &ids {
            provider.enqueue(job_id, None).await;
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.seen.lock().unwrap().len() < ids.len() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        worker.abort();

        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(handler.same_job_overlaps.load(Ordering::SeqCst), 0);
    }
}
