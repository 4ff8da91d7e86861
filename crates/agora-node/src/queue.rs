//! De-duplicating work queue keyed by job id.
//!
//! A job id is in at most one of three places: queued, in flight, or
//! deferred. A push for a queued job replaces its payload. A push for an
//! in-flight job is deferred and re-queued when the job completes, so one
//! job is never processed by two workers at once.

use std::collections::{HashMap, HashSet, VecDeque};

use agora_core::{JobId, JobRecord};
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct QueueState {
    order: VecDeque<JobId>,
    payloads: HashMap<JobId, Option<JobRecord>>,
    in_flight: HashSet<JobId>,
    deferred: HashMap<JobId, Option<JobRecord>>,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Added to the back of the queue.
    Queued,
    /// Already queued; payload replaced.
    Merged,
    /// Being processed; re-queued once done.
    Deferred,
    /// Queue full.
    Dropped,
}

pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Schedule `job_id`. A newer record replaces an older one; `None` keeps
    /// any record already pending.
    pub async fn push(&self, job_id: JobId, record: Option<JobRecord>) -> Enqueued {
        let mut state = self.state.lock().await;

        if let Some(pending) = state.payloads.get_mut(&job_id) {
            if record.is_some() {
                *pending = record;
            }
            return Enqueued::Merged;
        }

        if state.in_flight.contains(&job_id) {
            let slot = state.deferred.entry(job_id).or_insert(None);
            if record.is_some() {
                *slot = record;
            }
            return Enqueued::Deferred;
        }

        if state.order.len() >= self.capacity {
            tracing::warn!(job_id, capacity = self.capacity, "job queue full, dropping update");
            return Enqueued::Dropped;
        }

        state.order.push_back(job_id);
        state.payloads.insert(job_id, record);
        drop(state);
        self.notify.notify_one();
        Enqueued::Queued
    }

    /// Wait for the next job and mark it in flight.
    pub async fn pop(&self) -> (JobId, Option<JobRecord>) {
        loop {
            if let Some(next) = self.try_pop().await {
                return next;
            }
            self.notify.notified().await;
        }
    }

    /// Take the next job without waiting.
    pub async fn try_pop(&self) -> Option<(JobId, Option<JobRecord>)> {
        let mut state = self.state.lock().await;
        let job_id = state.order.pop_front()?;
        let record = state.payloads.remove(&job_id).flatten();
        state.in_flight.insert(job_id);
        Some((job_id, record))
    }

    /// Mark `job_id` done, re-queueing it if an update arrived meanwhile.
    pub async fn complete(&self, job_id: JobId) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&job_id);
        if let Some(record) = state.deferred.remove(&job_id) {
            state.order.push_back(job_id);
            state.payloads.insert(job_id, record);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Number of queued jobs, excluding in-flight ones.
    pub async fn len(&self) -> usize {
        self.state.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
