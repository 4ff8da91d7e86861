//! Phase-change subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use agora_core::{JobId, JobPhase, MemoId};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::job::PhaseChange;

/// A job moved between phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChangeEvent {
    pub job_id: JobId,
    pub from: JobPhase,
    pub to: JobPhase,
    /// Memo that drove the transition; `None` for expiry.
    pub memo_id: Option<MemoId>,
    pub timestamp: DateTime<Utc>,
}

impl PhaseChangeEvent {
    pub fn new(job_id: JobId, change: &PhaseChange) -> Self {
        Self {
            job_id,
            from: change.from,
            to: change.to,
            memo_id: change.memo_id,
            timestamp: change.at,
        }
    }
}

/// Filter for subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseFilter {
    /// Jobs to watch (None = all jobs).
    pub job_ids: Option<Vec<JobId>>,

    /// Target phases to watch (None = all phases).
    pub phases: Option<Vec<JobPhase>>,
}

impl PhaseFilter {
    /// Watch a single job.
    pub fn job(job_id: JobId) -> Self {
        Self {
            job_ids: Some(vec![job_id]),
            ..Default::default()
        }
    }

    /// Watch jobs entering any of `phases`.
    pub fn phases(phases: Vec<JobPhase>) -> Self {
        Self {
            phases: Some(phases),
            ..Default::default()
        }
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &PhaseChangeEvent) -> bool {
        if let Some(ref ids) = self.job_ids {
            if !ids.contains(&event.job_id) {
                return false;
            }
        }
        if let Some(ref phases) = self.phases {
            if !phases.contains(&event.to) {
                return false;
            }
        }
        true
    }
}

/// A subscription to phase changes.
pub struct PhaseSubscription {
    pub id: Uuid,
    pub filter: PhaseFilter,
    pub receiver: broadcast::Receiver<PhaseChangeEvent>,
}

impl PhaseSubscription {
    /// Matching events as a stream. Lagged receivers skip missed events.
    pub fn into_stream(self) -> impl Stream<Item = PhaseChangeEvent> + Send + 'static {
        let filter = self.filter;
        BroadcastStream::new(self.receiver).filter_map(move |item| {
            let event = item.ok().filter(|event| filter.matches(event));
            futures::future::ready(event)
        })
    }
}

/// Broadcast hub for phase changes.
#[derive(Clone)]
pub struct PhaseWatch {
    sender: broadcast::Sender<PhaseChangeEvent>,
    subscriptions: Arc<RwLock<HashMap<Uuid, PhaseFilter>>>,
}

impl PhaseWatch {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscribe(&self, filter: PhaseFilter) -> PhaseSubscription {
        let id = Uuid::new_v4();
        let receiver = self.sender.subscribe();
        self.subscriptions.write().await.insert(id, filter.clone());
        PhaseSubscription { id, filter, receiver }
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        self.subscriptions.write().await.remove(&id);
    }

    /// Publish the transitions of one job. Subscribers filter locally.
    pub fn publish(&self, job_id: JobId, changes: &[PhaseChange]) {
        for change in changes {
            // no receivers is fine
            let _ = self.sender.send(PhaseChangeEvent::new(job_id, change));
        }
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

impl Default for PhaseWatch {
    fn default() -> Self {
        Self::new(1000)
    }
}
