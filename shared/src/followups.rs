//! Best-effort bookkeeping that runs after a registration has succeeded.
//!
//! Follow-ups never fail the request that scheduled them. They are retried
//! according to a [`RetryPolicy`] and then logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::ids::{AllocatedId, IdAllocator};
use crate::store::{put_record, DocumentStore, StoreError, ACCOUNT_LINKS};
use crate::types::AccountLink;

#[derive(Debug, Clone)]
pub enum FollowUp {
    /// Record which user id an auth account belongs to.
    LinkAccount {
        account_id: String,
        link: AccountLink,
    },
    /// Write a read-then-write allocation back to its counter.
    CommitCounter(AllocatedId),
}

impl FollowUp {
    fn describe(&self) -> String {
        match self {
            FollowUp::LinkAccount { account_id, link } => {
                format!("link account {} to {}", account_id, link.user_id)
            }
            FollowUp::CommitCounter(allocated) => {
                format!("commit {} counter at {}", allocated.kind, allocated.sequence)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Clone)]
pub struct FollowUpRunner {
    store: Arc<dyn DocumentStore>,
    ids: IdAllocator,
    policy: RetryPolicy,
}

impl FollowUpRunner {
    pub fn new(store: Arc<dyn DocumentStore>, ids: IdAllocator, policy: RetryPolicy) -> Self {
        Self { store, ids, policy }
    }

    /// Run `follow_up` until it succeeds or the policy gives up. Returns
    /// whether it eventually succeeded.
    pub async fn run(&self, follow_up: &FollowUp) -> bool {
        let attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;

        for attempt in 1..=attempts {
            match self.apply(follow_up).await {
                Ok(()) => return true,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "Follow-up '{}' failed (attempt {}/{}): {}",
                        follow_up.describe(),
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    tracing::error!(
                        "Giving up on follow-up '{}' after {} attempts: {}",
                        follow_up.describe(),
                        attempts,
                        e
                    );
                }
            }
        }
        false
    }

    async fn apply(&self, follow_up: &FollowUp) -> Result<(), StoreError> {
        match follow_up {
            FollowUp::LinkAccount { account_id, link } => {
                put_record(self.store.as_ref(), ACCOUNT_LINKS, account_id, link).await
            }
            FollowUp::CommitCounter(allocated) => self.ids.commit(allocated).await,
        }
    }
}

enum WorkerMessage {
    Run(FollowUp),
    /// Answered once everything queued before it has run.
    Flush(oneshot::Sender<()>),
}

/// Sending side of a worker started with [`spawn_worker`].
#[derive(Clone)]
pub struct FollowUpQueue {
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl FollowUpQueue {
    pub fn push(&self, follow_up: FollowUp) {
        if let Err(e) = self.sender.send(WorkerMessage::Run(follow_up)) {
            if let WorkerMessage::Run(follow_up) = e.0 {
                tracing::error!("Follow-up worker is gone, dropping '{}'", follow_up.describe());
            }
        }
    }

    /// Wait until the worker has handled every follow-up pushed so far.
    /// Returns false if the worker is gone.
    pub async fn flush(&self) -> bool {
        let (ack, done) = oneshot::channel();
        if self.sender.send(WorkerMessage::Flush(ack)).is_err() {
            tracing::error!("Follow-up worker is gone, nothing to flush");
            return false;
        }
        done.await.is_ok()
    }
}

/// Where a registration sends its follow-ups.
#[derive(Clone)]
pub enum FollowUpDispatch {
    /// Run in the request path; failures are swallowed.
    Inline(FollowUpRunner),
    /// Hand to a background worker started with [`spawn_worker`].
    Queued(FollowUpQueue),
}

impl FollowUpDispatch {
    pub async fn dispatch(&self, follow_up: FollowUp) {
        match self {
            FollowUpDispatch::Inline(runner) => {
                runner.run(&follow_up).await;
            }
            FollowUpDispatch::Queued(queue) => queue.push(follow_up),
        }
    }

    /// No-op for inline dispatch.
    pub async fn flush(&self) {
        if let FollowUpDispatch::Queued(queue) = self {
            queue.flush().await;
        }
    }
}

/// Start a worker draining follow-ups in order. It exits once every queue
/// handle has been dropped.
pub fn spawn_worker(runner: FollowUpRunner) -> (FollowUpQueue, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<WorkerMessage>();
    let handle = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            match message {
                WorkerMessage::Run(follow_up) => {
                    runner.run(&follow_up).await;
                }
                WorkerMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        tracing::info!("Follow-up worker stopped");
    });
    (FollowUpQueue { sender }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{CounterKind, CounterMode};
    use crate::memory::MemoryStore;
    use crate::store::{get_record, COUNTERS};

    fn runner(store: Arc<MemoryStore>, policy: RetryPolicy) -> FollowUpRunner {
        let ids = IdAllocator::new(store.clone(), CounterMode::ReadThenWrite);
        FollowUpRunner::new(store, ids, policy)
    }

    fn link() -> FollowUp {
        FollowUp::LinkAccount {
            account_id: "acct-1".to_string(),
            link: AccountLink {
                user_id: "Us0000001a".to_string(),
                email: "ana@example.com".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn link_is_written_under_the_account_id() {
        let store = Arc::new(MemoryStore::new());
        assert!(runner(store.clone(), RetryPolicy::once()).run(&link()).await);

        let stored: Option<AccountLink> = get_record(store.as_ref(), ACCOUNT_LINKS, "acct-1")
            .await
            .unwrap();
        assert_eq!(stored.map(|l| l.user_id), Some("Us0000001a".to_string()));
    }

    #[tokio::test]
    async fn exhausted_retries_report_failure() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(COUNTERS).await;
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
        };
        let allocated = AllocatedId {
            kind: CounterKind::Users,
            sequence: 1,
            id: "Us0000001a".to_string(),
            committed: false,
        };

        let ok = runner(store, policy)
            .run(&FollowUp::CommitCounter(allocated))
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn queued_follow_ups_drain_before_the_worker_stops() {
        let store = Arc::new(MemoryStore::new());
        let (queue, handle) = spawn_worker(runner(store.clone(), RetryPolicy::once()));

        FollowUpDispatch::Queued(queue).dispatch(link()).await;
        // dispatch consumed the only queue handle, so the worker finishes after draining
        handle.await.unwrap();

        assert_eq!(store.ids(ACCOUNT_LINKS).await, vec!["acct-1".to_string()]);
    }

    #[tokio::test]
    async fn flush_waits_for_queued_follow_ups() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _handle) = spawn_worker(runner(store.clone(), RetryPolicy::once()));

        queue.push(link());
        assert!(queue.flush().await);

        assert_eq!(store.ids(ACCOUNT_LINKS).await, vec!["acct-1".to_string()]);
    }

    #[tokio::test]
    async fn flush_reports_a_stopped_worker() {
        let store = Arc::new(MemoryStore::new());
        let (queue, handle) = spawn_worker(runner(store, RetryPolicy::once()));
        handle.abort();
        let _ = handle.await;

        assert!(!queue.flush().await);
    }
}
