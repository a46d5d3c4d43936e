use crate::backoff::ItemBackoff;
use crate::config::BackoffConfig;
use nodeburst_core::WorkKey;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<WorkKey>,
    /// Keys that need processing: queued, or re-added while in flight
    dirty: HashSet<WorkKey>,
    /// Keys currently held by a worker
    processing: HashSet<WorkKey>,
    /// Consecutive failures per key, cleared by `forget`
    failures: HashMap<WorkKey, u32>,
    shutting_down: bool,
}

/// Deduplicating, rate-limited work queue
///
/// A key is never handed to two workers at once: adding a key that is in
/// flight marks it dirty, and `done` puts it back in the queue. Adding a key
/// that is already waiting is absorbed.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: ItemBackoff,
    shutdown: CancellationToken,
}

impl WorkQueue {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff: ItemBackoff::new(backoff),
            shutdown: CancellationToken::new(),
        }
    }

    /// Enqueue a key, coalescing with any pending or in-flight copy
    ///
    /// Returns true if the key was newly queued for a worker.
    pub async fn add(&self, key: WorkKey) -> bool {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return false;
        }
        if !state.dirty.insert(key.clone()) {
            return false;
        }
        if state.processing.contains(&key) {
            // Redelivered by `done`
            return false;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Block until a key is available; None once the queue is shut down and empty
    pub async fn get(&self) -> Option<WorkKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release a key handed out by `get`, redelivering any follow-up add
    pub async fn done(&self, key: &WorkKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Clear retry history for a key after a successful reconciliation
    pub async fn forget(&self, key: &WorkKey) {
        self.state.lock().await.failures.remove(key);
    }

    /// Number of consecutive failures recorded for a key
    pub async fn num_requeues(&self, key: &WorkKey) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Redeliver a key after its backoff delay; returns the delay used
    pub async fn add_rate_limited(self: &Arc<Self>, key: WorkKey) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay).await;
        delay
    }

    /// Enqueue a key once `delay` has elapsed
    pub async fn add_after(self: &Arc<Self>, key: WorkKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.shutdown.cancelled() => {
                    debug!("Dropping delayed add for {} on shutdown", key);
                }
                _ = tokio::time::sleep(delay) => {
                    queue.add(key).await;
                }
            }
        });
    }

    /// Stop accepting keys and wake all idle workers
    ///
    /// Keys already queued are still handed out; `get` returns None only when
    /// the queue is empty.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    /// Number of keys waiting for a worker
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
