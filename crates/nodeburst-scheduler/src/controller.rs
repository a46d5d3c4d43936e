use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::translator::EventTranslator;
use futures_util::future::join_all;
use nodeburst_core::{BindingApi, ClusterCache};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Burst scheduler controller
///
/// Owns the queue, the event translator and the worker pool.
pub struct Controller {
    config: SchedulerConfig,
    cache: Arc<dyn ClusterCache>,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    translator: Arc<EventTranslator>,
}

impl Controller {
    /// Create a new controller
    pub fn new(
        config: SchedulerConfig,
        cache: Arc<dyn ClusterCache>,
        api: Arc<dyn BindingApi>,
    ) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(WorkQueue::new(config.backoff.clone()));
        let reconciler = Arc::new(Reconciler::new(&config, cache.clone(), api));
        let translator = Arc::new(EventTranslator::new(
            queue.clone(),
            cache.clone(),
            config.scheduler_name.clone(),
        ));

        Ok(Self {
            config,
            cache,
            queue,
            reconciler,
            translator,
        })
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Run until `token` is cancelled, then drain and return
    ///
    /// Fails without starting workers if the cache does not sync within the
    /// configured timeout.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting burst scheduler '{}' (threshold {}, {} workers)",
            self.config.scheduler_name, self.config.burst_threshold, self.config.workers
        );

        // Subscribe before syncing so nothing between list and watch is missed
        let events = self.cache.subscribe();

        info!("Waiting for cache sync");
        let synced = tokio::select! {
            _ = token.cancelled() => {
                info!("Stop requested before cache sync");
                self.queue.shut_down().await;
                return Ok(());
            }
            synced = tokio::time::timeout(
                self.config.cache_sync_timeout,
                self.cache.wait_for_sync(),
            ) => matches!(synced, Ok(true)),
        };

        if !synced {
            error!("Timed out while waiting for cache sync");
            self.queue.shut_down().await;
            return Err(SchedulerError::CacheSyncFailed {
                timeout_secs: self.config.cache_sync_timeout.as_secs(),
            });
        }
        info!("Cache synced");

        let queued = self.translator.enqueue_all().await;
        info!("Queued {} pods waiting for placement", queued);

        let translator_handle = {
            let translator = self.translator.clone();
            let token = token.clone();
            tokio::spawn(async move { translator.run(events, token).await })
        };

        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|id| {
                let queue = self.queue.clone();
                let reconciler = self.reconciler.clone();
                tokio::spawn(async move { run_worker(id, queue, reconciler).await })
            })
            .collect();

        token.cancelled().await;
        info!("Received stop signal");

        info!("Shutting down queue");
        self.queue.shut_down().await;

        if let Err(e) = translator_handle.await {
            error!("Event translator task failed: {}", e);
        }

        info!("Waiting for workers");
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
        info!("Workers are all done");

        Ok(())
    }
}

/// Pull keys until the queue shuts down
async fn run_worker(id: usize, queue: Arc<WorkQueue>, reconciler: Arc<Reconciler>) {
    debug!("Worker {} started", id);
    while process_next_work_item(&queue, &reconciler).await {}
    debug!("Worker {} exiting", id);
}

async fn process_next_work_item(queue: &Arc<WorkQueue>, reconciler: &Reconciler) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    match reconciler.reconcile(&key).await {
        Ok(outcome) => {
            debug!("Reconciled {}: {:?}", key, outcome);
            queue.forget(&key).await;
        }
        Err(e) => {
            let attempts = queue.num_requeues(&key).await + 1;
            let delay = queue.add_rate_limited(key.clone()).await;
            warn!(
                "Failed to place pod {} (attempt {}), retrying in {:?}: {}",
                key, attempts, delay, e
            );
        }
    }

    queue.done(&key).await;
    true
}
