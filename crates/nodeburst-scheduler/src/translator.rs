use crate::queue::WorkQueue;
use nodeburst_core::resources::{is_pod_bound, pod_scheduler_name, work_key};
use nodeburst_core::{ClusterCache, PodEvent, WatchEventType, WorkKey};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Turns cache notifications into queue keys
pub struct EventTranslator {
    queue: Arc<WorkQueue>,
    cache: Arc<dyn ClusterCache>,
    scheduler_name: String,
}

impl EventTranslator {
    pub fn new(
        queue: Arc<WorkQueue>,
        cache: Arc<dyn ClusterCache>,
        scheduler_name: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            cache,
            scheduler_name: scheduler_name.into(),
        }
    }

    /// Key to enqueue for a notification, if any
    ///
    /// Pods naming another scheduler are dropped. Adds and updates of pods
    /// that are already bound are dropped too; deletions always pass so the
    /// reconciler observes the absence.
    pub fn translate(&self, event: &PodEvent) -> Option<WorkKey> {
        if pod_scheduler_name(&event.pod) != self.scheduler_name {
            return None;
        }
        if event.event_type != WatchEventType::Deleted && is_pod_bound(&event.pod) {
            return None;
        }
        match work_key(&event.pod) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Dropping pod notification: {}", e);
                None
            }
        }
    }

    /// Enqueue every cached pod waiting for this scheduler
    pub async fn enqueue_all(&self) -> usize {
        let mut queued = 0;
        for pod in self.cache.list_pods().await {
            if let Some(key) = self.translate(&PodEvent::added(pod)) {
                if self.queue.add(key).await {
                    queued += 1;
                }
            }
        }
        queued
    }

    /// Forward notifications until cancelled or the cache goes away
    pub async fn run(&self, mut events: broadcast::Receiver<PodEvent>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Event translator stopping");
                    return;
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Some(key) = self.translate(&event) {
                            debug!("{:?} event for pod {}", event.event_type, key);
                            self.queue.add(key).await;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} pod notifications, resyncing from cache", missed);
                        let queued = self.enqueue_all().await;
                        debug!("Resync queued {} pods", queued);
                    }
                    Err(RecvError::Closed) => {
                        warn!("Pod notification channel closed");
                        return;
                    }
                },
            }
        }
    }
}
