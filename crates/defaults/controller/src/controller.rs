//! Control loop driver.
//!
//! Watch events pass through the [`EventFilter`] into a [`WorkQueue`] keyed by
//! resource identity; a fixed pool of workers drains the queue through the
//! [`DefaultsReconciler`] and schedules requeues from its verdict.

use crate::filter::EventFilter;
use crate::queue::WorkQueue;
use crate::reconciler::DefaultsReconciler;
use crate::shutdown::{self, ShutdownSignal};
use defaults_types::{ResourceIdentity, WatchEvent};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Resource kind, used in logs only.
    pub resource_kind: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resource_kind: "CatalogSource".to_string(),
        }
    }
}

pub struct Controller {
    reconciler: Arc<DefaultsReconciler>,
    filter: EventFilter,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        reconciler: Arc<DefaultsReconciler>,
        filter: EventFilter,
        config: ControllerConfig,
    ) -> Self {
        Self {
            reconciler,
            filter,
            config,
        }
    }

    /// Drive reconciliation until `shutdown` fires or `events` ends.
    ///
    /// In-flight reconciliations finish before this returns; anything still
    /// queued is discarded.
    pub async fn run(&self, mut events: BoxStream<'static, WatchEvent>, mut shutdown: ShutdownSignal) {
        let workers = self.config.workers.max(1);
        info!(
            kind = %self.config.resource_kind,
            workers,
            "Starting controller"
        );

        let queue = Arc::new(WorkQueue::new());
        let mut tasks = JoinSet::new();
        for index in 0..workers {
            tasks.spawn(worker(
                index,
                Arc::clone(&queue),
                Arc::clone(&self.reconciler),
            ));
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown::cancelled(&mut shutdown) => {
                    debug!("Shutdown requested, stopping controller");
                    break;
                }
                event = events.next() => match event {
                    Some(event) => self.dispatch(&queue, &event),
                    None => {
                        warn!(kind = %self.config.resource_kind, "Watch stream ended");
                        break;
                    }
                },
            }
        }

        debug!(
            queued = queue.len(),
            waiting = queue.waiting_len(),
            "Discarding pending reconciliations"
        );
        queue.shut_down();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Controller worker failed");
            }
        }
        info!(kind = %self.config.resource_kind, "Controller stopped");
    }

    fn dispatch(&self, queue: &WorkQueue<ResourceIdentity>, event: &WatchEvent) {
        match self.filter.admit(event) {
            Some(identity) => {
                debug!(kind = %event.kind, %identity, "Enqueueing reconciliation");
                queue.add(identity);
            }
            None => trace!(kind = %event.kind, name = event.resource_name(), "Event filtered out"),
        }
    }
}

async fn worker(
    index: usize,
    queue: Arc<WorkQueue<ResourceIdentity>>,
    reconciler: Arc<DefaultsReconciler>,
) {
    while let Some(identity) = queue.get().await {
        let requeue = match reconciler.reconcile(&identity).await {
            Ok(action) => action.requeue_after(),
            Err(e) => {
                warn!(worker = index, %identity, error = %e, "Reconciliation failed, will retry");
                Some(e.requeue_after())
            }
        };
        if let Some(delay) = requeue {
            queue.add_after(identity.clone(), delay);
        }
        queue.done(&identity);
    }
    trace!(worker = index, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::reconciler::ReconcilerConfig;
    use crate::registry::{DesiredStateRegistry, SuppressedDefaults};
    use crate::store::{InMemoryObjectStore, ObjectStore, StoreOperation, WatchSource};
    use defaults_types::{DefaultResourceDefinition, ManagedObject, ObjectMeta};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryObjectStore>,
        controller: Arc<Controller>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(
            DesiredStateRegistry::from_definitions(vec![DefaultResourceDefinition::new(
                "ns",
                "a",
                json!({"image": "a"}),
            )])
            .unwrap(),
        );
        let reconciler = Arc::new(DefaultsReconciler::new(
            store.clone(),
            registry.clone(),
            Arc::new(SuppressedDefaults::new()),
            ReconcilerConfig::default(),
        ));
        let controller = Arc::new(Controller::new(
            reconciler,
            EventFilter::new(registry),
            ControllerConfig::default(),
        ));
        Harness { store, controller }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_is_healed_through_delete_event() {
        let h = harness();
        let id = ResourceIdentity::new("ns", "a");
        let (tx, rx) = shutdown::channel();
        let run = {
            let controller = h.controller.clone();
            let events = h.store.watch();
            tokio::spawn(async move { controller.run(events, rx).await })
        };

        h.store
            .seed(ManagedObject::new(ObjectMeta::new("ns", "a"), json!({"image": "edited"})))
            .await;
        let drifted = h.store.peek(&id).await.unwrap();
        h.store.emit(WatchEvent::updated(drifted.metadata.clone(), drifted.metadata));
        settle().await;

        // Update -> delete; delete event -> recreate.
        let healed = h.store.peek(&id).await.unwrap();
        assert_eq!(healed.spec, json!({"image": "a"}));
        assert_eq!(h.store.calls(StoreOperation::Delete), 1);
        assert_eq!(h.store.calls(StoreOperation::Create), 1);
        assert_eq!(h.store.calls(StoreOperation::Update), 0);

        tx.send(true).unwrap();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried_after_delay() {
        let h = harness();
        let id = ResourceIdentity::new("ns", "a");
        let (tx, rx) = shutdown::channel();
        h.store.fail_next(StoreOperation::Get, StoreError::Unavailable("down".into()));

        let run = {
            let controller = h.controller.clone();
            let events = h.store.watch();
            tokio::spawn(async move { controller.run(events, rx).await })
        };
        tokio::task::yield_now().await;
        h.store.emit(WatchEvent::generic(ObjectMeta::new("ns", "a")));
        settle().await;

        assert_eq!(h.store.calls(StoreOperation::Get), 1);
        assert!(h.store.peek(&id).await.is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.store.calls(StoreOperation::Get), 2);
        assert!(h.store.peek(&id).await.is_some());

        tx.send(true).unwrap();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_events_share_one_retry_chain() {
        let h = harness();
        let id = ResourceIdentity::new("ns", "a");
        h.store
            .seed(
                ManagedObject::new(ObjectMeta::new("ns", "a"), json!({"image": "a"}))
                    .with_finalizer("cleanup"),
            )
            .await;
        let object = h.store.peek(&id).await.unwrap();
        h.store.delete(&object).await.unwrap();
        assert!(h.store.peek(&id).await.unwrap().is_pending_deletion());

        let (tx, rx) = shutdown::channel();
        let run = {
            let controller = h.controller.clone();
            let events = h.store.watch();
            tokio::spawn(async move { controller.run(events, rx).await })
        };
        tokio::task::yield_now().await;

        for _ in 0..5 {
            h.store.emit(WatchEvent::generic(ObjectMeta::new("ns", "a")));
            tokio::time::sleep(Duration::from_millis(900)).await;
        }

        let before = h.store.calls(StoreOperation::Get);
        tokio::time::sleep(Duration::from_secs(50)).await;
        let gets = h.store.calls(StoreOperation::Get) - before;
        // One pending-deletion retry every 5s.
        assert!((9..=11).contains(&gets), "{gets} gets in 50s");

        tx.send(true).unwrap();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_events_do_not_reconcile() {
        let h = harness();
        let (tx, rx) = shutdown::channel();
        let run = {
            let controller = h.controller.clone();
            let events = h.store.watch();
            tokio::spawn(async move { controller.run(events, rx).await })
        };
        tokio::task::yield_now().await;

        h.store.emit(WatchEvent::created(ObjectMeta::new("ns", "a")));
        h.store.emit(WatchEvent::deleted(ObjectMeta::new("ns", "a"), true));
        h.store.emit(WatchEvent::generic(ObjectMeta::new("ns", "other")));
        settle().await;

        assert_eq!(h.store.calls(StoreOperation::Get), 0);
        tx.send(true).unwrap();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_when_watch_ends() {
        let h = harness();
        let (_tx, rx) = shutdown::channel();
        let events = futures::stream::empty().boxed();
        h.controller.run(events, rx).await;
        assert_eq!(h.store.calls(StoreOperation::Get), 0);
    }
}
