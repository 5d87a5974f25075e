//! In-memory object store.
//!
//! Used by the daemon's `memory` backend and by tests. It follows the usual
//! API-server semantics closely enough to exercise the reconciler: objects
//! carrying finalizers are marked for deletion instead of being removed, every
//! write bumps the resource version, and every change is broadcast to
//! watchers. Failures can be scripted per operation.
//!
//! A watcher that falls more than the watch capacity behind cannot know what it
//! missed, so its stream ends. The controller treats that like any other watch
//! loss: the leadership term ends and the next one runs bootstrap again.

use super::{ObjectStore, WatchSource};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use defaults_types::{ManagedObject, ResourceIdentity, WatchEvent};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

/// Store operations that can be counted and scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    Create,
    Delete,
    Update,
}

#[derive(Debug, Default)]
struct OperationCounters {
    get: AtomicUsize,
    create: AtomicUsize,
    delete: AtomicUsize,
    update: AtomicUsize,
}

impl OperationCounters {
    fn counter(&self, op: StoreOperation) -> &AtomicUsize {
        match op {
            StoreOperation::Get => &self.get,
            StoreOperation::Create => &self.create,
            StoreOperation::Delete => &self.delete,
            StoreOperation::Update => &self.update,
        }
    }
}

const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// In-memory store for development and testing
#[derive(Debug)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<HashMap<ResourceIdentity, ManagedObject>>>,
    version: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    calls: OperationCounters,
    faults: Mutex<HashMap<StoreOperation, VecDeque<StoreError>>>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Create a store whose watchers may fall at most `capacity` events behind
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            version: AtomicU64::new(0),
            events,
            calls: OperationCounters::default(),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Insert an object directly, without counting a call or emitting an event
    pub async fn seed(&self, mut object: ManagedObject) {
        object.metadata.resource_version = self.next_version();
        self.objects.write().await.insert(object.identity(), object);
    }

    /// Snapshot of an object, bypassing counters and scripted faults
    pub async fn peek(&self, identity: &ResourceIdentity) -> Option<ManagedObject> {
        self.objects.read().await.get(identity).cloned()
    }

    /// Number of objects currently stored
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Make the next call of `op` fail with `error`. Queued faults are consumed
    /// in order.
    pub fn fail_next(&self, op: StoreOperation, error: StoreError) {
        self.faults.lock().entry(op).or_default().push_back(error);
    }

    /// Number of calls made to `op` through the [`ObjectStore`] trait
    pub fn calls(&self, op: StoreOperation) -> usize {
        self.calls.counter(op).load(Ordering::SeqCst)
    }

    /// Broadcast an arbitrary event to watchers
    pub fn emit(&self, event: WatchEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
    }

    /// Clear the finalizers of an object, completing a pending deletion
    pub async fn remove_finalizers(&self, identity: &ResourceIdentity) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get_mut(identity) else {
            return Err(StoreError::NotFound(identity.clone()));
        };
        let prior = stored.metadata.clone();
        stored.metadata.finalizers.clear();
        stored.metadata.resource_version = self.next_version();

        if stored.is_pending_deletion() {
            if let Some(removed) = objects.remove(identity) {
                self.emit(WatchEvent::deleted(removed.metadata, false));
            }
        } else {
            let current = stored.metadata.clone();
            self.emit(WatchEvent::updated(prior, current));
        }
        Ok(())
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn enter(&self, op: StoreOperation) -> StoreResult<()> {
        self.calls.counter(op).fetch_add(1, Ordering::SeqCst);
        match self.faults.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, identity: &ResourceIdentity) -> StoreResult<ManagedObject> {
        self.enter(StoreOperation::Get)?;
        self.objects
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(identity.clone()))
    }

    async fn create(&self, object: &ManagedObject) -> StoreResult<()> {
        self.enter(StoreOperation::Create)?;
        let identity = object.identity();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&identity) {
            return Err(StoreError::AlreadyExists(identity));
        }

        let mut stored = object.clone();
        stored.metadata.resource_version = self.next_version();
        stored.metadata.deletion_timestamp = None;
        let meta = stored.metadata.clone();
        objects.insert(identity, stored);
        drop(objects);

        self.emit(WatchEvent::created(meta));
        Ok(())
    }

    async fn delete(&self, object: &ManagedObject) -> StoreResult<()> {
        self.enter(StoreOperation::Delete)?;
        let identity = object.identity();
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get_mut(&identity) else {
            return Err(StoreError::NotFound(identity));
        };

        if stored.metadata.finalizers.is_empty() {
            if let Some(removed) = objects.remove(&identity) {
                drop(objects);
                self.emit(WatchEvent::deleted(removed.metadata, false));
            }
            return Ok(());
        }

        if stored.metadata.deletion_timestamp.is_none() {
            let prior = stored.metadata.clone();
            stored.metadata.deletion_timestamp = Some(Utc::now());
            stored.metadata.resource_version = self.next_version();
            let current = stored.metadata.clone();
            drop(objects);
            self.emit(WatchEvent::updated(prior, current));
        }
        Ok(())
    }

    async fn update(&self, object: &ManagedObject) -> StoreResult<ManagedObject> {
        self.enter(StoreOperation::Update)?;
        let identity = object.identity();
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get_mut(&identity) else {
            return Err(StoreError::NotFound(identity));
        };

        let expected = object.metadata.resource_version;
        if expected != 0 && expected != stored.metadata.resource_version {
            return Err(StoreError::Conflict {
                identity,
                reason: format!(
                    "resource version {} does not match {}",
                    expected, stored.metadata.resource_version
                ),
            });
        }

        let prior = stored.metadata.clone();
        let deletion_timestamp = stored.metadata.deletion_timestamp;
        *stored = object.clone();
        stored.metadata.deletion_timestamp = deletion_timestamp;
        stored.metadata.resource_version = self.next_version();
        let updated = stored.clone();

        if updated.is_pending_deletion() && updated.metadata.finalizers.is_empty() {
            objects.remove(&identity);
            drop(objects);
            self.emit(WatchEvent::deleted(updated.metadata.clone(), false));
        } else {
            drop(objects);
            self.emit(WatchEvent::updated(prior, updated.metadata.clone()));
        }
        Ok(updated)
    }
}

impl WatchSource for InMemoryObjectStore {
    fn watch(&self) -> BoxStream<'static, WatchEvent> {
        let receiver = self.events.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((event, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Watch stream lagged, closing it");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .boxed()
    }
}
