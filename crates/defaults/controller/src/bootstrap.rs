//! One-shot pass that makes sure every default exists when a term starts.
//!
//! Create events never reach the work queue, so a default that is missing when
//! leadership is acquired would otherwise stay missing until something else
//! touches it.

use crate::error::{BootstrapError, StoreError};
use crate::registry::{DesiredStateRegistry, SuppressedDefaults};
use crate::store::ObjectStore;
use defaults_types::ResourceIdentity;
use tracing::{debug, info, warn};

/// What the bootstrap pass did for each default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureReport {
    pub created: Vec<ResourceIdentity>,
    /// Drifted objects deleted so they get recreated by the controller.
    pub reset: Vec<ResourceIdentity>,
    pub unchanged: Vec<ResourceIdentity>,
    pub pending_deletion: Vec<ResourceIdentity>,
    pub suppressed: Vec<ResourceIdentity>,
}

impl EnsureReport {
    pub fn total(&self) -> usize {
        self.created.len()
            + self.reset.len()
            + self.unchanged.len()
            + self.pending_deletion.len()
            + self.suppressed.len()
    }
}

/// Ensure every registered default is present, in name order.
///
/// Every default is attempted even after a failure; the error lists all of
/// them.
pub async fn ensure_defaults(
    store: &dyn ObjectStore,
    registry: &DesiredStateRegistry,
    suppressed: &SuppressedDefaults,
) -> Result<EnsureReport, BootstrapError> {
    let mut report = EnsureReport::default();
    let mut failures = Vec::new();

    for name in registry.names() {
        let Some(desired) = registry.get(name) else {
            continue;
        };
        let identity = desired.identity();

        match store.get(&identity).await {
            Err(e) if e.is_not_found() => {
                if suppressed.is_suppressed(name) {
                    debug!(%identity, "Default is suppressed, not creating");
                    report.suppressed.push(identity);
                    continue;
                }
                match store.create(&desired.to_object()).await {
                    Ok(()) => {
                        info!(%identity, "Created default resource");
                        report.created.push(identity);
                    }
                    Err(StoreError::AlreadyExists(_)) => {
                        debug!(%identity, "Default appeared concurrently");
                        report.unchanged.push(identity);
                    }
                    Err(e) => {
                        warn!(%identity, error = %e, "Failed to create default resource");
                        failures.push((identity, e));
                    }
                }
            }
            Err(e) => {
                warn!(%identity, error = %e, "Failed to read default resource");
                failures.push((identity, e));
            }
            Ok(observed) if observed.is_pending_deletion() => {
                debug!(%identity, "Default is being deleted, leaving it to the controller");
                report.pending_deletion.push(identity);
            }
            Ok(observed) if observed.spec_matches(desired.spec()) => {
                report.unchanged.push(identity);
            }
            Ok(observed) => match store.delete(&observed).await {
                Ok(()) => {
                    info!(%identity, "Default drifted, deleted for recreation");
                    report.reset.push(identity);
                }
                Err(e) => {
                    warn!(%identity, error = %e, "Failed to reset drifted default");
                    failures.push((identity, e));
                }
            },
        }
    }

    if failures.is_empty() {
        Ok(report)
    } else {
        Err(BootstrapError { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryObjectStore, StoreOperation};
    use defaults_types::{DefaultResourceDefinition, ManagedObject, ObjectMeta};
    use serde_json::json;

    fn registry() -> DesiredStateRegistry {
        DesiredStateRegistry::from_definitions(["a", "b", "c"].map(|name| {
            DefaultResourceDefinition::new("ns", name, json!({"image": name}))
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_creates_missing_defaults() {
        let store = InMemoryObjectStore::new();
        let report = ensure_defaults(&store, &registry(), &SuppressedDefaults::new())
            .await
            .unwrap();

        assert_eq!(report.created.len(), 3);
        assert_eq!(store.len().await, 3);
        assert_eq!(report.total(), 3);
    }

    #[tokio::test]
    async fn test_mixed_state() {
        let store = InMemoryObjectStore::new();
        store
            .seed(ManagedObject::new(ObjectMeta::new("ns", "a"), json!({"image": "a"})))
            .await;
        store
            .seed(ManagedObject::new(ObjectMeta::new("ns", "b"), json!({"image": "edited"})))
            .await;

        let suppressed = SuppressedDefaults::from_names(["c"]);
        let report = ensure_defaults(&store, &registry(), &suppressed).await.unwrap();

        assert_eq!(report.unchanged, vec![ResourceIdentity::new("ns", "a")]);
        assert_eq!(report.reset, vec![ResourceIdentity::new("ns", "b")]);
        assert_eq!(report.suppressed, vec![ResourceIdentity::new("ns", "c")]);
        assert!(report.created.is_empty());
        assert_eq!(store.calls(StoreOperation::Update), 0);
        assert!(store.peek(&ResourceIdentity::new("ns", "b")).await.is_none());
    }

    #[tokio::test]
    async fn test_leaves_pending_deletion_alone() {
        let store = InMemoryObjectStore::new();
        let mut object = ManagedObject::new(ObjectMeta::new("ns", "a"), json!({}));
        object.metadata.deletion_timestamp = Some(chrono::Utc::now());
        store.seed(object).await;

        let report = ensure_defaults(&store, &registry(), &SuppressedDefaults::new())
            .await
            .unwrap();
        assert_eq!(report.pending_deletion, vec![ResourceIdentity::new("ns", "a")]);
        assert_eq!(store.calls(StoreOperation::Delete), 0);
    }

    #[tokio::test]
    async fn test_collects_every_failure() {
        let store = InMemoryObjectStore::new();
        store.fail_next(StoreOperation::Get, StoreError::Unavailable("down".into()));
        store.fail_next(StoreOperation::Create, StoreError::Timeout(std::time::Duration::from_secs(1)));

        let err = ensure_defaults(&store, &registry(), &SuppressedDefaults::new())
            .await
            .unwrap_err();

        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.failures[0].0, ResourceIdentity::new("ns", "a"));
        assert_eq!(err.failures[1].0, ResourceIdentity::new("ns", "b"));
        // The third default was still created.
        assert!(store.peek(&ResourceIdentity::new("ns", "c")).await.is_some());
    }
}
