//! Reconciliation state machine for default resources.
//!
//! Each pass is stateless: everything it needs is the registry and the current
//! contents of the store. Drifted objects are deleted, never patched; the
//! resulting delete event brings the identity back here, finds it absent and
//! recreates it from the canonical definition.

use crate::error::{ReconcileError, StoreError};
use crate::registry::{DesiredStateRegistry, SuppressedDefaults};
use crate::store::ObjectStore;
use defaults_types::{Action, DefaultResourceDefinition, ManagedObject, ResourceIdentity};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Delay used for every requeue: transient errors, drift and pending deletion.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Configuration for the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Requeue delay shared by all retry paths.
    pub retry_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Result of the fetch step.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Not in the store and nobody else is responsible for creating it.
    Absent,
    /// Not in the store, but creation is owned elsewhere.
    AbsentSuppressed,
    /// Present in the store.
    Present(ManagedObject),
}

/// Reconciler enforcing "every default exists and matches its definition".
pub struct DefaultsReconciler {
    store: Arc<dyn ObjectStore>,
    registry: Arc<DesiredStateRegistry>,
    suppressed: Arc<SuppressedDefaults>,
    config: ReconcilerConfig,
}

impl DefaultsReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<DesiredStateRegistry>,
        suppressed: Arc<SuppressedDefaults>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            suppressed,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Fetch the current state of `identity`, classifying absence.
    pub async fn observe(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<Observation, StoreError> {
        match self.store.get(identity).await {
            Ok(object) => Ok(Observation::Present(object)),
            Err(e) if e.is_not_found() => {
                if self.suppressed.is_suppressed(&identity.name) {
                    Ok(Observation::AbsentSuppressed)
                } else {
                    Ok(Observation::Absent)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Run one reconciliation pass for `identity`.
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn reconcile(&self, identity: &ResourceIdentity) -> Result<Action, ReconcileError> {
        let Some(desired) = self.registry.get(&identity.name) else {
            debug!("Not a managed default, ignoring");
            return Ok(Action::await_change());
        };

        info!("Reconciling default resource");

        let observation = self
            .observe(identity)
            .await
            .map_err(|source| ReconcileError::Fetch {
                identity: identity.clone(),
                source,
                requeue_after: self.config.retry_delay,
            })?;

        match observation {
            Observation::Absent => {
                self.create(desired).await;
                Ok(Action::await_change())
            }
            Observation::AbsentSuppressed => {
                debug!("Default is absent but its creation is owned elsewhere");
                Ok(Action::await_change())
            }
            Observation::Present(observed) if observed.is_pending_deletion() => {
                debug!("Deletion in progress, checking again later");
                Ok(Action::requeue(self.config.retry_delay))
            }
            Observation::Present(observed) if observed.spec_matches(desired.spec()) => {
                debug!("Default matches its definition");
                Ok(Action::await_change())
            }
            Observation::Present(observed) => {
                info!(
                    resource_version = observed.metadata.resource_version,
                    "Spec drifted from its definition, deleting for recreation"
                );
                if let Err(e) = self.store.delete(&observed).await {
                    warn!(
                        error = %e,
                        "Could not reset default to its desired state, delete failed"
                    );
                }
                Ok(Action::requeue(self.config.retry_delay))
            }
        }
    }

    async fn create(&self, desired: &DefaultResourceDefinition) {
        match self.store.create(&desired.to_object()).await {
            Ok(()) => info!(name = desired.name(), "Created default resource"),
            Err(e) => warn!(
                name = desired.name(),
                error = %e,
                "Could not recreate default resource"
            ),
        }
    }
}
