//! Event filter for the watched resource stream.
//!
//! Only events about names in the [`DesiredStateRegistry`] reach the work
//! queue. Create events are never enqueued because creation of defaults is
//! driven by the bootstrap pass, and deletes whose final state is unknown are
//! dropped because the watch may have missed the delete itself.

use crate::registry::DesiredStateRegistry;
use defaults_types::{EventKind, ResourceIdentity, WatchEvent};
use std::sync::Arc;

/// Predicate deciding which watch events trigger a reconciliation.
#[derive(Debug, Clone)]
pub struct EventFilter {
    registry: Arc<DesiredStateRegistry>,
}

impl EventFilter {
    pub fn new(registry: Arc<DesiredStateRegistry>) -> Self {
        Self { registry }
    }

    pub fn should_enqueue(
        &self,
        kind: EventKind,
        resource_name: &str,
        delete_state_unknown: bool,
    ) -> bool {
        match kind {
            EventKind::Create => false,
            EventKind::Update | EventKind::Generic => self.registry.contains(resource_name),
            EventKind::Delete => self.registry.contains(resource_name) && !delete_state_unknown,
        }
    }

    /// Identity to enqueue for an event, if it passes the filter.
    pub fn admit(&self, event: &WatchEvent) -> Option<ResourceIdentity> {
        self.should_enqueue(event.kind, event.resource_name(), event.delete_state_unknown)
            .then(|| event.identity())
    }
}
