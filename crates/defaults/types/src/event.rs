//! Watch stream lifecycle events

use crate::{ObjectMeta, ResourceIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle event observed on the watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Object created (including objects listed by the initial snapshot)
    Create,
    /// Object modified
    Update,
    /// Object removed
    Delete,
    /// Resync or otherwise unclassified notification
    Generic,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Generic => "generic",
        };
        f.write_str(kind)
    }
}

/// A lifecycle event for one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: EventKind,

    /// Metadata of the object after the event
    pub object: ObjectMeta,

    /// Metadata before the event, for updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<ObjectMeta>,

    /// The final state of a deleted object was not observed, so the watch may
    /// have missed the delete itself
    #[serde(default)]
    pub delete_state_unknown: bool,
}

impl WatchEvent {
    pub fn created(object: ObjectMeta) -> Self {
        Self::new(EventKind::Create, object)
    }

    pub fn updated(prior: ObjectMeta, object: ObjectMeta) -> Self {
        Self {
            prior: Some(prior),
            ..Self::new(EventKind::Update, object)
        }
    }

    pub fn deleted(object: ObjectMeta, delete_state_unknown: bool) -> Self {
        Self {
            delete_state_unknown,
            ..Self::new(EventKind::Delete, object)
        }
    }

    pub fn generic(object: ObjectMeta) -> Self {
        Self::new(EventKind::Generic, object)
    }

    fn new(kind: EventKind, object: ObjectMeta) -> Self {
        Self {
            kind,
            object,
            prior: None,
            delete_state_unknown: false,
        }
    }

    /// Name the event is judged by.
    ///
    /// Updates are judged by the name the object had before the change.
    pub fn resource_name(&self) -> &str {
        match (&self.kind, &self.prior) {
            (EventKind::Update, Some(prior)) => &prior.name,
            _ => &self.object.name,
        }
    }

    /// Identity a reconciliation request for this event is keyed by
    pub fn identity(&self) -> ResourceIdentity {
        self.object.identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_judged_by_prior_name() {
        let event = WatchEvent::updated(ObjectMeta::new("ns", "old"), ObjectMeta::new("ns", "new"));
        assert_eq!(event.resource_name(), "old");
        assert_eq!(event.identity(), ResourceIdentity::new("ns", "new"));
    }

    #[test]
    fn test_delete_carries_unknown_state() {
        let event = WatchEvent::deleted(ObjectMeta::new("ns", "a"), true);
        assert_eq!(event.kind, EventKind::Delete);
        assert!(event.delete_state_unknown);
        assert_eq!(event.resource_name(), "a");
    }
}
