//! Namespaced identity of a managed resource

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a resource inside the object store.
///
/// This is also the key of a reconciliation request: the work queue holds at
/// most one pending request per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_namespace_slash_name() {
        let id = ResourceIdentity::new("marketplace", "community-operators");
        assert_eq!(id.to_string(), "marketplace/community-operators");
    }
}
