//! Managed objects and their desired definitions

use crate::ResourceIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Object metadata as tracked by the object store
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name, unique within its namespace
    pub name: String,

    /// Namespace containing the object
    #[serde(default)]
    pub namespace: String,

    /// Store-assigned version, bumped on every write
    #[serde(default)]
    pub resource_version: u64,

    /// Set once deletion has been requested but finalizers are still pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Finalizers that must be cleared before the object disappears
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(self.namespace.clone(), self.name.clone())
    }
}

/// A live object as observed in the object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub metadata: ObjectMeta,

    /// Opaque structured specification
    #[serde(default)]
    pub spec: Value,
}

impl ManagedObject {
    pub fn new(metadata: ObjectMeta, spec: Value) -> Self {
        Self { metadata, spec }
    }

    pub fn identity(&self) -> ResourceIdentity {
        self.metadata.identity()
    }

    /// True when a deletion has been requested and is still in progress
    pub fn is_pending_deletion(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Structural comparison of this spec against a desired one.
    ///
    /// JSON objects compare by key set and values, so key order in the source
    /// documents never counts as drift.
    pub fn spec_matches(&self, desired: &Value) -> bool {
        &self.spec == desired
    }

    /// Builder method to attach a finalizer
    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.metadata.finalizers.push(finalizer.into());
        self
    }
}

/// Immutable desired definition of one default resource.
///
/// Definitions are loaded once at startup from manifest documents of the form
/// `{ metadata: { name, namespace, labels }, spec: { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Manifest", into = "Manifest")]
pub struct DefaultResourceDefinition {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    spec: Value,
}

impl DefaultResourceDefinition {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: Value) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn spec(&self) -> &Value {
        &self.spec
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(self.namespace.clone(), self.name.clone())
    }

    /// Render a fresh object ready to be created in the store
    pub fn to_object(&self) -> ManagedObject {
        let mut metadata = ObjectMeta::new(self.namespace.clone(), self.name.clone());
        metadata.labels = self.labels.clone();
        ManagedObject::new(metadata, self.spec.clone())
    }
}

/// Manifest wire format for definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    metadata: ManifestMeta,
    #[serde(default)]
    spec: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

/// Errors raised while decoding a definition manifest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("definition has an empty name")]
    EmptyName,

    #[error("definition {0} has a null spec")]
    MissingSpec(String),
}

impl TryFrom<Manifest> for DefaultResourceDefinition {
    type Error = DefinitionError;

    fn try_from(manifest: Manifest) -> Result<Self, Self::Error> {
        let name = manifest.metadata.name.trim().to_string();
        if name.is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if manifest.spec.is_null() {
            return Err(DefinitionError::MissingSpec(name));
        }
        Ok(Self {
            name,
            namespace: manifest.metadata.namespace,
            labels: manifest.metadata.labels,
            spec: manifest.spec,
        })
    }
}

impl From<DefaultResourceDefinition> for Manifest {
    fn from(def: DefaultResourceDefinition) -> Self {
        Self {
            metadata: ManifestMeta {
                name: def.name,
                namespace: def.namespace,
                labels: def.labels,
            },
            spec: def.spec,
        }
    }
}
