//! Desired-state registry.
//!
//! The registry is built once at startup from a [`DesiredStateSource`] and is
//! handed to every component behind an `Arc`. It is never mutated afterwards.

use crate::error::RegistryError;
use defaults_types::DefaultResourceDefinition;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Canonical set of default resource definitions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct DesiredStateRegistry {
    definitions: HashMap<String, DefaultResourceDefinition>,
}

impl DesiredStateRegistry {
    /// Build a registry, rejecting duplicate names.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = DefaultResourceDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for definition in definitions {
            let name = definition.name().to_string();
            if map.insert(name.clone(), definition).is_some() {
                return Err(RegistryError::DuplicateName(name));
            }
        }
        Ok(Self { definitions: map })
    }

    pub fn get(&self, name: &str) -> Option<&DefaultResourceDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Synchronous source of the full registry, consulted once at startup.
pub trait DesiredStateSource: Send + Sync {
    fn load(&self) -> Result<DesiredStateRegistry, RegistryError>;
}

/// Source backed by an in-memory list of definitions.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    definitions: Vec<DefaultResourceDefinition>,
}

impl StaticSource {
    pub fn new(definitions: Vec<DefaultResourceDefinition>) -> Self {
        Self { definitions }
    }
}

impl DesiredStateSource for StaticSource {
    fn load(&self) -> Result<DesiredStateRegistry, RegistryError> {
        DesiredStateRegistry::from_definitions(self.definitions.iter().cloned())
    }
}

/// Source that reads one manifest per file from a directory.
///
/// Files ending in `.json`, `.yaml` or `.yml` are read in file-name order;
/// anything else is skipped. Any unreadable or invalid manifest fails the load.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn manifest_paths(&self) -> Result<Vec<PathBuf>, RegistryError> {
        let read_dir_err = |source| RegistryError::ReadDir {
            path: self.dir.clone(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(read_dir_err)? {
            let path = entry.map_err(read_dir_err)?.path();
            if path.is_file() && ManifestFormat::of(&path).is_some() {
                paths.push(path);
            } else {
                debug!(path = %path.display(), "Skipping non-manifest entry");
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl DesiredStateSource for DirectorySource {
    fn load(&self) -> Result<DesiredStateRegistry, RegistryError> {
        let mut definitions = Vec::new();
        for path in self.manifest_paths()? {
            let contents = std::fs::read_to_string(&path).map_err(|source| {
                RegistryError::ReadFile {
                    path: path.clone(),
                    source,
                }
            })?;
            let parse_err = |reason: String| RegistryError::Parse {
                path: path.clone(),
                reason,
            };
            let definition: DefaultResourceDefinition = match ManifestFormat::of(&path) {
                Some(ManifestFormat::Json) => {
                    serde_json::from_str(&contents).map_err(|e| parse_err(e.to_string()))?
                }
                _ => serde_yaml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
            };
            definitions.push(definition);
        }

        let registry = DesiredStateRegistry::from_definitions(definitions)?;
        info!(
            dir = %self.dir.display(),
            defaults = registry.len(),
            "Loaded default resource definitions"
        );
        Ok(registry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManifestFormat {
    Json,
    Yaml,
}

impl ManifestFormat {
    fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Some(Self::Json),
            Some("yaml" | "yml") => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Defaults whose creation is owned by someone else.
///
/// A name in this set is never created by the reconciler or by bootstrap,
/// although drift on an existing object is still corrected. The set is fixed
/// at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct SuppressedDefaults {
    names: HashSet<String>,
}

impl SuppressedDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_suppressed(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(name: &str) -> DefaultResourceDefinition {
        DefaultResourceDefinition::new("marketplace", name, json!({"image": name}))
    }

    #[test]
    fn test_registry_lookup() {
        let registry =
            DesiredStateRegistry::from_definitions(vec![def("b"), def("a")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("b").unwrap().spec(), &json!({"image": "b"}));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = DesiredStateRegistry::from_definitions(vec![def("a"), def("a")]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn test_static_source() {
        let registry = StaticSource::new(vec![def("a")]).load().unwrap();
        assert!(registry.contains("a"));
    }

    #[test]
    fn test_directory_source_reads_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("community.json"),
            r#"{"metadata":{"name":"community","namespace":"marketplace"},"spec":{"image":"c"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("certified.yaml"),
            "metadata:\n  name: certified\n  namespace: marketplace\nspec:\n  image: r\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

        let registry = DirectorySource::new(dir.path()).load().unwrap();
        assert_eq!(registry.names(), vec!["certified", "community"]);
        assert_eq!(registry.get("certified").unwrap().spec(), &json!({"image": "r"}));
    }

    #[test]
    fn test_directory_source_fails_on_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "metadata: [").unwrap();

        let err = DirectorySource::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }

    #[test]
    fn test_directory_source_fails_on_missing_dir() {
        let err = DirectorySource::new("/nonexistent/defaults").load().unwrap_err();
        assert!(matches!(err, RegistryError::ReadDir { .. }));
    }

    #[test]
    fn test_suppressed_defaults() {
        let suppressed = SuppressedDefaults::from_names(["a"]);
        assert!(suppressed.is_suppressed("a"));
        assert!(!suppressed.is_suppressed("b"));
        assert!(!SuppressedDefaults::new().is_suppressed("a"));
    }
}
