//! Configuration for defaults-daemon
//!
//! Sources are layered: built-in defaults, then an optional file, then
//! `DEFAULTS_`-prefixed environment variables using `__` between sections
//! (`DEFAULTS_ELECTION__NAMESPACE=openshift-marketplace`).

use defaults_controller::{ControllerConfig, ElectionConfig, ReconcilerConfig};
use defaults_types::LeaseSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Health endpoint configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Object and lock store backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Leader election configuration
    #[serde(default)]
    pub election: ElectionSettings,

    /// Controller configuration
    #[serde(default)]
    pub controller: ControllerSettings,

    /// Default resource definitions
    #[serde(default)]
    pub defaults: DefaultsSettings,

    /// Status reporting
    #[serde(default)]
    pub status: StatusSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address of the health endpoint
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process object and lock stores
    #[default]
    Memory,
}

/// Leader election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    /// Name of the lock record
    #[serde(default = "default_lock_name")]
    pub lock_name: String,

    /// Namespace holding the lock record
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Replica identity; resolved from the environment when unset
    #[serde(default)]
    pub identity: Option<String>,

    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,

    #[serde(default = "default_renew_deadline")]
    pub renew_deadline_secs: u64,

    #[serde(default = "default_retry_period")]
    pub retry_period_secs: u64,

    #[serde(default = "default_release_timeout")]
    pub release_timeout_secs: u64,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            lock_name: default_lock_name(),
            namespace: default_namespace(),
            identity: None,
            lease_duration_secs: default_lease_duration(),
            renew_deadline_secs: default_renew_deadline(),
            retry_period_secs: default_retry_period(),
            release_timeout_secs: default_release_timeout(),
        }
    }
}

impl ElectionSettings {
    pub fn lease_settings(&self) -> LeaseSettings {
        LeaseSettings {
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            renew_deadline: Duration::from_secs(self.renew_deadline_secs),
            retry_period: Duration::from_secs(self.retry_period_secs),
            release_timeout: Duration::from_secs(self.release_timeout_secs),
        }
    }

    pub fn election_config(&self, identity: String) -> ElectionConfig {
        ElectionConfig {
            lock_name: format!("{}/{}", self.namespace, self.lock_name),
            identity,
            settings: self.lease_settings(),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Delay before retrying a failed or unfinished reconciliation
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Kind of the managed resources
    #[serde(default = "default_resource_kind")]
    pub resource_kind: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_delay_secs: default_retry_delay(),
            resource_kind: default_resource_kind(),
        }
    }
}

impl ControllerSettings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            resource_kind: self.resource_kind.clone(),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

/// Default resource definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsSettings {
    /// Directory of manifests, one default per file
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Defaults whose creation is owned elsewhere
    #[serde(default)]
    pub suppressed: Vec<String>,
}

/// Status reporting configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSettings {
    /// Operator to report status for; reporting is off when unset
    #[serde(default)]
    pub operator_name: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_lock_name() -> String {
    "marketplace-operator-lock".to_string()
}

fn default_namespace() -> String {
    "openshift-marketplace".to_string()
}

fn default_lease_duration() -> u64 {
    90
}

fn default_renew_deadline() -> u64 {
    60
}

fn default_retry_period() -> u64 {
    30
}

fn default_release_timeout() -> u64 {
    5
}

fn default_workers() -> usize {
    2
}

fn default_retry_delay() -> u64 {
    5
}

fn default_resource_kind() -> String {
    "CatalogSource".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from file and process environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading environment variables from `env` instead
    /// of the process environment when given
    pub fn load_with_env(
        path: Option<&str>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DEFAULTS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("defaults.suppressed")
                .source(env),
        );

        builder.build()?.try_deserialize()
    }
}

/// Pick the replica identity: configured value, then `POD_NAME`, then
/// `HOSTNAME`, then a generated one.
pub fn resolve_identity(configured: Option<&str>, lookup: impl Fn(&str) -> Option<String>) -> String {
    let non_empty = |value: &String| !value.trim().is_empty();

    if let Some(identity) = configured.map(str::to_string).filter(non_empty) {
        return identity;
    }
    if let Some(identity) = lookup("POD_NAME").filter(non_empty) {
        return identity;
    }
    info!("Failed to determine $POD_NAME, falling back to hostname");
    lookup("HOSTNAME")
        .filter(non_empty)
        .unwrap_or_else(|| format!("defaultsd-{}", uuid::Uuid::new_v4()))
}
