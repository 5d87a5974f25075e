//! Error types for defaults-controller.
//!
//! Each concern gets its own enum. Only [`EngineError`] ever leaves the engine;
//! everything below it is retried, swallowed or turned into a requeue.

use defaults_types::{LeaseSettingsError, ResourceIdentity};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by an object store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The object does not exist. Expected during reconciliation.
    #[error("not found: {0}")]
    NotFound(ResourceIdentity),

    /// The object already exists.
    #[error("already exists: {0}")]
    AlreadyExists(ResourceIdentity),

    /// A concurrent write won.
    #[error("conflict on {identity}: {reason}")]
    Conflict {
        identity: ResourceIdentity,
        reason: String,
    },

    /// The store could not be reached in time.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within its own timeout.
    #[error("store timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a distributed lock store.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// Compare-and-swap lost against a concurrent writer.
    #[error("lock {name} changed concurrently (expected version {expected})")]
    Conflict { name: String, expected: u64 },

    /// The lock record already exists.
    #[error("lock {0} already exists")]
    AlreadyExists(String),

    /// The lock store could not be reached.
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for lock store operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors raised while loading the desired-state registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read defaults directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read definition {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid definition in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("duplicate default name: {0}")]
    DuplicateName(String),
}

/// Errors returned by a reconciliation pass.
///
/// Every variant is retryable; the driver requeues after
/// [`ReconcileError::requeue_after`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading the object failed with something other than not-found.
    #[error("failed to fetch {identity}: {source}")]
    Fetch {
        identity: ResourceIdentity,
        #[source]
        source: StoreError,
        requeue_after: Duration,
    },
}

impl ReconcileError {
    pub fn requeue_after(&self) -> Duration {
        match self {
            Self::Fetch { requeue_after, .. } => *requeue_after,
        }
    }
}

/// Failure of the startup pass that ensures every default exists.
#[derive(Debug)]
pub struct BootstrapError {
    pub failures: Vec<(ResourceIdentity, StoreError)>,
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to ensure {} default(s): ", self.failures.len())?;
        for (index, (identity, error)) in self.failures.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{identity}: {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BootstrapError {}

/// Errors that stop the leader elector.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("invalid lease settings: {0}")]
    Settings(#[from] LeaseSettingsError),

    #[error("identity must not be empty")]
    EmptyIdentity,

    /// The leadership task panicked or was aborted.
    #[error("leadership task failed: {0}")]
    LeadTask(String),
}

/// Fatal errors of the engine, propagated to process bootstrap.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("leader election: {0}")]
    Election(#[from] ElectionError),

    #[error("bootstrap: {0}")]
    Bootstrap(#[from] BootstrapError),
}
