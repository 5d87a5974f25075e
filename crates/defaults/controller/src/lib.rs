//! Defaults Controller - leader-gated reconciliation of default resources
//!
//! This crate keeps a fixed set of singleton resources present and matching
//! their canonical definitions:
//! - Desired-state registry and its sources
//! - Event filtering and the deduplicating work queue
//! - The reconciliation state machine and its driver
//! - Lease-based leader election gating all of the above
//!
//! [`Engine`] ties the pieces together and is the entry point for process
//! bootstrap.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod bootstrap;
pub mod controller;
pub mod engine;
pub mod error;
pub mod filter;
pub mod leader;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod shutdown;
pub mod status;
pub mod store;

pub use bootstrap::{ensure_defaults, EnsureReport};
pub use controller::{Controller, ControllerConfig};
pub use engine::{Engine, EngineConfig, EngineParts};
pub use error::{
    BootstrapError, ElectionError, EngineError, LockError, ReconcileError, RegistryError,
    StoreError,
};
pub use filter::EventFilter;
pub use leader::{ElectionConfig, InMemoryLockStore, LeaderElector, LockStore, VersionedLease};
pub use queue::WorkQueue;
pub use reconciler::{DefaultsReconciler, Observation, ReconcilerConfig, DEFAULT_RETRY_DELAY};
pub use registry::{
    DesiredStateRegistry, DesiredStateSource, DirectorySource, StaticSource, SuppressedDefaults,
};
pub use shutdown::ShutdownSignal;
pub use status::{NoOpReporter, ReportedStatus, StatusReporter, TracingReporter};
pub use store::{InMemoryObjectStore, ObjectStore, StoreOperation, WatchSource};
