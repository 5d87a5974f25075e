//! Defaults Types - Core types for default resource reconciliation
//!
//! A default resource is a singleton configuration object that must exist in
//! the cluster with a fixed, externally defined specification. These types
//! describe the objects being managed, the events observed about them, and the
//! lease record used to elect a single controlling replica.
//!
//! ## Key Concepts
//!
//! - **DefaultResourceDefinition**: The immutable desired state of one default
//! - **ManagedObject**: A live object as observed in the object store
//! - **WatchEvent**: A lifecycle notification from the watch stream
//! - **LeaseRecord**: The distributed lock record used for leader election
//! - **Action**: What the driver should do after a reconciliation pass

#![deny(unsafe_code)]

pub mod action;
pub mod event;
pub mod identity;
pub mod lease;
pub mod object;

pub use action::Action;
pub use event::{EventKind, WatchEvent};
pub use identity::ResourceIdentity;
pub use lease::{LeadershipStatus, LeaseRecord, LeaseSettings, LeaseSettingsError};
pub use object::{DefaultResourceDefinition, DefinitionError, ManagedObject, ObjectMeta};
