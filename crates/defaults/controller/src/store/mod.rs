//! Object store abstraction.
//!
//! The engine only ever reads single objects and issues single-object create
//! and delete commands. The store must report a missing object as
//! [`StoreError::NotFound`](crate::error::StoreError::NotFound) so it can be
//! told apart from transient failures.

mod memory;

pub use memory::{InMemoryObjectStore, StoreOperation};

use crate::error::StoreResult;
use async_trait::async_trait;
use defaults_types::{ManagedObject, ResourceIdentity, WatchEvent};
use futures::stream::BoxStream;

/// Namespaced key/value store of managed objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object by identity
    async fn get(&self, identity: &ResourceIdentity) -> StoreResult<ManagedObject>;

    /// Create an object; fails if it already exists
    async fn create(&self, object: &ManagedObject) -> StoreResult<()>;

    /// Request deletion of an object
    async fn delete(&self, object: &ManagedObject) -> StoreResult<()>;

    /// Replace an existing object
    async fn update(&self, object: &ManagedObject) -> StoreResult<ManagedObject>;
}

/// Source of lifecycle events for the watched resource kind.
///
/// Each call opens a new, non-restartable stream that ends only when the
/// underlying source goes away.
pub trait WatchSource: Send + Sync {
    fn watch(&self) -> BoxStream<'static, WatchEvent>;
}
