//! In-memory lock store

use super::{LockStore, VersionedLease};
use crate::error::{LockError, LockResult};
use async_trait::async_trait;
use defaults_types::LeaseRecord;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lock store shared by electors within one process.
///
/// Every write bumps the record version; updates with a stale version fail
/// with [`LockError::Conflict`].
#[derive(Debug)]
pub struct InMemoryLockStore {
    records: RwLock<HashMap<String, VersionedLease>>,
    available: AtomicBool,
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every call fail with [`LockError::Unavailable`] until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Current record, bypassing availability.
    pub fn snapshot(&self, name: &str) -> Option<VersionedLease> {
        self.records.read().get(name).cloned()
    }

    fn check_available(&self) -> LockResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LockError::Unavailable("lock store is offline".to_string()))
        }
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn get(&self, name: &str) -> LockResult<Option<VersionedLease>> {
        self.check_available()?;
        Ok(self.records.read().get(name).cloned())
    }

    async fn create(&self, name: &str, record: &LeaseRecord) -> LockResult<u64> {
        self.check_available()?;
        let mut records = self.records.write();
        if records.contains_key(name) {
            return Err(LockError::AlreadyExists(name.to_string()));
        }
        records.insert(
            name.to_string(),
            VersionedLease {
                record: record.clone(),
                version: 1,
            },
        );
        Ok(1)
    }

    async fn update(&self, name: &str, record: &LeaseRecord, expected_version: u64) -> LockResult<u64> {
        self.check_available()?;
        let mut records = self.records.write();
        let conflict = || LockError::Conflict {
            name: name.to_string(),
            expected: expected_version,
        };
        let current = records.get_mut(name).ok_or_else(conflict)?;
        if current.version != expected_version {
            return Err(conflict());
        }
        current.record = record.clone();
        current.version += 1;
        Ok(current.version)
    }
}
