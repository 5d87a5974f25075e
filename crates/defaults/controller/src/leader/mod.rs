//! Lease-based leader election.
//!
//! Replicas contend for one [`LeaseRecord`] in a [`LockStore`] using
//! compare-and-swap on the record version. The elector is a polling state
//! machine:
//!
//! - **Candidate**: every `retry_period`, read the record and take it over if
//!   it is released, absent, or has not changed for a full lease duration as
//!   measured on the local clock.
//! - **Leading**: the lead future runs as its own task with its own shutdown
//!   channel. Renewals are attempted every `retry_period`; if none succeeds
//!   within `renew_deadline` of the last good renewal, the task is stopped
//!   and awaited and the elector goes back to Candidate.
//! - **Stopped**: on shutdown the task is stopped, the lease is released
//!   within `release_timeout`, and [`LeaderElector::run`] returns.
//!
//! Lock store errors are logged and retried on the same cadence.

mod memory;

pub use memory::InMemoryLockStore;

use crate::error::{ElectionError, LockResult};
use crate::shutdown::{self, ShutdownSignal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use defaults_types::{LeaseRecord, LeaseSettings, LeadershipStatus};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// A lease record together with the store's version for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedLease {
    pub record: LeaseRecord,
    pub version: u64,
}

/// Distributed store holding lock records.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn get(&self, name: &str) -> LockResult<Option<VersionedLease>>;

    /// Create the record, failing if it exists. Returns the new version.
    async fn create(&self, name: &str, record: &LeaseRecord) -> LockResult<u64>;

    /// Replace the record if its version is still `expected_version`.
    async fn update(&self, name: &str, record: &LeaseRecord, expected_version: u64) -> LockResult<u64>;
}

/// Election parameters for one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub lock_name: String,
    pub identity: String,
    pub settings: LeaseSettings,
}

#[derive(Debug, Default)]
struct Observed {
    lease: Option<VersionedLease>,
    observed_at: Option<Instant>,
    leader: Option<String>,
}

impl Observed {
    fn record(&mut self, lease: VersionedLease) {
        if self.lease.as_ref() != Some(&lease) {
            self.observed_at = Some(Instant::now());
        }
        self.lease = Some(lease);
    }

    fn expired(&self) -> bool {
        match (&self.lease, self.observed_at) {
            (Some(lease), Some(at)) => at + lease.record.lease_duration() <= Instant::now(),
            _ => true,
        }
    }
}

enum TermEnd<E> {
    Cancelled,
    Lost,
    Finished(Result<Result<(), E>, JoinError>),
}

pub struct LeaderElector {
    config: ElectionConfig,
    store: Arc<dyn LockStore>,
    status: watch::Sender<LeadershipStatus>,
}

impl LeaderElector {
    pub fn new(config: ElectionConfig, store: Arc<dyn LockStore>) -> Result<Self, ElectionError> {
        config.settings.validate()?;
        if config.identity.trim().is_empty() {
            return Err(ElectionError::EmptyIdentity);
        }
        let (status, _) = watch::channel(LeadershipStatus::Candidate);
        Ok(Self {
            config,
            store,
            status,
        })
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn subscribe(&self) -> watch::Receiver<LeadershipStatus> {
        self.status.subscribe()
    }

    pub fn is_leader(&self) -> bool {
        self.status.borrow().is_leading()
    }

    /// Contend for the lease until `signal` fires, running `lead` for every
    /// term this replica wins.
    ///
    /// A term ends when the lease is lost, on shutdown, or when the lead future
    /// returns. An `Ok` return steps down and contends again; an `Err` is
    /// returned from here after the lease is released.
    pub async fn run<F, Fut, E>(&self, mut signal: ShutdownSignal, mut lead: F) -> Result<(), E>
    where
        F: FnMut(ShutdownSignal) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: From<ElectionError> + Send + 'static,
    {
        let mut observed = Observed::default();
        loop {
            if !self.acquire(&mut observed, &mut signal).await {
                self.status.send_replace(LeadershipStatus::Stopped);
                return Ok(());
            }
            observed.leader = Some(self.config.identity.clone());
            info!(
                identity = %self.config.identity,
                lock = %self.config.lock_name,
                "Became leader"
            );
            self.status.send_replace(LeadershipStatus::Leading { since: Utc::now() });

            let (term_tx, term_rx) = shutdown::channel();
            let mut term = tokio::spawn(lead(term_rx));
            let end = self.hold(&mut observed, &mut signal, &mut term).await;

            let _ = term_tx.send(true);
            let cancelled = matches!(end, TermEnd::Cancelled);
            let lost = matches!(end, TermEnd::Lost);
            let joined = match end {
                TermEnd::Finished(joined) => joined,
                TermEnd::Cancelled | TermEnd::Lost => term.await,
            };
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(ElectionError::LeadTask(e.to_string()).into()),
            };

            if lost {
                warn!(identity = %self.config.identity, "Leader election lost");
            }
            if let Err(e) = result {
                if !lost {
                    self.release(&mut observed).await;
                }
                self.status.send_replace(LeadershipStatus::Stopped);
                return Err(e);
            }
            if cancelled {
                self.release(&mut observed).await;
                self.status.send_replace(LeadershipStatus::Stopped);
                return Ok(());
            }
            if !lost {
                info!(identity = %self.config.identity, "Leadership term finished, stepping down");
                self.release(&mut observed).await;
            }
            self.status.send_replace(LeadershipStatus::Candidate);
        }
    }

    /// Returns `false` if shutdown arrived first.
    async fn acquire(&self, observed: &mut Observed, signal: &mut ShutdownSignal) -> bool {
        loop {
            if shutdown::is_cancelled(signal) {
                return false;
            }
            match self.try_acquire_or_renew(observed).await {
                Ok(true) => return true,
                Ok(false) => {
                    if let Some(leader) = observed.leader.clone() {
                        self.follow(leader);
                    }
                }
                Err(e) => warn!(error = %e, lock = %self.config.lock_name, "Failed to acquire lease"),
            }
            tokio::select! {
                _ = shutdown::cancelled(signal) => return false,
                _ = sleep(self.config.settings.retry_period) => {}
            }
        }
    }

    async fn hold<E>(
        &self,
        observed: &mut Observed,
        signal: &mut ShutdownSignal,
        term: &mut JoinHandle<Result<(), E>>,
    ) -> TermEnd<E> {
        let settings = self.config.settings;
        let mut last_renew = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown::cancelled(signal) => return TermEnd::Cancelled,
                joined = &mut *term => return TermEnd::Finished(joined),
                _ = sleep(settings.retry_period) => {}
            }

            let deadline = last_renew + settings.renew_deadline;
            tokio::select! {
                _ = shutdown::cancelled(signal) => return TermEnd::Cancelled,
                joined = &mut *term => return TermEnd::Finished(joined),
                renewed = timeout_at(deadline, self.renew(observed)) => {
                    if renewed.is_err() {
                        return TermEnd::Lost;
                    }
                    last_renew = Instant::now();
                }
            }
        }
    }

    async fn renew(&self, observed: &mut Observed) {
        loop {
            match self.try_acquire_or_renew(observed).await {
                Ok(true) => return,
                Ok(false) => debug!("Lease is held elsewhere, renewal refused"),
                Err(e) => warn!(error = %e, lock = %self.config.lock_name, "Failed to renew lease"),
            }
            sleep(self.config.settings.retry_period).await;
        }
    }

    async fn try_acquire_or_renew(&self, observed: &mut Observed) -> LockResult<bool> {
        let name = &self.config.lock_name;
        let now = Utc::now();

        let Some(current) = self.store.get(name).await? else {
            let record = self.next_record(None, now);
            let version = self.store.create(name, &record).await?;
            observed.record(VersionedLease { record, version });
            return Ok(true);
        };

        self.note_leader(observed, &current.record);
        observed.record(current.clone());

        let held = current.record.is_held_by(&self.config.identity);
        if !held && !current.record.is_released() && !observed.expired() {
            return Ok(false);
        }

        let record = self.next_record(Some(&current.record), now);
        let version = self.store.update(name, &record, current.version).await?;
        observed.record(VersionedLease { record, version });
        Ok(true)
    }

    fn next_record(&self, previous: Option<&LeaseRecord>, now: DateTime<Utc>) -> LeaseRecord {
        let lease_millis = self.config.settings.lease_duration.as_millis().div_ceil(1000);
        let lease_duration_seconds = u64::try_from(lease_millis).unwrap_or(u64::MAX);
        let identity = &self.config.identity;
        match previous {
            Some(prev) if prev.is_held_by(identity) => LeaseRecord {
                holder_identity: identity.clone(),
                lease_duration_seconds,
                acquire_time: prev.acquire_time,
                renew_time: now,
                leader_transitions: prev.leader_transitions,
            },
            _ => LeaseRecord {
                holder_identity: identity.clone(),
                lease_duration_seconds,
                acquire_time: now,
                renew_time: now,
                leader_transitions: previous.map_or(0, |prev| prev.leader_transitions + 1),
            },
        }
    }

    fn note_leader(&self, observed: &mut Observed, record: &LeaseRecord) {
        if record.is_released() || observed.leader.as_deref() == Some(record.holder_identity.as_str()) {
            return;
        }
        observed.leader = Some(record.holder_identity.clone());
        if !record.is_held_by(&self.config.identity) {
            info!(leader = %record.holder_identity, "New leader has been elected");
        }
    }

    fn follow(&self, leader: String) {
        if leader == self.config.identity {
            return;
        }
        self.status.send_if_modified(|status| {
            let next = LeadershipStatus::Following { leader };
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
    }

    async fn release(&self, observed: &mut Observed) {
        let Some(lease) = observed
            .lease
            .clone()
            .filter(|lease| lease.record.is_held_by(&self.config.identity))
        else {
            return;
        };

        let record = LeaseRecord::released(&lease.record);
        let update = self.store.update(&self.config.lock_name, &record, lease.version);
        match timeout(self.config.settings.release_timeout, update).await {
            Ok(Ok(version)) => {
                info!(identity = %self.config.identity, "Released leadership lease");
                observed.record(VersionedLease { record, version });
            }
            Ok(Err(e)) => warn!(error = %e, "Failed to release lease"),
            Err(_) => warn!(
                timeout = ?self.config.settings.release_timeout,
                "Timed out releasing lease"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn settings() -> LeaseSettings {
        LeaseSettings::new(
            Duration::from_secs(3),
            Duration::from_secs(2),
            Duration::from_millis(500),
        )
    }

    fn elector(identity: &str, store: Arc<InMemoryLockStore>) -> Arc<LeaderElector> {
        let config = ElectionConfig {
            lock_name: "defaults-lock".to_string(),
            identity: identity.to_string(),
            settings: settings(),
        };
        Arc::new(LeaderElector::new(config, store).unwrap())
    }

    /// Spawn an elector whose lead future flips `active` for the term.
    fn spawn_elector(
        elector: Arc<LeaderElector>,
        active: Arc<AtomicBool>,
        signal: ShutdownSignal,
    ) -> JoinHandle<Result<(), ElectionError>> {
        tokio::spawn(async move {
            elector
                .run(signal, move |mut term| {
                    let active = Arc::clone(&active);
                    async move {
                        active.store(true, Ordering::SeqCst);
                        shutdown::cancelled(&mut term).await;
                        active.store(false, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
        })
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let store = Arc::new(InMemoryLockStore::new());
        let mut config = ElectionConfig {
            lock_name: "lock".to_string(),
            identity: " ".to_string(),
            settings: settings(),
        };
        assert!(matches!(
            LeaderElector::new(config.clone(), store.clone()),
            Err(ElectionError::EmptyIdentity)
        ));

        config.identity = "a".to_string();
        config.settings.renew_deadline = Duration::from_secs(5);
        assert!(matches!(
            LeaderElector::new(config, store),
            Err(ElectionError::Settings(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_and_releases_on_shutdown() {
        let store = Arc::new(InMemoryLockStore::new());
        let elector = elector("a", store.clone());
        let active = Arc::new(AtomicBool::new(false));
        let (tx, rx) = shutdown::channel();

        let handle = spawn_elector(elector.clone(), active.clone(), rx);
        sleep(Duration::from_millis(10)).await;
        assert!(elector.is_leader());
        assert!(active.load(Ordering::SeqCst));
        assert!(store.snapshot("defaults-lock").unwrap().record.is_held_by("a"));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(!active.load(Ordering::SeqCst));
        assert_eq!(*elector.subscribe().borrow(), LeadershipStatus::Stopped);
        assert!(store.snapshot("defaults-lock").unwrap().record.is_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_replica_follows() {
        let store = Arc::new(InMemoryLockStore::new());
        let (a, b) = (elector("a", store.clone()), elector("b", store.clone()));
        let (a_active, b_active) = (Arc::new(AtomicBool::new(false)), Arc::new(AtomicBool::new(false)));
        let (tx, rx) = shutdown::channel();

        let ha = spawn_elector(a.clone(), a_active.clone(), rx.clone());
        sleep(Duration::from_millis(10)).await;
        let hb = spawn_elector(b.clone(), b_active.clone(), rx);
        sleep(Duration::from_secs(10)).await;

        assert!(a_active.load(Ordering::SeqCst));
        assert!(!b_active.load(Ordering::SeqCst));
        assert_eq!(
            *b.subscribe().borrow(),
            LeadershipStatus::Following { leader: "a".to_string() }
        );

        tx.send(true).unwrap();
        ha.await.unwrap().unwrap();
        hb.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_down_when_renewal_fails() {
        let store = Arc::new(InMemoryLockStore::new());
        let elector = elector("a", store.clone());
        let active = Arc::new(AtomicBool::new(false));
        let (tx, rx) = shutdown::channel();
        let handle = spawn_elector(elector.clone(), active.clone(), rx);

        sleep(Duration::from_secs(1)).await;
        assert!(active.load(Ordering::SeqCst));

        store.set_available(false);
        sleep(Duration::from_millis(2500)).await;
        assert!(!active.load(Ordering::SeqCst));
        assert_eq!(*elector.subscribe().borrow(), LeadershipStatus::Candidate);

        store.set_available(true);
        sleep(Duration::from_secs(1)).await;
        assert!(active.load(Ordering::SeqCst));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_after_release() {
        let store = Arc::new(InMemoryLockStore::new());
        let (a, b) = (elector("a", store.clone()), elector("b", store.clone()));
        let (a_active, b_active) = (Arc::new(AtomicBool::new(false)), Arc::new(AtomicBool::new(false)));
        let (a_tx, a_rx) = shutdown::channel();
        let (b_tx, b_rx) = shutdown::channel();

        let ha = spawn_elector(a, a_active.clone(), a_rx);
        sleep(Duration::from_millis(10)).await;
        let hb = spawn_elector(b, b_active.clone(), b_rx);
        sleep(Duration::from_secs(1)).await;

        a_tx.send(true).unwrap();
        ha.await.unwrap().unwrap();
        // Released, so the follower takes over on its next poll.
        sleep(Duration::from_millis(600)).await;
        assert!(b_active.load(Ordering::SeqCst));

        let lease = store.snapshot("defaults-lock").unwrap();
        assert!(lease.record.is_held_by("b"));
        assert_eq!(lease.record.leader_transitions, 1);

        b_tx.send(true).unwrap();
        hb.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_term_is_fatal() {
        let store = Arc::new(InMemoryLockStore::new());
        let elector = elector("a", store.clone());
        let terms = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = shutdown::channel();

        let counter = terms.clone();
        let result = elector
            .run(rx, move |_term| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ElectionError::LeadTask("boom".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(ElectionError::LeadTask(_))));
        assert_eq!(terms.load(Ordering::SeqCst), 1);
        assert!(store.snapshot("defaults-lock").unwrap().record.is_released());
        assert_eq!(*elector.subscribe().borrow(), LeadershipStatus::Stopped);
    }
}
