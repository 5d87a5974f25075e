//! Leadership lease record and timing settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Lock record stored in the distributed lock store.
///
/// Ownership moves between replicas by compare-and-swap on the record's
/// version; an empty `holder_identity` means the lease was released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder_identity: String,
    pub lease_duration_seconds: u64,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    pub leader_transitions: u32,
}

impl LeaseRecord {
    /// Record for a released lease, claimable immediately by anyone
    pub fn released(previous: &LeaseRecord) -> Self {
        let now = Utc::now();
        Self {
            holder_identity: String::new(),
            lease_duration_seconds: 1,
            acquire_time: now,
            renew_time: now,
            leader_transitions: previous.leader_transitions,
        }
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        !self.holder_identity.is_empty() && self.holder_identity == identity
    }

    pub fn is_released(&self) -> bool {
        self.holder_identity.is_empty()
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_seconds)
    }
}

/// Timing settings for leader election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSettings {
    /// How long followers wait after the last observed renewal before taking over
    #[serde(with = "secs")]
    pub lease_duration: Duration,

    /// How long the leader keeps retrying a renewal before stepping down
    #[serde(with = "secs")]
    pub renew_deadline: Duration,

    /// Interval between acquisition and renewal attempts
    #[serde(with = "secs")]
    pub retry_period: Duration,

    /// Upper bound on the best-effort release at shutdown
    #[serde(with = "secs")]
    pub release_timeout: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(90),
            renew_deadline: Duration::from_secs(60),
            retry_period: Duration::from_secs(30),
            release_timeout: Duration::from_secs(5),
        }
    }
}

/// Invalid combination of lease timings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseSettingsError {
    #[error("retry period must be greater than zero")]
    ZeroRetryPeriod,

    #[error("renew deadline ({renew_deadline:?}) must be greater than retry period ({retry_period:?})")]
    RenewDeadlineTooShort {
        renew_deadline: Duration,
        retry_period: Duration,
    },

    #[error("lease duration ({lease_duration:?}) must be greater than renew deadline ({renew_deadline:?})")]
    LeaseDurationTooShort {
        lease_duration: Duration,
        renew_deadline: Duration,
    },
}

impl LeaseSettings {
    pub fn new(lease_duration: Duration, renew_deadline: Duration, retry_period: Duration) -> Self {
        Self {
            lease_duration,
            renew_deadline,
            retry_period,
            ..Default::default()
        }
    }

    /// Check the ordering `lease_duration > renew_deadline > retry_period > 0`.
    ///
    /// A leader steps down no later than `renew_deadline` after its last
    /// renewal while followers wait at least `lease_duration`, so the ordering
    /// keeps two leaders from overlapping.
    pub fn validate(&self) -> Result<(), LeaseSettingsError> {
        if self.retry_period.is_zero() {
            return Err(LeaseSettingsError::ZeroRetryPeriod);
        }
        if self.renew_deadline <= self.retry_period {
            return Err(LeaseSettingsError::RenewDeadlineTooShort {
                renew_deadline: self.renew_deadline,
                retry_period: self.retry_period,
            });
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(LeaseSettingsError::LeaseDurationTooShort {
                lease_duration: self.lease_duration,
                renew_deadline: self.renew_deadline,
            });
        }
        Ok(())
    }
}

/// Leadership state of one elector, as published to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeadershipStatus {
    /// Trying to acquire the lease, no leader observed yet
    Candidate,
    /// Holding the lease
    Leading { since: DateTime<Utc> },
    /// Another replica holds the lease
    Following { leader: String },
    /// The elector has exited
    Stopped,
}

impl LeadershipStatus {
    pub fn is_leading(&self) -> bool {
        matches!(self, Self::Leading { .. })
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = LeaseSettings::default();
        assert_eq!(settings.lease_duration, Duration::from_secs(90));
        assert_eq!(settings.renew_deadline, Duration::from_secs(60));
        assert_eq!(settings.retry_period, Duration::from_secs(30));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_ordering() {
        let settings = LeaseSettings::new(
            Duration::from_secs(10),
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        assert!(matches!(
            settings.validate(),
            Err(LeaseSettingsError::LeaseDurationTooShort { .. })
        ));

        let settings = LeaseSettings::new(
            Duration::from_secs(10),
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        assert!(matches!(
            settings.validate(),
            Err(LeaseSettingsError::RenewDeadlineTooShort { .. })
        ));

        let settings = LeaseSettings::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
            Duration::ZERO,
        );
        assert_eq!(settings.validate(), Err(LeaseSettingsError::ZeroRetryPeriod));
    }

    #[test]
    fn test_released_record() {
        let now = Utc::now();
        let held = LeaseRecord {
            holder_identity: "pod-a".to_string(),
            lease_duration_seconds: 90,
            acquire_time: now,
            renew_time: now,
            leader_transitions: 3,
        };
        assert!(held.is_held_by("pod-a"));

        let released = LeaseRecord::released(&held);
        assert!(released.is_released());
        assert!(!released.is_held_by(""));
        assert_eq!(released.leader_transitions, 3);
    }
}
