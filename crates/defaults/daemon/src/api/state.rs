//! Application state for the health endpoint

use chrono::{DateTime, Utc};
use defaults_types::LeadershipStatus;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Replica identity used in the election
    pub identity: String,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: DateTime<Utc>,

    /// Leadership updates from the engine
    pub leadership: watch::Receiver<LeadershipStatus>,

    /// Names of the managed defaults
    pub defaults: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        identity: String,
        leadership: watch::Receiver<LeadershipStatus>,
        defaults: Vec<String>,
    ) -> Self {
        Self {
            identity,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
            leadership,
            defaults: Arc::new(defaults),
        }
    }

    /// Human-readable uptime
    pub fn uptime(&self) -> String {
        let secs = (Utc::now() - self.started_at).num_seconds().max(0);
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
