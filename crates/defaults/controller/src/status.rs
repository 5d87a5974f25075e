//! External status reporting for the engine.

use serde::Serialize;
use tracing::{info, warn};

/// Lifecycle of one leadership term, as reported to the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ReportedStatus {
    /// Workers are running on this replica.
    Running,
    /// The term ended normally.
    Stopped,
    /// The term ended with a fatal error.
    Failed(String),
}

pub trait StatusReporter: Send + Sync {
    fn report(&self, status: ReportedStatus);
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReporter;

impl StatusReporter for NoOpReporter {
    fn report(&self, _status: ReportedStatus) {}
}

/// Reporter that emits one structured log line per transition, tagged with
/// the operator name it reports for.
#[derive(Debug, Clone)]
pub struct TracingReporter {
    operator_name: String,
    version: String,
}

impl TracingReporter {
    pub fn new(operator_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            operator_name: operator_name.into(),
            version: version.into(),
        }
    }

    pub fn operator_name(&self) -> &str {
        &self.operator_name
    }
}

impl StatusReporter for TracingReporter {
    fn report(&self, status: ReportedStatus) {
        match status {
            ReportedStatus::Failed(reason) => warn!(
                operator = %self.operator_name,
                version = %self.version,
                %reason,
                "Operator status: failed"
            ),
            other => info!(
                operator = %self.operator_name,
                version = %self.version,
                status = ?other,
                "Operator status changed"
            ),
        }
    }
}
