//! Leader-gated reconciliation engine.
//!
//! [`Engine::run`] is the one entry point process bootstrap needs. While this
//! replica holds the lease, each term subscribes to the watch stream, ensures
//! every default exists, then runs the [`Controller`] until the term ends.

use crate::bootstrap::ensure_defaults;
use crate::controller::{Controller, ControllerConfig};
use crate::error::EngineError;
use crate::filter::EventFilter;
use crate::leader::{ElectionConfig, LeaderElector, LockStore};
use crate::reconciler::{DefaultsReconciler, ReconcilerConfig};
use crate::registry::{DesiredStateRegistry, SuppressedDefaults};
use crate::shutdown::ShutdownSignal;
use crate::status::{ReportedStatus, StatusReporter};
use crate::store::{ObjectStore, WatchSource};
use defaults_types::LeadershipStatus;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub election: ElectionConfig,
    pub reconciler: ReconcilerConfig,
    pub controller: ControllerConfig,
}

/// Collaborators the engine runs against.
#[derive(Clone)]
pub struct EngineParts {
    pub objects: Arc<dyn ObjectStore>,
    pub watch: Arc<dyn WatchSource>,
    pub locks: Arc<dyn LockStore>,
    pub registry: Arc<DesiredStateRegistry>,
    pub suppressed: Arc<SuppressedDefaults>,
    pub reporter: Arc<dyn StatusReporter>,
}

pub struct Engine {
    elector: LeaderElector,
    term: Term,
}

/// Everything one leadership term needs, cloned per term.
#[derive(Clone)]
struct Term {
    objects: Arc<dyn ObjectStore>,
    watch: Arc<dyn WatchSource>,
    registry: Arc<DesiredStateRegistry>,
    suppressed: Arc<SuppressedDefaults>,
    reporter: Arc<dyn StatusReporter>,
    reconciler: ReconcilerConfig,
    controller: ControllerConfig,
}

impl Engine {
    pub fn new(config: EngineConfig, parts: EngineParts) -> Result<Self, EngineError> {
        let elector = LeaderElector::new(config.election, parts.locks)?;
        Ok(Self {
            elector,
            term: Term {
                objects: parts.objects,
                watch: parts.watch,
                registry: parts.registry,
                suppressed: parts.suppressed,
                reporter: parts.reporter,
                reconciler: config.reconciler,
                controller: config.controller,
            },
        })
    }

    pub fn identity(&self) -> &str {
        self.elector.identity()
    }

    /// Leadership status updates for this replica.
    pub fn leadership(&self) -> watch::Receiver<LeadershipStatus> {
        self.elector.subscribe()
    }

    /// Run until `signal` fires or a term fails fatally.
    #[instrument(skip_all, fields(identity = %self.elector.identity()))]
    pub async fn run(&self, signal: ShutdownSignal) -> Result<(), EngineError> {
        info!(
            defaults = self.term.registry.len(),
            kind = %self.term.controller.resource_kind,
            "Starting reconciliation engine"
        );

        let term = self.term.clone();
        let result = self
            .elector
            .run(signal, move |term_signal| term.clone().lead(term_signal))
            .await;

        match &result {
            Ok(()) => info!("Reconciliation engine stopped"),
            Err(e) => error!(error = %e, "Reconciliation engine failed"),
        }
        result
    }
}

impl Term {
    async fn lead(self, signal: ShutdownSignal) -> Result<(), EngineError> {
        self.reporter.report(ReportedStatus::Running);

        // Subscribe before ensuring defaults so no change made meanwhile is missed.
        let events = self.watch.watch();

        let report = match ensure_defaults(&*self.objects, &self.registry, &self.suppressed).await {
            Ok(report) => report,
            Err(e) => {
                self.reporter.report(ReportedStatus::Failed(e.to_string()));
                return Err(e.into());
            }
        };
        info!(
            defaults = report.total(),
            created = report.created.len(),
            reset = report.reset.len(),
            unchanged = report.unchanged.len(),
            pending_deletion = report.pending_deletion.len(),
            suppressed = report.suppressed.len(),
            "Default resources ensured"
        );

        let reconciler = Arc::new(DefaultsReconciler::new(
            Arc::clone(&self.objects),
            Arc::clone(&self.registry),
            Arc::clone(&self.suppressed),
            self.reconciler,
        ));
        let controller = Controller::new(
            reconciler,
            EventFilter::new(Arc::clone(&self.registry)),
            self.controller.clone(),
        );
        controller.run(events, signal).await;

        self.reporter.report(ReportedStatus::Stopped);
        Ok(())
    }
}
