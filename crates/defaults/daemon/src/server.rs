//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::{resolve_identity, DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use defaults_controller::shutdown;
use defaults_controller::{
    DesiredStateRegistry, DesiredStateSource, DirectorySource, Engine, EngineConfig, EngineParts,
    InMemoryLockStore, InMemoryObjectStore, NoOpReporter, StatusReporter, SuppressedDefaults,
    TracingReporter,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// defaultsd server: the reconciliation engine plus its health endpoint
pub struct Server {
    config: DaemonConfig,
    engine: Arc<Engine>,
    objects: Arc<InMemoryObjectStore>,
    defaults: Vec<String>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let registry = match &config.defaults.dir {
            Some(dir) => DirectorySource::new(dir).load()?,
            None => {
                warn!("No defaults directory configured, nothing will be reconciled");
                DesiredStateRegistry::default()
            }
        };
        let defaults = registry.names().into_iter().map(str::to_string).collect();
        let suppressed = SuppressedDefaults::from_names(config.defaults.suppressed.iter().cloned());

        let (objects, locks) = match config.storage {
            StorageConfig::Memory => (
                Arc::new(InMemoryObjectStore::new()),
                Arc::new(InMemoryLockStore::new()),
            ),
        };

        let reporter: Arc<dyn StatusReporter> = match &config.status.operator_name {
            Some(name) => Arc::new(TracingReporter::new(name.clone(), env!("CARGO_PKG_VERSION"))),
            None => Arc::new(NoOpReporter),
        };

        let identity = resolve_identity(config.election.identity.as_deref(), |key| {
            std::env::var(key).ok()
        });
        let engine_config = EngineConfig {
            election: config.election.election_config(identity),
            reconciler: config.controller.reconciler_config(),
            controller: config.controller.controller_config(),
        };
        let parts = EngineParts {
            objects: objects.clone(),
            watch: objects.clone(),
            locks,
            registry: Arc::new(registry),
            suppressed: Arc::new(suppressed),
            reporter,
        };
        let engine = Arc::new(Engine::new(engine_config, parts)?);

        Ok(Self {
            config,
            engine,
            objects,
            defaults,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Object store backing the memory storage backend
    pub fn objects(&self) -> &Arc<InMemoryObjectStore> {
        &self.objects
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `stop` resolves or the engine fails
    pub async fn run_until(self, stop: impl Future<Output = ()>) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %listener.local_addr()?,
            identity = %self.engine.identity(),
            defaults = self.defaults.len(),
            "defaultsd listening"
        );

        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let state = AppState::new(
            self.engine.identity().to_string(),
            self.engine.leadership(),
            self.defaults.clone(),
        );
        let mut server_signal = shutdown_rx.clone();
        let router = create_router(state);
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown::cancelled(&mut server_signal).await })
                .await
        });

        let engine = self.engine.clone();
        let mut engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

        let finished_early = tokio::select! {
            _ = stop => None,
            joined = &mut engine_task => Some(joined),
        };
        info!("defaultsd shutting down");
        let _ = shutdown_tx.send(true);

        let engine_result = match finished_early {
            Some(joined) => joined,
            None => engine_task.await,
        };

        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Health server failed"),
            Err(e) => error!(error = %e, "Health server task failed"),
        }

        engine_result
            .map_err(|e| DaemonError::Server(format!("engine task failed: {e}")))?
            .map_err(DaemonError::from)
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use defaults_controller::ObjectStore;
    use defaults_types::ResourceIdentity;
    use std::time::Duration;

    fn write_defaults(dir: &std::path::Path) {
        std::fs::write(
            dir.join("community-operators.yaml"),
            "metadata:\n  name: community-operators\n  namespace: openshift-marketplace\nspec:\n  sourceType: grpc\n  image: registry.example/community:v1\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("redhat-operators.json"),
            r#"{"metadata":{"name":"redhat-operators","namespace":"openshift-marketplace"},"spec":{"sourceType":"grpc","image":"registry.example/redhat:v1"}}"#,
        )
        .unwrap();
    }

    fn test_config(dir: &std::path::Path) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.server.listen_addr = "127.0.0.1:0".parse().unwrap();
        config.defaults.dir = Some(dir.to_path_buf());
        config.election.identity = Some("test-replica".to_string());
        config
    }

    #[test]
    fn test_new_fails_on_missing_defaults_dir() {
        let mut config = DaemonConfig::default();
        config.defaults.dir = Some("/nonexistent/defaults".into());
        assert!(matches!(Server::new(config), Err(DaemonError::Registry(_))));
    }

    #[test]
    fn test_new_rejects_bad_lease_settings() {
        let mut config = DaemonConfig::default();
        config.election.renew_deadline_secs = 120;
        assert!(matches!(Server::new(config), Err(DaemonError::Engine(_))));
    }

    #[tokio::test]
    async fn test_run_ensures_defaults_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        write_defaults(dir.path());

        let server = Server::new(test_config(dir.path())).unwrap();
        assert_eq!(server.engine().identity(), "test-replica");
        let objects = server.objects().clone();

        server
            .run_until(tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        let id = ResourceIdentity::new("openshift-marketplace", "redhat-operators");
        let created = objects.get(&id).await.unwrap();
        assert_eq!(created.spec["image"], "registry.example/redhat:v1");
        assert_eq!(objects.len().await, 2);
    }
}
