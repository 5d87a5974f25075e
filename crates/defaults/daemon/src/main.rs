//! defaultsd - default resource controller
//!
//! Keeps a fixed set of default resources present and unmodified:
//! - Leader election over a shared lease
//! - Bootstrap of every default on each new term
//! - Level-triggered reconciliation of watch events
//! - Health and status endpoint

use clap::Parser;
use defaults_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// defaultsd CLI
#[derive(Parser)]
#[command(name = "defaultsd")]
#[command(about = "Default resource controller", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DEFAULTS_CONFIG")]
    config: Option<String>,

    /// Health endpoint listen address
    #[arg(short, long, env = "DEFAULTS_LISTEN_ADDR")]
    listen: Option<String>,

    /// Directory of default resource manifests
    #[arg(short, long, env = "DEFAULTS_DIR")]
    defaults_dir: Option<PathBuf>,

    /// Election identity, defaults to the pod or host name
    #[arg(long, env = "DEFAULTS_IDENTITY")]
    identity: Option<String>,

    /// Namespace holding the election lock
    #[arg(long, env = "DEFAULTS_LOCK_NAMESPACE")]
    lock_namespace: Option<String>,

    /// Operator name to report status under
    #[arg(long, env = "DEFAULTS_OPERATOR_NAME")]
    operator_name: Option<String>,

    /// Number of reconcile workers
    #[arg(short, long, env = "DEFAULTS_WORKERS")]
    workers: Option<usize>,

    /// Log level
    #[arg(long, env = "DEFAULTS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DEFAULTS_LOG_JSON")]
    json: bool,
}

impl Cli {
    fn apply(self, config: &mut DaemonConfig) -> DaemonResult<()> {
        if let Some(listen) = self.listen {
            config.server.listen_addr = listen
                .parse()
                .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
        }
        if let Some(dir) = self.defaults_dir {
            config.defaults.dir = Some(dir);
        }
        if let Some(identity) = self.identity {
            config.election.identity = Some(identity);
        }
        if let Some(namespace) = self.lock_namespace {
            config.election.namespace = namespace;
        }
        if let Some(name) = self.operator_name {
            config.status.operator_name = Some(name);
        }
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err(DaemonError::Config("workers must be at least 1".to_string()));
            }
            config.controller.workers = workers;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        config.logging.json |= self.json;
        Ok(())
    }
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config)?;

    init_tracing(&config.logging.level, config.logging.json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        namespace = %config.election.namespace,
        lock = %config.election.lock_name,
        "Starting defaultsd"
    );

    Server::new(config)?.run().await
}
