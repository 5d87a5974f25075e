//! The sample configuration and manifests under deploy/ must stay loadable.

use defaults_controller::{DesiredStateSource, DirectorySource};
use defaults_daemon::config::StorageConfig;
use defaults_daemon::DaemonConfig;
use std::collections::HashMap;
use std::path::PathBuf;

fn deploy_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../../deploy")
}

#[test]
fn sample_config_loads() {
    let path = deploy_dir().join("defaultsd.yaml");
    let config =
        DaemonConfig::load_with_env(path.to_str(), Some(HashMap::new())).unwrap();

    assert!(matches!(config.storage, StorageConfig::Memory));
    assert_eq!(config.election.lock_name, "marketplace-operator-lock");
    assert_eq!(config.status.operator_name.as_deref(), Some("marketplace"));
    assert_eq!(config.defaults.dir, Some(PathBuf::from("deploy/defaults")));
    assert!(config.defaults.suppressed.is_empty());
}

#[test]
fn sample_manifests_load() {
    let registry = DirectorySource::new(deploy_dir().join("defaults"))
        .load()
        .unwrap();

    assert_eq!(
        registry.names(),
        vec![
            "certified-operators",
            "community-operators",
            "redhat-marketplace",
            "redhat-operators",
        ]
    );
    let community = registry.get("community-operators").unwrap();
    assert_eq!(community.namespace(), "openshift-marketplace");
    assert_eq!(community.spec()["sourceType"], "grpc");
}
