// tests/cluster_config.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use proptest::prelude::*;
use upgrade_hub::config::{ClusterConfigReader, ConfigReader, HubConfig};
use upgrade_hub::errors::HubError;
use upgrade_hub::fs::{MockFileSystem, RealFileSystem};
use upgrade_hub::hub::Hub;
use upgrade_hub::types::{StepStatus, UpgradeStep};
use upgrade_hub_test_utils::builders::convert_master_request;
use upgrade_hub_test_utils::fake_invoker::ReplayInvoker;
use upgrade_hub_test_utils::init_tracing;

fn cluster_json(master_dir: &str, segments: usize) -> String {
    let mut entries = vec![format!(
        r#"{{"content": -1, "dbid": 1, "hostname": "mdw", "port": 15432, "datadir": "{master_dir}"}}"#
    )];
    for content in 0..segments {
        entries.push(format!(
            r#"{{"content": {content}, "dbid": {}, "hostname": "sdw{content}", "datadir": "/data/primary/gpseg{content}"}}"#,
            content + 2
        ));
    }
    format!("[{}]", entries.join(",\n"))
}

#[test]
fn reads_master_data_dirs_from_the_state_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("cluster_config.json"),
        cluster_json("/data/old/gpseg-1", 2),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("new_cluster_config.json"),
        cluster_json("/data/new/gpseg-1", 2),
    )
    .unwrap();

    let cfg = HubConfig::with_state_dir(dir.path());
    let reader = ClusterConfigReader::from_config(&cfg, Arc::new(RealFileSystem));

    let (old, new) = reader.master_data_dirs(dir.path()).unwrap();
    assert_eq!(old, PathBuf::from("/data/old/gpseg-1"));
    assert_eq!(new, PathBuf::from("/data/new/gpseg-1"));

    let segments = reader
        .segments(dir.path(), "cluster_config.json")
        .unwrap();
    assert_eq!(segments.len(), 3);
}

#[test]
fn missing_config_file_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = HubConfig::with_state_dir(dir.path());
    let reader = ClusterConfigReader::from_config(&cfg, Arc::new(RealFileSystem));

    let err = reader.master_data_dirs(dir.path()).unwrap_err();
    assert!(matches!(err, HubError::ConfigResolution(msg) if msg.contains("cluster_config.json")));
}

#[test]
fn two_masters_are_ambiguous() {
    let fs = MockFileSystem::new();
    let doubled = r#"[
        {"content": -1, "dbid": 1, "hostname": "mdw", "datadir": "/a"},
        {"content": -1, "dbid": 9, "hostname": "smdw", "datadir": "/b"}
    ]"#;
    fs.add_file("/state/cluster_config.json", doubled);
    fs.add_file("/state/new_cluster_config.json", cluster_json("/new", 0));

    let reader = ClusterConfigReader::new(
        Arc::new(fs),
        "cluster_config.json",
        "new_cluster_config.json",
    );
    let err = reader.master_data_dirs(Path::new("/state")).unwrap_err();
    assert!(matches!(err, HubError::ConfigResolution(msg) if msg.contains("more than one master")));
}

#[tokio::test]
async fn hub_passes_resolved_dirs_to_pg_upgrade() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("cluster_config.json"),
        cluster_json("/data/old/gpseg-1", 1),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("new_cluster_config.json"),
        cluster_json("/data/new/gpseg-1", 1),
    )
    .unwrap();

    let cfg = HubConfig::with_state_dir(dir.path());
    let reader = ClusterConfigReader::from_config(&cfg, Arc::new(RealFileSystem));
    let invoker = ReplayInvoker::succeeding("ok");
    let hub = Hub::new(cfg, Arc::new(reader), Arc::new(invoker.clone()))
        .await
        .unwrap();

    hub.upgrade_convert_master(convert_master_request())
        .await
        .unwrap();
    let run = hub
        .wait_for_step(UpgradeStep::ConvertMaster, Some(std::time::Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(run.status, StepStatus::Succeeded);

    let args = &invoker.started()[0].args;
    assert!(args.contains(&"--old-datadir=/data/old/gpseg-1".to_string()));
    assert!(args.contains(&"--new-datadir=/data/new/gpseg-1".to_string()));
}

proptest! {
    #[test]
    fn resolution_is_deterministic(
        old_dir in "/[a-z]{1,8}(/[a-z0-9_-]{1,8}){0,3}",
        new_dir in "/[a-z]{1,8}(/[a-z0-9_-]{1,8}){0,3}",
        segments in 0usize..6,
    ) {
        let fs = MockFileSystem::new();
        fs.add_file("/state/cluster_config.json", cluster_json(&old_dir, segments));
        fs.add_file("/state/new_cluster_config.json", cluster_json(&new_dir, segments));
        let reader = ClusterConfigReader::new(
            Arc::new(fs),
            "cluster_config.json",
            "new_cluster_config.json",
        );

        let first = reader.master_data_dirs(Path::new("/state")).unwrap();
        let second = reader.master_data_dirs(Path::new("/state")).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.0, PathBuf::from(&old_dir));
        prop_assert_eq!(first.1, PathBuf::from(&new_dir));
    }
}
