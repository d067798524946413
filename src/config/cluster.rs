// src/config/cluster.rs

//! Cluster topology, as far as the hub needs it.
//!
//! The hub only has to know where the old and the new master keep their
//! data. Both clusters are described by a JSON array of segments stored in
//! the state directory:
//!
//! ```json
//! [
//!   { "content": -1, "dbid": 1, "hostname": "mdw", "port": 15432,
//!     "datadir": "/data/master/gpseg-1" },
//!   { "content": 0, "dbid": 2, "hostname": "sdw1", "port": 25432,
//!     "datadir": "/data/primary/gpseg0" }
//! ]
//! ```
//!
//! The master is the segment with `content == -1`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::config::model::HubConfig;
use crate::errors::{HubError, Result};
use crate::fs::FileSystem;

/// `content` id of the master segment.
pub const MASTER_CONTENT_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Segment {
    pub content: i32,
    pub dbid: i32,
    pub hostname: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub datadir: PathBuf,
}

/// Resolves data directories from the cluster configuration.
pub trait ConfigReader: Send + Sync {
    /// `(old master data dir, new master data dir)` for the clusters
    /// described under `base_dir`.
    ///
    /// Must return the same pair for the same `base_dir` and unchanged
    /// configuration.
    fn master_data_dirs(&self, base_dir: &Path) -> Result<(PathBuf, PathBuf)>;
}

/// Reads the two cluster descriptions through a [`FileSystem`].
#[derive(Debug, Clone)]
pub struct ClusterConfigReader {
    fs: Arc<dyn FileSystem>,
    old_file: String,
    new_file: String,
}

impl ClusterConfigReader {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        old_file: impl Into<String>,
        new_file: impl Into<String>,
    ) -> Self {
        Self {
            fs,
            old_file: old_file.into(),
            new_file: new_file.into(),
        }
    }

    pub fn from_config(cfg: &HubConfig, fs: Arc<dyn FileSystem>) -> Self {
        Self::new(fs, &cfg.old_cluster_config, &cfg.new_cluster_config)
    }

    /// All segments listed in `base_dir/<file>`.
    pub fn segments(&self, base_dir: &Path, file: &str) -> Result<Vec<Segment>> {
        let path = base_dir.join(file);
        if !self.fs.is_file(&path) {
            return Err(HubError::ConfigResolution(format!(
                "cluster configuration {} does not exist",
                path.display()
            )));
        }

        let contents = self.fs.read_to_string(&path).map_err(|err| {
            HubError::ConfigResolution(format!("reading {}: {err:#}", path.display()))
        })?;

        serde_json::from_str(&contents).map_err(|err| {
            HubError::ConfigResolution(format!("parsing {}: {err}", path.display()))
        })
    }

    fn master_data_dir(&self, base_dir: &Path, file: &str) -> Result<PathBuf> {
        let segments = self.segments(base_dir, file)?;
        let mut masters = segments
            .into_iter()
            .filter(|segment| segment.content == MASTER_CONTENT_ID);

        let master = masters.next().ok_or_else(|| {
            HubError::ConfigResolution(format!(
                "no master segment (content {MASTER_CONTENT_ID}) in {}",
                base_dir.join(file).display()
            ))
        })?;

        if masters.next().is_some() {
            return Err(HubError::ConfigResolution(format!(
                "more than one master segment in {}",
                base_dir.join(file).display()
            )));
        }

        if master.datadir.as_os_str().is_empty() {
            return Err(HubError::ConfigResolution(format!(
                "master segment in {} has an empty datadir",
                base_dir.join(file).display()
            )));
        }

        Ok(master.datadir)
    }
}

impl ConfigReader for ClusterConfigReader {
    fn master_data_dirs(&self, base_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let old = self.master_data_dir(base_dir, &self.old_file)?;
        let new = self.master_data_dir(base_dir, &self.new_file)?;
        debug!(old = %old.display(), new = %new.display(), "resolved master data dirs");
        Ok((old, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    const OLD: &str = r#"[
        {"content": -1, "dbid": 1, "hostname": "mdw", "port": 15432, "datadir": "/data/old/gpseg-1"},
        {"content": 0, "dbid": 2, "hostname": "sdw1", "port": 25432, "datadir": "/data/old/gpseg0"}
    ]"#;

    fn reader(fs: &MockFileSystem) -> ClusterConfigReader {
        ClusterConfigReader::new(
            Arc::new(fs.clone()),
            "cluster_config.json",
            "new_cluster_config.json",
        )
    }

    #[test]
    fn resolves_both_masters() {
        let fs = MockFileSystem::new();
        fs.add_file("/state/cluster_config.json", OLD);
        fs.add_file(
            "/state/new_cluster_config.json",
            r#"[{"content": -1, "dbid": 1, "hostname": "mdw", "datadir": "/data/new/gpseg-1"}]"#,
        );

        let (old, new) = reader(&fs).master_data_dirs(Path::new("/state")).unwrap();
        assert_eq!(old, PathBuf::from("/data/old/gpseg-1"));
        assert_eq!(new, PathBuf::from("/data/new/gpseg-1"));
    }

    #[test]
    fn missing_new_cluster_is_a_resolution_error() {
        let fs = MockFileSystem::new();
        fs.add_file("/state/cluster_config.json", OLD);

        let err = reader(&fs).master_data_dirs(Path::new("/state")).unwrap_err();
        assert!(matches!(err, HubError::ConfigResolution(msg) if msg.contains("new_cluster_config.json")));
    }

    #[test]
    fn cluster_without_master_is_rejected() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "/state/cluster_config.json",
            r#"[{"content": 0, "dbid": 2, "hostname": "sdw1", "datadir": "/data/old/gpseg0"}]"#,
        );
        fs.add_file("/state/new_cluster_config.json", OLD);

        let err = reader(&fs).master_data_dirs(Path::new("/state")).unwrap_err();
        assert!(matches!(err, HubError::ConfigResolution(msg) if msg.contains("no master")));
    }

    #[test]
    fn bad_json_is_a_resolution_error() {
        let fs = MockFileSystem::new();
        fs.add_file("/state/cluster_config.json", "{");
        fs.add_file("/state/new_cluster_config.json", OLD);

        assert!(matches!(
            reader(&fs).master_data_dirs(Path::new("/state")),
            Err(HubError::ConfigResolution(_))
        ));
    }
}
