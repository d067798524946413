// src/config/model.rs

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Port the hub listens on when none is configured.
pub const DEFAULT_HUB_PORT: u16 = 7527;

/// Port the agents on the segment hosts listen on.
pub const DEFAULT_AGENT_PORT: u16 = 6416;

/// Name of the hub's state directory under `$HOME`.
pub const DEFAULT_STATE_DIR_NAME: &str = ".gp_upgrade";

/// Hub configuration as read from a TOML file.
///
/// ```toml
/// [hub]
/// state_dir = "/home/gpadmin/.gp_upgrade"
/// port = 7527
/// agent_port = 6416
///
/// [upgrade]
/// pg_upgrade = "pg_upgrade"
/// pg_upgrade_args = ["--link"]
/// old_cluster_config = "cluster_config.json"
/// new_cluster_config = "new_cluster_config.json"
/// ```
///
/// Every section and key is optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHubConfig {
    #[serde(default)]
    pub hub: HubSection,

    #[serde(default)]
    pub upgrade: UpgradeSection,
}

/// `[hub]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HubSection {
    /// Where status records and pg_upgrade's working files live.
    ///
    /// Defaults to `$HOME/.gp_upgrade`.
    #[serde(default)]
    pub state_dir: Option<String>,

    /// Port the transport layer binds; the hub core only carries it.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port the hub dials on every segment host.
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
}

fn default_port() -> u16 {
    DEFAULT_HUB_PORT
}

fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            state_dir: None,
            port: default_port(),
            agent_port: default_agent_port(),
        }
    }
}

/// `[upgrade]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct UpgradeSection {
    /// Upgrade binary. A bare name is looked up in the new bin dir.
    #[serde(default = "default_pg_upgrade")]
    pub pg_upgrade: String,

    /// Extra arguments appended to every pg_upgrade invocation.
    #[serde(default)]
    pub pg_upgrade_args: Vec<String>,

    /// File (relative to the state dir) describing the old cluster.
    #[serde(default = "default_old_cluster_config")]
    pub old_cluster_config: String,

    /// File (relative to the state dir) describing the new cluster.
    #[serde(default = "default_new_cluster_config")]
    pub new_cluster_config: String,
}

fn default_pg_upgrade() -> String {
    "pg_upgrade".to_string()
}

fn default_old_cluster_config() -> String {
    "cluster_config.json".to_string()
}

fn default_new_cluster_config() -> String {
    "new_cluster_config.json".to_string()
}

impl Default for UpgradeSection {
    fn default() -> Self {
        Self {
            pg_upgrade: default_pg_upgrade(),
            pg_upgrade_args: Vec::new(),
            old_cluster_config: default_old_cluster_config(),
            new_cluster_config: default_new_cluster_config(),
        }
    }
}

/// Validated hub configuration. Immutable once the hub is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub state_dir: PathBuf,
    pub port: u16,
    pub agent_port: u16,
    pub pg_upgrade: String,
    pub pg_upgrade_args: Vec<String>,
    pub old_cluster_config: String,
    pub new_cluster_config: String,
}

impl HubConfig {
    /// Default settings rooted at `state_dir`.
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        let upgrade = UpgradeSection::default();
        Self {
            state_dir: state_dir.into(),
            port: DEFAULT_HUB_PORT,
            agent_port: DEFAULT_AGENT_PORT,
            pg_upgrade: upgrade.pg_upgrade,
            pg_upgrade_args: upgrade.pg_upgrade_args,
            old_cluster_config: upgrade.old_cluster_config,
            new_cluster_config: upgrade.new_cluster_config,
        }
    }

    /// Working directory pg_upgrade runs in (it drops its logs there).
    pub fn pg_upgrade_dir(&self) -> PathBuf {
        self.state_dir.join("pg_upgrade")
    }

    /// Full path of the upgrade binary for a given new bin dir.
    pub fn pg_upgrade_path(&self, new_bin_dir: &Path) -> PathBuf {
        let configured = Path::new(&self.pg_upgrade);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            new_bin_dir.join(configured)
        }
    }
}
