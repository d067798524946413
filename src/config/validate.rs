// src/config/validate.rs

use std::path::PathBuf;

use crate::config::model::{DEFAULT_STATE_DIR_NAME, HubConfig, RawHubConfig};
use crate::errors::{HubError, Result};

impl TryFrom<RawHubConfig> for HubConfig {
    type Error = HubError;

    fn try_from(raw: RawHubConfig) -> Result<Self> {
        let state_dir = match raw.hub.state_dir {
            Some(dir) => {
                if dir.trim().is_empty() {
                    return Err(HubError::ConfigError(
                        "hub.state_dir must not be empty".to_string(),
                    ));
                }
                PathBuf::from(dir)
            }
            None => default_state_dir()?,
        };

        require_port("hub.port", raw.hub.port)?;
        require_port("hub.agent_port", raw.hub.agent_port)?;

        let upgrade = raw.upgrade;
        require_non_empty("upgrade.pg_upgrade", &upgrade.pg_upgrade)?;
        require_relative_file("upgrade.old_cluster_config", &upgrade.old_cluster_config)?;
        require_relative_file("upgrade.new_cluster_config", &upgrade.new_cluster_config)?;

        if upgrade.old_cluster_config == upgrade.new_cluster_config {
            return Err(HubError::ConfigError(format!(
                "upgrade.old_cluster_config and upgrade.new_cluster_config both point at {:?}",
                upgrade.old_cluster_config
            )));
        }

        Ok(HubConfig {
            state_dir,
            port: raw.hub.port,
            agent_port: raw.hub.agent_port,
            pg_upgrade: upgrade.pg_upgrade,
            pg_upgrade_args: upgrade.pg_upgrade_args,
            old_cluster_config: upgrade.old_cluster_config,
            new_cluster_config: upgrade.new_cluster_config,
        })
    }
}

/// `$HOME/.gp_upgrade`.
pub fn default_state_dir() -> Result<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => Ok(PathBuf::from(home).join(DEFAULT_STATE_DIR_NAME)),
        _ => Err(HubError::ConfigError(
            "HOME is not set; configure hub.state_dir explicitly".to_string(),
        )),
    }
}

fn require_port(key: &str, port: u16) -> Result<()> {
    if port == 0 {
        return Err(HubError::ConfigError(format!(
            "{key} must be between 1 and 65535"
        )));
    }
    Ok(())
}

fn require_non_empty(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HubError::ConfigError(format!("{key} must not be empty")));
    }
    Ok(())
}

fn require_relative_file(key: &str, value: &str) -> Result<()> {
    require_non_empty(key, value)?;
    if PathBuf::from(value).is_absolute() {
        return Err(HubError::ConfigError(format!(
            "{key} must be relative to the state dir, got {value:?}"
        )));
    }
    Ok(())
}
