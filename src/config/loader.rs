// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{HubConfig, RawHubConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawHubConfig`.
///
/// This only performs TOML deserialization; semantic checks happen in
/// [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawHubConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawHubConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks the state dir, port and cluster config file names.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<HubConfig> {
    let raw_config = load_from_path(&path)?;
    let config = HubConfig::try_from(raw_config)?;
    Ok(config)
}

/// Like [`load_and_validate`], but a missing file yields the defaults.
///
/// Lets the hub run without any config file at all.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<HubConfig> {
    let path = path.as_ref();
    if path.exists() {
        return load_and_validate(path);
    }
    debug!(path = %path.display(), "no config file; using defaults");
    HubConfig::try_from(RawHubConfig::default())
}

/// Default config path: `UpgradeHub.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("UpgradeHub.toml")
}
