// src/hub/requests.rs

//! Trigger request shapes and their field checks.

use crate::errors::{HubError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeConvertMasterRequest {
    pub old_bin_dir: String,
    pub new_bin_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeShutdownClustersRequest {
    pub old_bin_dir: String,
    pub new_bin_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeValidateStartClusterRequest {
    pub new_bin_dir: String,
    pub new_data_dir: String,
}

impl UpgradeConvertMasterRequest {
    pub fn validate(&self) -> Result<()> {
        require("old_bin_dir", &self.old_bin_dir)?;
        require("new_bin_dir", &self.new_bin_dir)
    }
}

impl UpgradeShutdownClustersRequest {
    pub fn validate(&self) -> Result<()> {
        require("old_bin_dir", &self.old_bin_dir)?;
        require("new_bin_dir", &self.new_bin_dir)
    }
}

impl UpgradeValidateStartClusterRequest {
    pub fn validate(&self) -> Result<()> {
        require("new_bin_dir", &self.new_bin_dir)?;
        require("new_data_dir", &self.new_data_dir)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HubError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}
