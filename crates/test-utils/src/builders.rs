use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use upgrade_hub::config::{ConfigReader, HubConfig};
use upgrade_hub::errors::{HubError, Result};
use upgrade_hub::exec::CommandInvoker;
use upgrade_hub::hub::{Hub, UpgradeConvertMasterRequest};

/// Old master data dir handed out by [`StaticConfigReader::default`].
pub const OLD_DATA_DIR: &str = "old/datadirectory/path";
/// New master data dir handed out by [`StaticConfigReader::default`].
pub const NEW_DATA_DIR: &str = "new/datadirectory/path";

/// Config reader that always resolves to the same pair of data dirs and
/// counts how often it was asked.
#[derive(Debug, Clone)]
pub struct StaticConfigReader {
    old: PathBuf,
    new: PathBuf,
    calls: Arc<AtomicUsize>,
}

impl StaticConfigReader {
    pub fn new(old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticConfigReader {
    fn default() -> Self {
        Self::new(OLD_DATA_DIR, NEW_DATA_DIR)
    }
}

impl ConfigReader for StaticConfigReader {
    fn master_data_dirs(&self, _base_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.old.clone(), self.new.clone()))
    }
}

/// Config reader whose resolution always fails.
#[derive(Debug, Clone)]
pub struct FailingConfigReader {
    message: String,
}

impl FailingConfigReader {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl ConfigReader for FailingConfigReader {
    fn master_data_dirs(&self, base_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        Err(HubError::ConfigResolution(format!(
            "{} (base dir {})",
            self.message,
            base_dir.display()
        )))
    }
}

/// Hub rooted at `state_dir` with the default static reader.
pub async fn build_hub<I>(state_dir: &Path, invoker: I) -> Hub
where
    I: CommandInvoker + 'static,
{
    build_hub_with_reader(state_dir, StaticConfigReader::default(), invoker).await
}

pub async fn build_hub_with_reader<R, I>(state_dir: &Path, reader: R, invoker: I) -> Hub
where
    R: ConfigReader + 'static,
    I: CommandInvoker + 'static,
{
    Hub::new(
        HubConfig::with_state_dir(state_dir),
        Arc::new(reader),
        Arc::new(invoker),
    )
    .await
    .expect("Failed to build hub for test")
}

/// The request the convert-master tests send.
pub fn convert_master_request() -> UpgradeConvertMasterRequest {
    UpgradeConvertMasterRequest {
        old_bin_dir: "/old/path/bin".to_string(),
        new_bin_dir: "/new/path/bin".to_string(),
    }
}
