// src/config/mod.rs

//! Hub configuration.
//!
//! - [`model`]: TOML shape (`RawHubConfig`) and the validated `HubConfig`.
//! - [`validate`]: `RawHubConfig -> HubConfig` checks.
//! - [`loader`]: reading the TOML file.
//! - [`cluster`]: the cluster topology reader used to find data dirs.

pub mod cluster;
pub mod loader;
pub mod model;
pub mod validate;

pub use cluster::{ClusterConfigReader, ConfigReader, Segment};
pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{DEFAULT_AGENT_PORT, HubConfig, HubSection, RawHubConfig, UpgradeSection};
