// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `upgrade-hub`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "upgrade-hub",
    version,
    about = "Drive a cluster through an in-place major-version upgrade, one step at a time.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the hub config file (TOML).
    ///
    /// A missing file means "use the defaults".
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Override `hub.state_dir` from the config file.
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `UPGRADE_HUB_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: HubCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum HubCommand {
    /// Stop the old and the new cluster.
    ShutdownClusters {
        #[command(flatten)]
        bin_dirs: BinDirs,
    },

    /// Run pg_upgrade against the master.
    ConvertMaster {
        #[command(flatten)]
        bin_dirs: BinDirs,
    },

    /// Start the upgraded cluster to check it comes up.
    ValidateStartCluster {
        #[arg(long, value_name = "DIR")]
        new_bin_dir: String,

        #[arg(long, value_name = "DIR")]
        new_data_dir: String,
    },

    /// Print the recorded status of every step, or the full record of one.
    Status {
        /// Step to show in detail (e.g. `convert-master`).
        #[arg(value_name = "STEP")]
        step: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct BinDirs {
    /// Bin directory of the cluster being upgraded.
    #[arg(long, value_name = "DIR")]
    pub old_bin_dir: String,

    /// Bin directory of the target version.
    #[arg(long, value_name = "DIR")]
    pub new_bin_dir: String,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
