// src/logging.rs

//! Where `upgrade-hub` writes what.
//!
//! STDOUT is reserved for what the user asked for: the "step started" line,
//! the step's final status and the `status` report. Everything else is a
//! `tracing` event on STDERR. That includes every line a step's process
//! prints, which the log sink re-emits under the `upgrade_hub::sink` target
//! (`INFO` for output, `ERROR` for the failure report), so
//! `UPGRADE_HUB_LOG="info,upgrade_hub::sink=off"` hides step output while
//! keeping the hub's own events.
//!
//! The filter comes from `--log-level` when given, else from the directives
//! in `UPGRADE_HUB_LOG`, else `info`.

use anyhow::Result;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Environment variable holding filter directives when no `--log-level` is given.
pub const LOG_ENV_VAR: &str = "UPGRADE_HUB_LOG";

/// Target the log sink mirrors step output under.
pub const SINK_TARGET: &str = "upgrade_hub::sink";

const DEFAULT_DIRECTIVES: &str = "info";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let (filter, rejected) = match build_filter(cli_level, env_value.as_deref()) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(DEFAULT_DIRECTIVES), Some(err)),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(err) = rejected {
        warn!(error = %err, "ignoring {LOG_ENV_VAR}; logging at {DEFAULT_DIRECTIVES}");
    }
    Ok(())
}

/// The filter for the given CLI level and `UPGRADE_HUB_LOG` value.
///
/// Only malformed `UPGRADE_HUB_LOG` directives are an error; a CLI level
/// always wins over the environment.
pub fn build_filter(
    cli_level: Option<LogLevel>,
    env_value: Option<&str>,
) -> std::result::Result<EnvFilter, ParseError> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(level_directive(level)));
    }
    match env_value.map(str::trim) {
        Some(directives) if !directives.is_empty() => EnvFilter::try_new(directives),
        _ => Ok(EnvFilter::new(DEFAULT_DIRECTIVES)),
    }
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
