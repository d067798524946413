// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The variants mirror how a trigger can fail *before* its step has been
//! handed to a background task. Anything that goes wrong after that point is
//! recorded in the status store and the log sink instead of being returned.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{StepStatus, UpgradeStep};

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not resolve cluster configuration: {0}")]
    ConfigResolution(String),

    #[error("Step {0} is already running")]
    AlreadyRunning(UpgradeStep),

    #[error("Failed to start {step}: {source}")]
    ProcessStart {
        step: UpgradeStep,
        #[source]
        source: std::io::Error,
    },

    #[error("Step {step} failed with exit status {code}")]
    StepFailure { step: UpgradeStep, code: i32 },

    #[error("Failed to persist status of {step}: {message}")]
    Persistence { step: UpgradeStep, message: String },

    #[error("State directory {} is in use by another hub", .0.display())]
    StateDirBusy(PathBuf),

    #[error("Agent {host}:{port} is unreachable: {source}")]
    AgentUnreachable {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Step {step} cannot move from {from} to {to}")]
    InvalidTransition {
        step: UpgradeStep,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HubError>;
