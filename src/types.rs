use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{HubError, Result};

/// The upgrade steps the hub knows how to run.
///
/// Declaration order is the order in which an upgrade runs them, and the
/// order in which status reports list them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UpgradeStep {
    ShutdownClusters,
    ConvertMaster,
    ValidateStartCluster,
}

impl UpgradeStep {
    pub const ALL: [UpgradeStep; 3] = [
        UpgradeStep::ShutdownClusters,
        UpgradeStep::ConvertMaster,
        UpgradeStep::ValidateStartCluster,
    ];

    /// Stable identifier, used as the record key on disk.
    pub fn id(self) -> &'static str {
        match self {
            UpgradeStep::ShutdownClusters => "ShutdownClusters",
            UpgradeStep::ConvertMaster => "ConvertMaster",
            UpgradeStep::ValidateStartCluster => "ValidateStartCluster",
        }
    }

    /// Human readable description, as in "Starting <description>".
    pub fn description(self) -> &'static str {
        match self {
            UpgradeStep::ShutdownClusters => "cluster shutdown",
            UpgradeStep::ConvertMaster => "master upgrade",
            UpgradeStep::ValidateStartCluster => "upgraded cluster start",
        }
    }

    /// Informational line written when the step's process exits cleanly.
    pub fn success_message(self) -> &'static str {
        match self {
            UpgradeStep::ShutdownClusters => "Both clusters shut down successfully",
            UpgradeStep::ConvertMaster => "Found no errors when starting the upgrade",
            UpgradeStep::ValidateStartCluster => "Upgraded cluster started successfully",
        }
    }
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.id())
    }
}

impl FromStr for UpgradeStep {
    type Err = HubError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        UpgradeStep::ALL
            .into_iter()
            .find(|step| {
                step.id().eq_ignore_ascii_case(wanted)
                    || step.id().eq_ignore_ascii_case(&wanted.replace(['-', '_'], ""))
            })
            .ok_or_else(|| HubError::UnknownStep(wanted.to_string()))
    }
}

/// Lifecycle state of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::NotStarted => "NotStarted",
            StepStatus::Running => "Running",
            StepStatus::Succeeded => "Succeeded",
            StepStatus::Failed => "Failed",
        };
        f.pad(s)
    }
}

/// Which pipe of the subprocess a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// Lines written by the hub itself (start failures, recovery notes).
    Hub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// One attempt at running a step.
///
/// Status only ever moves `NotStarted -> Running -> {Succeeded, Failed}`.
/// A new trigger always creates a fresh `StepRun` with its own `run_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRun {
    pub step: UpgradeStep,
    pub run_id: Uuid,
    pub attempt: u32,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output_log: Vec<OutputLine>,
}

impl StepRun {
    pub fn new(step: UpgradeStep, attempt: u32) -> Self {
        Self {
            step,
            run_id: Uuid::new_v4(),
            attempt,
            status: StepStatus::NotStarted,
            started_at: None,
            finished_at: None,
            exit_code: None,
            output_log: Vec::new(),
        }
    }

    /// Fresh attempt following whatever was recorded before (if anything).
    pub fn next_attempt(step: UpgradeStep, previous: Option<&StepRun>) -> Self {
        let attempt = previous.map(|p| p.attempt + 1).unwrap_or(1);
        Self::new(step, attempt)
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the exit code of the step's process.
    pub fn mark_exited(&mut self, code: i32) -> Result<()> {
        let next = if code == 0 {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };
        self.transition(next)?;
        self.exit_code = Some(code);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Fail without an exit code, e.g. the process never started.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(StepStatus::Failed)?;
        self.push_output(OutputStream::Hub, reason);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn push_output(&mut self, stream: OutputStream, text: impl Into<String>) {
        self.output_log.push(OutputLine {
            stream,
            text: text.into(),
        });
    }

    fn transition(&mut self, to: StepStatus) -> Result<()> {
        let allowed = match (self.status, to) {
            (StepStatus::NotStarted, StepStatus::Running) => true,
            (StepStatus::Running, StepStatus::Succeeded) => true,
            (StepStatus::Running, StepStatus::Failed) => true,
            // Start failures go straight to Failed.
            (StepStatus::NotStarted, StepStatus::Failed) => true,
            _ => false,
        };

        if !allowed {
            return Err(HubError::InvalidTransition {
                step: self.step,
                from: self.status,
                to,
            });
        }

        self.status = to;
        Ok(())
    }
}

/// Acknowledgement returned by a trigger once the step's process started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepAck {
    pub step: UpgradeStep,
    pub run_id: Uuid,
    pub attempt: u32,
}
