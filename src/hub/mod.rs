// src/hub/mod.rs

//! The hub: configuration, shared state and the trigger methods.
//!
//! Every trigger follows the same shape: check the request fields, resolve
//! the data directories through the [`ConfigReader`], build the command line
//! and hand it to the [`StepExecutor`]. The trigger returns as soon as the
//! step's process is running; its outcome is read back with
//! [`Hub::status_upgrade`] / [`Hub::step_status`].
//!
//! A hub started while another one owns the state dir can report status but
//! refuses to trigger anything.

pub mod commands;
pub mod dial;
pub mod requests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::config::{ConfigReader, HubConfig};
use crate::errors::{HubError, Result};
use crate::exec::{CommandInvoker, CommandSpec, StepExecutor, StepRequest};
use crate::sink::LogSink;
use crate::store::StatusStore;
use crate::types::{StepAck, StepRun, StepStatus, UpgradeStep};

pub use dial::{AgentConnection, Dialer, TcpDialer};
pub use requests::{
    UpgradeConvertMasterRequest, UpgradeShutdownClustersRequest,
    UpgradeValidateStartClusterRequest,
};

const GUARD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How often status records that could not be written are retried.
pub const PENDING_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Status of one step as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatusReport {
    pub step: UpgradeStep,
    pub status: StepStatus,
    pub attempt: Option<u32>,
}

#[derive(Clone)]
pub struct Hub {
    config: Arc<HubConfig>,
    reader: Arc<dyn ConfigReader>,
    store: Arc<StatusStore>,
    sink: LogSink,
    executor: StepExecutor,
    dialer: Arc<dyn Dialer>,
}

impl Hub {
    /// Build a hub, opening (and recovering) the status store under the
    /// configured state directory. Agents are dialed over plain TCP.
    pub async fn new(
        config: HubConfig,
        reader: Arc<dyn ConfigReader>,
        invoker: Arc<dyn CommandInvoker>,
    ) -> Result<Self> {
        let store = Arc::new(StatusStore::open(&config.state_dir).await?);
        store.spawn_pending_flusher(PENDING_RETRY_INTERVAL);
        let sink = LogSink::new();
        let executor = StepExecutor::new(invoker, Arc::clone(&store), sink.clone());

        info!(
            state_dir = %config.state_dir.display(),
            port = config.port,
            owner = store.is_owner(),
            "hub initialised"
        );

        Ok(Self {
            config: Arc::new(config),
            reader,
            store,
            sink,
            executor,
            dialer: Arc::new(TcpDialer::default()),
        })
    }

    /// Replace the capability used to reach the agents.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn is_running(&self, step: UpgradeStep) -> bool {
        self.executor.is_running(step)
    }

    /// Whether this hub owns the state dir and may trigger steps.
    pub fn is_owner(&self) -> bool {
        self.store.is_owner()
    }

    /// Open a connection to the agent on `host`, on the configured agent port.
    pub async fn connect_agent(&self, host: &str) -> Result<AgentConnection> {
        let port = self.config.agent_port;
        let conn = self
            .dialer
            .dial(host, port)
            .await
            .map_err(|source| HubError::AgentUnreachable {
                host: host.to_string(),
                port,
                source,
            })?;
        debug!(host, port, "connected to agent");
        Ok(conn)
    }

    pub async fn upgrade_convert_master(
        &self,
        req: UpgradeConvertMasterRequest,
    ) -> Result<StepAck> {
        req.validate()?;
        self.store.ensure_owner()?;
        let (old_data_dir, new_data_dir) = self.resolve_master_data_dirs().await?;

        let pg_upgrade_dir = self.config.pg_upgrade_dir();
        tokio::fs::create_dir_all(&pg_upgrade_dir).await?;

        let command = commands::convert_master(
            &self.config,
            Path::new(&req.old_bin_dir),
            Path::new(&req.new_bin_dir),
            &old_data_dir,
            &new_data_dir,
        );
        self.trigger(UpgradeStep::ConvertMaster, command).await
    }

    pub async fn upgrade_shutdown_clusters(
        &self,
        req: UpgradeShutdownClustersRequest,
    ) -> Result<StepAck> {
        req.validate()?;
        self.store.ensure_owner()?;
        let (old_data_dir, new_data_dir) = self.resolve_master_data_dirs().await?;

        let command = commands::shutdown_clusters(
            Path::new(&req.old_bin_dir),
            Path::new(&req.new_bin_dir),
            &old_data_dir,
            &new_data_dir,
        );
        self.trigger(UpgradeStep::ShutdownClusters, command).await
    }

    pub async fn upgrade_validate_start_cluster(
        &self,
        req: UpgradeValidateStartClusterRequest,
    ) -> Result<StepAck> {
        req.validate()?;
        self.store.ensure_owner()?;

        let command = commands::validate_start_cluster(
            Path::new(&req.new_bin_dir),
            Path::new(&req.new_data_dir),
        );
        self.trigger(UpgradeStep::ValidateStartCluster, command).await
    }

    /// One entry per known step, in upgrade order.
    pub async fn status_upgrade(&self) -> Result<Vec<StepStatusReport>> {
        let records = self.store.all().await?;
        Ok(records
            .into_iter()
            .map(|(step, run)| StepStatusReport {
                step,
                status: run.as_ref().map_or(StepStatus::NotStarted, |r| r.status),
                attempt: run.map(|r| r.attempt),
            })
            .collect())
    }

    pub async fn step_status(&self, step: UpgradeStep) -> Result<Option<StepRun>> {
        self.store.load(step).await
    }

    /// Wait until `step` reaches a terminal status and its guard is free
    /// again, so that a follow-up trigger is accepted.
    pub async fn wait_for_step(
        &self,
        step: UpgradeStep,
        timeout: Option<Duration>,
    ) -> Option<StepRun> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let run = self.store.wait_for_terminal(step, timeout).await?;

        // The monitor drops the guard right after persisting the record.
        while self.executor.is_running(step) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            sleep(GUARD_POLL_INTERVAL).await;
        }
        Some(run)
    }

    /// Readers do blocking file IO, so they run on the blocking pool.
    async fn resolve_master_data_dirs(&self) -> Result<(PathBuf, PathBuf)> {
        let reader = Arc::clone(&self.reader);
        let base_dir = self.config.state_dir.clone();

        let dirs = tokio::task::spawn_blocking(move || reader.master_data_dirs(&base_dir))
            .await
            .map_err(|err| HubError::ConfigResolution(format!("config reader task: {err}")))?
            .map_err(|err| match err {
                resolution @ HubError::ConfigResolution(_) => resolution,
                other => HubError::ConfigResolution(other.to_string()),
            })?;
        debug!(old = %dirs.0.display(), new = %dirs.1.display(), "master data dirs");
        Ok(dirs)
    }

    async fn trigger(&self, step: UpgradeStep, command: CommandSpec) -> Result<StepAck> {
        let ack = self.executor.execute(StepRequest::new(step, command)).await?;
        info!(step = %step, run_id = %ack.run_id, attempt = ack.attempt, "step started");
        Ok(ack)
    }
}
