// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod hub;
pub mod logging;
pub mod sink;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::{CliArgs, HubCommand};
use crate::config::{ClusterConfigReader, HubConfig, load_or_default};
use crate::errors::HubError;
use crate::exec::TokioCommandInvoker;
use crate::fs::RealFileSystem;
use crate::hub::{
    Hub, StepStatusReport, UpgradeConvertMasterRequest, UpgradeShutdownClustersRequest,
    UpgradeValidateStartClusterRequest,
};
use crate::types::{StepAck, StepRun, StepStatus, UpgradeStep};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (plus the `--state-dir` override)
/// - the cluster config reader and the process invoker
/// - the hub and its status store
/// - Ctrl-C handling while waiting on a step
pub async fn run(args: CliArgs) -> Result<()> {
    let config = load_config(&args)?;

    let reader = ClusterConfigReader::from_config(&config, Arc::new(RealFileSystem));
    let hub = Hub::new(config, Arc::new(reader), Arc::new(TokioCommandInvoker))
        .await
        .context("starting hub")?;

    match args.command {
        HubCommand::ShutdownClusters { bin_dirs } => {
            let ack = hub
                .upgrade_shutdown_clusters(UpgradeShutdownClustersRequest {
                    old_bin_dir: bin_dirs.old_bin_dir,
                    new_bin_dir: bin_dirs.new_bin_dir,
                })
                .await?;
            follow_step(&hub, ack).await
        }
        HubCommand::ConvertMaster { bin_dirs } => {
            let ack = hub
                .upgrade_convert_master(UpgradeConvertMasterRequest {
                    old_bin_dir: bin_dirs.old_bin_dir,
                    new_bin_dir: bin_dirs.new_bin_dir,
                })
                .await?;
            follow_step(&hub, ack).await
        }
        HubCommand::ValidateStartCluster {
            new_bin_dir,
            new_data_dir,
        } => {
            let ack = hub
                .upgrade_validate_start_cluster(UpgradeValidateStartClusterRequest {
                    new_bin_dir,
                    new_data_dir,
                })
                .await?;
            follow_step(&hub, ack).await
        }
        HubCommand::Status { step: None } => {
            print_status(&hub.status_upgrade().await?);
            Ok(())
        }
        HubCommand::Status { step: Some(name) } => {
            let step: UpgradeStep = name.parse()?;
            match hub.step_status(step).await? {
                Some(run) => print_run(&run),
                None => println!("{step}: {}", StepStatus::NotStarted),
            }
            Ok(())
        }
    }
}

fn load_config(args: &CliArgs) -> Result<HubConfig> {
    let path = &args.config;
    let mut config =
        load_or_default(path).with_context(|| format!("loading config {}", path.display()))?;

    if let Some(dir) = &args.state_dir {
        if dir.trim().is_empty() {
            bail!(HubError::ConfigError("--state-dir must not be empty".to_string()));
        }
        config.state_dir = PathBuf::from(dir);
    }

    Ok(config)
}

/// Wait for a started step and report its outcome.
///
/// The hub process owns the monitoring task, so it stays alive until the
/// step finishes and its record is written. The first Ctrl-C only warns;
/// a second one gives up, and the next hub records the step as interrupted.
async fn follow_step(hub: &Hub, ack: StepAck) -> Result<()> {
    println!(
        "{} started (attempt {}, run {})",
        ack.step, ack.attempt, ack.run_id
    );

    let wait = hub.wait_for_step(ack.step, None);
    tokio::pin!(wait);
    let mut interrupted = false;

    let run = loop {
        tokio::select! {
            run = &mut wait => break run,
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    bail!("stopped waiting for {}", ack.step);
                }
                if interrupted {
                    bail!("interrupted while {} was running", ack.step);
                }
                interrupted = true;
                warn!(
                    step = %ack.step,
                    "{} is still running; press Ctrl+C again to stop waiting",
                    ack.step
                );
            }
        }
    };

    let Some(run) = run else {
        bail!("{} has no recorded outcome", ack.step);
    };

    if !hub.store().pending().is_empty() {
        if let Err(err) = hub.store().flush_pending().await {
            warn!(error = %err, "outcome of {} could not be written to the state dir", run.step);
        }
    }

    info!(step = %run.step, status = %run.status, "step finished");
    println!("{}: {}", run.step, run.status);

    if run.status == StepStatus::Failed {
        let code = run.exit_code.unwrap_or(-1);
        return Err(HubError::StepFailure {
            step: run.step,
            code,
        }
        .into());
    }
    Ok(())
}

fn print_status(reports: &[StepStatusReport]) {
    for report in reports {
        match report.attempt {
            Some(attempt) => println!("{:<22} {:<10} attempt {attempt}", report.step, report.status),
            None => println!("{:<22} {}", report.step, report.status),
        }
    }
}

fn print_run(run: &StepRun) {
    println!("{}: {} (attempt {}, run {})", run.step, run.status, run.attempt, run.run_id);
    if let Some(started) = run.started_at {
        println!("  started:  {}", started.to_rfc3339());
    }
    if let Some(finished) = run.finished_at {
        println!("  finished: {}", finished.to_rfc3339());
    }
    if let Some(code) = run.exit_code {
        println!("  exit code: {code}");
    }
    for line in &run.output_log {
        println!("  [{:?}] {}", line.stream, line.text);
    }
}
