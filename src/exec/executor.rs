// src/exec/executor.rs

//! Runs one upgrade step as an external process without blocking the caller.
//!
//! `execute` returns as soon as the process has started. Monitoring (output
//! capture, exit status, persistence) happens on a spawned Tokio task that
//! owns the step's guard token until the final record has been saved.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::{HubError, Result};
use crate::exec::classify::is_error_line;
use crate::exec::guard::{StepGuards, StepToken};
use crate::exec::invoker::{CommandInvoker, CommandSpec, OutputReader, ProcessHandle};
use crate::sink::LogSink;
use crate::store::StatusStore;
use crate::types::{OutputLine, OutputStream, StepAck, StepRun, StepStatus, UpgradeStep};

/// Prefix of every failure line written to the error channel.
pub const ERROR_PREFIX: &str = "An error occurred:";

/// A fully resolved request to run one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequest {
    pub step: UpgradeStep,
    pub command: CommandSpec,
}

impl StepRequest {
    pub fn new(step: UpgradeStep, command: CommandSpec) -> Self {
        Self { step, command }
    }
}

#[derive(Clone)]
pub struct StepExecutor {
    invoker: Arc<dyn CommandInvoker>,
    store: Arc<StatusStore>,
    sink: LogSink,
    guards: Arc<StepGuards>,
}

impl StepExecutor {
    pub fn new(invoker: Arc<dyn CommandInvoker>, store: Arc<StatusStore>, sink: LogSink) -> Self {
        Self {
            invoker,
            store,
            sink,
            guards: Arc::new(StepGuards::new()),
        }
    }

    pub fn is_running(&self, step: UpgradeStep) -> bool {
        self.guards.is_held(step)
    }

    /// Start `request` and return once its process is running.
    ///
    /// Fails with `StateDirBusy` if another hub owns the state dir, with
    /// `AlreadyRunning` if another attempt of the same step holds the
    /// guard, and with `ProcessStart` if the process could not be spawned. Everything after a successful start is reported through the
    /// status store and the log sink only.
    pub async fn execute(&self, request: StepRequest) -> Result<StepAck> {
        let StepRequest { step, command } = request;
        self.store.ensure_owner()?;

        let Some(token) = self.guards.try_acquire(step) else {
            debug!(step = %step, "step already running; rejecting trigger");
            return Err(HubError::AlreadyRunning(step));
        };

        let previous = self.store.load(step).await?;
        let mut run = StepRun::next_attempt(step, previous.as_ref());
        run.mark_running()?;

        self.sink.info(format!("Starting {}", step.description()));
        info!(
            step = %step,
            run_id = %run.run_id,
            attempt = run.attempt,
            cmd = %command,
            "starting step process"
        );
        self.persist(&run).await;

        let handle = match self.invoker.start(&command) {
            Ok(handle) => handle,
            Err(source) => {
                let reason = format!("could not start {}: {source}", command.program.display());
                run.mark_failed(reason.clone())?;
                self.sink.error(format!("{ERROR_PREFIX} {reason}"));
                self.persist(&run).await;
                drop(token);
                return Err(HubError::ProcessStart { step, source });
            }
        };

        debug!(step = %step, pid = ?handle.pid, "step process started");

        let ack = StepAck {
            step,
            run_id: run.run_id,
            attempt: run.attempt,
        };

        let store = Arc::clone(&self.store);
        let sink = self.sink.clone();
        tokio::spawn(async move {
            monitor_step(run, handle, store, sink, token).await;
        });

        Ok(ack)
    }

    async fn persist(&self, run: &StepRun) {
        if let Err(err) = self.store.save(run).await {
            warn!(step = %run.step, error = %err, "keeping step status in memory only");
        }
    }
}

/// Follow a started process to completion and record the outcome.
///
/// `token` is released only after the terminal record has been handed to
/// the store, so a later trigger always sees this attempt's outcome.
async fn monitor_step(
    mut run: StepRun,
    handle: ProcessHandle,
    store: Arc<StatusStore>,
    sink: LogSink,
    token: StepToken,
) {
    let step = run.step;
    let ProcessHandle {
        stdout,
        stderr,
        exit,
        ..
    } = handle;

    let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(256);
    if let Some(stdout) = stdout {
        spawn_line_reader(OutputStream::Stdout, stdout, line_tx.clone());
    }
    if let Some(stderr) = stderr {
        spawn_line_reader(OutputStream::Stderr, stderr, line_tx.clone());
    }
    drop(line_tx);

    let mut error_lines = Vec::new();
    while let Some(line) = line_rx.recv().await {
        debug!(step = %step, stream = ?line.stream, "{}", line.text);
        sink.info(line.text.clone());
        if is_error_line(line.stream, &line.text) {
            error_lines.push(line.text.clone());
        }
        run.output_log.push(line);
    }

    let outcome = match exit.await {
        Ok(code) => run.mark_exited(code).map(|()| Some(code)),
        Err(err) => {
            let reason = format!("waiting for process failed: {err}");
            error_lines.push(reason.clone());
            run.mark_failed(reason).map(|()| None)
        }
    };

    match outcome {
        Ok(code) => report_outcome(&run, code, &error_lines, &sink),
        Err(err) => error!(step = %step, error = %err, "could not record step outcome"),
    }

    info!(
        step = %step,
        run_id = %run.run_id,
        status = %run.status,
        exit_code = ?run.exit_code,
        "step process finished"
    );

    if let Err(err) = store.save(&run).await {
        error!(step = %step, error = %err, "step outcome kept in memory until it can be written");
    }

    // The store (and its state dir lock) must not outlive the guard.
    drop(store);
    drop(token);
}

fn report_outcome(run: &StepRun, code: Option<i32>, error_lines: &[String], sink: &LogSink) {
    if run.status == StepStatus::Succeeded {
        sink.info(run.step.success_message());
        return;
    }

    if let Some(code) = code {
        let failure = HubError::StepFailure {
            step: run.step,
            code,
        };
        sink.error(format!("{ERROR_PREFIX} {failure}"));
    }
    for line in error_lines {
        sink.error(format!("{ERROR_PREFIX} {line}"));
    }
}

/// Forward every line of `reader` to `tx` until EOF.
///
/// Invalid UTF-8 is replaced rather than aborting, so the pipe is always
/// drained and the child never blocks on a full buffer.
fn spawn_line_reader(stream: OutputStream, reader: OutputReader, tx: mpsc::Sender<OutputLine>) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(OutputLine { stream, text }).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(?stream, error = %err, "stopped reading process output");
                    break;
                }
            }
        }
    });
}
