use std::io::{self, Cursor};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use upgrade_hub::exec::invoker::{ExitFuture, OutputReader};
use upgrade_hub::exec::{CommandInvoker, CommandSpec, ProcessHandle};

#[derive(Debug, Clone)]
struct Replay {
    stdout: String,
    stderr: String,
    exit_code: i32,
    delay: Duration,
    start_error: Option<io::ErrorKind>,
}

/// A fake invoker that:
/// - records every command it was asked to start
/// - replays fixed stdout/stderr and exits with a fixed code
/// - optionally refuses to start, delays the exit, or holds the exit until
///   the test opens a [`Gate`].
#[derive(Debug, Clone)]
pub struct ReplayInvoker {
    replay: Arc<Mutex<Replay>>,
    started: Arc<Mutex<Vec<CommandSpec>>>,
    gate: Option<Arc<Semaphore>>,
}

/// Releases processes started by a gated [`ReplayInvoker`], one per `open`.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    pub fn open(&self) {
        self.permits.add_permits(1);
    }
}

impl ReplayInvoker {
    fn with_replay(replay: Replay) -> Self {
        Self {
            replay: Arc::new(Mutex::new(replay)),
            started: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// Prints `stdout` and exits 0.
    pub fn succeeding(stdout: &str) -> Self {
        Self::failing(stdout, 0)
    }

    /// Prints `stdout` and exits with `exit_code`.
    pub fn failing(stdout: &str, exit_code: i32) -> Self {
        Self::with_replay(Replay {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
            delay: Duration::ZERO,
            start_error: None,
        })
    }

    /// Every start fails with an error of the given kind.
    pub fn unstartable(kind: io::ErrorKind) -> Self {
        let invoker = Self::succeeding("");
        invoker.replay.lock().unwrap().start_error = Some(kind);
        invoker
    }

    pub fn with_stderr(self, stderr: &str) -> Self {
        self.replay.lock().unwrap().stderr = stderr.to_string();
        self
    }

    /// Delay between start and exit.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.replay.lock().unwrap().delay = delay;
        self
    }

    /// Processes only exit after the returned gate has been opened.
    pub fn gated(mut self) -> (Self, Gate) {
        let permits = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&permits));
        (self, Gate { permits })
    }

    /// Exit code used by processes started from now on.
    pub fn set_exit_code(&self, exit_code: i32) {
        self.replay.lock().unwrap().exit_code = exit_code;
    }

    pub fn started(&self) -> Vec<CommandSpec> {
        self.started.lock().unwrap().clone()
    }

    pub fn start_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

impl CommandInvoker for ReplayInvoker {
    fn start(&self, spec: &CommandSpec) -> io::Result<ProcessHandle> {
        let replay = self.replay.lock().unwrap().clone();
        if let Some(kind) = replay.start_error {
            return Err(io::Error::new(
                kind,
                format!("cannot start {}", spec.program.display()),
            ));
        }

        self.started.lock().unwrap().push(spec.clone());

        let stdout: OutputReader = Box::new(Cursor::new(replay.stdout.into_bytes()));
        let stderr: OutputReader = Box::new(Cursor::new(replay.stderr.into_bytes()));

        let gate = self.gate.clone();
        let exit: ExitFuture = Box::pin(async move {
            if let Some(gate) = gate {
                let permit = gate
                    .acquire_owned()
                    .await
                    .map_err(|e| io::Error::other(e.to_string()))?;
                permit.forget();
            }
            if !replay.delay.is_zero() {
                tokio::time::sleep(replay.delay).await;
            }
            Ok(replay.exit_code)
        });

        Ok(ProcessHandle {
            pid: None,
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit,
        })
    }
}
