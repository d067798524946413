// src/exec/invoker.rs

//! Subprocess creation seam.
//!
//! The step executor never touches `tokio::process` directly; it asks a
//! [`CommandInvoker`] to start a [`CommandSpec`] and gets back a
//! [`ProcessHandle`] with the output pipes and a future for the exit code.
//! Production uses [`TokioCommandInvoker`]; tests hand in a double that
//! replays canned output.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::AsyncRead;
use tokio::process::Command;
use tracing::debug;

/// Program, arguments and working directory of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ExitFuture = Pin<Box<dyn Future<Output = io::Result<i32>> + Send>>;

/// A started process.
///
/// `exit` resolves once the process has terminated. A process killed by a
/// signal reports `-1`.
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub stdout: Option<OutputReader>,
    pub stderr: Option<OutputReader>,
    pub exit: ExitFuture,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Trait abstracting how external commands are started.
pub trait CommandInvoker: Send + Sync {
    /// Start `spec`. Returning `Err` means the process never ran.
    fn start(&self, spec: &CommandSpec) -> io::Result<ProcessHandle>;
}

/// Starts real OS processes via `tokio::process`.
///
/// Must be called from within a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandInvoker;

impl CommandInvoker for TokioCommandInvoker {
    fn start(&self, spec: &CommandSpec) -> io::Result<ProcessHandle> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        debug!(?pid, program = %spec.program.display(), "spawned process");

        let stdout = child.stdout.take().map(|s| Box::new(s) as OutputReader);
        let stderr = child.stderr.take().map(|s| Box::new(s) as OutputReader);

        let exit: ExitFuture = Box::pin(async move {
            let status = child.wait().await?;
            Ok(status.code().unwrap_or(-1))
        });

        Ok(ProcessHandle {
            pid,
            stdout,
            stderr,
            exit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("/new/bin/pg_upgrade")
            .arg("--old-bindir=/old/bin")
            .args(["--dispatcher-mode"]);
        assert_eq!(
            spec.to_string(),
            "/new/bin/pg_upgrade --old-bindir=/old/bin --dispatcher-mode"
        );
    }

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let spec = CommandSpec::new("/definitely/not/here/pg_upgrade");
        let err = TokioCommandInvoker.start(&spec).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
