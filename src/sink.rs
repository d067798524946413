// src/sink.rs

//! Append-only log sink shared by everything the hub runs.
//!
//! There are two channels: informational lines (progress, subprocess output)
//! and error lines. Every append is mirrored to `tracing`, and the stored
//! lines are what a status/telemetry reader (or a test) looks at.
//!
//! The sink is cheap to clone; clones share the same channels.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{error, info};

use crate::logging::SINK_TARGET;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Channels {
    info: Vec<String>,
    error: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogSink {
    inner: Arc<Mutex<Channels>>,
}

/// Which channel to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Info,
    Error,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, line: impl Into<String>) {
        let line = line.into();
        info!(target: SINK_TARGET, "{}", line);
        self.lock().info.push(line);
    }

    pub fn error(&self, line: impl Into<String>) {
        let line = line.into();
        error!(target: SINK_TARGET, "{}", line);
        self.lock().error.push(line);
    }

    pub fn info_lines(&self) -> Vec<String> {
        self.lock().info.clone()
    }

    pub fn error_lines(&self) -> Vec<String> {
        self.lock().error.clone()
    }

    pub fn contains(&self, channel: Channel, needle: &str) -> bool {
        self.position_of(channel, needle).is_some()
    }

    pub fn contains_info(&self, needle: &str) -> bool {
        self.contains(Channel::Info, needle)
    }

    pub fn contains_error(&self, needle: &str) -> bool {
        self.contains(Channel::Error, needle)
    }

    /// Index of the first line in `channel` containing `needle`.
    pub fn position_of(&self, channel: Channel, needle: &str) -> Option<usize> {
        let channels = self.lock();
        let lines = match channel {
            Channel::Info => &channels.info,
            Channel::Error => &channels.error,
        };
        lines.iter().position(|line| line.contains(needle))
    }

    pub fn position_of_info(&self, needle: &str) -> Option<usize> {
        self.position_of(Channel::Info, needle)
    }

    /// Poll until a line containing `needle` shows up in `channel`.
    ///
    /// Returns `false` once `timeout` has elapsed without a match.
    pub async fn wait_for(&self, channel: Channel, needle: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.contains(channel, needle) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_for_info(&self, needle: &str, timeout: Duration) -> bool {
        self.wait_for(Channel::Info, needle, timeout).await
    }

    pub async fn wait_for_error(&self, needle: &str, timeout: Duration) -> bool {
        self.wait_for(Channel::Error, needle, timeout).await
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
