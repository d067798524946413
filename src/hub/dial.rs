// src/hub/dial.rs

//! Connection seam towards the agents on the segment hosts.
//!
//! The hub core never speaks the agent protocol itself; it only owns the
//! capability to open a connection, so the transport layer and tests can
//! swap in their own [`Dialer`].

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Default time allowed for one connection attempt.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

pub trait AgentStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AgentStream for T {}

pub type AgentConnection = Box<dyn AgentStream>;
pub type DialFuture = Pin<Box<dyn Future<Output = io::Result<AgentConnection>> + Send>>;

pub trait Dialer: Send + Sync {
    fn dial(&self, host: &str, port: u16) -> DialFuture;
}

/// Plain TCP with a connect timeout.
#[derive(Debug, Clone, Copy)]
pub struct TcpDialer {
    pub timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl Dialer for TcpDialer {
    fn dial(&self, host: &str, port: u16) -> DialFuture {
        let addr = format!("{host}:{port}");
        let timeout = self.timeout;
        Box::pin(async move {
            debug!(%addr, "dialing agent");
            let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as AgentConnection)
        })
    }
}
