// src/exec/mod.rs

//! Step execution layer.
//!
//! - [`invoker`] is the seam over subprocess creation (`CommandInvoker`),
//!   with the `tokio::process` implementation used in production.
//! - [`guard`] holds the per-step exclusion tokens.
//! - [`classify`] decides which output lines are error lines.
//! - [`executor`] ties them together: it starts a step, returns as soon as
//!   the process is running, and records the outcome in the background.

pub mod classify;
pub mod executor;
pub mod guard;
pub mod invoker;

pub use executor::{ERROR_PREFIX, StepExecutor, StepRequest};
pub use guard::StepGuards;
pub use invoker::{CommandInvoker, CommandSpec, ProcessHandle, TokioCommandInvoker};
