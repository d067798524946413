// src/exec/guard.rs

//! Per-step exclusion tokens.
//!
//! Whoever holds the [`StepToken`] of a step is the one running attempt of
//! that step. Dropping the token (on success, failure or panic) lets the
//! next trigger in.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::UpgradeStep;

#[derive(Debug, Default)]
pub struct StepGuards {
    held: Arc<Mutex<HashSet<UpgradeStep>>>,
}

/// Proof that the holder runs `step`. Released on drop.
#[derive(Debug)]
pub struct StepToken {
    step: UpgradeStep,
    held: Arc<Mutex<HashSet<UpgradeStep>>>,
}

impl StepToken {
    pub fn step(&self) -> UpgradeStep {
        self.step
    }
}

impl Drop for StepToken {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.step);
    }
}

impl StepGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the token for `step`, or `None` if an attempt already holds it.
    /// Never waits.
    pub fn try_acquire(&self, step: UpgradeStep) -> Option<StepToken> {
        if !lock(&self.held).insert(step) {
            return None;
        }
        Some(StepToken {
            step,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, step: UpgradeStep) -> bool {
        lock(&self.held).contains(&step)
    }
}

fn lock(held: &Mutex<HashSet<UpgradeStep>>) -> MutexGuard<'_, HashSet<UpgradeStep>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
