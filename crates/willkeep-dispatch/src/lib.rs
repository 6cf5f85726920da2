//! willkeep Dispatch Scheduler
//!
//! Periodically releases wills whose deadline has passed.
//!
//! # Cycle
//!
//! Each cycle runs on a fresh store session:
//!
//! 1. **Fetch-Due**: snapshot of wills with TTD strictly before now
//! 2. **Deliver-Each**: re-check and mark deliverable, deliver with a
//!    timeout, mark exhausted; one will's failure never stops the batch
//! 3. **Reconcile**: purge exhausted wills and their delivery logs
//!
//! Deliveries run on a bounded [`WorkerPool`]; a [`CycleGate`] keeps at most
//! one cycle in flight. Isolated failures go to the [`ErrorSink`].

mod cycle;
mod pool;
mod scheduler;
mod sink;

pub use cycle::{CycleReport, Dispatcher};
pub use pool::{PoolError, WorkerPool};
pub use scheduler::{CycleGate, CycleGuard, Scheduler, TickOutcome};
pub use sink::{DispatchFailure, ErrorSink};

use std::time::Duration;
use thiserror::Error;
use willkeep_store::StoreError;

/// Errors that abandon a cycle or prevent the scheduler from starting
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to fetch due wills: {0}")]
    Fetch(StoreError),

    #[error("Failed to purge exhausted wills: {0}")]
    Reconcile(StoreError),

    #[error("Invalid dispatch configuration: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("A dispatch cycle is already running")]
    Busy,
}

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Sleep between ticks
    pub poll_interval: Duration,
    /// Deliveries that may run at once
    pub workers: usize,
    /// Deliveries waiting for a free worker; beyond this they wait a cycle
    pub queue_depth: usize,
    /// Bound on a single will's delivery attempt
    pub delivery_timeout: Duration,
    /// Failures buffered for the logging task
    pub error_queue_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(180),
            workers: 4,
            queue_depth: 16,
            delivery_timeout: Duration::from_secs(120),
            error_queue_depth: 64,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.poll_interval.is_zero() {
            return Err(DispatchError::Config("poll interval must be positive".into()));
        }
        if self.workers == 0 {
            return Err(DispatchError::Config("workers must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(DispatchError::Config("queue depth must be at least 1".into()));
        }
        if self.delivery_timeout.is_zero() {
            return Err(DispatchError::Config(
                "delivery timeout must be positive".into(),
            ));
        }
        if self.error_queue_depth == 0 {
            return Err(DispatchError::Config(
                "error queue depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
