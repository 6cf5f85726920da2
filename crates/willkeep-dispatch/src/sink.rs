//! Async error sink.
//!
//! Failures the scheduler isolates (one will's delivery, one skipped cycle)
//! are queued here and logged by a dedicated task, so reporting never
//! blocks a worker.

use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// A failure isolated by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    /// One will could not be delivered
    Delivery { will_id: String, error: String },
    /// A will's state could not be saved around a delivery
    Persist { will_id: String, error: String },
    /// A whole cycle was abandoned
    Cycle(String),
    /// A delivery could not be handed to the worker pool
    Submit(String),
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivery { will_id, error } => {
                write!(f, "delivery of will {} failed: {}", will_id, error)
            }
            Self::Persist { will_id, error } => {
                write!(f, "could not save will {}: {}", will_id, error)
            }
            Self::Cycle(error) => write!(f, "dispatch cycle aborted: {}", error),
            Self::Submit(error) => write!(f, "not submitted to the worker pool: {}", error),
        }
    }
}

#[derive(Clone)]
pub struct ErrorSink {
    sender: mpsc::Sender<DispatchFailure>,
}

impl ErrorSink {
    /// A sink plus the receiving end, for callers that consume failures themselves.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<DispatchFailure>) {
        let (sender, receiver) = mpsc::channel(depth.max(1));
        (Self { sender }, receiver)
    }

    /// A sink drained by a task that logs every failure.
    pub fn start(depth: usize) -> (Self, JoinHandle<()>) {
        let (sink, mut receiver) = Self::channel(depth);
        let handle = tokio::spawn(async move {
            while let Some(failure) = receiver.recv().await {
                log::error!("{}", failure);
            }
        });
        (sink, handle)
    }

    /// Queue a failure. Never blocks; if the queue is unavailable the
    /// failure is logged here instead.
    pub fn report(&self, failure: DispatchFailure) {
        match self.sender.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(failure)) => {
                log::error!("{} (error queue full)", failure);
            }
            Err(TrySendError::Closed(failure)) => {
                log::error!("{} (error queue closed)", failure);
            }
        }
    }
}
