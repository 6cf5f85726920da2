//! Bounded worker pool.
//!
//! A fixed number of tokio tasks pull jobs from one bounded queue. Submission
//! never waits: a full queue is an error the caller must report.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker queue is full")]
    QueueFull,
    #[error("worker pool is shut down")]
    Closed,
    #[error("worker pool needs at least one worker and a queue depth of at least one")]
    InvalidSize,
}

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing a queue of `queue_depth` pending jobs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(workers: usize, queue_depth: usize) -> Result<Self, PoolError> {
        if workers == 0 || queue_depth == 0 {
            return Err(PoolError::InvalidSize);
        }

        let (sender, receiver) = mpsc::channel::<Job>(queue_depth);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting, not while running.
                        let job = receiver.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    log::debug!("Worker {} stopped", id);
                })
            })
            .collect();

        log::info!(
            "Worker pool started ({} workers, queue depth {})",
            workers,
            queue_depth
        );
        Ok(Self {
            sender,
            workers: handles,
        })
    }

    /// Queue a job without waiting.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender.try_send(Box::pin(job)).map_err(|e| match e {
            TrySendError::Full(_) => PoolError::QueueFull,
            TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    /// Jobs waiting for a worker
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Stop accepting work and wait for queued jobs to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                log::error!("Worker task failed: {}", e);
            }
        }
    }
}
