//! The periodic dispatch loop.
//!
//! ```text
//! tick ──► gate free? ──no──► skip (logged)
//!             │
//!            yes ──► spawn cycle ──► sleep ──► tick
//!                       │
//!                       └──► one pool job per due will
//! ```
//!
//! At most one cycle is in flight. A tick that finds the previous cycle
//! still running is skipped, so a slow batch can never overlap the next.
//! Within a cycle, deliveries share the worker pool.

use crate::cycle::{CycleReport, Dispatcher};
use crate::pool::WorkerPool;
use crate::sink::{DispatchFailure, ErrorSink};
use crate::{DispatchConfig, DispatchError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use willkeep_core::DeliveryChannel;
use willkeep_store::WillStore;

/// Single-slot "cycle in flight" flag
#[derive(Clone, Default)]
pub struct CycleGate {
    in_flight: Arc<AtomicBool>,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot. `None` if a cycle already holds it.
    pub fn try_enter(&self) -> Option<CycleGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Releases the gate when dropped
pub struct CycleGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Started,
    SkippedInFlight,
}

pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<WorkerPool>,
    gate: CycleGate,
    sink: ErrorSink,
    sink_task: JoinHandle<()>,
    cycle_task: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl Scheduler {
    /// Validate `config`, start the error sink and worker pool, and wire
    /// the dispatcher to the injected store and channel.
    pub fn start(
        store: Arc<dyn WillStore>,
        channel: Arc<dyn DeliveryChannel>,
        config: &DispatchConfig,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let (sink, sink_task) = ErrorSink::start(config.error_queue_depth);
        let pool = Arc::new(WorkerPool::start(config.workers, config.queue_depth)?);
        let dispatcher = Dispatcher::new(store, channel, sink.clone(), config.delivery_timeout)
            .with_pool(Arc::clone(&pool));

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            pool,
            gate: CycleGate::new(),
            sink,
            sink_task,
            cycle_task: Mutex::new(None),
            interval: config.poll_interval,
        })
    }

    pub fn gate(&self) -> &CycleGate {
        &self.gate
    }

    /// Start one cycle unless one is already running.
    pub fn tick(&self) -> TickOutcome {
        let Some(guard) = self.gate.try_enter() else {
            log::warn!("Previous dispatch cycle still running; skipping this tick");
            return TickOutcome::SkippedInFlight;
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = dispatcher.run_cycle().await {
                sink.report(DispatchFailure::Cycle(e.to_string()));
            }
        });

        // The gate was free, so any previous task has already finished.
        if let Ok(mut slot) = self.cycle_task.lock() {
            *slot = Some(task);
        }
        TickOutcome::Started
    }

    /// Tick forever, sleeping the poll interval between ticks.
    pub async fn run(&self) {
        log::info!(
            "Dispatch scheduler running (poll interval {}s)",
            self.interval.as_secs()
        );
        loop {
            self.tick();
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Run a single cycle inline and return its report.
    pub async fn run_once(&self) -> Result<CycleReport, DispatchError> {
        let _guard = self.gate.try_enter().ok_or(DispatchError::Busy)?;
        self.dispatcher.run_cycle().await
    }

    /// Let a running cycle finish, then stop the workers.
    pub async fn shutdown(self) {
        let Self {
            dispatcher,
            pool,
            sink,
            sink_task,
            cycle_task,
            ..
        } = self;

        let running = cycle_task.into_inner().ok().flatten();
        if let Some(task) = running {
            if let Err(e) = task.await {
                log::error!("Dispatch cycle task failed: {}", e);
            }
        }

        drop(dispatcher);
        match Arc::try_unwrap(pool) {
            Ok(pool) => pool.shutdown().await,
            Err(_) => log::warn!("Worker pool still in use; not waiting for workers"),
        }
        drop(sink);
        if let Err(e) = sink_task.await {
            log::error!("Error sink task failed: {}", e);
        }
        log::info!("Dispatch scheduler stopped");
    }
}
