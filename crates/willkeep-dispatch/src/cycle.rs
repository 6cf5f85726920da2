//! One dispatch cycle: fetch due wills, deliver each, purge exhausted.

use crate::pool::WorkerPool;
use crate::sink::{DispatchFailure, ErrorSink};
use crate::DispatchError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use willkeep_core::{DeliveryChannel, DeliveryError};
use willkeep_store::{DeliveryRecord, StoreError, WillStore};

/// Outcome counts for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub due: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Fetched as due but checked in (or removed) before delivery began
    pub skipped: usize,
    pub purged: usize,
}

impl CycleReport {
    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Delivered => self.delivered += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Failed,
    Skipped,
}

/// Runs dispatch cycles against injected storage and delivery.
pub struct Dispatcher {
    store: Arc<dyn WillStore>,
    channel: Arc<dyn DeliveryChannel>,
    sink: ErrorSink,
    delivery_timeout: Duration,
    pool: Option<Arc<WorkerPool>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn WillStore>,
        channel: Arc<dyn DeliveryChannel>,
        sink: ErrorSink,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            store,
            channel,
            sink,
            delivery_timeout,
            pool: None,
        }
    }

    /// Hand each delivery to `pool` instead of running them one by one.
    ///
    /// The pool's worker count bounds how many deliveries run at once. A
    /// will that finds the queue full is reported and left due for the
    /// next cycle.
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Fetch-Due, Deliver-Each, Reconcile on a fresh store session.
    ///
    /// A failed delivery is recorded and reported but never stops the batch.
    /// Failing to fetch or to purge abandons the cycle with an error.
    pub async fn run_cycle(&self) -> Result<CycleReport, DispatchError> {
        let session: Arc<dyn WillStore> =
            Arc::from(self.store.checkout().map_err(DispatchError::Fetch)?);

        let due = session.get_due(Utc::now()).map_err(DispatchError::Fetch)?;
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        if !due.is_empty() {
            log::info!("{} will(s) due for delivery", due.len());
        }

        let courier = Courier {
            session: Arc::clone(&session),
            channel: Arc::clone(&self.channel),
            sink: self.sink.clone(),
            timeout: self.delivery_timeout,
        };

        match &self.pool {
            None => {
                for will in due {
                    report.count(courier.deliver(will.id).await);
                }
            }
            Some(pool) => {
                let mut pending = Vec::with_capacity(due.len());
                for will in due {
                    let (done, outcome) = oneshot::channel();
                    let courier = courier.clone();
                    let will_id = will.id.clone();
                    let submitted = pool.submit(async move {
                        let _ = done.send(courier.deliver(will_id).await);
                    });
                    match submitted {
                        Ok(()) => pending.push((will.id, outcome)),
                        Err(e) => {
                            self.sink.report(DispatchFailure::Submit(format!(
                                "will {}: {}",
                                will.id, e
                            )));
                            report.failed += 1;
                        }
                    }
                }
                for (will_id, outcome) in pending {
                    match outcome.await {
                        Ok(outcome) => report.count(outcome),
                        Err(_) => {
                            self.sink.report(DispatchFailure::Delivery {
                                will_id,
                                error: "worker stopped before finishing".into(),
                            });
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        report.purged = session
            .remove_exhausted()
            .map_err(DispatchError::Reconcile)?;

        if report.due > 0 || report.purged > 0 {
            log::info!(
                "Cycle complete: {} due, {} delivered, {} failed, {} skipped, {} purged",
                report.due,
                report.delivered,
                report.failed,
                report.skipped,
                report.purged
            );
        } else {
            log::debug!("Cycle complete: nothing due");
        }
        Ok(report)
    }
}

/// Everything one delivery needs, detached from the dispatcher so it can
/// run on a pool worker.
#[derive(Clone)]
struct Courier {
    session: Arc<dyn WillStore>,
    channel: Arc<dyn DeliveryChannel>,
    sink: ErrorSink,
    timeout: Duration,
}

impl Courier {
    /// Claim, deliver and retire one will.
    ///
    /// Only flag transitions are written, each against the stored copy, so
    /// a check-in that lands mid-cycle is never overwritten.
    async fn deliver(&self, will_id: String) -> Outcome {
        let claimed = self.session.update_will(&will_id, &mut |will| {
            if !will.is_due(Utc::now()) {
                return false;
            }
            will.mark_deliverable();
            true
        });
        let will = match claimed {
            Ok(Some(will)) => will,
            Ok(None) | Err(StoreError::NotFound(_)) => {
                log::info!("Will {} is no longer due; skipping", will_id);
                return Outcome::Skipped;
            }
            Err(e) => {
                self.sink.report(DispatchFailure::Persist {
                    will_id,
                    error: e.to_string(),
                });
                return Outcome::Failed;
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, self.channel.deliver(&will)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(()) => {
                self.record(DeliveryRecord::success(&will.id));
                let retired = self.session.update_will(&will.id, &mut |current| {
                    if current.last_ping != will.last_ping {
                        log::warn!(
                            "Will {} was checked in while its release was in flight",
                            current.id
                        );
                    }
                    current.mark_exhausted();
                    true
                });
                if let Err(e) = retired {
                    // Stays deliverable; the next cycle sends it again.
                    self.sink.report(DispatchFailure::Persist {
                        will_id: will.id.clone(),
                        error: e.to_string(),
                    });
                    return Outcome::Failed;
                }
                log::info!("Delivered will {}", will.id);
                Outcome::Delivered
            }
            Err(e) => {
                self.record(DeliveryRecord::failure(&will.id, e.to_string()));
                self.sink.report(DispatchFailure::Delivery {
                    will_id: will.id.clone(),
                    error: e.to_string(),
                });
                Outcome::Failed
            }
        }
    }

    fn record(&self, record: DeliveryRecord) {
        if let Err(e) = self.session.record_delivery(&record) {
            log::warn!(
                "Could not record delivery attempt for will {}: {}",
                record.will_id,
                e
            );
        }
    }
}
