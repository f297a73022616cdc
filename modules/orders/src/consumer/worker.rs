//! Per-worker consume loop.
//!
//! Each worker independently polls the shared log handle, processes one
//! message at a time, and commits the offset only after the order is
//! persisted (or dead-lettered). A message therefore always ends in exactly
//! one of two states before the worker moves on: persisted + committed, or
//! dead-lettered + committed.

use crate::config::ConsumerConfig;
use crate::models::Order;
use crate::notifier::{notify_best_effort, Notifier};
use crate::storage::{OrderStore, StoreError};
use event_log::{LogConsumer, LogProducer, LogRecord, OutboundMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Why a worker's run loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Cancellation observed between iterations; clean drain
    Cancelled,
    /// Unrecoverable condition; the supervisor applies the restart policy
    Fatal(String),
}

enum ProcessOutcome {
    Done,
    Cancelled,
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error("failed to decode order: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("order validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// Permanent failures reproduce identically on every attempt, so
    /// retrying them only burns the budget.
    fn is_permanent(&self) -> bool {
        matches!(self, ProcessError::Decode(_) | ProcessError::Validation(_))
    }
}

struct WorkerShared {
    consumer: Arc<dyn LogConsumer>,
    dlq: Arc<dyn LogProducer>,
    dlq_topic: String,
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    config: ConsumerConfig,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct Worker {
    id: usize,
    shared: Arc<WorkerShared>,
}

impl Worker {
    pub fn new(
        id: usize,
        consumer: Arc<dyn LogConsumer>,
        dlq: Arc<dyn LogProducer>,
        dlq_topic: String,
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        config: ConsumerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            shared: Arc::new(WorkerShared {
                consumer,
                dlq,
                dlq_topic,
                store,
                notifier,
                config,
                cancel,
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub async fn run(&self) -> WorkerExit {
        let s = &self.shared;
        info!(worker_id = self.id, "worker receiving orders");
        let mut broker_errors = 0usize;
        loop {
            if s.cancel.is_cancelled() {
                info!(worker_id = self.id, "worker stopped");
                return WorkerExit::Cancelled;
            }
            match s.consumer.poll(POLL_TIMEOUT).await {
                Ok(None) => continue,
                Ok(Some(record)) => {
                    broker_errors = 0;
                    match self.process(record).await {
                        ProcessOutcome::Done => {}
                        ProcessOutcome::Cancelled => {
                            info!(worker_id = self.id, "worker stopped");
                            return WorkerExit::Cancelled;
                        }
                        ProcessOutcome::Fatal(reason) => return WorkerExit::Fatal(reason),
                    }
                }
                Err(e) => {
                    broker_errors += 1;
                    error!(
                        worker_id = self.id,
                        error = %e,
                        consecutive = broker_errors,
                        "broker event error"
                    );
                    if broker_errors > s.config.event_type_errors_max {
                        notify_best_effort(
                            s.notifier.as_ref(),
                            &format!(
                                "CRITICAL ERROR — message broker is unreachable\nworkerID={}",
                                self.id
                            ),
                        )
                        .await;
                        return WorkerExit::Fatal("broker unreachable".to_string());
                    }
                    if !self.sleep_unless_cancelled(s.config.event_type_error_retry_delay).await {
                        info!(worker_id = self.id, "worker stopped");
                        return WorkerExit::Cancelled;
                    }
                }
            }
        }
    }

    /// Drive one record through decode → validate → persist → commit,
    /// falling back to the DLQ when the retry budget is exhausted.
    async fn process(&self, record: LogRecord) -> ProcessOutcome {
        let s = &self.shared;
        let order_uid = record.key_str();
        let budget = s.config.save_order_retry_max;
        let mut retry_count = 0usize;
        let mut last_err: Option<ProcessError> = None;
        let mut outage_alerted = false;

        while retry_count < budget {
            match self.handle(&record).await {
                Ok(()) => {
                    if self.commit_with_retry(&record).await {
                        return ProcessOutcome::Done;
                    }
                    notify_best_effort(
                        s.notifier.as_ref(),
                        &format!(
                            "CRITICAL ERROR — offset commit failed\nworkerID={}\norderUID={}",
                            self.id, order_uid
                        ),
                    )
                    .await;
                    return ProcessOutcome::Fatal("offset commit failed".to_string());
                }
                Err(ProcessError::Store(e)) if e.is_transient() => {
                    // Database outage: the attempt does not count against the
                    // budget. Alert once, then wait for the connection to
                    // come back.
                    if !outage_alerted {
                        error!(
                            worker_id = self.id,
                            order_uid = %order_uid,
                            error = %e,
                            "lost connection to database"
                        );
                        notify_best_effort(
                            s.notifier.as_ref(),
                            &format!(
                                "CRITICAL ERROR — lost connection to database\nworkerID={}",
                                self.id
                            ),
                        )
                        .await;
                        outage_alerted = true;
                    }
                    if !self.sleep_unless_cancelled(s.config.db_conn_check_delay).await {
                        return ProcessOutcome::Cancelled;
                    }
                }
                Err(e) if e.is_permanent() => {
                    warn!(
                        worker_id = self.id,
                        order_uid = %order_uid,
                        error = %e,
                        "permanent failure, skipping retries"
                    );
                    last_err = Some(e);
                    retry_count = budget;
                    break;
                }
                Err(e) => {
                    retry_count += 1;
                    warn!(
                        worker_id = self.id,
                        order_uid = %order_uid,
                        attempt = retry_count,
                        budget,
                        error = %e,
                        "failed to process order"
                    );
                    last_err = Some(e);
                    if retry_count < budget
                        && !self.sleep_unless_cancelled(s.config.save_order_retry_delay).await
                    {
                        return ProcessOutcome::Cancelled;
                    }
                }
            }
        }

        error!(
            worker_id = self.id,
            order_uid = %order_uid,
            retries = retry_count,
            error = last_err.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "order processing failed, sending to DLQ"
        );
        self.send_to_dlq(record, retry_count).await
    }

    async fn handle(&self, record: &LogRecord) -> Result<(), ProcessError> {
        let s = &self.shared;
        let order = Order::decode(&record.payload)?;
        order.validate_full()?;
        match s.store.save_order(&order).await {
            Ok(()) => {
                debug!(
                    worker_id = self.id,
                    order_uid = %order.order_uid,
                    "order saved to database"
                );
                Ok(())
            }
            Err(e) if e.is_duplicate() => {
                // Redelivery after a crash between persist and commit.
                info!(
                    worker_id = self.id,
                    order_uid = %order.order_uid,
                    "order already persisted, acknowledging duplicate"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn send_to_dlq(&self, record: LogRecord, retry_count: usize) -> ProcessOutcome {
        let s = &self.shared;
        let order_uid = record.key_str();
        let message = OutboundMessage::dead_letter(&s.dlq_topic, &record, retry_count, self.id);
        if let Err(e) = s.dlq.produce(message).await {
            error!(
                worker_id = self.id,
                order_uid = %order_uid,
                error = %e,
                "failed to send order to DLQ"
            );
            notify_best_effort(
                s.notifier.as_ref(),
                &format!(
                    "CRITICAL ERROR — failed to send order to DLQ\nworkerID={}\norderUID={}",
                    self.id, order_uid
                ),
            )
            .await;
            return ProcessOutcome::Fatal("DLQ produce failed".to_string());
        }
        if self.commit_with_retry(&record).await {
            return ProcessOutcome::Done;
        }
        notify_best_effort(
            s.notifier.as_ref(),
            &format!(
                "CRITICAL ERROR — order sent to DLQ but offset commit failed\nworkerID={}\norderUID={}",
                self.id, order_uid
            ),
        )
        .await;
        ProcessOutcome::Fatal("offset commit failed after DLQ send".to_string())
    }

    /// Commit retries are not cancellable: the current message must reach a
    /// committed state before the worker observes shutdown.
    async fn commit_with_retry(&self, record: &LogRecord) -> bool {
        let s = &self.shared;
        let mut last_err = None;
        for attempt in 1..=s.config.commit_retry_max {
            match s.consumer.commit(record).await {
                Ok(()) => return true,
                Err(e) => {
                    last_err = Some(e);
                    if attempt < s.config.commit_retry_max {
                        tokio::time::sleep(s.config.commit_retry_delay).await;
                    }
                }
            }
        }
        error!(
            worker_id = self.id,
            order_uid = %record.key_str(),
            attempts = s.config.commit_retry_max,
            error = last_err.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "failed to commit offset"
        );
        false
    }

    /// Returns false when cancellation fired during the sleep.
    async fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shared.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
