//! Supervised consumer pool.
//!
//! The pool owns the shared log handle and the DLQ producer; workers hold
//! clones. When every worker has drained, the pool closes the producer and
//! leaves the group — exactly once, regardless of how individual workers
//! ended.

mod worker;

pub use worker::{Worker, WorkerExit};

use crate::config::{ConsumerConfig, WorkersConfig};
use crate::notifier::Notifier;
use crate::storage::OrderStore;
use event_log::{LogConsumer, LogProducer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ConsumerPool {
    supervisors: Vec<JoinHandle<()>>,
    consumer: Arc<dyn LogConsumer>,
    dlq: Arc<dyn LogProducer>,
    emergency: Arc<AtomicBool>,
}

impl ConsumerPool {
    /// Spawn `workers.count` supervised workers against the shared handles.
    pub fn start(
        consumer: Arc<dyn LogConsumer>,
        dlq: Arc<dyn LogProducer>,
        dlq_topic: String,
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        consumer_config: ConsumerConfig,
        workers: WorkersConfig,
        cancel: CancellationToken,
    ) -> Self {
        let active = Arc::new(AtomicUsize::new(workers.count));
        let emergency = Arc::new(AtomicBool::new(false));

        let supervisors = (0..workers.count)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    Arc::clone(&consumer),
                    Arc::clone(&dlq),
                    dlq_topic.clone(),
                    Arc::clone(&store),
                    Arc::clone(&notifier),
                    consumer_config.clone(),
                    cancel.clone(),
                );
                tokio::spawn(supervise(
                    worker,
                    workers.clone(),
                    Arc::clone(&active),
                    Arc::clone(&emergency),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(workers = workers.count, "consumer pool started");
        Self {
            supervisors,
            consumer,
            dlq,
            emergency,
        }
    }

    /// Wait for every worker to drain, then release the shared handles.
    pub async fn shutdown(self) -> bool {
        for handle in self.supervisors {
            let _ = handle.await;
        }
        self.dlq.close().await;
        self.consumer.close().await;
        info!("consumer pool stopped");
        !self.emergency.load(Ordering::SeqCst)
    }
}

/// Wrap a worker, observe how it ends, and apply the restart policy.
///
/// A fatal exit or a panic either restarts the worker after a delay or
/// retires it; when the last worker retires, the supervisor cancels the root
/// token so the rest of the process shuts down instead of idling with no
/// consumers.
async fn supervise(
    worker: Worker,
    policy: WorkersConfig,
    active: Arc<AtomicUsize>,
    emergency: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let worker_id = worker.id();
    loop {
        let run = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        let failure = match run.await {
            Ok(WorkerExit::Cancelled) => {
                debug!(worker_id, "worker drained");
                return;
            }
            Ok(WorkerExit::Fatal(reason)) => reason,
            Err(e) if e.is_panic() => panic_message(e.into_panic()),
            Err(_) => "worker task aborted".to_string(),
        };
        error!(worker_id, error = %failure, "worker terminated");

        if policy.restart_on_panic {
            if cancel.is_cancelled() {
                return;
            }
            warn!(worker_id, delay = ?policy.restart_delay, "restarting worker");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(policy.restart_delay) => {}
            }
            continue;
        }

        let remaining = active.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            error!("emergency shutdown: all workers terminated");
            emergency.store(true, Ordering::SeqCst);
            cancel.cancel();
        }
        return;
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}
