//! # Message-Log Abstraction
//!
//! A platform-level abstraction for consuming from and producing to a
//! partitioned message log.
//!
//! ## Why a trait and not a client
//!
//! The order service's consumer pool only needs three capabilities from the
//! log: poll the next record, commit an offset, and produce a message to a
//! side topic (the DLQ). Putting those behind [`LogConsumer`] and
//! [`LogProducer`] allows:
//! - Config-driven swap between Kafka (production) and InMemory (dev/test)
//! - Worker logic that is testable without brokers
//!
//! ## Implementations
//!
//! - **KafkaLogConsumer / KafkaLogProducer**: production backend over
//!   librdkafka with manual offset commits
//! - **InMemoryLog**: dev/test backend using in-process queues with
//!   per-group cursors and committed offsets
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_log::{InMemoryLog, LogConsumer, LogProducer, OutboundMessage};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = InMemoryLog::new();
//! let producer = log.producer();
//! let consumer = log.consumer("orders", "order-service");
//!
//! producer
//!     .produce(OutboundMessage::new("orders", br#"{"order_uid":"b1"}"#.to_vec()))
//!     .await?;
//!
//! if let Some(record) = consumer.poll(Duration::from_millis(100)).await? {
//!     // process, then acknowledge
//!     consumer.commit(&record).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod inmemory_log;
mod kafka_log;
mod message;

pub use inmemory_log::{InMemoryConsumer, InMemoryLog, InMemoryProducer};
pub use kafka_log::{
    KafkaConsumerConfig, KafkaLogConsumer, KafkaLogProducer, KafkaProducerConfig,
};
pub use message::{LogRecord, OutboundMessage};

use async_trait::async_trait;
use std::time::Duration;

/// Errors that can occur when talking to the log
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("broker error: {0}")]
    Broker(String),

    #[error("failed to produce message: {0}")]
    Produce(String),

    #[error("failed to commit offset: {0}")]
    Commit(String),

    #[error("delivery ack timed out after {0:?}")]
    AckTimeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;

/// Consumer side of the log.
///
/// One handle is shared by every worker in the pool; implementations must be
/// safe for concurrent `poll` and `commit` calls from tasks sharing a group
/// identifier. The backend assigns partitions server-side, so a given key is
/// delivered to exactly one worker of the group at a time.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Wait up to `timeout` for the next record.
    ///
    /// Returns `Ok(None)` when the log is idle, `Ok(Some(record))` on
    /// delivery, and `Err` on a broker-level failure (the caller decides how
    /// many consecutive failures it tolerates).
    async fn poll(&self, timeout: Duration) -> LogResult<Option<LogRecord>>;

    /// Durably acknowledge `record`'s position to the log.
    ///
    /// Must only be called after the record's effects are persisted;
    /// commit-after-persist is what makes delivery at-least-once.
    async fn commit(&self, record: &LogRecord) -> LogResult<()>;

    /// Leave the group and release the underlying client. Idempotent.
    async fn close(&self);
}

/// Producer side of the log (used for the dead-letter stream).
///
/// Implementations retry internally and bound how long they wait for a
/// delivery acknowledgement, so a single `produce` call either succeeds or
/// returns a definitive error.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Send `message` to its topic, retrying transient failures internally.
    async fn produce(&self, message: OutboundMessage) -> LogResult<()>;

    /// Flush buffered messages within a bounded timeout and release the
    /// client. Called exactly once by the owning component.
    async fn close(&self);
}
