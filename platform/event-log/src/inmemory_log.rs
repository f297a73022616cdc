//! In-memory implementation of the log traits for testing and development

use crate::{LogConsumer, LogError, LogProducer, LogRecord, LogResult, OutboundMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Shared in-process log.
///
/// Suitable for:
/// - Unit tests (no broker, deterministic offsets)
/// - Local development without Docker
///
/// Each topic is a single append-only partition. Consumers are identified by
/// a group id; a group shares one cursor per topic, so records are delivered
/// to exactly one consumer of the group, in order, matching the delivery
/// contract of the production backend for the single-partition case.
///
/// # Example
/// ```rust
/// use event_log::{InMemoryLog, LogConsumer, LogProducer, OutboundMessage};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = InMemoryLog::new();
/// log.producer().produce(OutboundMessage::new("orders", b"o1".to_vec())).await?;
///
/// let consumer = log.consumer("orders", "group-a");
/// let record = consumer.poll(Duration::from_millis(50)).await?.unwrap();
/// assert_eq!(record.payload, b"o1");
/// consumer.commit(&record).await?;
/// assert_eq!(log.committed_offset("orders", "group-a"), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryLog {
    state: Arc<Mutex<LogState>>,
    wakeup: Arc<Notify>,
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<LogRecord>>,
    // (group, topic) -> next offset to deliver
    cursors: HashMap<(String, String), usize>,
    // (group, topic) -> first not-yet-committed offset
    committed: HashMap<(String, String), i64>,
    // poll errors still to inject, simulating a broker outage
    poll_errors: usize,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer handle writing into this log.
    pub fn producer(&self) -> InMemoryProducer {
        InMemoryProducer { log: self.clone() }
    }

    /// Consumer handle for `topic` in consumer group `group`.
    pub fn consumer(&self, topic: impl Into<String>, group: impl Into<String>) -> InMemoryConsumer {
        InMemoryConsumer {
            log: self.clone(),
            topic: topic.into(),
            group: group.into(),
        }
    }

    /// All records appended to `topic`, in offset order.
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        let state = self.state.lock().unwrap();
        state.topics.get(topic).cloned().unwrap_or_default()
    }

    /// First not-yet-committed offset for `(topic, group)`, if any commit
    /// has happened.
    pub fn committed_offset(&self, topic: &str, group: &str) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    /// Make the next `count` polls fail with a broker error, simulating an
    /// unreachable broker.
    pub fn inject_poll_errors(&self, count: usize) {
        self.state.lock().unwrap().poll_errors += count;
        self.wakeup.notify_waiters();
    }

    fn append(&self, message: OutboundMessage) {
        let mut state = self.state.lock().unwrap();
        let records = state.topics.entry(message.topic.clone()).or_default();
        let offset = records.len() as i64;
        let record = LogRecord {
            topic: message.topic.clone(),
            partition: 0,
            offset,
            key: message.key.clone(),
            payload: message.value.clone(),
            timestamp: message.timestamp,
            headers: message.wire_headers(),
        };
        records.push(record);
        drop(state);
        self.wakeup.notify_waiters();
    }

    fn try_next(&self, topic: &str, group: &str) -> LogResult<Option<LogRecord>> {
        let mut state = self.state.lock().unwrap();
        if state.poll_errors > 0 {
            state.poll_errors -= 1;
            return Err(LogError::Broker("injected broker error".to_string()));
        }
        let cursor_key = (group.to_string(), topic.to_string());
        let cursor = state.cursors.get(&cursor_key).copied().unwrap_or(0);
        let record = state.topics.get(topic).and_then(|r| r.get(cursor)).cloned();
        if record.is_some() {
            state.cursors.insert(cursor_key, cursor + 1);
        }
        Ok(record)
    }
}

/// Producer over an [`InMemoryLog`]
pub struct InMemoryProducer {
    log: InMemoryLog,
}

#[async_trait]
impl LogProducer for InMemoryProducer {
    async fn produce(&self, message: OutboundMessage) -> LogResult<()> {
        self.log.append(message);
        Ok(())
    }

    async fn close(&self) {}
}

/// Consumer over an [`InMemoryLog`]
pub struct InMemoryConsumer {
    log: InMemoryLog,
    topic: String,
    group: String,
}

#[async_trait]
impl LogConsumer for InMemoryConsumer {
    async fn poll(&self, timeout: Duration) -> LogResult<Option<LogRecord>> {
        match self.log.try_next(&self.topic, &self.group)? {
            Some(record) => Ok(Some(record)),
            None => {
                // Nothing buffered: wait for an append or give up at the
                // deadline, mirroring the bounded poll of the Kafka backend.
                let notified = self.log.wakeup.notified();
                if tokio::time::timeout(timeout, notified).await.is_err() {
                    return Ok(None);
                }
                self.log.try_next(&self.topic, &self.group)
            }
        }
    }

    async fn commit(&self, record: &LogRecord) -> LogResult<()> {
        let mut state = self.log.state.lock().unwrap();
        state.committed.insert(
            (self.group.clone(), self.topic.clone()),
            record.offset + 1,
        );
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, payload: &[u8]) -> OutboundMessage {
        OutboundMessage::new(topic, payload.to_vec())
    }

    #[tokio::test]
    async fn delivers_records_in_offset_order() {
        let log = InMemoryLog::new();
        let producer = log.producer();
        for i in 0..3 {
            producer
                .produce(msg("orders", format!("o{i}").as_bytes()))
                .await
                .unwrap();
        }

        let consumer = log.consumer("orders", "g");
        for i in 0..3 {
            let record = consumer
                .poll(Duration::from_millis(50))
                .await
                .unwrap()
                .expect("record");
            assert_eq!(record.offset, i);
            assert_eq!(record.payload, format!("o{i}").into_bytes());
        }
        assert!(consumer.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn group_cursor_is_shared_between_handles() {
        let log = InMemoryLog::new();
        let producer = log.producer();
        producer.produce(msg("orders", b"a")).await.unwrap();
        producer.produce(msg("orders", b"b")).await.unwrap();

        let c1 = log.consumer("orders", "g");
        let c2 = log.consumer("orders", "g");

        let r1 = c1.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        let r2 = c2.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_ne!(r1.offset, r2.offset);
    }

    #[tokio::test]
    async fn commit_records_the_next_offset() {
        let log = InMemoryLog::new();
        log.producer().produce(msg("orders", b"a")).await.unwrap();

        let consumer = log.consumer("orders", "g");
        let record = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(log.committed_offset("orders", "g"), None);

        consumer.commit(&record).await.unwrap();
        assert_eq!(log.committed_offset("orders", "g"), Some(1));
    }

    #[tokio::test]
    async fn poll_times_out_on_an_empty_topic() {
        let log = InMemoryLog::new();
        let consumer = log.consumer("orders", "g");
        let polled = consumer.poll(Duration::from_millis(20)).await.unwrap();
        assert!(polled.is_none());
    }

    #[tokio::test]
    async fn poll_wakes_up_for_a_concurrent_append() {
        let log = InMemoryLog::new();
        let consumer = log.consumer("orders", "g");
        let producer = log.producer();

        let waiter = tokio::spawn(async move { consumer.poll(Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.produce(msg("orders", b"late")).await.unwrap();

        let record = waiter.await.unwrap().unwrap().expect("record");
        assert_eq!(record.payload, b"late");
    }

    #[tokio::test]
    async fn injected_errors_surface_then_clear() {
        let log = InMemoryLog::new();
        log.producer().produce(msg("orders", b"a")).await.unwrap();
        log.inject_poll_errors(2);

        let consumer = log.consumer("orders", "g");
        assert!(consumer.poll(Duration::from_millis(10)).await.is_err());
        assert!(consumer.poll(Duration::from_millis(10)).await.is_err());
        let record = consumer.poll(Duration::from_millis(50)).await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn dlq_properties_land_in_headers() {
        let log = InMemoryLog::new();
        let record = LogRecord {
            topic: "orders".to_string(),
            partition: 0,
            offset: 0,
            key: Some(b"k".to_vec()),
            payload: b"bad".to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        };
        log.producer()
            .produce(OutboundMessage::dead_letter("orders-dlq", &record, 3, 1))
            .await
            .unwrap();

        let stored = log.records("orders-dlq");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload, b"bad");
        assert_eq!(stored[0].headers.get("retryCount"), Some(&"3".to_string()));
        assert_eq!(stored[0].headers.get("dlq"), Some(&"true".to_string()));
        assert_eq!(stored[0].headers.get("workerID"), Some(&"1".to_string()));
    }
}
