//! Kafka implementation of the log traits over librdkafka.
//!
//! Offsets are committed manually (`enable.auto.commit=false`); the group
//! coordinator assigns partitions server-side, so all workers can share one
//! [`KafkaLogConsumer`] handle.

use crate::{LogConsumer, LogError, LogProducer, LogRecord, LogResult, OutboundMessage};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// Consumer-side connection settings
#[derive(Debug, Clone)]
pub struct KafkaConsumerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub client_id: String,
    /// Where a fresh group starts reading (`earliest` / `latest`)
    pub auto_offset_reset: String,
}

/// Producer-side connection and reliability settings
#[derive(Debug, Clone)]
pub struct KafkaProducerConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub acks: String,
    pub retries: u32,
    pub linger_ms: u64,
    pub batch_size: usize,
    pub compression: String,
    pub idempotence: bool,
    /// Full produce attempts before [`LogProducer::produce`] gives up
    pub retry_attempts: usize,
    /// Sleep between failed produce attempts
    pub produce_retry_delay: Duration,
    /// Upper bound on waiting for a delivery acknowledgement
    pub event_timeout: Duration,
    /// Upper bound on flushing buffered messages in [`LogProducer::close`]
    pub flush_timeout: Duration,
}

/// [`LogConsumer`] backed by an rdkafka [`StreamConsumer`]
pub struct KafkaLogConsumer {
    inner: StreamConsumer,
}

impl KafkaLogConsumer {
    pub fn new(config: &KafkaConsumerConfig) -> LogResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("client.id", &config.client_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .create()
            .map_err(|e| LogError::Config(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| LogError::Config(format!("failed to subscribe to {}: {e}", config.topic)))?;

        Ok(Self { inner: consumer })
    }
}

#[async_trait]
impl LogConsumer for KafkaLogConsumer {
    async fn poll(&self, timeout: Duration) -> LogResult<Option<LogRecord>> {
        let message = match tokio::time::timeout(timeout, self.inner.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(LogError::Broker(e.to_string())),
            Ok(Ok(message)) => message,
        };

        let mut headers = HashMap::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).to_string(),
                    );
                }
            }
        }

        Ok(Some(LogRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| k.to_vec()),
            payload: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
            timestamp: message
                .timestamp()
                .to_millis()
                .and_then(chrono::DateTime::from_timestamp_millis),
            headers,
        }))
    }

    async fn commit(&self, record: &LogRecord) -> LogResult<()> {
        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| LogError::Commit(e.to_string()))?;
        self.inner
            .commit(&assignment, CommitMode::Sync)
            .map_err(|e| LogError::Commit(e.to_string()))
    }

    async fn close(&self) {
        self.inner.unsubscribe();
        info!("consumer left the group");
    }
}

/// [`LogProducer`] backed by an rdkafka [`FutureProducer`]
pub struct KafkaLogProducer {
    inner: FutureProducer,
    retry_attempts: usize,
    produce_retry_delay: Duration,
    event_timeout: Duration,
    flush_timeout: Duration,
}

impl KafkaLogProducer {
    pub fn new(config: &KafkaProducerConfig) -> LogResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("client.id", &config.client_id)
            .set("request.required.acks", normalize_acks(&config.acks))
            .set("retries", config.retries.to_string())
            .set("linger.ms", config.linger_ms.to_string())
            .set("batch.size", config.batch_size.to_string())
            .set("compression.codec", &config.compression)
            .set("enable.idempotence", config.idempotence.to_string())
            .set("message.timeout.ms", config.event_timeout.as_millis().to_string())
            .create()
            .map_err(|e| LogError::Config(format!("failed to create producer: {e}")))?;

        Ok(Self {
            inner: producer,
            retry_attempts: config.retry_attempts.max(1),
            produce_retry_delay: config.produce_retry_delay,
            event_timeout: config.event_timeout,
            flush_timeout: config.flush_timeout,
        })
    }

    async fn send_once(&self, message: &OutboundMessage) -> LogResult<()> {
        let wire_headers = message.wire_headers();
        let mut headers = OwnedHeaders::new_with_capacity(wire_headers.len());
        for (key, value) in &wire_headers {
            headers = headers.insert(Header {
                key,
                value: Some(value.as_str()),
            });
        }

        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&message.topic).payload(message.value.as_slice()).headers(headers);
        if let Some(key) = &message.key {
            record = record.key(key.as_slice());
        }
        if let Some(ts) = message.timestamp {
            record = record.timestamp(ts.timestamp_millis());
        }

        match self.inner.send(record, self.event_timeout).await {
            Ok(_) => Ok(()),
            Err((e, _)) => Err(LogError::Produce(e.to_string())),
        }
    }
}

#[async_trait]
impl LogProducer for KafkaLogProducer {
    async fn produce(&self, message: OutboundMessage) -> LogResult<()> {
        let mut last_err = None;
        for attempt in 1..=self.retry_attempts {
            match self.send_once(&message).await {
                Ok(()) => {
                    if message.dlq {
                        info!(
                            worker_id = message.worker_id,
                            order_uid = %message.key_str(),
                            topic = %message.topic,
                            "message sent to DLQ"
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt,
                        attempts = self.retry_attempts,
                        topic = %message.topic,
                        error = %e,
                        "produce attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.produce_retry_delay).await;
                    }
                }
            }
        }
        if message.dlq {
            error!(
                worker_id = message.worker_id,
                order_uid = %message.key_str(),
                attempts = self.retry_attempts,
                "failed to send message to DLQ"
            );
        }
        Err(last_err.unwrap_or_else(|| LogError::AckTimeout(self.event_timeout)))
    }

    async fn close(&self) {
        if let Err(e) = self.inner.flush(self.flush_timeout) {
            error!(error = %e, "producer failed to flush buffered messages");
        }
        info!("producer stopped");
    }
}

/// librdkafka accepts `-1`/`0`/`1`; map the friendlier `all` spelling.
fn normalize_acks(acks: &str) -> String {
    match acks {
        "all" | "-1" => "-1".to_string(),
        "0" => "0".to_string(),
        "1" => "1".to_string(),
        other => {
            warn!(acks = other, "unknown acks value, defaulting to -1");
            "-1".to_string()
        }
    }
}
