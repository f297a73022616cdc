//! Record and message types shared by every log backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A record delivered by [`crate::LogConsumer::poll`].
///
/// Owns its bytes so it can outlive the backend's internal buffers; the
/// triple (topic, partition, offset) identifies the position to commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub headers: HashMap<String, String>,
}

impl LogRecord {
    /// Key bytes rendered for logging. Producers often JSON-quote string
    /// keys, so surrounding quotes are stripped.
    pub fn key_str(&self) -> String {
        match &self.key {
            Some(key) => String::from_utf8_lossy(key).trim_matches('"').to_string(),
            None => String::new(),
        }
    }
}

/// A message handed to [`crate::LogProducer::produce`].
///
/// `metadata`, `dlq`, and `worker_id` travel out-of-band (message headers on
/// the Kafka backend); `value` is carried verbatim so a dead-lettered record
/// can be replayed unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    pub dlq: bool,
    pub worker_id: usize,
}

impl OutboundMessage {
    /// Create a plain message for `topic` with no key, headers, or metadata.
    pub fn new(topic: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value,
            headers: HashMap::new(),
            timestamp: None,
            metadata: HashMap::new(),
            dlq: false,
            worker_id: 0,
        }
    }

    /// Build a dead-letter message from the record that exhausted its
    /// processing budget, preserving key, payload, headers, and timestamp.
    pub fn dead_letter(topic: impl Into<String>, record: &LogRecord, retry_count: usize, worker_id: usize) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("retryCount".to_string(), retry_count.to_string());
        Self {
            topic: topic.into(),
            key: record.key.clone(),
            value: record.payload.clone(),
            headers: record.headers.clone(),
            timestamp: record.timestamp,
            metadata,
            dlq: true,
            worker_id,
        }
    }

    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn key_str(&self) -> String {
        match &self.key {
            Some(key) => String::from_utf8_lossy(key).trim_matches('"').to_string(),
            None => String::new(),
        }
    }

    /// Headers as written to the wire: the caller's headers plus the
    /// out-of-band properties (`metadata` entries, `workerID`, `dlq`).
    pub fn wire_headers(&self) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        for (k, v) in &self.metadata {
            headers.insert(k.clone(), v.clone());
        }
        if self.dlq {
            headers.insert("dlq".to_string(), "true".to_string());
            headers.insert("workerID".to_string(), self.worker_id.to_string());
        }
        headers
    }
}
