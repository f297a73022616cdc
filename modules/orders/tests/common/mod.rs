#![allow(dead_code)]

//! Scripted fakes and fixtures shared by the integration tests.

use async_trait::async_trait;
use chrono::TimeZone;
use event_log::{InMemoryConsumer, LogConsumer, LogError, LogProducer, LogRecord, OutboundMessage};
use orders_rs::config::{BrokerType, ConsumerConfig, WorkersConfig};
use orders_rs::models::{Delivery, Item, Order, Payment};
use orders_rs::notifier::{Notifier, NotifyError};
use orders_rs::storage::{OrderStore, StoreError};
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn sample_order(uid: &str) -> Order {
    Order {
        order_uid: uid.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: uid.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817.0,
            payment_dt: 1637907727,
            bank: "alpha".to_string(),
            delivery_cost: 1500.0,
            goods_total: 317.0,
            custom_fee: 0.0,
        },
        items: vec![Item {
            chrt_id: 9934930,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453.0,
            rid: "ab4219087a764ae0btest".to_string(),
            name: "Mascaras".to_string(),
            sale: 30,
            size: "0".to_string(),
            total_price: 317.0,
            nm_id: 2389212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }],
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        date_created: chrono::Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
        oof_shard: "1".to_string(),
    }
}

pub fn sample_order_bytes(uid: &str) -> Vec<u8> {
    serde_json::to_vec(&sample_order(uid)).unwrap()
}

/// Consumer settings with short delays so retry paths run in milliseconds.
pub fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        broker_type: BrokerType::InMemory,
        brokers: vec!["localhost:9092".to_string()],
        topic: "orders".to_string(),
        group_id: "orders".to_string(),
        client_id: "order-service".to_string(),
        save_order_retry_max: 3,
        save_order_retry_delay: Duration::from_millis(20),
        commit_retry_max: 3,
        commit_retry_delay: Duration::from_millis(10),
        event_type_errors_max: 2,
        event_type_error_retry_delay: Duration::from_millis(10),
        db_conn_check_delay: Duration::from_millis(20),
    }
}

pub fn workers_config(count: usize, restart_on_panic: bool) -> WorkersConfig {
    WorkersConfig {
        count,
        restart_on_panic,
        restart_delay: Duration::from_millis(20),
    }
}

/// One scripted outcome for a `save_order` call
#[derive(Debug, Clone, Copy)]
pub enum SaveOutcome {
    Ok,
    /// Connection-family failure: must not consume the retry budget
    Transient,
    /// Application-level failure: consumes the retry budget
    Fail,
    /// Unique violation on `order_uid`
    Duplicate,
}

/// [`OrderStore`] fake with a per-call script for `save_order`.
///
/// Unscripted calls succeed. Successful saves land in `orders` so the read
/// path can serve them.
#[derive(Default)]
pub struct ScriptedStore {
    script: Mutex<VecDeque<SaveOutcome>>,
    pub orders: Mutex<HashMap<String, Order>>,
    pub save_attempts: AtomicUsize,
    pub fail_reads: AtomicBool,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_saves(&self, outcomes: &[SaveOutcome]) {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.order_uid.clone(), order);
    }

    pub fn saved_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    fn transient_error() -> StoreError {
        StoreError::Database(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }
}

#[async_trait]
impl OrderStore for ScriptedStore {
    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SaveOutcome::Ok);
        match outcome {
            SaveOutcome::Ok => {
                self.insert_order(order.clone());
                Ok(())
            }
            SaveOutcome::Transient => Err(Self::transient_error()),
            SaveOutcome::Fail => Err(StoreError::Database(sqlx::Error::Protocol(
                "simulated write failure".to_string(),
            ))),
            SaveOutcome::Duplicate => Err(StoreError::Database(sqlx::Error::Database(Box::new(
                FakeUniqueViolation,
            )))),
        }
    }

    async fn get_order(&self, order_uid: &str) -> Result<Order, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::transient_error());
        }
        self.orders
            .lock()
            .unwrap()
            .get(order_uid)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.values().take(limit.max(0) as usize).cloned().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::transient_error());
        }
        Ok(())
    }

    async fn close(&self) {}
}

/// Minimal `DatabaseError` reporting a Postgres unique violation
#[derive(Debug)]
pub struct FakeUniqueViolation;

impl std::fmt::Display for FakeUniqueViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("duplicate key value violates unique constraint \"orders_order_uid_key\"")
    }
}

impl std::error::Error for FakeUniqueViolation {}

impl sqlx::error::DatabaseError for FakeUniqueViolation {
    fn message(&self) -> &str {
        "duplicate key value violates unique constraint \"orders_order_uid_key\""
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed("23505"))
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        sqlx::error::ErrorKind::UniqueViolation
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }
}

/// [`Notifier`] fake collecting every message
#[derive(Default)]
pub struct CollectingNotifier {
    messages: Mutex<Vec<String>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// [`LogConsumer`] wrapper whose first `failures` commits fail
pub struct FailingCommitConsumer {
    inner: InMemoryConsumer,
    failures_left: AtomicUsize,
}

impl FailingCommitConsumer {
    pub fn new(inner: InMemoryConsumer, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl LogConsumer for FailingCommitConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<LogRecord>, LogError> {
        self.inner.poll(timeout).await
    }

    async fn commit(&self, record: &LogRecord) -> Result<(), LogError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(LogError::Commit("simulated commit failure".to_string()));
        }
        self.inner.commit(record).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

/// [`LogProducer`] that refuses every message
pub struct FailingProducer;

#[async_trait]
impl LogProducer for FailingProducer {
    async fn produce(&self, _message: OutboundMessage) -> Result<(), LogError> {
        Err(LogError::Produce("simulated produce failure".to_string()))
    }

    async fn close(&self) {}
}

/// Poll `predicate` until it holds or the deadline passes.
pub async fn wait_until<F: Fn() -> bool>(predicate: F, what: &str) {
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while std::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
