//! Fixed-capacity in-memory order cache.
//!
//! A mapping from `order_uid` to a cached entry, paired with a fixed ring of
//! keys in insertion order. The ring bounds the mapping: an insert into a
//! full cache displaces the oldest key. A background sweeper removes entries
//! idle for longer than the TTL; it exists to shrink memory for unused
//! entries, not to enforce capacity.
//!
//! While the database is down the sweeper pauses — the cache is then the
//! only source of truth for reads and must not erode.

use crate::config::CacheConfig;
use crate::models::Order;
use crate::storage::OrderStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct OrderCache {
    enabled: bool,
    bg_cleanup: bool,
    inner: RwLock<CacheInner>,
    capacity: usize,
    order_ttl: Duration,
    cleanup_interval: Duration,
    pause_duration: Duration,
    // Monotonic anchor for access stamps; stamps are nanoseconds since here.
    anchor: Instant,
}

struct CacheInner {
    orders: HashMap<String, CachedOrder>,
    queue: KeyRing,
}

struct CachedOrder {
    order: Arc<Order>,
    last_access: AtomicI64,
}

impl CachedOrder {
    fn new(order: Arc<Order>, now: i64) -> Self {
        Self {
            order,
            last_access: AtomicI64::new(now),
        }
    }
}

/// Fixed-capacity ring of cache keys in insertion order.
struct KeyRing {
    buffer: Vec<String>,
    head: usize,
    tail: usize,
    size: usize,
}

impl KeyRing {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![String::new(); capacity],
            head: 0,
            tail: 0,
            size: 0,
        }
    }

    /// Append `key`; when full, overwrite the oldest slot and return the
    /// displaced key.
    fn enqueue(&mut self, key: String) -> Option<String> {
        if self.size == self.buffer.len() {
            let displaced = std::mem::replace(&mut self.buffer[self.tail], key);
            self.tail = self.advance(self.tail);
            self.head = self.advance(self.head);
            return Some(displaced);
        }
        self.buffer[self.tail] = key;
        self.tail = self.advance(self.tail);
        self.size += 1;
        None
    }

    fn advance(&self, i: usize) -> usize {
        let next = i + 1;
        if next == self.buffer.len() {
            0
        } else {
            next
        }
    }
}

impl OrderCache {
    pub fn new(config: &CacheConfig) -> Self {
        let enabled = config.save_in_cache && config.cache_size >= 1;
        let capacity = if enabled { config.cache_size } else { 0 };
        Self {
            enabled,
            bg_cleanup: config.bg_cleanup,
            inner: RwLock::new(CacheInner {
                orders: HashMap::with_capacity(capacity),
                queue: KeyRing::new(capacity),
            }),
            capacity,
            order_ttl: config.order_ttl,
            cleanup_interval: config.cleanup_interval,
            pause_duration: config.pause_duration,
            anchor: Instant::now(),
        }
    }

    /// Pre-populate from storage. Failure is logged and the cache starts
    /// empty.
    pub async fn warm_up(&self, store: &dyn OrderStore) {
        if !self.enabled {
            return;
        }
        match store.get_orders(self.capacity as i64).await {
            Ok(orders) => {
                let count = orders.len();
                let now = self.now_nanos();
                let mut inner = self.inner.write().unwrap();
                for order in orders {
                    let key = order.order_uid.clone();
                    if inner.orders.contains_key(&key) {
                        continue;
                    }
                    if let Some(displaced) = inner.queue.enqueue(key.clone()) {
                        inner.orders.remove(&displaced);
                    }
                    inner.orders.insert(key, CachedOrder::new(Arc::new(order), now));
                }
                info!(orders = count, "cache warm-up from database complete");
            }
            Err(e) => {
                error!(error = %e, "cache warm-up failed to load orders from database");
            }
        }
    }

    /// O(1) lookup. A hit refreshes the entry's access stamp; the stored
    /// order itself is never touched.
    pub fn get(&self, order_uid: &str) -> Option<Arc<Order>> {
        if !self.enabled {
            return None;
        }
        let inner = self.inner.read().unwrap();
        let cached = inner.orders.get(order_uid)?;
        cached.last_access.store(self.now_nanos(), Ordering::Relaxed);
        Some(Arc::clone(&cached.order))
    }

    /// O(1) insert. A duplicate key only refreshes the access stamp; the
    /// stored order is not replaced. A fresh key may displace the oldest
    /// entry so the mapping never exceeds capacity.
    pub fn put(&self, order: Arc<Order>) {
        if !self.enabled {
            return;
        }
        let now = self.now_nanos();
        let mut inner = self.inner.write().unwrap();
        if let Some(cached) = inner.orders.get(&order.order_uid) {
            cached.last_access.store(now, Ordering::Relaxed);
            return;
        }
        let key = order.order_uid.clone();
        if let Some(displaced) = inner.queue.enqueue(key.clone()) {
            if displaced != key {
                inner.orders.remove(&displaced);
            }
        }
        inner.orders.insert(key.clone(), CachedOrder::new(order, now));
        debug!(order_uid = %key, "order cached");
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Single cleanup pass: collect expired ids under the read lock, delete
    /// them under the write lock. Entries refreshed in between are re-checked
    /// and kept. Returns the number of removed entries.
    pub fn sweep(&self) -> usize {
        let now = self.now_nanos();
        let ttl = self.order_ttl.as_nanos() as i64;

        let expired: Vec<String> = {
            let inner = self.inner.read().unwrap();
            inner
                .orders
                .iter()
                .filter(|(_, cached)| now - cached.last_access.load(Ordering::Relaxed) > ttl)
                .map(|(key, _)| key.clone())
                .collect()
        };
        if expired.is_empty() {
            return 0;
        }

        let mut inner = self.inner.write().unwrap();
        let mut removed = 0;
        for key in expired {
            let still_expired = inner
                .orders
                .get(&key)
                .is_some_and(|cached| now - cached.last_access.load(Ordering::Relaxed) > ttl);
            if still_expired {
                inner.orders.remove(&key);
                debug!(order_uid = %key, "expired order removed from cache");
                removed += 1;
            }
        }
        removed
    }

    /// Background TTL sweeper.
    ///
    /// Runs a pass every cleanup interval. While `db_status` reads `false`
    /// the sweeper deletes nothing and polls the signal every pause
    /// duration; the false→true transition is logged and sweeping resumes.
    pub async fn run_sweeper(
        self: Arc<Self>,
        cancel: CancellationToken,
        db_status: watch::Receiver<bool>,
    ) {
        if !self.enabled || !self.bg_cleanup {
            return;
        }
        info!("cache cleaner started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cache cleaner stopped");
                    return;
                }
                _ = tokio::time::sleep(self.cleanup_interval) => {}
            }

            if !*db_status.borrow() {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("cache cleaner stopped");
                            return;
                        }
                        _ = tokio::time::sleep(self.pause_duration) => {}
                    }
                    if *db_status.borrow() {
                        info!("database connection restored, cache cleanup resumed");
                        break;
                    }
                }
                continue;
            }

            let removed = self.sweep();
            if removed > 0 {
                info!(removed, "cleanup cycle completed");
            }
        }
    }

    fn now_nanos(&self) -> i64 {
        self.anchor.elapsed().as_nanos() as i64
    }
}
