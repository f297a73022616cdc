//! Cache-first order lookup.

use crate::cache::OrderCache;
use crate::models::Order;
use crate::storage::{OrderStore, StoreError};
use std::sync::Arc;

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: Arc<OrderCache>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<OrderCache>) -> Self {
        Self { store, cache }
    }

    /// Returns the order and whether it came from the cache. A miss reads
    /// through to storage and populates the cache on the way back;
    /// [`StoreError::NotFound`] stays distinct so the HTTP layer can answer
    /// 404 instead of 500.
    pub async fn get_order(&self, order_uid: &str) -> Result<(Arc<Order>, bool), StoreError> {
        if let Some(order) = self.cache.get(order_uid) {
            return Ok((order, true));
        }
        let order = Arc::new(self.store.get_order(order_uid).await?);
        self.cache.put(Arc::clone(&order));
        Ok((order, false))
    }
}
