//! Storage contract consumed by the consumer workers and the read service.

mod postgres;

pub use postgres::PgOrderStore;

use crate::models::Order;
use async_trait::async_trait;

/// Errors surfaced by the storage adapter
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Connection-family failure: the database is unreachable, not unhappy
    /// with the data. Callers pause and retry without spending their retry
    /// budget.
    pub fn is_transient(&self) -> bool {
        let StoreError::Database(inner) = self else {
            return false;
        };
        match inner {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
            sqlx::Error::Database(db) => {
                let message = db.message().to_lowercase();
                message.contains("connection refused")
                    || message.contains("connection reset")
                    || message.contains("the database system is starting up")
                    || message.contains("the database system is shutting down")
            }
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("connection refused") || message.contains("connection reset")
            }
        }
    }

    /// Unique violation on `order_uid` — the order is already persisted.
    /// Expected under at-least-once redelivery; callers treat it as success.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            StoreError::Database(sqlx::Error::Database(db))
                if db.code().as_deref() == Some("23505")
        )
    }
}

/// Persistence operations the core depends on.
///
/// `save_order` must be atomic: the order row and its delivery, payment, and
/// item children become visible together or not at all.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn save_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn get_order(&self, order_uid: &str) -> Result<Order, StoreError>;

    /// Warm-up read: at most `limit` orders, ordering unspecified.
    async fn get_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Idempotent shutdown.
    async fn close(&self);
}
