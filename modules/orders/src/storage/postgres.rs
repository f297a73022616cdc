//! PostgreSQL implementation of [`OrderStore`].

use super::{OrderStore, StoreError};
use crate::models::{Delivery, Item, Order, Payment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        // Serializable so the four-table write is never observed half-done.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let order_id = insert_order(&mut tx, order).await?;
        insert_delivery(&mut tx, order_id, &order.delivery).await?;
        insert_payment(&mut tx, order_id, &order.payment).await?;
        for item in &order.items {
            insert_item(&mut tx, order_id, item).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, order_uid: &str) -> Result<Order, StoreError> {
        let row = sqlx::query(ORDER_SELECT)
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        let order_id: i64 = row.try_get("id")?;
        let mut order = order_from_row(&row)?;
        order.items = fetch_items(&self.pool, order_id).await?;
        Ok(order)
    }

    async fn get_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(ORDERS_SELECT)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let order_id: i64 = row.try_get("id")?;
            let mut order = order_from_row(&row)?;
            order.items = fetch_items(&self.pool, order_id).await?;
            orders.push(order);
        }
        Ok(orders)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("postgres pool closed");
    }
}

macro_rules! order_join_select {
    ($suffix:literal) => {
        concat!(
            r#"
        SELECT
            orders.id,
            orders.order_uid,
            orders.track_number,
            orders.entry,
            orders.locale,
            orders.internal_signature,
            orders.customer_id,
            orders.delivery_service,
            orders.shardkey,
            orders.sm_id,
            orders.date_created,
            orders.oof_shard,

            deliveries.name,
            deliveries.phone,
            deliveries.zip,
            deliveries.city,
            deliveries.address,
            deliveries.region,
            deliveries.email,

            payments.transaction,
            payments.request_id,
            payments.currency,
            payments.provider,
            payments.amount,
            payments.payment_dt,
            payments.bank,
            payments.delivery_cost,
            payments.goods_total,
            payments.custom_fee
        FROM orders
        JOIN deliveries ON orders.id = deliveries.order_id
        JOIN payments ON orders.id = payments.order_id
        "#,
            $suffix
        )
    };
}

const ORDER_SELECT: &str = order_join_select!("WHERE orders.order_uid = $1");
const ORDERS_SELECT: &str = order_join_select!("LIMIT $1");

async fn insert_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<i64, StoreError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO orders (
            order_uid, track_number, entry, locale, internal_signature,
            customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id
        "#,
    )
    .bind(&order.order_uid)
    .bind(&order.track_number)
    .bind(&order.entry)
    .bind(&order.locale)
    .bind(&order.internal_signature)
    .bind(&order.customer_id)
    .bind(&order.delivery_service)
    .bind(&order.shardkey)
    .bind(order.sm_id)
    .bind(order.date_created)
    .bind(&order.oof_shard)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

async fn insert_delivery(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    delivery: &Delivery,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO deliveries (order_id, name, phone, zip, city, address, region, email)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(order_id)
    .bind(&delivery.name)
    .bind(&delivery.phone)
    .bind(&delivery.zip)
    .bind(&delivery.city)
    .bind(&delivery.address)
    .bind(&delivery.region)
    .bind(&delivery.email)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    payment: &Payment,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            order_id, transaction, request_id, currency, provider, amount,
            payment_dt, bank, delivery_cost, goods_total, custom_fee
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(order_id)
    .bind(&payment.transaction)
    .bind(&payment.request_id)
    .bind(&payment.currency)
    .bind(&payment.provider)
    .bind(payment.amount)
    .bind(payment.payment_dt)
    .bind(&payment.bank)
    .bind(payment.delivery_cost)
    .bind(payment.goods_total)
    .bind(payment.custom_fee)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_item(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    item: &Item,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO items (
            order_id, chrt_id, track_number, price, rid, name, sale, size,
            total_price, nm_id, brand, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(order_id)
    .bind(item.chrt_id)
    .bind(&item.track_number)
    .bind(item.price)
    .bind(&item.rid)
    .bind(&item.name)
    .bind(item.sale)
    .bind(&item.size)
    .bind(item.total_price)
    .bind(item.nm_id)
    .bind(&item.brand)
    .bind(item.status)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn fetch_items(pool: &PgPool, order_id: i64) -> Result<Vec<Item>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT chrt_id, track_number, price, rid, name, sale, size,
               total_price, nm_id, brand, status
        FROM items WHERE order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(Item {
            chrt_id: row.try_get("chrt_id")?,
            track_number: row.try_get("track_number")?,
            price: row.try_get("price")?,
            rid: row.try_get("rid")?,
            name: row.try_get("name")?,
            sale: row.try_get("sale")?,
            size: row.try_get("size")?,
            total_price: row.try_get("total_price")?,
            nm_id: row.try_get("nm_id")?,
            brand: row.try_get("brand")?,
            status: row.try_get("status")?,
        });
    }
    Ok(items)
}

fn order_from_row(row: &PgRow) -> Result<Order, sqlx::Error> {
    let date_created: DateTime<Utc> = row.try_get("date_created")?;
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        delivery: Delivery {
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            zip: row.try_get("zip")?,
            city: row.try_get("city")?,
            address: row.try_get("address")?,
            region: row.try_get("region")?,
            email: row.try_get("email")?,
        },
        payment: Payment {
            transaction: row.try_get("transaction")?,
            request_id: row.try_get("request_id")?,
            currency: row.try_get("currency")?,
            provider: row.try_get("provider")?,
            amount: row.try_get("amount")?,
            payment_dt: row.try_get("payment_dt")?,
            bank: row.try_get("bank")?,
            delivery_cost: row.try_get("delivery_cost")?,
            goods_total: row.try_get("goods_total")?,
            custom_fee: row.try_get("custom_fee")?,
        },
        items: Vec::new(),
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shardkey: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created,
        oof_shard: row.try_get("oof_shard")?,
    })
}
