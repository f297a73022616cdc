//! Order wire format and field constraints.
//!
//! Decoding is structural (`serde_json` rejects type mismatches, unknown
//! fields are tolerated); [`Order::validate_full`] enforces the field constraints
//! before anything is persisted. Both failures are permanent: the same bytes
//! fail the same way on every attempt.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

static RE_ORDER_UID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]+$").unwrap());
static RE_LOCALE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2}$").unwrap());
static RE_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());
static RE_PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[0-9]{7,15}$").unwrap());
static RE_ZIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{7}$").unwrap());
static RE_CURRENCY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());

/// Item states accepted from the log
const ALLOWED_ITEM_STATUSES: [i32; 5] = [100, 200, 202, 300, 400];

/// The persisted entity. Owns its delivery, payment, and items; the four are
/// written and read as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_order_consistency", skip_on_field_errors = false))]
pub struct Order {
    #[validate(length(min = 1, max = 255), regex = "RE_ORDER_UID")]
    pub order_uid: String,
    #[validate(length(min = 1))]
    pub track_number: String,
    #[validate(length(min = 1))]
    pub entry: String,
    #[validate]
    pub delivery: Delivery,
    #[validate]
    pub payment: Payment,
    #[validate]
    pub items: Vec<Item>,
    #[validate(regex = "RE_LOCALE")]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[validate(length(min = 1))]
    pub customer_id: String,
    #[validate(length(min = 1))]
    pub delivery_service: String,
    #[validate(regex = "RE_NUMERIC")]
    pub shardkey: String,
    #[validate(range(min = 1))]
    pub sm_id: i64,
    pub date_created: DateTime<Utc>,
    #[validate(regex = "RE_NUMERIC")]
    pub oof_shard: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Delivery {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(regex = "RE_PHONE")]
    pub phone: String,
    #[validate(regex = "RE_ZIP")]
    pub zip: String,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(length(min = 1))]
    pub region: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Payment {
    #[validate(length(min = 1))]
    pub transaction: String,
    #[serde(default)]
    pub request_id: String,
    #[validate(regex = "RE_CURRENCY")]
    pub currency: String,
    #[validate(length(min = 1))]
    pub provider: String,
    #[validate(custom = "positive_amount")]
    pub amount: f64,
    #[validate(range(min = 1))]
    pub payment_dt: i64,
    #[serde(default)]
    pub bank: String,
    #[validate(range(min = 0.0))]
    pub delivery_cost: f64,
    #[validate(custom = "positive_amount")]
    pub goods_total: f64,
    #[validate(range(min = 0.0))]
    pub custom_fee: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Item {
    #[validate(range(min = 1))]
    pub chrt_id: i64,
    #[validate(length(min = 1))]
    pub track_number: String,
    #[validate(custom = "positive_amount")]
    pub price: f64,
    #[validate(length(min = 1))]
    pub rid: String,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 0, max = 100))]
    pub sale: i32,
    #[serde(default)]
    pub size: String,
    #[validate(range(min = 0.0))]
    pub total_price: f64,
    #[validate(range(min = 1))]
    pub nm_id: i64,
    #[validate(length(min = 1))]
    pub brand: String,
    #[validate(custom = "allowed_status")]
    pub status: i32,
}

impl Order {
    /// Structural decode from the inbound wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Field constraints plus cross-field consistency.
    pub fn validate_full(&self) -> Result<(), ValidationErrors> {
        self.validate()
    }
}

fn positive_amount(value: f64) -> Result<(), ValidationError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_positive"))
    }
}

fn allowed_status(status: i32) -> Result<(), ValidationError> {
    if ALLOWED_ITEM_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(ValidationError::new("unknown_item_status"))
    }
}

/// Cross-field rules: the payment must reference this order, and an order
/// without items is not persistable.
fn validate_order_consistency(order: &Order) -> Result<(), ValidationError> {
    if order.items.is_empty() {
        return Err(ValidationError::new("order_has_no_items"));
    }
    if order.payment.transaction != order.order_uid {
        return Err(ValidationError::new("payment_transaction_mismatch"));
    }
    Ok(())
}

/// A complete well-formed order for unit tests across the crate.
#[cfg(test)]
pub(crate) fn sample_order() -> Order {
    use chrono::TimeZone;
    Order {
        order_uid: "b563feb7b2b84b6test".to_string(),
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
            transaction: "b563feb7b2b84b6test".to_string(),
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
        date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
        oof_shard: "1".to_string(),
    }
}
