//! HTTP surface: the order lookup API and the HTML pages.

mod pages;

use crate::service::OrderService;
use crate::storage::StoreError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(service: Arc<OrderService>) -> Router {
    Router::new()
        .route("/api/v1/orders/{order_id}", get(get_order))
        .route("/api/health", get(health))
        .with_state(service)
        .merge(pages::router())
}

/// GET /api/v1/orders/{order_id} — the order as JSON, with `X-Cache`
/// reporting whether it was served from memory.
async fn get_order(
    State(service): State<Arc<OrderService>>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    match service.get_order(&order_id).await {
        Ok((order, from_cache)) => {
            let cache_state = if from_cache { "HIT" } else { "MISS" };
            (
                StatusCode::OK,
                [("X-Cache", cache_state)],
                Json((*order).clone()),
            )
                .into_response()
        }
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("order {order_id} not found"),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(order_uid = %order_id, error = %e, "order lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal server error".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /api/health — liveness payload
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "orders-rs",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
