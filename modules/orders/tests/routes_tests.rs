//! HTTP surface tests over a scripted store and a real cache.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use http_body_util::BodyExt;
use orders_rs::cache::OrderCache;
use orders_rs::config::CacheConfig;
use orders_rs::routes;
use orders_rs::service::OrderService;
use orders_rs::storage::OrderStore;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn cache_config() -> CacheConfig {
    CacheConfig {
        save_in_cache: true,
        cache_size: 10,
        bg_cleanup: false,
        cleanup_interval: Duration::from_secs(60),
        order_ttl: Duration::from_secs(60),
        pause_duration: Duration::from_secs(1),
    }
}

fn router_with(store: Arc<ScriptedStore>) -> axum::Router {
    let cache = Arc::new(OrderCache::new(&cache_config()));
    let service = Arc::new(OrderService::new(store as Arc<dyn OrderStore>, cache));
    routes::router(service)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Option<String>, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let cache_header = response
        .headers()
        .get("x-cache")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, cache_header, body)
}

#[tokio::test]
async fn lookup_misses_then_hits_the_cache() {
    let store = Arc::new(ScriptedStore::new());
    store.insert_order(sample_order("AB01"));
    let router = router_with(store);

    let (status, cache_header, body) = get(&router, "/api/v1/orders/AB01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_header.as_deref(), Some("MISS"));
    assert_eq!(body["order_uid"], "AB01");
    assert_eq!(body["payment"]["transaction"], "AB01");

    let (status, cache_header, body) = get(&router, "/api/v1/orders/AB01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_header.as_deref(), Some("HIT"));
    assert_eq!(body["order_uid"], "AB01");
}

#[tokio::test]
async fn unknown_order_returns_404_with_error_body() {
    let router = router_with(Arc::new(ScriptedStore::new()));

    let (status, cache_header, body) = get(&router, "/api/v1/orders/NOPE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(cache_header, None);
    assert!(body["error"].as_str().unwrap().contains("NOPE"));
}

#[tokio::test]
async fn storage_failure_returns_500_with_error_body() {
    let store = Arc::new(ScriptedStore::new());
    store.fail_reads.store(true, std::sync::atomic::Ordering::SeqCst);
    let router = router_with(store);

    let (status, _, body) = get(&router, "/api/v1/orders/AB01").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn cached_orders_survive_a_storage_outage() {
    let store = Arc::new(ScriptedStore::new());
    store.insert_order(sample_order("AB02"));
    let router = router_with(Arc::clone(&store));

    let (status, _, _) = get(&router, "/api/v1/orders/AB02").await;
    assert_eq!(status, StatusCode::OK);

    store.fail_reads.store(true, std::sync::atomic::Ordering::SeqCst);
    let (status, cache_header, body) = get(&router, "/api/v1/orders/AB02").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_header.as_deref(), Some("HIT"));
    assert_eq!(body["order_uid"], "AB02");
}

#[tokio::test]
async fn health_endpoint_reports_the_service() {
    let router = router_with(Arc::new(ScriptedStore::new()));

    let (status, _, body) = get(&router, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "orders-rs");
}

#[tokio::test]
async fn html_pages_render() {
    let router = router_with(Arc::new(ScriptedStore::new()));

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("<form"));

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/orders/AB01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("AB01"));
}
