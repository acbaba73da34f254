#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use salesdesk_core::catalog::{CatalogProvider, InMemoryCatalog};
use salesdesk_core::store::{EntityStore, InMemoryEntityStore};
use tower::ServiceExt;

use salesdesk_api::config::ServerConfig;
use salesdesk_api::router::build_app_router;
use salesdesk_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults and the in-memory backend.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        commit_timeout_secs: 30,
        session_retention_secs: 3600,
        max_upload_bytes: 1024 * 1024,
        database_url: None,
    }
}

/// Build the full application router over empty in-memory storage.
pub fn build_test_app() -> Router {
    build_test_app_with(
        Arc::new(InMemoryCatalog::new()),
        Arc::new(InMemoryEntityStore::new()),
    )
}

/// Build the full application router over the given storage so tests can
/// seed catalogs and inspect written records.
pub fn build_test_app_with(
    catalog: Arc<InMemoryCatalog>,
    store: Arc<InMemoryEntityStore>,
) -> Router {
    build_test_app_from(test_config(), catalog, store)
}

/// Build the full application router over any collaborators and config.
pub fn build_test_app_from(
    config: ServerConfig,
    catalog: Arc<dyn CatalogProvider>,
    store: Arc<dyn EntityStore>,
) -> Router {
    let state = AppState::in_memory(config.clone(), catalog, store);
    build_app_router(state, &config)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send_json(app, Method::POST, uri, body).await
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send_json(app, Method::PUT, uri, body).await
}

async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
