pub mod health;
pub mod import;

use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /import/schemas/{target}                 schema descriptor (GET)
/// /import/catalog/{kind}                   catalog keys (GET)
/// /import/sessions                         upload a file (POST)
/// /import/sessions/{id}                    session summary (GET)
/// /import/sessions/{id}/mapping            replace mapping (PUT)
/// /import/sessions/{id}/validate           validate (POST)
/// /import/sessions/{id}/resolutions        directives and defaults (PUT)
/// /import/sessions/{id}/options            commit options (PUT)
/// /import/sessions/{id}/commit             commit or dry run (POST)
/// /import/sessions/{id}/cancel             cancel (POST)
/// /import/validate                         stateless validate (POST)
/// /import/execute                          stateless execute (POST)
/// ```
///
/// `timeout` wraps every route except commit and execute.
pub fn api_routes(timeout: TimeoutLayer) -> Router<AppState> {
    Router::new().nest("/import", import::router(timeout))
}
