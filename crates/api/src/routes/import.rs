//! Route definitions for the `/import` resource.

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::import;
use crate::state::AppState;

/// Routes mounted at `/import`.
///
/// ```text
/// GET    /schemas/{target}              -> get_schema
/// GET    /catalog/{kind}                -> list_catalog
/// POST   /sessions                      -> create_session
/// GET    /sessions/{id}                 -> get_session
/// PUT    /sessions/{id}/mapping         -> update_mapping
/// POST   /sessions/{id}/validate        -> validate_session
/// PUT    /sessions/{id}/resolutions     -> update_resolutions
/// PUT    /sessions/{id}/options         -> update_options
/// POST   /sessions/{id}/commit          -> commit_session
/// POST   /sessions/{id}/cancel          -> cancel_session
/// POST   /validate                      -> validate_rows
/// POST   /execute                       -> execute_rows
/// ```
pub fn router(timeout: TimeoutLayer) -> Router<AppState> {
    let bounded = Router::new()
        .route("/schemas/{target}", get(import::get_schema))
        .route("/catalog/{kind}", get(import::list_catalog))
        .route("/sessions", post(import::create_session))
        .route("/sessions/{id}", get(import::get_session))
        .route("/sessions/{id}/mapping", put(import::update_mapping))
        .route("/sessions/{id}/validate", post(import::validate_session))
        .route("/sessions/{id}/resolutions", put(import::update_resolutions))
        .route("/sessions/{id}/options", put(import::update_options))
        .route("/sessions/{id}/cancel", post(import::cancel_session))
        .route("/validate", post(import::validate_rows))
        .layer(timeout);

    // Commits run on their own task under COMMIT_TIMEOUT_SECS.
    let commits = Router::new()
        .route("/sessions/{id}/commit", post(import::commit_session))
        .route("/execute", post(import::execute_rows));

    bounded.merge(commits)
}
