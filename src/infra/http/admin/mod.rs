mod cache;

use axum::{
    Router,
    routing::{delete, get, post},
};

use super::HttpState;

/// Cache inspection and maintenance endpoints.
pub(super) fn cache_routes() -> Router<HttpState> {
    Router::new()
        .route("/api/v1/cache/stats", get(cache::stats))
        .route("/api/v1/cache/keys", get(cache::list_keys))
        .route("/api/v1/cache/key/{key}", delete(cache::delete_key))
        .route("/api/v1/cache/clear", post(cache::clear))
        .route("/api/v1/cache/health", get(cache::health))
}
