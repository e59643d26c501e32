mod admin;
pub mod api;
mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::application::error::ErrorReport;
use crate::application::query::{QueryError, QueryExecutor};
use crate::cache::{CacheResolver, KvStore};

pub use api::build_api_router;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct HttpState {
    pub resolver: Arc<CacheResolver>,
    pub kv: Arc<dyn KvStore>,
    pub executor: Arc<dyn QueryExecutor>,
}

impl HttpState {
    pub fn new(
        resolver: Arc<CacheResolver>,
        kv: Arc<dyn KvStore>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            resolver,
            kv,
            executor,
        }
    }
}

fn db_health_response(result: Result<(), QueryError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

async fn health(axum::extract::State(state): axum::extract::State<HttpState>) -> Response {
    db_health_response(state.executor.health_check().await)
}

/// Full application router: read API, cache admin and health.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state.clone())
        .merge(build_api_router(state))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
