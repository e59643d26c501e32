use std::collections::BTreeSet;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::application::error::ErrorReport;
use crate::cache::{bounded, entity_prefix};
use crate::infra::http::HttpState;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{
    CacheClearResponse, CacheDeleteResponse, CacheHealthResponse, CacheKeyEntry,
    CacheKeysResponse, CacheStatsResponse, KeysQuery,
};

const SOURCE: &str = "infra::http::admin::cache";

pub(super) async fn stats(State(state): State<HttpState>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        backend: state.kv.backend(),
        enabled: state.resolver.config().enabled,
        stats: state.resolver.stats(),
    })
}

/// Every cached key under the registry's entity namespaces.
async fn managed_keys(state: &HttpState, prefix: Option<&str>) -> Result<Vec<String>, ApiError> {
    let limit = state.resolver.config().kv_timeout;
    let prefixes: Vec<String> = match prefix {
        Some(prefix) => vec![prefix.to_string()],
        None => state
            .resolver
            .registry()
            .entities()
            .map(entity_prefix)
            .collect(),
    };

    let mut keys = BTreeSet::new();
    for prefix in &prefixes {
        keys.extend(bounded(limit, state.kv.keys_by_prefix(prefix)).await?);
    }
    Ok(keys.into_iter().collect())
}

pub(super) async fn list_keys(
    State(state): State<HttpState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<CacheKeysResponse>, ApiError> {
    let prefix = query.prefix.as_deref().filter(|prefix| !prefix.is_empty());
    let limit = state.resolver.config().kv_timeout;

    let mut entries = Vec::new();
    for key in managed_keys(&state, prefix).await? {
        let ttl = bounded(limit, state.kv.ttl(&key)).await?;
        entries.push(CacheKeyEntry {
            key,
            ttl_seconds: ttl.map(|ttl| ttl.as_secs()),
        });
    }

    Ok(Json(CacheKeysResponse {
        count: entries.len(),
        keys: entries,
    }))
}

pub(super) async fn delete_key(
    State(state): State<HttpState>,
    Path(key): Path<String>,
) -> Result<Json<CacheDeleteResponse>, ApiError> {
    let limit = state.resolver.config().kv_timeout;
    let deleted = bounded(limit, state.kv.delete(&key)).await?;
    info!(target = SOURCE, key = %key, deleted, "cache key deleted by operator");
    Ok(Json(CacheDeleteResponse { key, deleted }))
}

pub(super) async fn clear(
    State(state): State<HttpState>,
) -> Result<Json<CacheClearResponse>, ApiError> {
    let limit = state.resolver.config().kv_timeout;
    let mut deleted = 0;
    for key in managed_keys(&state, None).await? {
        if bounded(limit, state.kv.delete(&key)).await? {
            deleted += 1;
        }
    }
    info!(target = SOURCE, deleted, "cache cleared by operator");
    Ok(Json(CacheClearResponse { deleted }))
}

pub(super) async fn health(State(state): State<HttpState>) -> Response {
    let backend = state.kv.backend();
    let limit = state.resolver.config().kv_timeout;
    match bounded(limit, state.kv.health_check()).await {
        Ok(()) => Json(CacheHealthResponse {
            status: "healthy",
            backend,
            error: None,
        })
        .into_response(),
        Err(err) => {
            warn!(target = SOURCE, backend, error = %err, "cache health check failed");
            let mut response = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(CacheHealthResponse {
                    status: "unhealthy",
                    backend,
                    error: Some(err.to_string()),
                }),
            )
                .into_response();
            ErrorReport::from_error(SOURCE, StatusCode::SERVICE_UNAVAILABLE, &err)
                .attach(&mut response);
            response
        }
    }
}
