use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};

use crate::cache::ResourceRequest;

use super::CACHE_HEADER;
use super::error::ApiError;
use super::models::{AlertsQuery, ResourceResponse, StationsQuery};
use crate::infra::http::HttpState;

/// Resolve `request` and render it with its provenance.
async fn respond(state: &HttpState, request: ResourceRequest) -> Result<Response, ApiError> {
    let resolved = state.resolver.resolve(&request).await?;
    let provenance = resolved.provenance;
    let body = ResourceResponse {
        data: resolved.result.to_json(),
        provenance,
    };

    let mut response = Json(body).into_response();
    response.headers_mut().insert(
        CACHE_HEADER,
        HeaderValue::from_static(provenance.header_value()),
    );
    Ok(response)
}

pub async fn trips_total(State(state): State<HttpState>) -> Result<Response, ApiError> {
    respond(&state, ResourceRequest::new("trips.total")).await
}

pub async fn trips_by_locality(State(state): State<HttpState>) -> Result<Response, ApiError> {
    respond(&state, ResourceRequest::new("trips.by_locality")).await
}

pub async fn card_trips(
    State(state): State<HttpState>,
    Path(card_id): Path<i64>,
) -> Result<Response, ApiError> {
    respond(
        &state,
        ResourceRequest::new("card.trips").with_identifier(card_id),
    )
    .await
}

pub async fn finance_revenue(State(state): State<HttpState>) -> Result<Response, ApiError> {
    respond(&state, ResourceRequest::new("finance.revenue")).await
}

pub async fn finance_revenue_by_locality(
    State(state): State<HttpState>,
) -> Result<Response, ApiError> {
    respond(&state, ResourceRequest::new("finance.revenue.by_locality")).await
}

pub async fn users_count(State(state): State<HttpState>) -> Result<Response, ApiError> {
    respond(&state, ResourceRequest::new("users.count")).await
}

pub async fn users_active_count(State(state): State<HttpState>) -> Result<Response, ApiError> {
    respond(&state, ResourceRequest::new("users.active.count")).await
}

pub async fn card_balance(
    State(state): State<HttpState>,
    Path(card_id): Path<i64>,
) -> Result<Response, ApiError> {
    respond(
        &state,
        ResourceRequest::new("card.balance").with_identifier(card_id),
    )
    .await
}

pub async fn card_history(
    State(state): State<HttpState>,
    Path(card_id): Path<i64>,
) -> Result<Response, ApiError> {
    respond(
        &state,
        ResourceRequest::new("card.history").with_identifier(card_id),
    )
    .await
}

pub async fn stations(
    State(state): State<HttpState>,
    Query(query): Query<StationsQuery>,
) -> Result<Response, ApiError> {
    let mut request = ResourceRequest::new("stations.list");
    let filters = [("locality", query.locality), ("status", query.status)];
    for (name, value) in filters {
        if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
            request = request.with_param(name, value);
        }
    }
    respond(&state, request).await
}

pub async fn station_arrivals(
    State(state): State<HttpState>,
    Path(station_id): Path<i64>,
) -> Result<Response, ApiError> {
    respond(
        &state,
        ResourceRequest::new("station.arrivals").with_identifier(station_id),
    )
    .await
}

/// Alerts of one station; `active_only` defaults to true and is always part
/// of the cache key.
pub async fn station_alerts(
    State(state): State<HttpState>,
    Path(station_id): Path<i64>,
    Query(query): Query<AlertsQuery>,
) -> Result<Response, ApiError> {
    let active_only = query.active_only.unwrap_or(true);
    respond(
        &state,
        ResourceRequest::new("station.alerts")
            .with_identifier(station_id)
            .with_param("active_only", active_only.to_string()),
    )
    .await
}

pub async fn route_details(
    State(state): State<HttpState>,
    Path(route_code): Path<String>,
) -> Result<Response, ApiError> {
    respond(
        &state,
        ResourceRequest::new("route.details").with_identifier(route_code),
    )
    .await
}

pub async fn route_codes(State(state): State<HttpState>) -> Result<Response, ApiError> {
    respond(&state, ResourceRequest::new("routes.codes")).await
}
