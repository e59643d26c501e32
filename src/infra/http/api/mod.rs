pub mod error;
pub mod handlers;
pub mod models;

use axum::{Router, routing::get};

use crate::infra::http::HttpState;

use super::admin;

/// Response header carrying `HIT` or `MISS`.
pub const CACHE_HEADER: &str = "x-cache";

pub fn build_api_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/v1/trips/total", get(handlers::trips_total))
        .route(
            "/api/v1/trips/total/localities",
            get(handlers::trips_by_locality),
        )
        .route("/api/v1/trips/card/{card_id}", get(handlers::card_trips))
        .route("/api/v1/finance/revenue", get(handlers::finance_revenue))
        .route(
            "/api/v1/finance/revenue/localities",
            get(handlers::finance_revenue_by_locality),
        )
        .route("/api/v1/users/count", get(handlers::users_count))
        .route(
            "/api/v1/users/active/count",
            get(handlers::users_active_count),
        )
        .route(
            "/api/v1/cards/{card_id}/balance",
            get(handlers::card_balance),
        )
        .route(
            "/api/v1/cards/{card_id}/history",
            get(handlers::card_history),
        )
        .route("/api/v1/stations", get(handlers::stations))
        .route(
            "/api/v1/stations/{station_id}/arrivals",
            get(handlers::station_arrivals),
        )
        .route(
            "/api/v1/stations/{station_id}/alerts",
            get(handlers::station_alerts),
        )
        .route("/api/v1/routes/codes", get(handlers::route_codes))
        .route(
            "/api/v1/routes/{route_code}/details",
            get(handlers::route_details),
        )
        .merge(admin::cache_routes())
        .with_state(state)
}
