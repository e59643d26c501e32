mod support;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;
use transit_pulse::application::query::QueryExecutor;
use transit_pulse::cache::KvStore;
use transit_pulse::domain::queries::QueryName;
use transit_pulse::infra::http::{HttpState, build_router};

use support::{
    FakeExecutor, Harness, UnreachableKv, card_balance, no_rows, resolver_over, route_details,
    station_alerts, stations, trips_total, users_count,
};

fn app(harness: &Harness) -> Router {
    let kv: Arc<dyn KvStore> = harness.kv.clone();
    let executor: Arc<dyn QueryExecutor> = harness.executor.clone();
    build_router(HttpState::new(harness.resolver.clone(), kv, executor))
}

fn default_harness() -> Harness {
    Harness::new(
        FakeExecutor::new()
            .with_result(trips_total(42))
            .with_result(users_count(7))
            .with_result(card_balance(12, 3_500.0))
            .with_result(stations(&["Chapinero"])),
    )
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Option<String>, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    let status = response.status();
    let cache = response
        .headers()
        .get("x-cache")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, cache, body)
}

#[tokio::test]
async fn reads_report_provenance_in_body_and_header() {
    let harness = default_harness();
    let app = app(&harness);

    let (status, cache, body) = send(&app, Method::GET, "/api/v1/trips/total").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("MISS"));
    assert_eq!(body["provenance"], "miss");
    assert_eq!(body["data"][0]["total_trips"], 42);

    let (status, cache, body) = send(&app, Method::GET, "/api/v1/trips/total").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("HIT"));
    assert_eq!(body["provenance"], "hit");
    assert_eq!(body["data"][0]["total_revenue"], 105.0);
    assert_eq!(harness.executor.calls(), 1);
}

#[tokio::test]
async fn card_routes_take_the_card_from_the_path() {
    let harness = default_harness();
    let app = app(&harness);

    let (status, _, body) = send(&app, Method::GET, "/api/v1/cards/12/balance").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["card_id"], 12);
    assert!(harness.kv.exists("card:12:balance").await.expect("answers"));

    let (status, _, _) = send(&app, Method::GET, "/api/v1/cards/twelve/balance").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn station_filters_shape_the_cache_key() {
    let harness = default_harness();
    let app = app(&harness);

    let (status, _, _) = send(
        &app,
        Method::GET,
        "/api/v1/stations?locality=Chapinero&status=",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(&app, Method::GET, "/api/v1/cache/keys?prefix=stations:").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["keys"][0]["key"], "stations:list:locality=Chapinero");
    assert_eq!(body["keys"][0]["ttl_seconds"], 60);
}

#[tokio::test]
async fn failing_executor_is_data_unavailable() {
    let harness = default_harness();
    harness.executor.set_failing(true);
    let app = app(&harness);

    let (status, cache, body) = send(&app, Method::GET, "/api/v1/users/count").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(cache.is_none());
    assert_eq!(body["error"]["code"], "data_unavailable");

    let (status, _, _) = send(&app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn admin_endpoints_inspect_and_purge_the_cache() {
    let harness = default_harness();
    let app = app(&harness);

    for uri in ["/api/v1/trips/total", "/api/v1/users/count", "/api/v1/trips/total"] {
        send(&app, Method::GET, uri).await;
    }

    let (status, _, stats) = send(&app, Method::GET, "/api/v1/cache/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["backend"], "memory");
    assert_eq!(stats["enabled"], true);
    assert_eq!(stats["hits"], 1);
    assert_eq!(stats["misses"], 2);
    assert_eq!(stats["total_requests"], 3);

    let (_, _, keys) = send(&app, Method::GET, "/api/v1/cache/keys").await;
    assert_eq!(keys["count"], 2);

    let (status, _, deleted) = send(&app, Method::DELETE, "/api/v1/cache/key/trips:total").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], true);
    let (_, _, again) = send(&app, Method::DELETE, "/api/v1/cache/key/trips:total").await;
    assert_eq!(again["deleted"], false);

    let (status, _, cleared) = send(&app, Method::POST, "/api/v1/cache/clear").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["deleted"], 1);
    assert!(harness.kv.is_empty());

    let (status, _, health) = send(&app, Method::GET, "/api/v1/cache/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    let (status, _, _) = send(&app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unreachable_store_degrades_reads_but_fails_admin_calls() {
    let executor = Arc::new(FakeExecutor::new().with_result(trips_total(5)));
    let kv: Arc<dyn KvStore> = Arc::new(UnreachableKv::default());
    let resolver = Arc::new(resolver_over(kv.clone(), executor.clone()));
    let app = build_router(HttpState::new(resolver, kv, executor));

    let (status, cache, body) = send(&app, Method::GET, "/api/v1/trips/total").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("MISS"));
    assert_eq!(body["data"][0]["total_trips"], 5);

    let (status, _, health) = send(&app, Method::GET, "/api/v1/cache/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["backend"], "unreachable");

    let (status, _, body) = send(&app, Method::GET, "/api/v1/cache/keys").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "cache_unavailable");
}

#[tokio::test]
async fn missing_card_is_a_404_and_leaves_the_cache_alone() {
    let harness = Harness::new(FakeExecutor::new().with_result(no_rows(QueryName::CardBalance)));
    let app = app(&harness);

    let (status, cache, body) = send(&app, Method::GET, "/api/v1/cards/999/balance").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(cache.is_none());
    assert_eq!(body["error"]["code"], "not_found");
    assert!(harness.kv.is_empty());
}

#[tokio::test]
async fn station_alerts_default_to_active_only() {
    let harness = Harness::new(
        FakeExecutor::new().with_result(station_alerts(4, &["Elevator out of service"])),
    );
    let app = app(&harness);

    let (status, cache, body) = send(&app, Method::GET, "/api/v1/stations/4/alerts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("MISS"));
    assert_eq!(body["data"][0]["message"], "Elevator out of service");
    assert!(
        harness
            .kv
            .exists("station:4:alerts:active_only=true")
            .await
            .expect("answers")
    );

    let (status, cache, _) =
        send(&app, Method::GET, "/api/v1/stations/4/alerts?active_only=false").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("MISS"));
    assert!(
        harness
            .kv
            .exists("station:4:alerts:active_only=false")
            .await
            .expect("answers")
    );
    assert_eq!(harness.executor.calls(), 2);
}

#[tokio::test]
async fn route_details_list_the_stops_in_order() {
    let harness = Harness::new(
        FakeExecutor::new().with_result(route_details("B74", &["Usme", "Molinos"])),
    );
    let app = app(&harness);

    let (status, _, body) = send(&app, Method::GET, "/api/v1/routes/B74/details").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["route_code"], "B74");
    assert_eq!(body["data"][0]["station_name"], "Usme");
    assert_eq!(body["data"][1]["sequence"], 2);

    let (_, cache, _) = send(&app, Method::GET, "/api/v1/routes/B74/details").await;
    assert_eq!(cache.as_deref(), Some("HIT"));
}

#[tokio::test]
async fn arrivals_for_an_unknown_station_are_a_404() {
    let harness = Harness::new(FakeExecutor::new().with_missing(QueryName::StationArrivals));
    let app = app(&harness);

    let (status, _, body) = send(&app, Method::GET, "/api/v1/stations/404/arrivals").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert!(harness.kv.is_empty());
}
