mod support;

use std::sync::Arc;
use std::time::Duration;

use transit_pulse::cache::{
    CacheConfig, InvalidationCoordinator, KvStore, MutationEvent, Provenance, ResourceRequest,
};
use transit_pulse::domain::queries::QueryName;

use support::{
    FakeExecutor, Harness, UnreachableKv, card_balance, no_rows, registry, revenue_by_locality,
    route_details, station_alerts, stations, trips_total, users_count,
};

fn populated_harness() -> Harness {
    Harness::new(
        FakeExecutor::new()
            .with_result(trips_total(42))
            .with_result(revenue_by_locality(&[("Chapinero", 100.0), ("Usme", 40.0)]))
            .with_result(users_count(1_000))
            .with_result(card_balance(7, 20_000.0)),
    )
}

async fn warm(harness: &Harness, requests: &[ResourceRequest]) {
    for request in requests {
        harness.resolver.resolve(request).await.expect("resolves");
    }
}

#[tokio::test]
async fn trip_in_chapinero_refreshes_trip_and_revenue_aggregates() {
    let harness = populated_harness();
    let trips = ResourceRequest::new("trips.total");
    let revenue = ResourceRequest::new("finance.revenue.by_locality");
    let users = ResourceRequest::new("users.count");
    let other_card = ResourceRequest::new("card.balance").with_identifier(7);
    warm(
        &harness,
        &[
            trips.clone(),
            revenue.clone(),
            users.clone(),
            other_card.clone(),
        ],
    )
    .await;

    harness.executor.set_result(trips_total(43));
    harness
        .executor
        .set_result(revenue_by_locality(&[("Chapinero", 102.5), ("Usme", 40.0)]));

    let report = harness.coordinator.trip_started(17, "Chapinero").await;
    assert!(report.is_clean());
    assert!(report.deleted.contains(&"trips:total".to_string()));
    assert!(
        report
            .deleted
            .contains(&"finance:revenue:by_localities".to_string())
    );
    assert!(harness.kv.exists("users:count").await.expect("answers"));
    assert!(harness.kv.exists("card:7:balance").await.expect("answers"));

    let fresh_trips = harness.resolver.resolve(&trips).await.expect("resolves");
    assert_eq!(fresh_trips.provenance, Provenance::Miss);
    assert_eq!(fresh_trips.result, trips_total(43));

    let fresh_revenue = harness.resolver.resolve(&revenue).await.expect("resolves");
    assert_eq!(fresh_revenue.provenance, Provenance::Miss);
    assert_eq!(
        fresh_revenue.result,
        revenue_by_locality(&[("Chapinero", 102.5), ("Usme", 40.0)])
    );

    let untouched = harness.resolver.resolve(&users).await.expect("resolves");
    assert_eq!(untouched.provenance, Provenance::Hit);
}

#[tokio::test]
async fn trip_end_purges_the_riders_balance() {
    let harness = Harness::new(
        FakeExecutor::new()
            .with_result(card_balance(17, 5_000.0))
            .with_result(trips_total(2)),
    );
    let balance = ResourceRequest::new("card.balance").with_identifier(17);
    warm(&harness, &[balance.clone(), ResourceRequest::new("trips.total")]).await;

    harness.executor.set_result(card_balance(17, 2_500.0));
    let report = harness.coordinator.trip_ended(17).await;
    assert!(report.deleted.contains(&"card:17:balance".to_string()));

    let fresh = harness.resolver.resolve(&balance).await.expect("resolves");
    assert_eq!(fresh.provenance, Provenance::Miss);
    assert_eq!(fresh.result, card_balance(17, 2_500.0));
}

#[tokio::test]
async fn invalidate_then_resolve_is_a_miss() {
    let harness = populated_harness();
    let balance = ResourceRequest::new("card.balance").with_identifier(7);
    warm(&harness, &[balance.clone()]).await;

    harness.coordinator.card_recharged(7).await;

    let resolved = harness.resolver.resolve(&balance).await.expect("resolves");
    assert_eq!(resolved.provenance, Provenance::Miss);
    assert_eq!(harness.executor.calls(), 2);
}

#[tokio::test]
async fn invalidating_a_cold_cache_is_a_no_op() {
    let harness = populated_harness();

    let first = harness.coordinator.card_recharged(99).await;
    let second = harness.coordinator.card_recharged(99).await;

    for report in [first, second] {
        assert!(report.is_clean());
        assert!(report.deleted.is_empty());
        assert_eq!(report.absent, 3);
    }
}

#[tokio::test]
async fn station_change_purges_every_filtered_listing() {
    let harness = Harness::new(FakeExecutor::new().with_result(stations(&["Suba"])));
    let listings = [
        ResourceRequest::new("stations.list"),
        ResourceRequest::new("stations.list").with_param("locality", "Suba"),
        ResourceRequest::new("stations.list")
            .with_param("locality", "Suba")
            .with_param("status", "active"),
    ];
    warm(&harness, &listings).await;
    assert_eq!(harness.kv.len(), 3);

    let report = harness
        .coordinator
        .invalidate(&MutationEvent::new("stations").with_identifier(4))
        .await;

    assert_eq!(report.deleted.len(), 3);
    assert!(harness.kv.is_empty());
}

#[tokio::test]
async fn failed_commit_leaves_the_cache_alone() {
    let harness = populated_harness();
    warm(&harness, &[ResourceRequest::new("trips.total")]).await;

    let outcome: Result<((), _), &str> = harness
        .coordinator
        .after_commit(async { Err("unique violation") }, MutationEvent::trip_ended(7))
        .await;

    assert_eq!(outcome.unwrap_err(), "unique violation");
    assert!(harness.kv.exists("trips:total").await.expect("answers"));
}

#[tokio::test]
async fn commit_completes_before_invalidation_starts() {
    let harness = populated_harness();
    warm(&harness, &[ResourceRequest::new("trips.total")]).await;
    let kv = harness.kv.clone();

    let commit = async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let still_cached = kv.exists("trips:total").await.expect("answers");
        Ok::<_, std::convert::Infallible>(still_cached)
    };

    let (still_cached_during_commit, report) = harness
        .coordinator
        .after_commit(commit, MutationEvent::trip_ended(7))
        .await
        .expect("commit succeeds");

    assert!(still_cached_during_commit);
    assert!(report.deleted.contains(&"trips:total".to_string()));
    assert!(!harness.kv.exists("trips:total").await.expect("answers"));
}

#[tokio::test]
async fn unreachable_store_reports_failures_without_erroring() {
    let kv = Arc::new(UnreachableKv::default());
    let coordinator = InvalidationCoordinator::new(CacheConfig::default(), registry(), kv);

    let report = coordinator.trip_started(17, "Usme").await;

    assert!(!report.is_clean());
    assert!(report.deleted.is_empty());
    assert!(report.failures.contains(&"trips:total".to_string()));
}

#[tokio::test]
async fn station_change_purges_that_stations_arrivals_and_alerts() {
    let harness = Harness::new(
        FakeExecutor::new()
            .with_result(station_alerts(4, &["Platform closed"]))
            .with_result(no_rows(QueryName::StationArrivals)),
    );
    warm(
        &harness,
        &[
            ResourceRequest::new("station.arrivals").with_identifier(4),
            ResourceRequest::new("station.alerts")
                .with_identifier(4)
                .with_param("active_only", "true"),
            ResourceRequest::new("station.alerts")
                .with_identifier(9)
                .with_param("active_only", "true"),
        ],
    )
    .await;
    assert_eq!(harness.kv.len(), 3);

    let report = harness
        .coordinator
        .invalidate(&MutationEvent::new("stations").with_identifier(4))
        .await;

    assert!(report.is_clean());
    assert!(report.deleted.contains(&"station:4:arrivals".to_string()));
    assert!(
        report
            .deleted
            .contains(&"station:4:alerts:active_only=true".to_string())
    );
    assert!(
        harness
            .kv
            .exists("station:9:alerts:active_only=true")
            .await
            .expect("answers")
    );
    assert_eq!(harness.kv.len(), 1);
}

#[tokio::test]
async fn route_change_purges_its_details() {
    let harness = Harness::new(
        FakeExecutor::new().with_result(route_details("B74", &["Usme", "Molinos"])),
    );
    warm(
        &harness,
        &[
            ResourceRequest::new("route.details").with_identifier("B74"),
            ResourceRequest::new("route.details").with_identifier("G12"),
        ],
    )
    .await;

    let report = harness
        .coordinator
        .invalidate(&MutationEvent::new("route").with_identifier("B74"))
        .await;

    assert_eq!(report.deleted, vec!["route:B74:details".to_string()]);
    assert!(harness.kv.exists("route:G12:details").await.expect("answers"));
}
