//! Invalidation coordinator.
//!
//! Purges the keys a committed write made stale. Failures never reach the
//! writer: they are logged and counted, and the TTL bounds the staleness.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::events::MutationEvent;
use super::planner::InvalidationPlan;
use super::policy::PolicyRegistry;
use super::store::{KvStore, bounded};

const METRIC_CACHE_INVALIDATE_MS: &str = "transit_cache_invalidate_ms";
const METRIC_CACHE_INVALIDATED_KEYS_TOTAL: &str = "transit_cache_invalidated_keys_total";
const METRIC_CACHE_DEGRADED_TOTAL: &str = "transit_cache_degraded_total";

/// Outcome of one invalidation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub event_id: Uuid,
    /// Keys that held a live entry and were removed.
    pub deleted: Vec<String>,
    /// Keys that were already absent.
    pub absent: usize,
    /// Keys or prefixes whose delete or enumeration failed.
    pub failures: Vec<String>,
    /// Nothing was attempted: caching is disabled or the entity is unknown.
    pub skipped: bool,
}

impl InvalidationReport {
    fn skipped(event_id: Uuid) -> Self {
        Self {
            event_id,
            skipped: true,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.skipped
    }
}

/// Maps committed mutations to cache purges.
pub struct InvalidationCoordinator {
    config: CacheConfig,
    registry: Arc<PolicyRegistry>,
    kv: Arc<dyn KvStore>,
}

impl InvalidationCoordinator {
    pub fn new(config: CacheConfig, registry: Arc<PolicyRegistry>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            registry,
            kv,
        }
    }

    /// Delete every key `event` made stale. Never fails; see the report.
    #[instrument(skip_all, fields(event_id = %event.id, entity = %event.entity))]
    pub async fn invalidate(&self, event: &MutationEvent) -> InvalidationReport {
        if !self.config.enabled {
            debug!("Cache invalidation skipped: cache disabled");
            return InvalidationReport::skipped(event.id);
        }

        let plan = match InvalidationPlan::from_event(&self.registry, event) {
            Ok(plan) => plan,
            Err(err) => {
                error!(error = %err, "Cache invalidation skipped: no policy for entity");
                return InvalidationReport::skipped(event.id);
            }
        };

        let started_at = Instant::now();
        let mut report = InvalidationReport {
            event_id: event.id,
            ..Default::default()
        };

        let mut targets: Vec<String> = plan
            .exact
            .iter()
            .map(|key| key.as_str().to_string())
            .collect();

        for prefix in &plan.prefixes {
            match bounded(self.config.kv_timeout, self.kv.keys_by_prefix(prefix)).await {
                Ok(keys) => targets.extend(keys),
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "Cache prefix enumeration failed");
                    counter!(METRIC_CACHE_DEGRADED_TOTAL, "op" => "keys_by_prefix").increment(1);
                    report.failures.push(prefix.clone());
                }
            }
        }

        targets.sort();
        targets.dedup();

        for key in targets {
            match bounded(self.config.kv_timeout, self.kv.delete(&key)).await {
                Ok(true) => report.deleted.push(key),
                Ok(false) => report.absent += 1,
                Err(err) => {
                    warn!(key = %key, error = %err, "Cache delete failed");
                    counter!(METRIC_CACHE_DEGRADED_TOTAL, "op" => "delete").increment(1);
                    report.failures.push(key);
                }
            }
        }

        counter!(METRIC_CACHE_INVALIDATED_KEYS_TOTAL).increment(report.deleted.len() as u64);
        histogram!(METRIC_CACHE_INVALIDATE_MS)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        info!(
            plan = %plan,
            deleted = report.deleted.len(),
            absent = report.absent,
            failures = report.failures.len(),
            "Cache invalidation complete"
        );

        report
    }

    /// Await `commit` and invalidate for `event` only if it succeeded.
    ///
    /// A failed commit changed nothing, so nothing is purged and the error is
    /// returned untouched.
    pub async fn after_commit<T, E, F>(
        &self,
        commit: F,
        event: MutationEvent,
    ) -> Result<(T, InvalidationReport), E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let value = commit.await?;
        let report = self.invalidate(&event).await;
        Ok((value, report))
    }

    pub async fn trip_started(&self, card_id: i64, locality: &str) -> InvalidationReport {
        self.invalidate(&MutationEvent::trip_started(card_id, locality))
            .await
    }

    pub async fn trip_ended(&self, card_id: i64) -> InvalidationReport {
        self.invalidate(&MutationEvent::trip_ended(card_id)).await
    }

    pub async fn card_recharged(&self, card_id: i64) -> InvalidationReport {
        self.invalidate(&MutationEvent::card_recharged(card_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::cache::store::MemoryKvStore;

    fn coordinator(config: CacheConfig) -> (InvalidationCoordinator, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::default());
        let registry = Arc::new(PolicyRegistry::builtin().expect("builtin registry"));
        (
            InvalidationCoordinator::new(config, registry, kv.clone()),
            kv,
        )
    }

    async fn seed(kv: &MemoryKvStore, keys: &[&str]) {
        for key in keys {
            kv.set(key, Bytes::from_static(b"[]"), Duration::from_secs(60))
                .await
                .expect("seed");
        }
    }

    #[tokio::test]
    async fn recharge_purges_card_keys_only() {
        let (coordinator, kv) = coordinator(CacheConfig::default());
        seed(&kv, &["card:5:balance", "card:5:history", "card:6:balance", "trips:total"]).await;

        let report = coordinator.card_recharged(5).await;

        assert_eq!(report.deleted, ["card:5:balance", "card:5:history"]);
        assert_eq!(report.absent, 1);
        assert!(report.is_clean());
        assert!(kv.exists("card:6:balance").await.expect("exists"));
        assert!(kv.exists("trips:total").await.expect("exists"));
    }

    #[tokio::test]
    async fn prefix_rules_enumerate_keys() {
        let (coordinator, kv) = coordinator(CacheConfig::default());
        seed(
            &kv,
            &[
                "stations:list",
                "stations:list:locality=Usme",
                "stations:list:status=active",
                "routes:codes",
            ],
        )
        .await;

        let report = coordinator.invalidate(&MutationEvent::new("stations")).await;

        assert_eq!(report.deleted.len(), 3);
        assert!(kv.exists("routes:codes").await.expect("exists"));
    }

    #[tokio::test]
    async fn invalidating_absent_keys_is_a_no_op() {
        let (coordinator, _kv) = coordinator(CacheConfig::default());

        let first = coordinator.trip_ended(3).await;
        let second = coordinator.trip_ended(3).await;

        assert!(first.deleted.is_empty());
        assert!(first.is_clean());
        assert_eq!(first.absent, second.absent);
    }

    #[tokio::test]
    async fn disabled_cache_skips() {
        let (coordinator, kv) = coordinator(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        seed(&kv, &["users:count"]).await;

        let report = coordinator.invalidate(&MutationEvent::new("users")).await;

        assert!(report.skipped);
        assert!(kv.exists("users:count").await.expect("exists"));
    }

    #[tokio::test]
    async fn unknown_entity_is_skipped() {
        let (coordinator, _kv) = coordinator(CacheConfig::default());
        let report = coordinator.invalidate(&MutationEvent::new("parking")).await;
        assert!(report.skipped);
    }

    #[tokio::test]
    async fn failed_commit_does_not_invalidate() {
        let (coordinator, kv) = coordinator(CacheConfig::default());
        seed(&kv, &["card:8:balance"]).await;

        let result: Result<((), InvalidationReport), &str> = coordinator
            .after_commit(async { Err("rolled back") }, MutationEvent::card_recharged(8))
            .await;

        assert_eq!(result.unwrap_err(), "rolled back");
        assert!(kv.exists("card:8:balance").await.expect("exists"));
    }

    #[tokio::test]
    async fn successful_commit_invalidates_after_commit() {
        let (coordinator, kv) = coordinator(CacheConfig::default());
        seed(&kv, &["card:8:balance"]).await;

        let kv_observer = kv.clone();
        let (seen_during_commit, report) = coordinator
            .after_commit(
                async move {
                    Ok::<_, std::convert::Infallible>(
                        kv_observer.exists("card:8:balance").await.expect("exists"),
                    )
                },
                MutationEvent::card_recharged(8),
            )
            .await
            .expect("commit");

        assert!(seen_during_commit);
        assert_eq!(report.deleted, ["card:8:balance"]);
        assert!(!kv.exists("card:8:balance").await.expect("exists"));
    }
}
