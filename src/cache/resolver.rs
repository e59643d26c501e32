//! Cache-aside resolver.
//!
//! Serves a logical read from the KV store when a valid entry exists and
//! otherwise computes it with the query executor and populates the store.
//! The KV store is never a dependency of correctness: every KV failure is
//! logged as degradation and the read falls through to the executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::application::query::{QueryError, QueryExecutor};
use crate::domain::queries::QueryName;
use crate::domain::results::{DecodeError, ResultSet};

use super::config::CacheConfig;
use super::keys::{CacheKey, ResourceRequest};
use super::policy::{ConfigurationError, PolicyError, PolicyRegistry};
use super::stats::{CacheStats, CacheStatsSnapshot};
use super::store::{KvError, KvStore, bounded};

const METRIC_CACHE_HIT_TOTAL: &str = "transit_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "transit_cache_miss_total";
const METRIC_CACHE_DEGRADED_TOTAL: &str = "transit_cache_degraded_total";
const METRIC_CACHE_RESOLVE_MS: &str = "transit_cache_resolve_ms";

/// Where a resolved result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Hit,
    Miss,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Hit => "hit",
            Provenance::Miss => "miss",
        }
    }

    /// Value of the `x-cache` response header.
    pub fn header_value(self) -> &'static str {
        match self {
            Provenance::Hit => "HIT",
            Provenance::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub key: CacheKey,
    pub result: ResultSet,
    pub provenance: Provenance,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("invalid request for `{resource}`: {reason}")]
    InvalidRequest { resource: String, reason: String },
    #[error("{entity} `{identifier}` not found")]
    NotFound { entity: String, identifier: String },
    #[error("data for `{query}` is unavailable")]
    DataUnavailable {
        query: QueryName,
        #[source]
        source: QueryError,
    },
}

impl From<PolicyError> for ResolveError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Configuration(err) => Self::Configuration(err),
            PolicyError::InvalidRequest { resource, reason } => {
                Self::InvalidRequest { resource, reason }
            }
        }
    }
}

/// A cache operation that failed and was bypassed.
#[derive(Debug, Error)]
pub enum CacheDegradedError {
    #[error("kv {op} failed: {source}")]
    Kv {
        op: &'static str,
        #[source]
        source: KvError,
    },
    #[error("cached payload is unreadable: {0}")]
    Corrupt(#[source] DecodeError),
    #[error("result could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CacheDegradedError {
    fn op(&self) -> &'static str {
        match self {
            CacheDegradedError::Kv { op, .. } => *op,
            CacheDegradedError::Corrupt(_) => "decode",
            CacheDegradedError::Encode(_) => "encode",
        }
    }
}

/// Read-through cache in front of the query executor.
pub struct CacheResolver {
    config: CacheConfig,
    registry: Arc<PolicyRegistry>,
    kv: Arc<dyn KvStore>,
    executor: Arc<dyn QueryExecutor>,
    stats: CacheStats,
}

impl CacheResolver {
    pub fn new(
        config: CacheConfig,
        registry: Arc<PolicyRegistry>,
        kv: Arc<dyn KvStore>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            config,
            registry,
            kv,
            executor,
            stats: CacheStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolve `request`, from cache when possible.
    ///
    /// Dropping the returned future abandons any in-flight KV or executor
    /// call; nothing is written after the point of cancellation.
    #[instrument(skip_all, fields(resource = %request.resource))]
    pub async fn resolve(&self, request: &ResourceRequest) -> Result<Resolved, ResolveError> {
        let started_at = Instant::now();
        let (key, policy) = self.registry.key_for(request)?;
        let ttl = self.registry.ttl_duration(policy.entity)?;

        if self.config.enabled
            && let Some(result) = self.lookup(&key, policy.query).await
        {
            debug!(key = %key, "Cache hit");
            self.stats.record_hit();
            counter!(METRIC_CACHE_HIT_TOTAL, "resource" => policy.name).increment(1);
            histogram!(METRIC_CACHE_RESOLVE_MS, "provenance" => "hit")
                .record(started_at.elapsed().as_secs_f64() * 1000.0);
            return Ok(Resolved {
                key,
                result,
                provenance: Provenance::Hit,
            });
        }

        debug!(key = %key, "Cache miss");
        self.stats.record_miss();
        counter!(METRIC_CACHE_MISS_TOTAL, "resource" => policy.name).increment(1);

        let params = policy.query_params(request);
        let executed = tokio::time::timeout(
            self.config.executor_timeout,
            self.executor.execute(policy.query, &params),
        )
        .await
        .unwrap_or(Err(QueryError::Timeout));

        let not_found = || ResolveError::NotFound {
            entity: policy.entity.to_string(),
            identifier: request.identifier.clone().unwrap_or_default(),
        };
        let result = match executed {
            Ok(result) if result.query() != policy.query => {
                return Err(ResolveError::DataUnavailable {
                    query: policy.query,
                    source: QueryError::Persistence(format!(
                        "executor answered `{}` instead",
                        result.query()
                    )),
                });
            }
            Ok(result) if policy.required_row && result.rows().is_empty() => {
                debug!(key = %key, "Nothing to cache: instance not found");
                return Err(not_found());
            }
            Ok(result) => result,
            Err(QueryError::NotFound { .. }) => {
                debug!(key = %key, "Nothing to cache: instance not found");
                return Err(not_found());
            }
            Err(source) => {
                warn!(key = %key, error = %source, "Query executor failed");
                return Err(ResolveError::DataUnavailable {
                    query: policy.query,
                    source,
                });
            }
        };

        if self.config.enabled {
            self.populate(&key, &result, ttl).await;
        }

        histogram!(METRIC_CACHE_RESOLVE_MS, "provenance" => "miss")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(Resolved {
            key,
            result,
            provenance: Provenance::Miss,
        })
    }

    async fn lookup(&self, key: &CacheKey, query: QueryName) -> Option<ResultSet> {
        let payload = match bounded(self.config.kv_timeout, self.kv.get(key.as_str())).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(source) => {
                self.degraded(key, CacheDegradedError::Kv { op: "get", source });
                return None;
            }
        };

        match ResultSet::decode(query, &payload) {
            Ok(result) => Some(result),
            Err(err) => {
                self.degraded(key, CacheDegradedError::Corrupt(err));
                if let Err(source) =
                    bounded(self.config.kv_timeout, self.kv.delete(key.as_str())).await
                {
                    self.degraded(key, CacheDegradedError::Kv { op: "delete", source });
                }
                None
            }
        }
    }

    async fn populate(&self, key: &CacheKey, result: &ResultSet, ttl: Duration) {
        let payload = match result.encode() {
            Ok(payload) => payload,
            Err(err) => {
                self.degraded(key, CacheDegradedError::Encode(err));
                return;
            }
        };

        if let Err(source) = bounded(
            self.config.kv_timeout,
            self.kv.set(key.as_str(), payload, ttl),
        )
        .await
        {
            self.degraded(key, CacheDegradedError::Kv { op: "set", source });
        }
    }

    fn degraded(&self, key: &CacheKey, err: CacheDegradedError) {
        warn!(
            key = %key,
            op = err.op(),
            error = %err,
            "Cache degraded; serving from the query executor"
        );
        self.stats.record_degraded();
        counter!(METRIC_CACHE_DEGRADED_TOTAL, "op" => err.op()).increment(1);
    }
}
