#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use transit_pulse::application::query::{QueryError, QueryExecutor, QueryParams};
use transit_pulse::cache::{
    CacheConfig, CacheResolver, InvalidationCoordinator, KvError, KvStore, MemoryKvStore,
    PolicyRegistry,
};
use transit_pulse::domain::queries::QueryName;
use transit_pulse::domain::results::{FieldValue, ResultSet, Row};

/// Query executor double serving canned result sets and recording calls.
#[derive(Default)]
pub struct FakeExecutor {
    results: Mutex<HashMap<QueryName, ResultSet>>,
    calls: Mutex<Vec<(QueryName, QueryParams)>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    missing: Mutex<HashSet<QueryName>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, result: ResultSet) -> Self {
        self.set_result(result);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().expect("delay lock") = Some(delay);
        self
    }

    /// Answer `query` as if its station did not exist.
    pub fn with_missing(self, query: QueryName) -> Self {
        self.missing.lock().expect("missing lock").insert(query);
        self
    }

    /// Replace the authoritative answer for the result's query.
    pub fn set_result(&self, result: ResultSet) {
        self.results
            .lock()
            .expect("results lock")
            .insert(result.query(), result);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn calls_for(&self, query: QueryName) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(name, _)| *name == query)
            .count()
    }

    pub fn last_params(&self) -> Option<QueryParams> {
        self.calls
            .lock()
            .expect("calls lock")
            .last()
            .map(|(_, params)| params.clone())
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute(
        &self,
        query: QueryName,
        params: &QueryParams,
    ) -> Result<ResultSet, QueryError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((query, params.clone()));

        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(QueryError::Persistence("connection refused".to_string()));
        }

        if self.missing.lock().expect("missing lock").contains(&query) {
            return Err(QueryError::NotFound { subject: "station" });
        }

        self.results
            .lock()
            .expect("results lock")
            .get(&query)
            .cloned()
            .ok_or_else(|| QueryError::Persistence(format!("no fixture for `{query}`")))
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(QueryError::Persistence("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

/// KV store whose every call fails as if the server were down.
#[derive(Default)]
pub struct UnreachableKv {
    pub attempts: AtomicUsize,
}

impl UnreachableKv {
    fn refuse<T>(&self) -> Result<T, KvError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(KvError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl KvStore for UnreachableKv {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, KvError> {
        self.refuse()
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), KvError> {
        self.refuse()
    }

    async fn delete(&self, _key: &str) -> Result<bool, KvError> {
        self.refuse()
    }

    async fn exists(&self, _key: &str) -> Result<bool, KvError> {
        self.refuse()
    }

    async fn keys_by_prefix(&self, _prefix: &str) -> Result<Vec<String>, KvError> {
        self.refuse()
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, KvError> {
        self.refuse()
    }

    async fn health_check(&self) -> Result<(), KvError> {
        self.refuse()
    }

    fn backend(&self) -> &'static str {
        "unreachable"
    }
}

/// KV store that answers each call only after `stall`.
pub struct StallingKv {
    pub stall: Duration,
}

impl StallingKv {
    async fn wait(&self) {
        tokio::time::sleep(self.stall).await;
    }
}

#[async_trait]
impl KvStore for StallingKv {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, KvError> {
        self.wait().await;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), KvError> {
        self.wait().await;
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, KvError> {
        self.wait().await;
        Ok(false)
    }

    async fn exists(&self, _key: &str) -> Result<bool, KvError> {
        self.wait().await;
        Ok(false)
    }

    async fn keys_by_prefix(&self, _prefix: &str) -> Result<Vec<String>, KvError> {
        self.wait().await;
        Ok(Vec::new())
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, KvError> {
        self.wait().await;
        Ok(None)
    }

    async fn health_check(&self) -> Result<(), KvError> {
        self.wait().await;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "stalling"
    }
}

pub fn registry() -> Arc<PolicyRegistry> {
    Arc::new(PolicyRegistry::builtin().expect("built-in policy is valid"))
}

/// Resolver and coordinator sharing one in-process store.
pub struct Harness {
    pub kv: Arc<MemoryKvStore>,
    pub executor: Arc<FakeExecutor>,
    pub resolver: Arc<CacheResolver>,
    pub coordinator: InvalidationCoordinator,
}

impl Harness {
    pub fn new(executor: FakeExecutor) -> Self {
        Self::with_config(CacheConfig::default(), executor)
    }

    pub fn with_config(config: CacheConfig, executor: FakeExecutor) -> Self {
        let kv = Arc::new(MemoryKvStore::new(&config));
        let executor = Arc::new(executor);
        let registry = registry();
        let shared_kv: Arc<dyn KvStore> = kv.clone();
        let shared_executor: Arc<dyn QueryExecutor> = executor.clone();

        let resolver = Arc::new(CacheResolver::new(
            config.clone(),
            registry.clone(),
            shared_kv.clone(),
            shared_executor,
        ));
        let coordinator = InvalidationCoordinator::new(config, registry, shared_kv);

        Self {
            kv,
            executor,
            resolver,
            coordinator,
        }
    }
}

/// Resolver over an arbitrary KV store.
pub fn resolver_over(kv: Arc<dyn KvStore>, executor: Arc<FakeExecutor>) -> CacheResolver {
    let shared_executor: Arc<dyn QueryExecutor> = executor;
    CacheResolver::new(CacheConfig::default(), registry(), kv, shared_executor)
}

pub fn trips_total(count: i64) -> ResultSet {
    let row = Row::new()
        .with("total_trips", count)
        .with("completed_trips", count)
        .with("active_trips", 0_i64)
        .with("total_revenue", 2.5 * count as f64);
    ResultSet::new(QueryName::TripsTotal, vec![row]).expect("valid trips.total rows")
}

pub fn revenue_by_locality(localities: &[(&str, f64)]) -> ResultSet {
    let rows = localities
        .iter()
        .map(|(locality, revenue)| {
            Row::new()
                .with("locality", *locality)
                .with("total_revenue", *revenue)
                .with("currency", "COP")
        })
        .collect();
    ResultSet::new(QueryName::FinanceRevenueByLocality, rows).expect("valid revenue rows")
}

pub fn users_count(total: i64) -> ResultSet {
    ResultSet::new(
        QueryName::UsersCount,
        vec![Row::new().with("total_users", total)],
    )
    .expect("valid users rows")
}

pub fn card_balance(card_id: i64, balance: f64) -> ResultSet {
    let row = Row::new()
        .with("card_id", card_id)
        .with("balance", balance)
        .with("status", "active")
        .with("last_recharge", Option::<String>::None);
    ResultSet::new(QueryName::CardBalance, vec![row]).expect("valid balance rows")
}

pub fn stations(localities: &[&str]) -> ResultSet {
    let rows = localities
        .iter()
        .enumerate()
        .map(|(index, locality)| {
            Row::new()
                .with("station_id", index as i64 + 1)
                .with("name", format!("Estación {}", index + 1))
                .with("locality", *locality)
                .with("status", "active")
                .with("capacity", 120_i64)
                .with("current_occupancy", 40_i64)
        })
        .collect();
    ResultSet::new(QueryName::StationsList, rows).expect("valid station rows")
}

pub fn no_rows(query: QueryName) -> ResultSet {
    ResultSet::new(query, Vec::new()).expect("empty results are valid")
}

pub fn route_details(route_code: &str, stops: &[&str]) -> ResultSet {
    let rows = stops
        .iter()
        .enumerate()
        .map(|(index, stop)| {
            Row::new()
                .with("route_code", route_code)
                .with("route_name", "Portal Usme - Portal Norte")
                .with("route_type", "trunk")
                .with("sequence", index as i64 + 1)
                .with("station_code", format!("S{:02}", index + 1))
                .with("station_name", *stop)
                .with("station_type", "station")
        })
        .collect();
    ResultSet::new(QueryName::RouteDetails, rows).expect("valid route rows")
}

pub fn station_alerts(station_id: i64, messages: &[&str]) -> ResultSet {
    let start = time::macros::datetime!(2024-03-01 06:00 UTC);
    let rows = messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            Row::new()
                .with("alert_id", index as i64 + 1)
                .with("station_id", station_id)
                .with("type", "maintenance")
                .with("message", *message)
                .with("severity", "low")
                .with("start_time", FieldValue::Timestamp(start))
                .with("end_time", FieldValue::Null)
        })
        .collect();
    ResultSet::new(QueryName::StationAlerts, rows).expect("valid alert rows")
}
