use serde::{Deserialize, Serialize};

use crate::cache::{CacheStatsSnapshot, Provenance};

/// Body of every read endpoint.
#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub data: serde_json::Value,
    pub provenance: Provenance,
}

#[derive(Debug, Default, Deserialize)]
pub struct StationsQuery {
    pub locality: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub active_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct KeysQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub backend: &'static str,
    pub enabled: bool,
    #[serde(flatten)]
    pub stats: CacheStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct CacheKeyEntry {
    pub key: String,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CacheKeysResponse {
    pub count: usize,
    pub keys: Vec<CacheKeyEntry>,
}

#[derive(Debug, Serialize)]
pub struct CacheDeleteResponse {
    pub key: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize)]
pub struct CacheHealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
