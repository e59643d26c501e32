//! Redis-backed [`KvStore`] over a multiplexed connection manager.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{AsyncCommands, RedisError, aio::ConnectionManager};
use tracing::{info, warn};

use crate::cache::{KvError, KvStore};

use super::error::InfraError;

const SOURCE: &str = "infra::redis";
const HEALTH_CHECK_KEY: &str = "health_check_test";

#[derive(Clone)]
pub struct RedisKvStore {
    connection: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self, InfraError> {
        let client = redis::Client::open(url)
            .map_err(|err| InfraError::key_value(format!("invalid redis url: {err}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| InfraError::key_value(format!("failed to connect to redis: {err}")))?;

        info!(target = SOURCE, "redis connection established");
        Ok(Self { connection })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn map_error(err: RedisError) -> KvError {
    if err.is_timeout() {
        KvError::Timeout
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        KvError::Unavailable(err.to_string())
    } else {
        KvError::Protocol(err.to_string())
    }
}

/// SCAN treats `*`, `?`, `[`, `]` and `\` as glob syntax.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('*');
    escaped
}

fn ttl_seconds(ttl: Duration) -> u64 {
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        let value: Option<Vec<u8>> = self.conn().get(key).await.map_err(map_error)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), KvError> {
        self.conn()
            .set_ex::<_, _, ()>(key, value.as_ref(), ttl_seconds(ttl))
            .await
            .map_err(map_error)
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let removed: i64 = self.conn().del(key).await.map_err(map_error)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.conn().exists(key).await.map_err(map_error)
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn();
        let mut iter = conn
            .scan_match::<_, String>(escape_glob(prefix))
            .await
            .map_err(map_error)?;

        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let seconds: i64 = self.conn().ttl(key).await.map_err(map_error)?;
        Ok(u64::try_from(seconds).ok().map(Duration::from_secs))
    }

    async fn health_check(&self) -> Result<(), KvError> {
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(HEALTH_CHECK_KEY, "ok", 10)
            .await
            .map_err(map_error)?;
        let echoed: Option<String> = conn.get(HEALTH_CHECK_KEY).await.map_err(map_error)?;
        conn.del::<_, ()>(HEALTH_CHECK_KEY)
            .await
            .map_err(map_error)?;

        if echoed.as_deref() == Some("ok") {
            Ok(())
        } else {
            warn!(target = SOURCE, "redis health check read back a different value");
            Err(KvError::Protocol("health check value mismatch".to_string()))
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
