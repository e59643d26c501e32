//! Query executor port: the authoritative source behind the cache.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::queries::QueryName;
use crate::domain::results::{ResultSet, SchemaError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("database timeout")]
    Timeout,
    #[error("invalid parameters for `{query}`: {message}")]
    InvalidParams { query: QueryName, message: String },
    #[error("{subject} not found")]
    NotFound { subject: &'static str },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl QueryError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_params(query: QueryName, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            query,
            message: message.into(),
        }
    }
}

/// Named query parameters. Sorted by name so iteration order is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn require(&self, query: QueryName, name: &str) -> Result<&str, QueryError> {
        self.get(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| QueryError::invalid_params(query, format!("`{name}` is required")))
    }

    /// Parse an optional `true`/`false` parameter.
    pub fn flag(&self, query: QueryName, name: &str, default: bool) -> Result<bool, QueryError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                QueryError::invalid_params(
                    query,
                    format!("`{name}` must be `true` or `false`, got `{raw}`"),
                )
            }),
        }
    }

    /// Parse a required integer parameter.
    pub fn require_i64(&self, query: QueryName, name: &str) -> Result<i64, QueryError> {
        let raw = self
            .get(name)
            .ok_or_else(|| QueryError::invalid_params(query, format!("`{name}` is required")))?;
        raw.parse().map_err(|_| {
            QueryError::invalid_params(query, format!("`{name}` must be an integer, got `{raw}`"))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Runs named aggregate queries against the authoritative store.
///
/// Implementations decode rows into the query's schema before returning, so
/// callers only ever see a validated [`ResultSet`].
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: QueryName, params: &QueryParams)
    -> Result<ResultSet, QueryError>;

    async fn health_check(&self) -> Result<(), QueryError>;
}
