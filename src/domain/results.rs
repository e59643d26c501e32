//! Typed query results.
//!
//! Rows are decoded once at the executor boundary into [`FieldValue`]s and
//! checked against the query's declared schema. The same check runs when a
//! cached payload is decoded, so the resolver never reinterprets loose data.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use super::queries::QueryName;

/// Kind of value a schema column decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
}

/// A single decoded field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
}

impl FieldValue {
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(_) => Some(FieldKind::Bool),
            FieldValue::Int(_) => Some(FieldKind::Int),
            FieldValue::Float(_) => Some(FieldKind::Float),
            FieldValue::Text(_) => Some(FieldKind::Text),
            FieldValue::Timestamp(_) => Some(FieldKind::Timestamp),
        }
    }

    /// Plain JSON rendering used by the HTTP surface.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(value) => Value::Bool(*value),
            FieldValue::Int(value) => Value::from(*value),
            FieldValue::Float(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(value) => Value::String(value.clone()),
            FieldValue::Timestamp(value) => value
                .format(&time::format_description::well_known::Rfc3339)
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One result row, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, FieldValue>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .0
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(object)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("row {row} of `{query}` is missing field `{field}`")]
    MissingField {
        query: QueryName,
        row: usize,
        field: &'static str,
    },
    #[error("row {row} of `{query}` has unexpected field `{field}`")]
    UnexpectedField {
        query: QueryName,
        row: usize,
        field: String,
    },
    #[error("field `{field}` in row {row} of `{query}` has the wrong type")]
    WrongKind {
        query: QueryName,
        row: usize,
        field: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not a valid result set: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("payload holds `{found}` but `{expected}` was requested")]
    QueryMismatch {
        expected: QueryName,
        found: QueryName,
    },
}

/// Authoritative result of a named aggregate query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    query: QueryName,
    rows: Vec<Row>,
}

impl ResultSet {
    /// Build a result set, rejecting rows that do not match the query schema.
    pub fn new(query: QueryName, rows: Vec<Row>) -> Result<Self, SchemaError> {
        let result = Self { query, rows };
        result.validate()?;
        Ok(result)
    }

    pub fn query(&self) -> QueryName {
        self.query
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.rows.iter().map(Row::to_json).collect())
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Decode a cached payload produced by [`ResultSet::encode`] for `expected`.
    pub fn decode(expected: QueryName, payload: &[u8]) -> Result<Self, DecodeError> {
        let result: ResultSet = serde_json::from_slice(payload)?;
        if result.query != expected {
            return Err(DecodeError::QueryMismatch {
                expected,
                found: result.query,
            });
        }
        result.validate()?;
        Ok(result)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let schema = self.query.schema();
        for (index, row) in self.rows.iter().enumerate() {
            for column in schema {
                let value = row.get(column.name).ok_or(SchemaError::MissingField {
                    query: self.query,
                    row: index,
                    field: column.name,
                })?;
                let matches = match value.kind() {
                    None => column.nullable,
                    Some(kind) => kind == column.kind,
                };
                if !matches {
                    return Err(SchemaError::WrongKind {
                        query: self.query,
                        row: index,
                        field: column.name,
                    });
                }
            }
            if row.len() != schema.len()
                && let Some(extra) = row
                    .0
                    .keys()
                    .find(|name| !schema.iter().any(|column| column.name == name.as_str()))
            {
                return Err(SchemaError::UnexpectedField {
                    query: self.query,
                    row: index,
                    field: extra.clone(),
                });
            }
        }
        Ok(())
    }
}
