use sqlx::{Row as _, postgres::PgRow};

use crate::application::query::QueryError;
use crate::domain::queries::QueryName;
use crate::domain::results::{FieldKind, FieldValue, ResultSet, Row};

pub fn map_sqlx_error(err: sqlx::Error) -> QueryError {
    match err {
        sqlx::Error::PoolTimedOut => QueryError::Timeout,
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to statement timeout")
                || db
                    .message()
                    .contains("canceling statement due to user request") =>
        {
            QueryError::Timeout
        }
        other => QueryError::from_persistence(other),
    }
}

/// Decode every row into the query's schema, once, at the executor boundary.
pub(super) fn decode_rows(query: QueryName, rows: &[PgRow]) -> Result<ResultSet, QueryError> {
    let decoded = rows
        .iter()
        .map(|row| decode_row(query, row))
        .collect::<Result<Vec<_>, _>>()?;
    ResultSet::new(query, decoded).map_err(QueryError::from)
}

fn decode_row(query: QueryName, row: &PgRow) -> Result<Row, QueryError> {
    let mut decoded = Row::new();
    for column in query.schema() {
        let name = column.name;
        let value = match column.kind {
            FieldKind::Bool => row
                .try_get::<Option<bool>, _>(name)?
                .map(FieldValue::Bool)
                .unwrap_or(FieldValue::Null),
            FieldKind::Int => FieldValue::from(row.try_get::<Option<i64>, _>(name)?),
            FieldKind::Float => FieldValue::from(row.try_get::<Option<f64>, _>(name)?),
            FieldKind::Text => FieldValue::from(row.try_get::<Option<String>, _>(name)?),
            FieldKind::Timestamp => row
                .try_get::<Option<time::OffsetDateTime>, _>(name)?
                .map(FieldValue::Timestamp)
                .unwrap_or(FieldValue::Null),
        };
        decoded.insert(name, value);
    }
    Ok(decoded)
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        map_sqlx_error(err)
    }
}
