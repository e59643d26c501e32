//! Postgres-backed query executor.

mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    query, query_scalar,
};
use tracing::debug;

use crate::application::query::{QueryError, QueryExecutor, QueryParams};
use crate::domain::queries::QueryName;
use crate::domain::results::ResultSet;

const SOURCE: &str = "infra::db";
const CURRENCY: &str = "COP";
const RECENT_ROWS_LIMIT: i64 = 10;

const TRIP_TOTALS_SQL: &str = "SELECT \
    COUNT(*)::int8 AS total_trips, \
    COUNT(*) FILTER (WHERE end_time IS NOT NULL)::int8 AS completed_trips, \
    COUNT(*) FILTER (WHERE end_time IS NULL)::int8 AS active_trips, \
    COALESCE(SUM(fare) FILTER (WHERE end_time IS NOT NULL), 0)::float8 AS total_revenue \
    FROM trips";

const TRIPS_BY_LOCALITY_SQL: &str = "SELECT \
    s.locality::text AS locality, \
    COUNT(*)::int8 AS total_trips, \
    COUNT(*) FILTER (WHERE t.end_time IS NOT NULL)::int8 AS completed_trips, \
    COUNT(*) FILTER (WHERE t.end_time IS NULL)::int8 AS active_trips, \
    COALESCE(SUM(t.fare) FILTER (WHERE t.end_time IS NOT NULL), 0)::float8 AS total_revenue \
    FROM trips t \
    JOIN stations s ON t.start_station_id = s.station_id \
    GROUP BY s.locality \
    ORDER BY total_trips DESC";

const TRIPS_BY_CARD_SQL: &str = "SELECT \
    t.trip_id::int8 AS trip_id, \
    t.card_id::int8 AS card_id, \
    t.start_station_id::int8 AS start_station_id, \
    t.end_station_id::int8 AS end_station_id, \
    s1.name::text AS start_station_name, \
    s2.name::text AS end_station_name, \
    t.start_time::timestamptz AS start_time, \
    t.end_time::timestamptz AS end_time, \
    t.status::text AS status, \
    t.fare::float8 AS fare \
    FROM trips t \
    LEFT JOIN stations s1 ON t.start_station_id = s1.station_id \
    LEFT JOIN stations s2 ON t.end_station_id = s2.station_id \
    WHERE t.card_id = ";

const FINANCE_REVENUE_SQL: &str = "SELECT \
    COALESCE(SUM(fare) FILTER (WHERE end_time IS NOT NULL), 0)::float8 AS total_revenue, ";

const FINANCE_REVENUE_BY_LOCALITY_SQL: &str = "SELECT \
    s.locality::text AS locality, \
    COALESCE(SUM(t.fare) FILTER (WHERE t.end_time IS NOT NULL), 0)::float8 AS total_revenue, ";

const USERS_COUNT_SQL: &str = "SELECT COUNT(*)::int8 AS total_users FROM users";

const USERS_ACTIVE_COUNT_SQL: &str = "SELECT COUNT(DISTINCT u.user_id)::int8 AS active_users_count \
    FROM users u \
    JOIN cards c ON u.user_id = c.user_id \
    WHERE c.status = 'active'";

const CARD_BALANCE_SQL: &str = "SELECT \
    card_id::int8 AS card_id, \
    balance::float8 AS balance, \
    status::text AS status, \
    last_recharge::timestamptz AS last_recharge \
    FROM cards WHERE card_id = ";

const CARD_HISTORY_SQL: &str = "SELECT \
    recharge_id::int8 AS recharge_id, \
    card_id::int8 AS card_id, \
    amount::float8 AS amount, \
    payment_method::text AS payment_method, \
    \"timestamp\"::timestamptz AS \"timestamp\" \
    FROM recharges WHERE card_id = ";

const STATIONS_LIST_SQL: &str = "SELECT \
    station_id::int8 AS station_id, \
    name::text AS name, \
    locality::text AS locality, \
    status::text AS status, \
    capacity::int8 AS capacity, \
    current_occupancy::int8 AS current_occupancy \
    FROM stations WHERE 1=1";

const STATION_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM stations WHERE station_id = $1)";

const STATION_ARRIVALS_SQL: &str = "SELECT \
    station_id::int8 AS station_id, \
    line::text AS line, \
    destination::text AS destination, \
    estimated_arrival::timestamptz AS estimated_arrival, \
    status::text AS status \
    FROM arrivals \
    WHERE estimated_arrival > CURRENT_TIMESTAMP AND station_id = ";

const STATION_ALERTS_SQL: &str = "SELECT \
    alert_id::int8 AS alert_id, \
    station_id::int8 AS station_id, \
    \"type\"::text AS \"type\", \
    message::text AS message, \
    severity::text AS severity, \
    start_time::timestamptz AS start_time, \
    end_time::timestamptz AS end_time \
    FROM alerts WHERE station_id = ";

const ROUTE_DETAILS_SQL: &str = "SELECT \
    r.route_code::text AS route_code, \
    COALESCE(r.route_name, '')::text AS route_name, \
    r.route_type::text AS route_type, \
    ist.sequence_order::int8 AS sequence, \
    s.station_code::text AS station_code, \
    s.name::text AS station_name, \
    s.station_type::text AS station_type \
    FROM routes r \
    LEFT JOIN intermediate_stations ist ON ist.route_id = r.route_id \
    LEFT JOIN stations s ON ist.station_id = s.station_id \
    WHERE r.is_active = true AND r.route_code = ";

const ROUTE_CODES_SQL: &str = "SELECT DISTINCT \
    route_code::text AS route_code, \
    route_name::text AS name \
    FROM routes WHERE is_active = true \
    ORDER BY route_code ASC";

#[derive(Clone)]
pub struct PostgresQueryExecutor {
    pool: Arc<PgPool>,
}

impl PostgresQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }
}

/// Assemble the SQL for `name`, binding the parameters it consumes.
fn build_query(
    name: QueryName,
    params: &QueryParams,
) -> Result<QueryBuilder<'static, Postgres>, QueryError> {
    let mut qb = QueryBuilder::new("");
    match name {
        QueryName::TripsTotal => {
            qb.push(TRIP_TOTALS_SQL);
        }
        QueryName::TripsByLocality => {
            qb.push(TRIPS_BY_LOCALITY_SQL);
        }
        QueryName::TripsByCard => {
            let card_id = params.require_i64(name, "card_id")?;
            qb.push(TRIPS_BY_CARD_SQL);
            qb.push_bind(card_id);
            qb.push(" ORDER BY t.start_time DESC LIMIT ");
            qb.push_bind(RECENT_ROWS_LIMIT);
        }
        QueryName::FinanceRevenue => {
            qb.push(FINANCE_REVENUE_SQL);
            qb.push_bind(CURRENCY);
            qb.push("::text AS currency FROM trips");
        }
        QueryName::FinanceRevenueByLocality => {
            qb.push(FINANCE_REVENUE_BY_LOCALITY_SQL);
            qb.push_bind(CURRENCY);
            qb.push(
                "::text AS currency FROM trips t \
                 JOIN stations s ON t.start_station_id = s.station_id \
                 GROUP BY s.locality ORDER BY total_revenue DESC",
            );
        }
        QueryName::UsersCount => {
            qb.push(USERS_COUNT_SQL);
        }
        QueryName::UsersActiveCount => {
            qb.push(USERS_ACTIVE_COUNT_SQL);
        }
        QueryName::CardBalance => {
            let card_id = params.require_i64(name, "card_id")?;
            qb.push(CARD_BALANCE_SQL);
            qb.push_bind(card_id);
        }
        QueryName::CardHistory => {
            let card_id = params.require_i64(name, "card_id")?;
            qb.push(CARD_HISTORY_SQL);
            qb.push_bind(card_id);
            qb.push(" ORDER BY \"timestamp\" DESC LIMIT ");
            qb.push_bind(RECENT_ROWS_LIMIT);
        }
        QueryName::StationsList => {
            qb.push(STATIONS_LIST_SQL);
            if let Some(locality) = params.get("locality") {
                qb.push(" AND locality = ");
                qb.push_bind(locality.to_string());
            }
            if let Some(status) = params.get("status") {
                qb.push(" AND status::text = ");
                qb.push_bind(status.to_string());
            }
            qb.push(" ORDER BY name");
        }
        QueryName::StationArrivals => {
            let station_id = params.require_i64(name, "station_id")?;
            qb.push(STATION_ARRIVALS_SQL);
            qb.push_bind(station_id);
            qb.push(" ORDER BY estimated_arrival LIMIT ");
            qb.push_bind(RECENT_ROWS_LIMIT);
        }
        QueryName::StationAlerts => {
            let station_id = params.require_i64(name, "station_id")?;
            qb.push(STATION_ALERTS_SQL);
            qb.push_bind(station_id);
            if params.flag(name, "active_only", true)? {
                qb.push(" AND (end_time IS NULL OR end_time > CURRENT_TIMESTAMP)");
            }
            qb.push(" ORDER BY start_time DESC");
        }
        QueryName::RouteCodes => {
            qb.push(ROUTE_CODES_SQL);
        }
        QueryName::RouteDetails => {
            let route_code = params.require(name, "route_code")?;
            qb.push(ROUTE_DETAILS_SQL);
            qb.push_bind(route_code.to_string());
            qb.push(" ORDER BY ist.sequence_order ASC NULLS LAST");
        }
    }
    Ok(qb)
}

/// Station whose existence must be checked before `name` runs.
fn station_scope(name: QueryName, params: &QueryParams) -> Result<Option<i64>, QueryError> {
    match name {
        QueryName::StationArrivals | QueryName::StationAlerts => {
            params.require_i64(name, "station_id").map(Some)
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl QueryExecutor for PostgresQueryExecutor {
    async fn execute(
        &self,
        name: QueryName,
        params: &QueryParams,
    ) -> Result<ResultSet, QueryError> {
        let mut qb = build_query(name, params)?;
        if let Some(station_id) = station_scope(name, params)? {
            let exists: bool = query_scalar(STATION_EXISTS_SQL)
                .bind(station_id)
                .fetch_one(self.pool())
                .await?;
            if !exists {
                debug!(target = SOURCE, query = %name, station_id, "station not found");
                return Err(QueryError::NotFound { subject: "station" });
            }
        }
        let rows = qb.build().fetch_all(self.pool()).await?;
        debug!(target = SOURCE, query = %name, rows = rows.len(), "query executed");
        util::decode_rows(name, &rows)
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        query("SELECT 1").execute(self.pool()).await?;
        Ok(())
    }
}
