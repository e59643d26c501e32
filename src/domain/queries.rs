//! The fixed registry of named aggregate queries and their result schemas.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::results::FieldKind;

/// A named aggregate query understood by every query executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QueryName {
    TripsTotal,
    TripsByLocality,
    TripsByCard,
    FinanceRevenue,
    FinanceRevenueByLocality,
    UsersCount,
    UsersActiveCount,
    CardBalance,
    CardHistory,
    StationsList,
    StationArrivals,
    StationAlerts,
    RouteCodes,
    RouteDetails,
}

/// Column declaration of a query result: field name and the kind it decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

const fn col(name: &'static str, kind: FieldKind) -> Column {
    Column {
        name,
        kind,
        nullable: false,
    }
}

const fn nullable(name: &'static str, kind: FieldKind) -> Column {
    Column {
        name,
        kind,
        nullable: true,
    }
}

const TRIP_TOTALS: &[Column] = &[
    col("total_trips", FieldKind::Int),
    col("completed_trips", FieldKind::Int),
    col("active_trips", FieldKind::Int),
    col("total_revenue", FieldKind::Float),
];

const TRIPS_BY_LOCALITY: &[Column] = &[
    col("locality", FieldKind::Text),
    col("total_trips", FieldKind::Int),
    col("completed_trips", FieldKind::Int),
    col("active_trips", FieldKind::Int),
    col("total_revenue", FieldKind::Float),
];

const TRIPS_BY_CARD: &[Column] = &[
    col("trip_id", FieldKind::Int),
    col("card_id", FieldKind::Int),
    col("start_station_id", FieldKind::Int),
    nullable("end_station_id", FieldKind::Int),
    nullable("start_station_name", FieldKind::Text),
    nullable("end_station_name", FieldKind::Text),
    col("start_time", FieldKind::Timestamp),
    nullable("end_time", FieldKind::Timestamp),
    col("status", FieldKind::Text),
    nullable("fare", FieldKind::Float),
];

const FINANCE_REVENUE: &[Column] = &[
    col("total_revenue", FieldKind::Float),
    col("currency", FieldKind::Text),
];

const FINANCE_REVENUE_BY_LOCALITY: &[Column] = &[
    col("locality", FieldKind::Text),
    col("total_revenue", FieldKind::Float),
    col("currency", FieldKind::Text),
];

const USERS_COUNT: &[Column] = &[col("total_users", FieldKind::Int)];

const USERS_ACTIVE_COUNT: &[Column] = &[col("active_users_count", FieldKind::Int)];

const CARD_BALANCE: &[Column] = &[
    col("card_id", FieldKind::Int),
    col("balance", FieldKind::Float),
    col("status", FieldKind::Text),
    nullable("last_recharge", FieldKind::Timestamp),
];

const CARD_HISTORY: &[Column] = &[
    col("recharge_id", FieldKind::Int),
    col("card_id", FieldKind::Int),
    col("amount", FieldKind::Float),
    col("payment_method", FieldKind::Text),
    col("timestamp", FieldKind::Timestamp),
];

const STATIONS_LIST: &[Column] = &[
    col("station_id", FieldKind::Int),
    col("name", FieldKind::Text),
    col("locality", FieldKind::Text),
    col("status", FieldKind::Text),
    col("capacity", FieldKind::Int),
    col("current_occupancy", FieldKind::Int),
];

const STATION_ARRIVALS: &[Column] = &[
    col("station_id", FieldKind::Int),
    col("line", FieldKind::Text),
    col("destination", FieldKind::Text),
    col("estimated_arrival", FieldKind::Timestamp),
    col("status", FieldKind::Text),
];

const STATION_ALERTS: &[Column] = &[
    col("alert_id", FieldKind::Int),
    col("station_id", FieldKind::Int),
    col("type", FieldKind::Text),
    col("message", FieldKind::Text),
    col("severity", FieldKind::Text),
    col("start_time", FieldKind::Timestamp),
    nullable("end_time", FieldKind::Timestamp),
];

/// One row per stop, in route order. A route without stops yields a single
/// row whose stop columns are null.
const ROUTE_DETAILS: &[Column] = &[
    col("route_code", FieldKind::Text),
    col("route_name", FieldKind::Text),
    nullable("route_type", FieldKind::Text),
    nullable("sequence", FieldKind::Int),
    nullable("station_code", FieldKind::Text),
    nullable("station_name", FieldKind::Text),
    nullable("station_type", FieldKind::Text),
];

const ROUTE_CODES: &[Column] = &[
    col("route_code", FieldKind::Text),
    col("name", FieldKind::Text),
];

impl QueryName {
    pub const ALL: [QueryName; 14] = [
        QueryName::TripsTotal,
        QueryName::TripsByLocality,
        QueryName::TripsByCard,
        QueryName::FinanceRevenue,
        QueryName::FinanceRevenueByLocality,
        QueryName::UsersCount,
        QueryName::UsersActiveCount,
        QueryName::CardBalance,
        QueryName::CardHistory,
        QueryName::StationsList,
        QueryName::StationArrivals,
        QueryName::StationAlerts,
        QueryName::RouteCodes,
        QueryName::RouteDetails,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryName::TripsTotal => "trips.total",
            QueryName::TripsByLocality => "trips.by_locality",
            QueryName::TripsByCard => "trips.by_card",
            QueryName::FinanceRevenue => "finance.revenue",
            QueryName::FinanceRevenueByLocality => "finance.revenue.by_locality",
            QueryName::UsersCount => "users.count",
            QueryName::UsersActiveCount => "users.active.count",
            QueryName::CardBalance => "cards.balance",
            QueryName::CardHistory => "cards.history",
            QueryName::StationsList => "stations.list",
            QueryName::StationArrivals => "stations.arrivals",
            QueryName::StationAlerts => "stations.alerts",
            QueryName::RouteCodes => "routes.codes",
            QueryName::RouteDetails => "routes.details",
        }
    }

    /// Columns every row of this query's result carries.
    pub fn schema(self) -> &'static [Column] {
        match self {
            QueryName::TripsTotal => TRIP_TOTALS,
            QueryName::TripsByLocality => TRIPS_BY_LOCALITY,
            QueryName::TripsByCard => TRIPS_BY_CARD,
            QueryName::FinanceRevenue => FINANCE_REVENUE,
            QueryName::FinanceRevenueByLocality => FINANCE_REVENUE_BY_LOCALITY,
            QueryName::UsersCount => USERS_COUNT,
            QueryName::UsersActiveCount => USERS_ACTIVE_COUNT,
            QueryName::CardBalance => CARD_BALANCE,
            QueryName::CardHistory => CARD_HISTORY,
            QueryName::StationsList => STATIONS_LIST,
            QueryName::StationArrivals => STATION_ARRIVALS,
            QueryName::StationAlerts => STATION_ALERTS,
            QueryName::RouteCodes => ROUTE_CODES,
            QueryName::RouteDetails => ROUTE_DETAILS,
        }
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown query `{0}`")]
pub struct UnknownQuery(pub String);

impl FromStr for QueryName {
    type Err = UnknownQuery;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        QueryName::ALL
            .into_iter()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| UnknownQuery(value.to_string()))
    }
}

impl TryFrom<String> for QueryName {
    type Error = UnknownQuery;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QueryName> for String {
    fn from(value: QueryName) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for name in QueryName::ALL {
            assert_eq!(name.as_str().parse::<QueryName>(), Ok(name));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "trips.everything".parse::<QueryName>().unwrap_err();
        assert_eq!(err, UnknownQuery("trips.everything".to_string()));
    }

    #[test]
    fn schemas_have_unique_columns() {
        for name in QueryName::ALL {
            let schema = name.schema();
            let mut seen = std::collections::HashSet::new();
            assert!(!schema.is_empty(), "{name} has an empty schema");
            for column in schema {
                assert!(seen.insert(column.name), "{name} repeats {}", column.name);
            }
        }
    }
}
