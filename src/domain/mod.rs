//! Domain layer: the query registry and typed results.

pub mod queries;
pub mod results;
