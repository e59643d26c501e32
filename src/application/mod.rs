//! Application layer: the query executor port and error roll-up.

pub mod error;
pub mod query;
