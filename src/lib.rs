//! Transit Pulse: read-heavy transit aggregation API with a cache-aside layer.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
