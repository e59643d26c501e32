//! Transit Pulse cache-aside layer
//!
//! Sits between the HTTP handlers and the query executor:
//!
//! - **Key policy**: canonical keys and TTL classes per entity
//! - **Resolver**: read-through caching with HIT/MISS provenance that fails
//!   open when the KV store misbehaves
//! - **Invalidation**: purges the keys a committed write made stale
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `transit-pulse.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! kv_timeout_ms = 100
//! executor_timeout_ms = 2000
//!
//! [cache.ttl_seconds]
//! short = 60
//!
//! [cache.entities.stations]
//! ttl_class = "short"
//! invalidation_patterns = ["stations:list:*"]
//! ```

mod config;
mod events;
mod invalidation;
mod keys;
mod lock;
mod planner;
mod policy;
mod resolver;
mod stats;
mod store;

pub use config::CacheConfig;
pub use events::MutationEvent;
pub use invalidation::{InvalidationCoordinator, InvalidationReport};
pub use keys::{CacheKey, ResourceRequest, derive_key, entity_prefix};
pub use planner::InvalidationPlan;
pub use policy::{
    ConfigurationError, EntityPolicy, InvalidationRule, KeyPattern, KeyTarget, PolicyError,
    PolicyRegistry, ResourcePolicy, TtlClass, TtlTable,
};
pub use resolver::{CacheDegradedError, CacheResolver, Provenance, ResolveError, Resolved};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{KvError, KvStore, MemoryKvStore};

pub(crate) use store::bounded;
