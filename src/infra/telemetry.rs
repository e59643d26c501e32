use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every cache metric. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "transit_cache_hit_total",
            Unit::Count,
            "Total number of reads served from the KV store."
        );
        describe_counter!(
            "transit_cache_miss_total",
            Unit::Count,
            "Total number of reads computed by the query executor."
        );
        describe_counter!(
            "transit_cache_degraded_total",
            Unit::Count,
            "Total number of KV operations that failed or timed out and were bypassed."
        );
        describe_counter!(
            "transit_cache_evict_total",
            Unit::Count,
            "Total number of in-process store evictions due to capacity."
        );
        describe_counter!(
            "transit_cache_invalidated_keys_total",
            Unit::Count,
            "Total number of keys removed by invalidation."
        );
        describe_histogram!(
            "transit_cache_resolve_ms",
            Unit::Milliseconds,
            "Resolve latency in milliseconds, labelled by provenance."
        );
        describe_histogram!(
            "transit_cache_invalidate_ms",
            Unit::Milliseconds,
            "Invalidation latency in milliseconds."
        );
    });
}
