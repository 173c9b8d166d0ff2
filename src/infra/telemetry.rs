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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tagcache_hit_total",
            Unit::Count,
            "Total number of responses served from the cache."
        );
        describe_counter!(
            "tagcache_miss_total",
            Unit::Count,
            "Total number of cache misses resolved upstream and stored."
        );
        describe_counter!(
            "tagcache_bypass_total",
            Unit::Count,
            "Total number of requests not eligible for caching."
        );
        describe_counter!(
            "tagcache_passthrough_total",
            Unit::Count,
            "Total number of requests served upstream because the cache was unavailable."
        );
        describe_counter!(
            "tagcache_store_skipped_total",
            Unit::Count,
            "Total number of responses not stored because a tag was invalidated mid-flight."
        );
        describe_counter!(
            "tagcache_invalidated_total",
            Unit::Count,
            "Total number of entries removed by tag invalidation or flush."
        );
        describe_counter!(
            "tagcache_evict_total",
            Unit::Count,
            "Total number of entries evicted due to capacity."
        );
        describe_histogram!(
            "tagcache_resolve_ms",
            Unit::Milliseconds,
            "Upstream resolution latency in milliseconds."
        );
    });
}
