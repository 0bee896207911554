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
            "raffica_cache_hit_total",
            Unit::Count,
            "Total number of cache-store hits."
        );
        describe_counter!(
            "raffica_cache_miss_total",
            Unit::Count,
            "Total number of cache-store misses."
        );
        describe_counter!(
            "raffica_cache_expired_total",
            Unit::Count,
            "Total number of entries dropped at lookup after their TTL elapsed."
        );
        describe_counter!(
            "raffica_cache_build_total",
            Unit::Count,
            "Total number of completed single-flight builds."
        );
        describe_counter!(
            "raffica_cache_build_failure_total",
            Unit::Count,
            "Total number of single-flight builds that failed."
        );
        describe_histogram!(
            "raffica_cache_build_ms",
            Unit::Milliseconds,
            "Single-flight build latency in milliseconds."
        );
        describe_counter!(
            "raffica_compression_applied_total",
            Unit::Count,
            "Total number of responses wrapped with a compression encoder."
        );
        describe_counter!(
            "raffica_sitemap_probe_failure_total",
            Unit::Count,
            "Total number of sitemap freshness probes that failed outright."
        );
        describe_histogram!(
            "raffica_sitemap_build_ms",
            Unit::Milliseconds,
            "Sitemap document build latency in milliseconds."
        );
    });
}
