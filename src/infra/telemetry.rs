use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::{banner_metrics, image_metrics};
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

/// Register units and help text for every metric the engine emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_histogram!(
            image_metrics::DURATION,
            Unit::Seconds,
            "Image transform latency, cache hits included."
        );
        describe_histogram!(
            image_metrics::SIZE,
            Unit::Bytes,
            "Size of produced image artifacts."
        );
        describe_counter!(
            image_metrics::ERRORS,
            Unit::Count,
            "Image transforms that ended in a failure."
        );
        describe_histogram!(
            banner_metrics::DURATION,
            Unit::Seconds,
            "Banner composition latency, cache hits included."
        );
        describe_histogram!(
            banner_metrics::SIZE,
            Unit::Bytes,
            "Size of composed banner artifacts."
        );
        describe_counter!(
            banner_metrics::ERRORS,
            Unit::Count,
            "Banner compositions that ended in a failure."
        );
        describe_counter!(
            "kirie_cache_hit_total",
            Unit::Count,
            "Total number of artifact cache hits."
        );
        describe_counter!(
            "kirie_cache_miss_total",
            Unit::Count,
            "Total number of artifact cache misses."
        );
        describe_counter!(
            "kirie_cache_evict_total",
            Unit::Count,
            "Cache entries removed by expiry, memory pressure or an explicit clear."
        );
        describe_counter!(
            "kirie_cache_rejected_total",
            Unit::Count,
            "Artifacts not stored because the cache was full."
        );
        describe_gauge!(
            "kirie_cache_keys",
            Unit::Count,
            "Current number of cache entries."
        );
        describe_gauge!(
            "kirie_executor_active",
            Unit::Count,
            "Operations currently running per executor."
        );
        describe_gauge!(
            "kirie_executor_queue_len",
            Unit::Count,
            "Operations waiting for a slot per executor."
        );
        describe_counter!(
            "kirie_executor_rejected_total",
            Unit::Count,
            "Submissions refused because the executor queue was full."
        );
        describe_histogram!(
            "kirie_executor_queue_wait_ms",
            Unit::Milliseconds,
            "Time between submission and start of an operation."
        );
        describe_counter!(
            "kirie_lock_poison_recovered_total",
            Unit::Count,
            "Poisoned locks recovered instead of propagating the panic."
        );
    });
}
