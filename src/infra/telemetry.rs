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
            "rolodex_cache_hit_total",
            Unit::Count,
            "Total number of cache hits, labelled by key scope."
        );
        describe_counter!(
            "rolodex_cache_miss_total",
            Unit::Count,
            "Total number of cache misses, labelled by key scope."
        );
        describe_counter!(
            "rolodex_cache_degraded_total",
            Unit::Count,
            "Times the shared cache backend was abandoned for the in-process store."
        );
        describe_counter!(
            "rolodex_idempotent_replay_total",
            Unit::Count,
            "Mutations answered from the idempotency ledger instead of executing."
        );
        describe_histogram!(
            "rolodex_db_query_ms",
            Unit::Milliseconds,
            "Storage operation latency in milliseconds."
        );
        describe_counter!(
            "rolodex_db_query_errors_total",
            Unit::Count,
            "Storage operations that failed."
        );
        describe_counter!(
            "rolodex_http_requests_total",
            Unit::Count,
            "HTTP requests served, labelled by method, route and status code."
        );
        describe_counter!(
            "rolodex_http_request_errors_total",
            Unit::Count,
            "HTTP requests answered with a 4xx or 5xx, labelled by error type."
        );
        describe_histogram!(
            "rolodex_http_request_duration_seconds",
            Unit::Seconds,
            "HTTP request latency in seconds."
        );
        describe_counter!(
            "rolodex_http_rate_limited_total",
            Unit::Count,
            "Requests rejected by the per-client rate limiter."
        );
    });
}
