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
            "pagerefresh_generate_total",
            Unit::Count,
            "Pages attempted by the regeneration pipeline, labelled by result."
        );
        describe_histogram!(
            "pagerefresh_run_ms",
            Unit::Milliseconds,
            "Regeneration run latency in milliseconds, labelled by generator."
        );
        describe_counter!(
            "pagerefresh_lookup_failures_total",
            Unit::Count,
            "Dependency lookups that failed during invalidation resolution."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_telemetry_error() {
        let logging = LoggingSettings {
            level: tracing::level_filters::LevelFilter::WARN,
            format: LogFormat::Compact,
        };

        let _ = init(&logging);
        let err = init(&logging).expect_err("subscriber already installed");
        assert!(matches!(err, InfraError::Telemetry(_)));
    }
}
