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

pub const METRIC_RENDER_SESSIONS: &str = "appunti_render_sessions_total";
pub const METRIC_RENDER_SUPERSEDED: &str = "appunti_render_superseded_total";
pub const METRIC_MATH_FAILURES: &str = "appunti_math_failures_total";
pub const METRIC_DIAGRAM_FAILURES: &str = "appunti_diagram_failures_total";
pub const METRIC_RENDER_SETTLE_MS: &str = "appunti_render_settle_ms";
pub const METRIC_GATEWAY_REQUEST_MS: &str = "appunti_gateway_request_ms";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so rendered markup on stdout stays clean.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_RENDER_SESSIONS,
            Unit::Count,
            "Total number of preview render sessions started."
        );
        describe_counter!(
            METRIC_RENDER_SUPERSEDED,
            Unit::Count,
            "Render sessions cancelled before their effects applied."
        );
        describe_counter!(
            METRIC_MATH_FAILURES,
            Unit::Count,
            "Math expressions left as source text after a typesetting failure."
        );
        describe_counter!(
            METRIC_DIAGRAM_FAILURES,
            Unit::Count,
            "Diagram blocks left as source after a rendering failure."
        );
        describe_histogram!(
            METRIC_RENDER_SETTLE_MS,
            Unit::Milliseconds,
            "Time spent in the settle step, from timer expiry to applied output."
        );
        describe_histogram!(
            METRIC_GATEWAY_REQUEST_MS,
            Unit::Milliseconds,
            "Latency of generation requests to the upstream provider."
        );
    });
}
