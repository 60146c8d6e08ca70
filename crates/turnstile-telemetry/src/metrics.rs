//! Chain metrics for Turnstile.
//!
//! Recording goes through the `metrics` facade, so every `record_*` call is a
//! no-op until a recorder is installed. [`init_metrics`] installs the
//! Prometheus recorder and keeps its handle for [`render_metrics`].
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `turnstile_stage_decisions_total` | Counter | `stage`, `decision` | Decisions per stage |
//! | `turnstile_requests_total` | Counter | `outcome` | Requests by terminal chain state |
//! | `turnstile_chain_duration_seconds` | Histogram | `outcome` | Time spent in the chain and handler |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Stage decision label for a stage that continued.
pub const DECISION_CONTINUE: &str = "continue";

/// Stage decision label for a stage that produced a response.
pub const DECISION_SHORT_CIRCUIT: &str = "short_circuit";

/// Stage decision label for a stage that faulted.
pub const DECISION_FAIL: &str = "fail";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder.
    pub enabled: bool,

    /// Histogram buckets for chain duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 1ms .. 10s
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// Exposition is left to the embedding service, which can serve
/// [`render_metrics`] from its own listener.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the buckets are invalid or a
/// recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(&config.duration_buckets)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    describe_metrics();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(
        "turnstile_stage_decisions_total",
        "Decisions returned by middleware stages"
    );
    describe_counter!(
        "turnstile_requests_total",
        "Requests processed by the chain executor, by outcome"
    );
    describe_histogram!(
        "turnstile_chain_duration_seconds",
        "Time from chain entry to response, in seconds"
    );
}

/// Records one stage decision.
///
/// `decision` should be one of the `DECISION_*` labels.
pub fn record_stage_decision(stage: &str, decision: &'static str) {
    counter!(
        "turnstile_stage_decisions_total",
        "stage" => stage.to_string(),
        "decision" => decision
    )
    .increment(1);
}

/// Records a request leaving the chain.
///
/// `outcome` is the terminal chain state (e.g. "completed", "short_circuited").
pub fn record_chain_completed(outcome: &'static str, duration: Duration) {
    counter!("turnstile_requests_total", "outcome" => outcome).increment(1);
    histogram!("turnstile_chain_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}
