use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::warn;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once at startup. Pipeline code records
/// through the `metrics` macros regardless; without a recorder they are
/// no-ops, which is what the tests rely on.
pub fn init_metrics() {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);

            // Register the pipeline series up front so scrapes see them
            // at zero instead of absent.
            counter!("sentry_lookups_total", "source" => "rdap").absolute(0);
            counter!("sentry_lookups_total", "source" => "whois").absolute(0);
            counter!("sentry_lookups_total", "source" => "synthesized").absolute(0);
            counter!("sentry_jobs_completed_total").absolute(0);
            counter!("sentry_scheduler_enqueued_total").absolute(0);
            counter!("sentry_notifications_total", "channel" => "ntfy").absolute(0);
            counter!("sentry_notifications_total", "channel" => "smtp").absolute(0);
            counter!("sentry_notifications_dropped_total").absolute(0);
            histogram!("sentry_batch_duration_seconds").record(0.0);
        }
        Err(e) => {
            warn!("Failed to install metrics recorder: {e}");
        }
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, String::new()),
    }
}
