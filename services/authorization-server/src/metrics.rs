//! Prometheus metrics exposition
//!
//! - `oauth_requests_total` (counter): labels `endpoint`, `status`
//! - `oauth_request_duration_seconds` (histogram): label `endpoint`
//! - `oauth_tokens_issued_total` (counter): label `grant_type`
//! - `oauth_errors_total` (counter): label `error`

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "oauth_request_duration_seconds";

/// 1ms to 5s. Token issuance is local, so anything slower is an outlier.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .context("failed to set histogram buckets")
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a completed request against one of the HTTP endpoints.
pub fn record_request(endpoint: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "oauth_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "endpoint" => endpoint).record(duration_secs);
}

pub fn record_token_issued(grant_type: &'static str) {
    metrics::counter!("oauth_tokens_issued_total", "grant_type" => grant_type).increment(1);
}

/// Record a rendered OAuth2 error by its wire code.
pub fn record_error(error: &'static str) {
    metrics::counter!("oauth_errors_total", "error" => error).increment(1);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    let recorder = builder().unwrap().build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("token", 200, 0.01);
        record_token_issued("password");
        record_error("invalid_grant");
    }

    #[test]
    fn request_metrics_carry_endpoint_and_status() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("token", 200, 0.004);
        record_request("authorize", 302, 0.02);

        let output = handle.render();
        assert!(output.contains("oauth_requests_total"));
        assert!(output.contains("endpoint=\"token\""));
        assert!(output.contains("status=\"302\""));
        assert!(
            output.contains("oauth_request_duration_seconds_bucket"),
            "duration must render as a histogram"
        );
        assert!(output.contains("le=\"0.005\""));
        assert!(output.contains("le=\"+Inf\""));
    }

    #[test]
    fn issuance_and_errors_are_labelled() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_token_issued("authorization_code");
        record_error("invalid_scope");

        let output = handle.render();
        assert!(output.contains("oauth_tokens_issued_total{grant_type=\"authorization_code\"} 1"));
        assert!(output.contains("oauth_errors_total{error=\"invalid_scope\"} 1"));
    }
}
