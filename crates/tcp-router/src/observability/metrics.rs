//! Metric recording helpers.
//!
//! All names carry the `tcp_router_` prefix; counters end in `_total`.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

use crate::models::RouteAction;

/// Install the global Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns a description of the failure if the buckets are invalid or the
/// recorder cannot be installed.
pub fn init_metrics_recorder(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        // Sync lists every route and reloads the load balancer
        .set_buckets_for_metric(
            Matcher::Prefix("tcp_router_sync".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set sync duration buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Record one route event handed to the updater.
///
/// Metric: `tcp_router_route_events_total`
pub fn record_route_event(action: RouteAction, success: bool) {
    counter!("tcp_router_route_events_total",
        "action" => action.as_str(),
        "status" => status(success)
    )
    .increment(1);
}

/// Record a completed sync.
///
/// Metric: `tcp_router_syncs_total`, `tcp_router_sync_duration_seconds`
pub fn record_sync(success: bool, duration: Duration) {
    histogram!("tcp_router_sync_duration_seconds", "status" => status(success))
        .record(duration.as_secs_f64());
    counter!("tcp_router_syncs_total", "status" => status(success)).increment(1);
}

/// Record one subscription attempt.
///
/// Metric: `tcp_router_subscriptions_total`
/// Labels: `status` (`success`, or the error's [`RoutingApiError::kind`](crate::errors::RoutingApiError::kind))
pub fn record_subscription_attempt(status: &'static str) {
    counter!("tcp_router_subscriptions_total", "status" => status).increment(1);
}

/// Record one token fetch made by the watcher.
///
/// Metric: `tcp_router_token_fetches_total`
pub fn record_token_fetch(success: bool, forced: bool) {
    counter!("tcp_router_token_fetches_total",
        "status" => status(success),
        "forced" => if forced { "true" } else { "false" }
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RoutingApiError;

    // No recorder is installed here, so these calls go to the no-op recorder.
    // They only check that recording never panics.

    #[test]
    fn test_record_route_event() {
        record_route_event(RouteAction::Upsert, true);
        record_route_event(RouteAction::Delete, false);
    }

    #[test]
    fn test_record_sync() {
        record_sync(true, Duration::from_millis(40));
        record_sync(false, Duration::ZERO);
    }

    #[test]
    fn test_record_subscription_and_token() {
        record_subscription_attempt("success");
        record_subscription_attempt(RoutingApiError::Unauthorized(String::new()).kind());
        record_token_fetch(true, false);
        record_token_fetch(false, true);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(status(true), "success");
        assert_eq!(status(false), "error");
    }
}
