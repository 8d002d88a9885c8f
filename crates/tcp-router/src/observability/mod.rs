//! Observability for the TCP router.
//!
//! Metrics go through the `metrics` facade and are exported by a Prometheus
//! HTTP listener installed in `main`. Labels are bounded:
//! - `action`: `Upsert`, `Delete`
//! - `status`: `success`, `error`, `unauthorized`
//! - `forced`: `true`, `false`
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `tcp_router_route_events_total` | Counter | `action`, `status` |
//! | `tcp_router_syncs_total` | Counter | `status` |
//! | `tcp_router_sync_duration_seconds` | Histogram | `status` |
//! | `tcp_router_subscriptions_total` | Counter | `status` |
//! | `tcp_router_token_fetches_total` | Counter | `status`, `forced` |

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_route_event, record_subscription_attempt, record_sync,
    record_token_fetch,
};
