//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: checkout, lock and reconciliation counters in Prometheus text format.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}

/// Registers descriptions for the counters the services emit.
pub fn describe() {
    metrics::describe_counter!("checkout_attempts_total", "Checkout requests received");
    metrics::describe_counter!("checkout_completed_total", "Checkouts that committed an order");
    metrics::describe_counter!(
        "checkout_failed_total",
        "Checkouts that returned an error, labelled by error code"
    );
    metrics::describe_counter!(
        "checkout_rollbacks_total",
        "Checkouts whose stock changes were undone"
    );
    metrics::describe_histogram!(
        "checkout_duration_seconds",
        metrics::Unit::Seconds,
        "End-to-end checkout latency"
    );
    metrics::describe_counter!(
        "checkout_cart_clear_failures_total",
        "Committed checkouts whose cart could not be cleared"
    );
    metrics::describe_counter!(
        "order_events_publish_failures_total",
        "order.created notifications that could not be published"
    );
    metrics::describe_counter!(
        "lock_acquire_failures_total",
        "Lock acquisitions that timed out or hit an unavailable store"
    );
    metrics::describe_counter!(
        "lock_fail_open_total",
        "Operations that proceeded without a lock because the store was unavailable"
    );
    metrics::describe_counter!("orders_cancelled_total", "Orders cancelled by their buyer");
    metrics::describe_counter!(
        "order_status_advanced_total",
        "Seller status advances, labelled by target status"
    );
    metrics::describe_counter!(
        "payment_results_applied_total",
        "Payment results applied, labelled by outcome"
    );
    metrics::describe_counter!(
        "payment_results_dropped_total",
        "Payment result messages dropped as malformed"
    );
}
