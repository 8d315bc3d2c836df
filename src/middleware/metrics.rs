// ============================================================================
// Prometheus Metrics
// ============================================================================
//
// ## Metrics Collected:
//
// - sales_dashboard_http_request_duration_seconds (method, path, status)
// - sales_dashboard_http_requests_total (method, path, status)
// - sales_dashboard_upstream_requests_total (system, outcome)
// - sales_dashboard_pager_batches_total (system)
// - sales_dashboard_fx_lookups_total (result)
//
// Scraped from GET /metrics.
//
// ============================================================================

use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "sales_dashboard_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path", "status"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 180.0]
    ).unwrap();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "sales_dashboard_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    ).unwrap();

    /// Calls made to Business Central, Odoo and the FX service
    pub static ref UPSTREAM_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "sales_dashboard_upstream_requests_total",
        "Total number of upstream HTTP calls by system and outcome",
        &["system", "outcome"]
    ).unwrap();

    pub static ref PAGER_BATCHES_TOTAL: CounterVec = register_counter_vec!(
        "sales_dashboard_pager_batches_total",
        "Total number of keyset pages fetched",
        &["system"]
    ).unwrap();

    /// hit | miss | override | failed
    pub static ref FX_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "sales_dashboard_fx_lookups_total",
        "FX rate lookups by cache result",
        &["result"]
    ).unwrap();
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    // Route template when matched, so query strings and unknown paths do not
    // explode label cardinality.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &path, &status])
        .observe(duration.as_secs_f64());
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, &status])
        .inc();

    tracing::debug!(
        target: "metrics",
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %duration.as_millis(),
        "HTTP request completed"
    );

    response
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

// ============================================================================
// Helpers for services
// ============================================================================

pub fn record_upstream_request(system: &str, outcome: &str) {
    UPSTREAM_REQUESTS_TOTAL.with_label_values(&[system, outcome]).inc();
}

pub fn record_pager_batch(system: &str) {
    PAGER_BATCHES_TOTAL.with_label_values(&[system]).inc();
}

pub fn record_fx_lookup(result: &str) {
    FX_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}
