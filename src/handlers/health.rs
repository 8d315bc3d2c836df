use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Liveness plus the bits of configuration a dashboard needs to know about.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "reportingCurrency": state.pipeline.reporting().reporting_currency,
        "odooConfigured": state.pipeline.has_odoo(),
    }))
}
