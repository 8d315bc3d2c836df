pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::handlers::{
    health::health_check,
    reports::{fy_table, fy_table_xlsx, odoo_rows_xlsx, sales_analytics},
};
use crate::middleware::{metrics_handler, metrics_middleware, request_id_middleware};
use crate::services::erp::{BusinessCentralClient, OdooClient, TokenCache};
use crate::services::{CategoryTable, FxRateCache, FxRateClient, SalesPipeline};

/// Shared handler state. Caches live inside the pipeline, one per state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<SalesPipeline>,
}

impl AppState {
    /// Wire clients, caches and the embedded category table from `config`.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let tokens = Arc::new(TokenCache::new());
        let business_central =
            BusinessCentralClient::new(config.business_central.clone(), tokens, config.retry.clone())?;

        let odoo = config
            .odoo
            .clone()
            .map(|odoo_config| OdooClient::new(odoo_config, config.retry.clone()))
            .transpose()?;

        let fx_cache = Arc::new(FxRateCache::new(config.fx.overrides.clone(), config.fx.concurrency));
        let fx_client = FxRateClient::new(config.fx.clone(), config.retry.clone())?;

        let categories = CategoryTable::embedded().context("embedded category table is malformed")?;
        tracing::info!(
            categories = categories.len(),
            odoo = odoo.is_some(),
            reporting_currency = %config.reporting.reporting_currency,
            "Sales pipeline ready"
        );

        let pipeline = SalesPipeline::new(
            business_central,
            odoo,
            fx_client,
            fx_cache,
            categories,
            config.pager.clone(),
            config.reporting.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();
    tracing::info!("CORS configured with {} allowed origins", allowed.len());

    layer.allow_origin(allowed)
}

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/fy-table", get(fy_table))
        .route("/fy-table.xlsx", get(fy_table_xlsx))
        .route("/sales-analytics", get(sales_analytics))
        .route("/odoo-rows.xlsx", get(odoo_rows_xlsx))
        // Route layer so the metrics see the matched route template
        .route_layer(axum_middleware::from_fn(metrics_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(request_id_middleware))
                .layer(cors),
        )
}
