// Historical FX rate client (Frankfurter-compatible API)
// GET {base_url}/{YYYY-MM-DD}?from=USD&to=INR -> {"rates": {"INR": 83.4}, ...}

use std::collections::HashMap;

use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use super::currency_resolver::{FxKey, FxOverrides, FxRateProvider};
use super::retry::RetryPolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum FxError {
    #[error("FX service error ({0}): {1}")]
    ApiError(StatusCode, String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("No {quote} rate for {base} on {date}")]
    MissingRate {
        base: String,
        quote: String,
        date: NaiveDate,
    },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, FxError>;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct FxConfig {
    pub api_base_url: String,
    /// Number of rate lookups in flight at once
    pub concurrency: usize,
    /// Pinned rates that bypass the service
    pub overrides: FxOverrides,
}

impl FxConfig {
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_base_url)
            .map_err(|e| FxError::ConfigError(format!("api_base_url: {}", e)))?;
        if self.concurrency == 0 {
            return Err(FxError::ConfigError("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

// ============================================================================
// FX Client
// ============================================================================

pub struct FxRateClient {
    config: FxConfig,
    http_client: Client,
    retry: RetryPolicy,
}

impl FxRateClient {
    pub fn new(config: FxConfig, retry: RetryPolicy) -> Result<Self> {
        config.validate()?;

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(FxError::NetworkError)?;

        Ok(Self {
            config,
            http_client,
            retry,
        })
    }

    pub fn config(&self) -> &FxConfig {
        &self.config
    }

    /// Daily rate converting one unit of `base` into `quote`.
    pub async fn historical_rate(&self, date: NaiveDate, base: &str, quote: &str) -> Result<f64> {
        let url = format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            date.format("%Y-%m-%d")
        );

        let request = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[("from", base), ("to", quote)]);

        // Every non-2xx status gets another attempt
        let response = self
            .retry
            .send_when("fx", request, |status| !status.is_success())
            .await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FxError::ApiError(status, error_text));
        }

        let body: RatesResponse = response.json().await?;
        body.rates
            .get(quote)
            .copied()
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(|| FxError::MissingRate {
                base: base.to_string(),
                quote: quote.to_string(),
                date,
            })
    }
}

impl FxRateProvider for FxRateClient {
    async fn fetch_rate(&self, key: &FxKey) -> Result<f64> {
        self.historical_rate(key.date, &key.base, &key.quote).await
    }
}
