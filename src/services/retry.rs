//! Exponential backoff shared by every outbound HTTP call.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};

use crate::middleware::metrics::record_upstream_request;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; for tests against local mock servers.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Only throttling and server-side failures are worth another attempt.
    pub fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// Send `request`, retrying 429/5xx responses and connection-level
    /// failures. After the last attempt the final response is returned as-is
    /// so the caller can map its status into its own error type.
    pub async fn send(&self, system: &str, request: RequestBuilder) -> reqwest::Result<Response> {
        self.send_when(system, request, Self::is_retryable).await
    }

    /// Like [`send`](Self::send), with `retry_on` deciding which response
    /// statuses get another attempt.
    pub async fn send_when<F>(&self, system: &str, request: RequestBuilder, retry_on: F) -> reqwest::Result<Response>
    where
        F: Fn(StatusCode) -> bool,
    {
        let mut attempt = 0;

        loop {
            let Some(current) = request.try_clone() else {
                // Streaming bodies cannot be replayed
                return request.send().await;
            };

            match current.send().await {
                Ok(response) if retry_on(response.status()) && attempt < self.max_retries => {
                    record_upstream_request(system, "retry");
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        system,
                        status = %response.status(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable upstream response, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(response) => {
                    let outcome = if response.status().is_success() { "ok" } else { "error" };
                    record_upstream_request(system, outcome);
                    return Ok(response);
                }
                Err(e) if attempt < self.max_retries && (e.is_connect() || e.is_timeout()) => {
                    record_upstream_request(system, "retry");
                    let delay = self.delay_for(attempt);
                    tracing::warn!(system, error = %e, attempt = attempt + 1, "Upstream network error, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    record_upstream_request(system, "network_error");
                    return Err(e);
                }
            }
        }
    }
}
