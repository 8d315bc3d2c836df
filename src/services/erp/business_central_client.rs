// Business Central OAuth 2.0 Client with OData V4 web services
// Client credentials flow with a shared token cache; ledger entries are read
// through published web services with keyset paging on the entry number.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::token_cache::{CachedToken, TokenCache, TokenKey};
use crate::middleware::metrics::record_upstream_request;
use crate::models::{parse_posting_date, SalesEntry, Source};
use crate::services::key_inference::{FieldRole, ResolvedKeys};
use crate::services::pager::PageSource;
use crate::services::retry::RetryPolicy;
use crate::utils::text::normalize_code;
use crate::utils::value::{value_to_f64, value_to_i64, value_to_string};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum BusinessCentralError {
    #[error("Business Central API error ({0}): {1}")]
    ApiError(StatusCode, String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("OData error: {0}")]
    ODataError(String),
}

pub type Result<T> = std::result::Result<T, BusinessCentralError>;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct BusinessCentralConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub environment: String,
    pub scope: String,
    pub token_url: String,
    pub api_base_url: String,
    /// Published web service (OData entity set) holding the ledger entries
    pub service: String,
    /// Restrict reports to these companies; empty means every company
    pub companies: Vec<String>,
}

impl BusinessCentralConfig {
    pub fn default_token_url(tenant_id: &str) -> String {
        format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", tenant_id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.is_empty() {
            return Err(BusinessCentralError::ConfigError("tenant_id is required".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(BusinessCentralError::ConfigError("client_id is required".to_string()));
        }
        if self.client_secret.is_empty() {
            return Err(BusinessCentralError::ConfigError("client_secret is required".to_string()));
        }
        if self.service.is_empty() {
            return Err(BusinessCentralError::ConfigError("service is required".to_string()));
        }
        for (name, value) in [("api_base_url", &self.api_base_url), ("token_url", &self.token_url)] {
            url::Url::parse(value)
                .map_err(|e| BusinessCentralError::ConfigError(format!("{}: {}", name, e)))?;
        }
        Ok(())
    }
}

// ============================================================================
// Data Models - OData Responses
// ============================================================================

#[derive(Debug, Deserialize)]
struct ODataCollection<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    error: ODataErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ODataErrorDetail {
    #[serde(default)]
    code: String,
    message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

/// Inclusive posting-date window applied server side.
#[derive(Debug, Clone, PartialEq)]
pub struct DateFilter {
    pub field: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

// ============================================================================
// Business Central Client
// ============================================================================

pub struct BusinessCentralClient {
    config: BusinessCentralConfig,
    http_client: Client,
    tokens: Arc<TokenCache>,
    retry: RetryPolicy,
}

impl BusinessCentralClient {
    pub fn new(config: BusinessCentralConfig, tokens: Arc<TokenCache>, retry: RetryPolicy) -> Result<Self> {
        config.validate()?;

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(BusinessCentralError::NetworkError)?;

        Ok(Self {
            config,
            http_client,
            tokens,
            retry,
        })
    }

    pub fn config(&self) -> &BusinessCentralConfig {
        &self.config
    }

    fn environment_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.tenant_id,
            self.config.environment
        )
    }

    fn entity_set_url(&self, company: &str, service: &str) -> String {
        let quoted = company.replace('\'', "''");
        format!(
            "{}/ODataV4/Company('{}')/{}",
            self.environment_url(),
            utf8_percent_encode(&quoted, NON_ALPHANUMERIC),
            service
        )
    }

    // ========================================================================
    // Companies
    // ========================================================================

    pub async fn list_companies(&self) -> Result<Vec<Company>> {
        let url = format!("{}/api/v2.0/companies", self.environment_url());
        let companies: Vec<Company> = self.get_collection(&url, &[]).await?;
        tracing::info!(count = companies.len(), "Listed Business Central companies");
        Ok(companies)
    }

    /// Companies to report on: the configured list when present (validated
    /// against the ERP), otherwise every company.
    pub async fn reporting_companies(&self) -> Result<Vec<String>> {
        let available = self.list_companies().await?;

        if self.config.companies.is_empty() {
            return Ok(available.into_iter().map(|c| c.name).collect());
        }

        let mut selected = Vec::new();
        for wanted in &self.config.companies {
            match available.iter().find(|c| c.name.eq_ignore_ascii_case(wanted)) {
                Some(company) => selected.push(company.name.clone()),
                None => {
                    return Err(BusinessCentralError::ConfigError(format!(
                        "company '{}' does not exist in environment '{}'",
                        wanted, self.config.environment
                    )))
                }
            }
        }
        Ok(selected)
    }

    // ========================================================================
    // Ledger Entries
    // ========================================================================

    /// One record without filters, used to discover the service's field names.
    pub async fn fetch_sample(&self, company: &str, service: &str) -> Result<Option<Map<String, Value>>> {
        let url = self.entity_set_url(company, service);
        let rows: Vec<Map<String, Value>> = self
            .get_collection(&url, &[("$top", "1".to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Up to `top` rows with `cursor_field > after`, ascending by cursor.
    pub async fn fetch_page(
        &self,
        company: &str,
        service: &str,
        cursor_field: &str,
        after: i64,
        top: usize,
        date_filter: Option<&DateFilter>,
    ) -> Result<Vec<Map<String, Value>>> {
        let url = self.entity_set_url(company, service);

        let mut filter = format!("{} gt {}", cursor_field, after);
        if let Some(range) = date_filter {
            filter.push_str(&format!(
                " and {field} ge {from} and {field} le {to}",
                field = range.field,
                from = range.from.format("%Y-%m-%d"),
                to = range.to.format("%Y-%m-%d"),
            ));
        }

        let query = [
            ("$filter", filter),
            ("$orderby", format!("{} asc", cursor_field)),
            ("$top", top.to_string()),
        ];

        self.get_collection(&url, &query).await
    }

    // ========================================================================
    // OAuth 2.0 Token Management
    // ========================================================================

    fn token_key(&self) -> TokenKey {
        TokenKey {
            tenant: self.config.tenant_id.clone(),
            scope: self.config.scope.clone(),
        }
    }

    pub async fn access_token(&self) -> Result<String> {
        self.tokens
            .get_or_fetch(self.token_key(), || self.request_new_token())
            .await
    }

    async fn request_new_token(&self) -> Result<CachedToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", self.config.scope.as_str()),
        ];

        let request = self.http_client.post(&self.config.token_url).form(&form);
        let response = self.retry.send("bc", request).await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            record_upstream_request("bc", "auth_error");
            return Err(BusinessCentralError::AuthError(error_text));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64, // Seconds
        }

        let token_response: TokenResponse = response.json().await?;
        tracing::info!(
            tenant = %self.config.tenant_id,
            expires_in = token_response.expires_in,
            "Obtained Business Central access token"
        );

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at: Utc::now() + Duration::seconds(token_response.expires_in),
        })
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    async fn get_collection<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let token = self.access_token().await?;

        let request = self
            .http_client
            .get(url)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .query(query);

        let response = self.retry.send("bc", request).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // Revoked or rotated credentials; next call fetches a new token
            self.tokens.invalidate(&self.token_key());
        }

        self.handle_odata_response(response).await
    }

    async fn handle_odata_response<T: serde::de::DeserializeOwned>(&self, response: Response) -> Result<Vec<T>> {
        let status = response.status();

        if !status.is_success() {
            return self.handle_error_response(response).await;
        }

        let body = response.bytes().await?;
        let collection: ODataCollection<T> = serde_json::from_slice(&body)?;
        Ok(collection.value)
    }

    async fn handle_error_response<T>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        record_upstream_request("bc", "error");

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BusinessCentralError::AuthError(error_text),
            _ => match serde_json::from_str::<ODataErrorBody>(&error_text) {
                Ok(body) => BusinessCentralError::ODataError(format!("{}: {}", body.error.code, body.error.message)),
                Err(_) => BusinessCentralError::ApiError(status, error_text),
            },
        })
    }
}

// ============================================================================
// Pager Adapter
// ============================================================================

/// One company's ledger entries as a cursor-ordered feed.
pub struct BusinessCentralPageSource<'a> {
    pub client: &'a BusinessCentralClient,
    pub company: &'a str,
    pub service: &'a str,
    pub cursor_field: &'a str,
    pub date_filter: Option<DateFilter>,
}

impl PageSource for BusinessCentralPageSource<'_> {
    type Row = Map<String, Value>;
    type Error = BusinessCentralError;

    fn system(&self) -> &'static str {
        "bc"
    }

    async fn fetch_after(&self, after: i64, top: usize) -> Result<Vec<Self::Row>> {
        self.client
            .fetch_page(
                self.company,
                self.service,
                self.cursor_field,
                after,
                top,
                self.date_filter.as_ref(),
            )
            .await
    }

    fn cursor_of(&self, row: &Self::Row) -> Option<i64> {
        row.get(self.cursor_field).and_then(value_to_i64)
    }
}

// ============================================================================
// Row Adapter
// ============================================================================

/// Map one raw ledger record onto the canonical row using the inferred keys.
///
/// The `Amount` role is read in the row's currency code; a blank currency
/// code means the company's functional currency. `AmountLcy`, when the
/// service publishes it, is the functional-currency amount.
pub fn adapt_erp_row(
    row: &Map<String, Value>,
    keys: &ResolvedKeys,
    company: &str,
    company_currency: &str,
) -> SalesEntry {
    let text = |role| keys.value(row, role).map(value_to_string).unwrap_or_default();
    let number = |role| keys.value(row, role).and_then(value_to_f64);

    let company_currency = normalize_code(company_currency);
    let document_currency = Some(normalize_code(&text(FieldRole::CurrencyCode)))
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| company_currency.clone());

    let document_amount = number(FieldRole::Amount);
    let company_amount = number(FieldRole::AmountLcy)
        .or_else(|| document_amount.filter(|_| document_currency == company_currency));

    let mut entry = SalesEntry::new(Source::Erp);
    entry.posting_date = keys
        .value(row, FieldRole::PostingDate)
        .and_then(Value::as_str)
        .and_then(parse_posting_date);
    entry.entry_type = text(FieldRole::EntryType);
    entry.customer_name = text(FieldRole::CustomerName);
    entry.customer_posting_group = text(FieldRole::CustomerPostingGroup);
    entry.description = text(FieldRole::Description);
    entry.sku = text(FieldRole::Sku);
    entry.company_name = company.to_string();
    entry.document_currency = Some(document_currency);
    entry.document_amount = document_amount;
    entry.company_currency = Some(company_currency);
    entry.company_amount = company_amount;
    entry
}
