// Odoo JSON-RPC Client
// authenticate/execute_kw over the external JSON-RPC API. Deployments expose
// the endpoint under different paths depending on version and proxy setup,
// so several transport paths are tried in order and the one that answered is
// remembered for later calls.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::middleware::metrics::record_upstream_request;
use crate::models::{parse_posting_date, SalesEntry, Source};
use crate::services::pager::{self, PageSource, PagerConfig, PagerError};
use crate::services::retry::RetryPolicy;
use crate::utils::text::normalize_code;
use crate::utils::value::{value_to_f64, value_to_i64, value_to_string};

pub const DEFAULT_TRANSPORT_PATHS: [&str; 3] = ["/jsonrpc", "/odoo/jsonrpc", "/web/jsonrpc"];

const INVOICE_LINE_FIELDS: [&str; 14] = [
    "id",
    "date",
    "move_id",
    "move_name",
    "move_type",
    "partner_id",
    "product_id",
    "name",
    "quantity",
    "price_subtotal",
    "balance",
    "currency_id",
    "company_currency_id",
    "company_id",
];

// "[MR672F] Miniature bearing" -> "MR672F"
static PRODUCT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[([^\]]+)\]").expect("product code pattern is valid"));

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum OdooError {
    #[error("Odoo API error ({0}): {1}")]
    ApiError(StatusCode, String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Odoo RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("No JSON-RPC endpoint answered (tried {0})")]
    NoTransport(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

pub type Result<T> = std::result::Result<T, OdooError>;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct OdooConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub api_key: String,
    /// Used when a line carries no company currency
    pub company_currency: Option<String>,
    /// JSON-RPC paths in preference order
    pub transport_paths: Vec<String>,
}

impl OdooConfig {
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.url).map_err(|e| OdooError::ConfigError(format!("url: {}", e)))?;
        if self.database.is_empty() {
            return Err(OdooError::ConfigError("database is required".to_string()));
        }
        if self.username.is_empty() {
            return Err(OdooError::ConfigError("username is required".to_string()));
        }
        if self.api_key.is_empty() {
            return Err(OdooError::ConfigError("api_key is required".to_string()));
        }
        if self.transport_paths.is_empty() {
            return Err(OdooError::ConfigError("at least one transport path is required".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// JSON-RPC Envelope
// ============================================================================

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    message: String,
}

impl From<RpcErrorObject> for OdooError {
    fn from(error: RpcErrorObject) -> Self {
        let detail = error
            .data
            .map(|d| d.message)
            .filter(|m| !m.is_empty())
            .unwrap_or(error.message);
        OdooError::Rpc {
            code: error.code,
            message: detail,
        }
    }
}

// ============================================================================
// Invoice Lines
// ============================================================================

/// Flattened `account.move.line` of a posted customer invoice or credit note.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OdooInvoiceLine {
    pub id: i64,
    pub date: Option<NaiveDate>,
    pub move_name: String,
    pub move_type: String,
    pub partner: String,
    pub product: String,
    pub sku: String,
    pub label: String,
    pub quantity: f64,
    /// Untaxed amount in the invoice currency, always positive
    pub price_subtotal: f64,
    /// Company-currency balance; income lines are credits (negative)
    pub balance: Option<f64>,
    pub currency: String,
    pub company_currency: String,
    pub company: String,
}

/// Display name of a many2one value (`[id, "name"]` or `false`).
fn many2one_name(value: Option<&Value>) -> String {
    match value {
        Some(Value::Array(pair)) => pair.get(1).map(value_to_string).unwrap_or_default(),
        Some(other) => value_to_string(other),
        None => String::new(),
    }
}

impl OdooInvoiceLine {
    pub fn from_record(record: &Map<String, Value>) -> Result<Self> {
        let id = record.get("id").and_then(value_to_i64).ok_or_else(|| {
            OdooError::MalformedRecord(format!(
                "invoice line without an id (move {})",
                many2one_name(record.get("move_id"))
            ))
        })?;
        let text = |field: &str| record.get(field).map(value_to_string).unwrap_or_default();
        let number = |field: &str| record.get(field).and_then(value_to_f64).unwrap_or(0.0);

        let product = many2one_name(record.get("product_id"));
        let sku = PRODUCT_CODE
            .captures(&product)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        let move_name = match text("move_name") {
            name if name.is_empty() => many2one_name(record.get("move_id")),
            name => name,
        };

        Ok(Self {
            id,
            date: record.get("date").and_then(Value::as_str).and_then(parse_posting_date),
            move_name,
            move_type: text("move_type"),
            partner: many2one_name(record.get("partner_id")),
            product,
            sku,
            label: text("name"),
            quantity: number("quantity"),
            price_subtotal: number("price_subtotal"),
            balance: record.get("balance").and_then(value_to_f64),
            currency: normalize_code(&many2one_name(record.get("currency_id"))),
            company_currency: normalize_code(&many2one_name(record.get("company_currency_id"))),
            company: many2one_name(record.get("company_id")),
        })
    }

    pub fn is_credit_note(&self) -> bool {
        self.move_type == "out_refund"
    }

    /// Canonical row; credit notes carry negative amounts.
    pub fn to_sales_entry(&self, fallback_company_currency: Option<&str>) -> SalesEntry {
        let sign = if self.is_credit_note() { -1.0 } else { 1.0 };
        let company_currency = Some(self.company_currency.clone())
            .filter(|c| !c.is_empty())
            .or_else(|| fallback_company_currency.map(normalize_code));

        let mut entry = SalesEntry::new(Source::Crm);
        entry.posting_date = self.date;
        entry.entry_type = "Sale".to_string();
        entry.customer_name = self.partner.clone();
        entry.description = if self.label.is_empty() {
            self.product.clone()
        } else {
            self.label.clone()
        };
        entry.sku = self.sku.clone();
        entry.company_name = self.company.clone();
        entry.document_currency = Some(self.currency.clone()).filter(|c| !c.is_empty());
        entry.document_amount = Some(sign * self.price_subtotal.abs());
        entry.company_amount = company_currency.as_ref().and(self.balance).map(|balance| -balance);
        entry.company_currency = company_currency;
        entry
    }
}

// ============================================================================
// Odoo Client
// ============================================================================

pub struct OdooClient {
    config: OdooConfig,
    http_client: Client,
    retry: RetryPolicy,
    preferred_transport: AtomicUsize,
    request_id: AtomicU64,
    uid: RwLock<Option<i64>>,
}

impl OdooClient {
    pub fn new(config: OdooConfig, retry: RetryPolicy) -> Result<Self> {
        config.validate()?;

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(OdooError::NetworkError)?;

        Ok(Self {
            config,
            http_client,
            retry,
            preferred_transport: AtomicUsize::new(0),
            request_id: AtomicU64::new(1),
            uid: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &OdooConfig {
        &self.config
    }

    /// Transport path that answered last (or the first one before any call).
    pub fn preferred_transport(&self) -> &str {
        let index = self.preferred_transport.load(Ordering::Relaxed);
        self.config
            .transport_paths
            .get(index)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// One JSON-RPC `call`, trying each transport path starting with the
    /// remembered one. 404/405 and non-JSON answers move on to the next path;
    /// anything else is final.
    pub async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
        });

        let paths = &self.config.transport_paths;
        let start = self.preferred_transport.load(Ordering::Relaxed) % paths.len();
        let base = self.config.url.trim_end_matches('/');
        let mut skipped = Vec::new();

        for offset in 0..paths.len() {
            let index = (start + offset) % paths.len();
            let url = format!("{}{}", base, paths[index]);

            let request = self.http_client.post(&url).json(&payload);
            let response = self.retry.send("odoo", request).await?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND || status == StatusCode::METHOD_NOT_ALLOWED {
                tracing::debug!(path = %paths[index], %status, "Odoo transport unavailable, trying next");
                skipped.push(format!("{} ({})", paths[index], status.as_u16()));
                continue;
            }
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                record_upstream_request("odoo", "error");
                return Err(OdooError::ApiError(status, error_text));
            }

            let body = response.bytes().await?;
            let envelope: RpcResponse = match serde_json::from_slice(&body) {
                Ok(envelope) => envelope,
                Err(_) => {
                    tracing::debug!(path = %paths[index], "Odoo transport returned a non-JSON body, trying next");
                    skipped.push(format!("{} (non-JSON)", paths[index]));
                    continue;
                }
            };

            if index != start {
                tracing::info!(path = %paths[index], "Switching preferred Odoo JSON-RPC transport");
            }
            self.preferred_transport.store(index, Ordering::Relaxed);

            if let Some(error) = envelope.error {
                record_upstream_request("odoo", "rpc_error");
                return Err(error.into());
            }
            return Ok(envelope.result.unwrap_or(Value::Null));
        }

        record_upstream_request("odoo", "no_transport");
        Err(OdooError::NoTransport(skipped.join(", ")))
    }

    /// User id for the configured credentials, fetched once per client.
    pub async fn authenticate(&self) -> Result<i64> {
        if let Some(uid) = *self.uid.read().await {
            return Ok(uid);
        }

        let result = self
            .call(
                "common",
                "authenticate",
                json!([self.config.database, self.config.username, self.config.api_key, {}]),
            )
            .await?;

        let uid = value_to_i64(&result).filter(|uid| *uid > 0).ok_or_else(|| {
            OdooError::AuthError(format!(
                "credentials for '{}' were rejected by database '{}'",
                self.config.username, self.config.database
            ))
        })?;

        *self.uid.write().await = Some(uid);
        tracing::info!(uid, database = %self.config.database, "Authenticated against Odoo");
        Ok(uid)
    }

    pub async fn execute_kw(&self, model: &str, method: &str, args: Value, kwargs: Value) -> Result<Value> {
        let uid = self.authenticate().await?;
        self.call(
            "object",
            "execute_kw",
            json!([self.config.database, uid, self.config.api_key, model, method, args, kwargs]),
        )
        .await
    }

    /// Posted customer invoice/credit note product lines with `id > after`.
    pub async fn search_invoice_lines(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        after: i64,
        limit: usize,
    ) -> Result<Vec<OdooInvoiceLine>> {
        let domain = json!([
            ["move_id.move_type", "in", ["out_invoice", "out_refund"]],
            ["parent_state", "=", "posted"],
            ["display_type", "=", "product"],
            ["date", ">=", from.format("%Y-%m-%d").to_string()],
            ["date", "<=", to.format("%Y-%m-%d").to_string()],
            ["id", ">", after],
        ]);
        let kwargs = json!({
            "fields": INVOICE_LINE_FIELDS,
            "order": "id asc",
            "limit": limit,
        });

        let result = self
            .execute_kw("account.move.line", "search_read", json!([domain]), kwargs)
            .await?;

        let records: Vec<Map<String, Value>> = serde_json::from_value(result)?;
        records.iter().map(OdooInvoiceLine::from_record).collect()
    }

    /// Every matching invoice line between `from` and `to`, paged by id.
    pub async fn fetch_invoice_lines(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        pager_config: &PagerConfig,
    ) -> std::result::Result<Vec<OdooInvoiceLine>, PagerError<OdooError>> {
        let source = OdooPageSource { client: self, from, to };
        let lines = pager::fetch_all(&source, pager_config).await?;
        tracing::info!(rows = lines.len(), %from, %to, "Fetched Odoo invoice lines");
        Ok(lines)
    }
}

struct OdooPageSource<'a> {
    client: &'a OdooClient,
    from: NaiveDate,
    to: NaiveDate,
}

impl PageSource for OdooPageSource<'_> {
    type Row = OdooInvoiceLine;
    type Error = OdooError;

    fn system(&self) -> &'static str {
        "odoo"
    }

    async fn fetch_after(&self, after: i64, top: usize) -> Result<Vec<OdooInvoiceLine>> {
        self.client.search_invoice_lines(self.from, self.to, after, top).await
    }

    fn cursor_of(&self, row: &OdooInvoiceLine) -> Option<i64> {
        Some(row.id)
    }
}
