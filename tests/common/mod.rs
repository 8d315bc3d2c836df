// Mock Business Central, Odoo and FX upstreams shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use sales_dashboard::config::AppConfig;

static AFTER_CURSOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"gt (-?\d+)").unwrap());
static DATE_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"ge (\d{4}-\d{2}-\d{2})").unwrap());
static DATE_TO: Lazy<Regex> = Lazy::new(|| Regex::new(r"le (\d{4}-\d{2}-\d{2})").unwrap());
static COMPANY_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Company\('(.*)'\)$").unwrap());

// ============================================================================
// Mock State
// ============================================================================

#[derive(Debug, Default)]
pub struct MockUpstreamState {
    /// Company name -> ledger entries, each with an `Entry_No`
    pub bc_entries: Vec<(String, Vec<Value>)>,
    pub bc_token_requests: usize,
    pub bc_entry_requests: usize,
    /// Number of upcoming ledger requests answered with 503
    pub bc_fail_next: usize,
    pub bc_token_valid: bool,

    pub odoo_lines: Vec<Value>,
    pub odoo_authenticate_calls: usize,
    pub odoo_search_calls: usize,

    /// `BASE:QUOTE` -> rate, same for every date
    pub fx_rates: HashMap<String, f64>,
    pub fx_requests: usize,
    /// Number of upcoming rate requests answered with 408
    pub fx_fail_next: usize,
}

pub type SharedState = Arc<RwLock<MockUpstreamState>>;

pub fn ledger_entry(
    entry_no: i64,
    date: &str,
    entry_type: &str,
    customer: &str,
    posting_group: &str,
    item_no: &str,
    description: &str,
    amount: f64,
    currency: &str,
) -> Value {
    json!({
        "@odata.etag": format!("W/\"{}\"", entry_no),
        "Entry_No": entry_no,
        "Posting_Date": date,
        "Entry_Type": entry_type,
        "Customer_Name": customer,
        "Customer_Posting_Group": posting_group,
        "Item_No": item_no,
        "Description": description,
        "Sales_Amount_Actual": amount,
        "Currency_Code": currency,
    })
}

pub fn invoice_line(
    id: i64,
    date: &str,
    move_type: &str,
    partner: &str,
    product: &str,
    price_subtotal: f64,
    balance: f64,
    currency: &str,
) -> Value {
    json!({
        "id": id,
        "date": date,
        "move_id": [id * 10, format!("INV/2024/{:05}", id)],
        "move_name": format!("INV/2024/{:05}", id),
        "move_type": move_type,
        "partner_id": [7, partner],
        "product_id": [id + 1000, product],
        "name": product,
        "quantity": 1.0,
        "price_subtotal": price_subtotal,
        "balance": balance,
        "currency_id": [2, currency],
        "company_currency_id": [20, "INR"],
        "company_id": [1, "Cronus Odoo"],
    })
}

/// Two Business Central companies, three Odoo lines and two FX pairs.
///
/// FY25 (Apr 2024 - Mar 2025) in INR, intercompany excluded:
/// 1000 + 500 (CRONUS IN) + 100 AED * 22.5 + 50 USD * 83 (CRONUS AE)
/// + 16600 - 4150 + 100 (Odoo) = 20450. FY24 holds a single 300.
pub fn seeded_state() -> MockUpstreamState {
    MockUpstreamState {
        bc_entries: vec![
            (
                "CRONUS IN".to_string(),
                vec![
                    ledger_entry(1, "2024-04-10", "Sale", "Acme Industries", "DOMESTIC", "6204-2RS",
                        "6204 2RS DEEP GROOVE BALL BEARING", 1000.0, ""),
                    ledger_entry(2, "2024-05-02", "Sale", "Bolt Traders", "DOMESTIC", "608-2RS",
                        "608 2RS DEEP GROOVE BALL BEARING", 500.0, ""),
                    ledger_entry(3, "2024-05-20", "Sale", "CRONUS AE", "INTERCO", "608-2RS",
                        "608 2RS DEEP GROOVE BALL BEARING", 700.0, ""),
                    ledger_entry(5, "2024-06-01", "Transfer", "Acme Industries", "DOMESTIC", "608-2RS",
                        "608 2RS DEEP GROOVE BALL BEARING", 999.0, ""),
                    ledger_entry(7, "2023-12-15", "Sale", "Acme Industries", "DOMESTIC", "LM8UU",
                        "LM8UU LINEAR BALL BUSHING", 300.0, ""),
                ],
            ),
            (
                "CRONUS AE".to_string(),
                vec![
                    ledger_entry(10, "2024-04-15", "Sale", "Gulf Motors", "EXPORT", "6201-ZZ",
                        "6201 ZZ DEEP GROOVE BALL BEARING", 100.0, ""),
                    ledger_entry(11, "2024-07-01", "Sale", "Gulf Motors", "EXPORT", "X-999",
                        "CUSTOM MACHINED SPACER", 50.0, "USD"),
                ],
            ),
        ],
        bc_token_valid: true,
        odoo_lines: vec![
            invoice_line(101, "2024-08-05", "out_invoice", "Acme Industries",
                "[6204-2RS] 6204 2RS DEEP GROOVE BALL BEARING", 200.0, -16600.0, "USD"),
            invoice_line(102, "2024-09-10", "out_refund", "Acme Industries",
                "[608-2RS] 608 2RS DEEP GROOVE BALL BEARING", 50.0, 4150.0, "USD"),
            invoice_line(103, "2024-10-01", "out_invoice", "CRONUS AE",
                "[LM8UU] LM8UU LINEAR BALL BUSHING", 100.0, -100.0, "INR"),
        ],
        fx_rates: HashMap::from([("AED:INR".to_string(), 22.5), ("USD:INR".to_string(), 83.0)]),
        ..MockUpstreamState::default()
    }
}

// ============================================================================
// Business Central Mock
// ============================================================================

async fn bc_token(State(state): State<SharedState>) -> Result<Json<Value>, StatusCode> {
    let mut state = state.write().await;
    state.bc_token_requests += 1;

    if !state.bc_token_valid {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(Json(json!({
        "token_type": "Bearer",
        "expires_in": 3599,
        "access_token": format!("mock_bc_token_{}", state.bc_token_requests)
    })))
}

async fn bc_companies(State(state): State<SharedState>) -> Json<Value> {
    let state = state.read().await;

    let companies: Vec<Value> = state
        .bc_entries
        .iter()
        .enumerate()
        .map(|(i, (name, _))| json!({ "id": format!("company-{}", i), "name": name, "displayName": name }))
        .collect();

    Json(json!({ "value": companies }))
}

async fn bc_ledger_entries(
    State(state): State<SharedState>,
    Path((_tenant, _environment, company, _service)): Path<(String, String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.write().await;
    state.bc_entry_requests += 1;

    if state.bc_fail_next > 0 {
        state.bc_fail_next -= 1;
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": { "code": "Unavailable", "message": "try again" } })),
        ));
    }

    let name = COMPANY_SEGMENT
        .captures(&company)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("''", "'"))
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "code": "BadRequest_InvalidSegment", "message": company } })),
        ))?;

    let entries = state
        .bc_entries
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, entries)| entries.clone())
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "code": "BadRequest_NotFound", "message": format!("Company {} not found", name) } })),
        ))?;

    let filter = params.get("$filter").cloned().unwrap_or_default();
    let capture = |re: &Regex| re.captures(&filter).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
    let after: i64 = capture(&AFTER_CURSOR).and_then(|v| v.parse().ok()).unwrap_or(i64::MIN);
    let from = capture(&DATE_FROM);
    let to = capture(&DATE_TO);
    let top: usize = params.get("$top").and_then(|v| v.parse().ok()).unwrap_or(usize::MAX);

    let mut page: Vec<Value> = entries
        .into_iter()
        .filter(|e| e["Entry_No"].as_i64().unwrap_or_default() > after)
        .filter(|e| {
            let date = e["Posting_Date"].as_str().unwrap_or_default();
            from.as_deref().map_or(true, |f| date >= f) && to.as_deref().map_or(true, |t| date <= t)
        })
        .collect();
    page.sort_by_key(|e| e["Entry_No"].as_i64().unwrap_or_default());
    page.truncate(top);

    Ok(Json(json!({
        "@odata.context": "https://mock/$metadata#salesLedgerEntries",
        "value": page
    })))
}

// ============================================================================
// Odoo Mock
// ============================================================================

/// Only `/web/jsonrpc` speaks JSON-RPC; `/odoo/jsonrpc` serves an HTML page
/// and `/jsonrpc` is not routed at all.
async fn odoo_html_page() -> Html<&'static str> {
    Html("<html><body>Odoo login</body></html>")
}

fn domain_value<'a>(domain: &'a Value, field: &str, operator: &str) -> Option<&'a Value> {
    domain.as_array()?.iter().find_map(|clause| {
        let clause = clause.as_array()?;
        (clause.first()?.as_str()? == field && clause.get(1)?.as_str()? == operator).then(|| clause.get(2))?
    })
}

async fn odoo_jsonrpc(State(state): State<SharedState>, Json(payload): Json<Value>) -> Json<Value> {
    let mut state = state.write().await;
    let id = payload["id"].clone();
    let params = &payload["params"];

    let result = match (params["service"].as_str(), params["method"].as_str()) {
        (Some("common"), Some("authenticate")) => {
            state.odoo_authenticate_calls += 1;
            if params["args"][2] == "odoo-api-key" {
                json!(7)
            } else {
                json!(false)
            }
        }
        (Some("object"), Some("execute_kw")) => {
            state.odoo_search_calls += 1;
            let args = &params["args"];
            if args[3] != "account.move.line" || args[4] != "search_read" {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": 200, "message": "Odoo Server Error", "data": { "message": "unexpected model" } }
                }));
            }

            let domain = &args[5][0];
            let after = domain_value(domain, "id", ">").and_then(Value::as_i64).unwrap_or(0);
            let from = domain_value(domain, "date", ">=").and_then(Value::as_str).unwrap_or("0000-00-00");
            let to = domain_value(domain, "date", "<=").and_then(Value::as_str).unwrap_or("9999-99-99");
            let limit = args[6]["limit"].as_u64().unwrap_or(u64::MAX) as usize;

            let mut lines: Vec<Value> = state
                .odoo_lines
                .iter()
                .filter(|l| l["id"].as_i64().map_or(true, |line_id| line_id > after))
                .filter(|l| {
                    let date = l["date"].as_str().unwrap_or_default();
                    date >= from && date <= to
                })
                .cloned()
                .collect();
            lines.sort_by_key(|l| l["id"].as_i64().unwrap_or_default());
            lines.truncate(limit);
            Value::Array(lines)
        }
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": 404, "message": "Method not found" }
            }))
        }
    };

    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

// ============================================================================
// FX Mock
// ============================================================================

async fn fx_historical(
    State(state): State<SharedState>,
    Path(date): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, (StatusCode, &'static str)> {
    let mut state = state.write().await;
    state.fx_requests += 1;

    if state.fx_fail_next > 0 {
        state.fx_fail_next -= 1;
        return Err((StatusCode::REQUEST_TIMEOUT, "request timed out"));
    }

    let base = params.get("from").cloned().unwrap_or_default();
    let quote = params.get("to").cloned().unwrap_or_default();
    let mut rates = serde_json::Map::new();
    if let Some(rate) = state.fx_rates.get(&format!("{}:{}", base, quote)) {
        rates.insert(quote, json!(rate));
    }

    Ok(Json(json!({ "amount": 1.0, "base": base, "date": date, "rates": rates })))
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn create_bc_mock_server(state: SharedState) -> Router {
    Router::new()
        .route("/oauth/token", post(bc_token))
        .route("/:tenant/:environment/api/v2.0/companies", get(bc_companies))
        .route("/:tenant/:environment/ODataV4/:company/:service", get(bc_ledger_entries))
        .with_state(state)
}

pub fn create_odoo_mock_server(state: SharedState) -> Router {
    Router::new()
        .route("/odoo/jsonrpc", post(odoo_html_page))
        .route("/web/jsonrpc", post(odoo_jsonrpc))
        .with_state(state)
}

pub fn create_fx_mock_server(state: SharedState) -> Router {
    Router::new()
        .route("/:date", get(fx_historical))
        .with_state(state)
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub struct MockUpstreams {
    pub bc_url: String,
    pub odoo_url: String,
    pub fx_url: String,
    pub state: SharedState,
}

pub async fn start_mock_servers(seed: MockUpstreamState) -> MockUpstreams {
    let state = Arc::new(RwLock::new(seed));

    let bc_url = serve(create_bc_mock_server(state.clone())).await;
    let odoo_url = serve(create_odoo_mock_server(state.clone())).await;
    let fx_url = serve(create_fx_mock_server(state.clone())).await;

    MockUpstreams {
        bc_url,
        odoo_url,
        fx_url,
        state,
    }
}

// ============================================================================
// Configuration Helpers
// ============================================================================

/// Environment pointing every upstream at the mocks. Small pages force the
/// pager through several batches; retries do not sleep.
pub fn mock_env(mocks: &MockUpstreams) -> HashMap<String, String> {
    let pairs = [
        ("BC_TENANT_ID", "tenant-1".to_string()),
        ("BC_CLIENT_ID", "client".to_string()),
        ("BC_CLIENT_SECRET", "secret".to_string()),
        ("BC_ENVIRONMENT", "Sandbox".to_string()),
        ("BC_API_BASE_URL", mocks.bc_url.clone()),
        ("BC_TOKEN_URL", format!("{}/oauth/token", mocks.bc_url)),
        ("BC_COMPANY_CURRENCIES", "CRONUS AE=AED".to_string()),
        ("BC_PAGE_SIZE", "2".to_string()),
        ("ODOO_URL", mocks.odoo_url.clone()),
        ("ODOO_DB", "cronus".to_string()),
        ("ODOO_USERNAME", "reports@cronus.example".to_string()),
        ("ODOO_API_KEY", "odoo-api-key".to_string()),
        ("FX_API_BASE_URL", mocks.fx_url.clone()),
        ("FX_CONCURRENCY", "2".to_string()),
        ("REPORTING_CURRENCY", "INR".to_string()),
        ("INTERCOMPANY_NAMES", "CRONUS AE,CRONUS IN".to_string()),
        ("DEFAULT_FISCAL_YEARS", "FY24,FY25".to_string()),
        ("HTTP_MAX_RETRIES", "2".to_string()),
        ("HTTP_RETRY_BASE_MS", "0".to_string()),
        ("HTTP_RETRY_MAX_MS", "0".to_string()),
        ("CORS_ORIGINS", "*".to_string()),
    ];
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub fn config_from(env: HashMap<String, String>) -> AppConfig {
    AppConfig::from_source(move |key: &str| env.get(key).cloned()).unwrap()
}

pub fn mock_config(mocks: &MockUpstreams) -> AppConfig {
    config_from(mock_env(mocks))
}
