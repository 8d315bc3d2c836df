use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::models::{parse_fiscal_years, FiscalYear};
use crate::services::currency_resolver::FxOverrides;
use crate::services::erp::{BusinessCentralConfig, OdooConfig, DEFAULT_TRANSPORT_PATHS};
use crate::services::fx_rate_client::FxConfig;
use crate::services::pager::PagerConfig;
use crate::services::retry::RetryPolicy;
use crate::services::sales_pipeline::ReportingConfig;
use crate::utils::text::normalize_code;

const DEFAULT_BC_API_BASE_URL: &str = "https://api.businesscentral.dynamics.com/v2.0";
const DEFAULT_BC_SCOPE: &str = "https://api.businesscentral.dynamics.com/.default";
const DEFAULT_BC_SERVICE: &str = "salesLedgerEntries";
const DEFAULT_FX_API_BASE_URL: &str = "https://api.frankfurter.app";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub business_central: BusinessCentralConfig,
    pub odoo: Option<OdooConfig>,
    pub fx: FxConfig,
    pub pager: PagerConfig,
    pub retry: RetryPolicy,
    pub reporting: ReportingConfig,
    pub server_host: String,
    pub server_port: u16,
    pub cors_origins: Vec<String>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `CRONUS AE=AED,CRONUS US=USD` -> uppercased company name -> currency.
fn parse_company_currencies(raw: &str) -> Result<HashMap<String, String>> {
    split_list(raw)
        .into_iter()
        .map(|item| {
            let (company, currency) = item
                .split_once('=')
                .ok_or_else(|| anyhow!("BC_COMPANY_CURRENCIES entry '{}' must look like COMPANY=CUR", item))?;
            Ok((normalize_code(company), normalize_code(currency)))
        })
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_source<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{} must be set", key));
        fn parsed<T: FromStr>(value: Option<String>, default: T) -> T {
            value.and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        let tenant_id = required("BC_TENANT_ID")?;
        let business_central = BusinessCentralConfig {
            token_url: get("BC_TOKEN_URL").unwrap_or_else(|| BusinessCentralConfig::default_token_url(&tenant_id)),
            tenant_id,
            client_id: required("BC_CLIENT_ID")?,
            client_secret: required("BC_CLIENT_SECRET")?,
            environment: get("BC_ENVIRONMENT").unwrap_or_else(|| "Production".to_string()),
            scope: get("BC_SCOPE").unwrap_or_else(|| DEFAULT_BC_SCOPE.to_string()),
            api_base_url: get("BC_API_BASE_URL").unwrap_or_else(|| DEFAULT_BC_API_BASE_URL.to_string()),
            service: get("BC_SERVICE").unwrap_or_else(|| DEFAULT_BC_SERVICE.to_string()),
            companies: get("BC_COMPANIES").map(|v| split_list(&v)).unwrap_or_default(),
        };
        business_central.validate()?;

        let odoo = match get("ODOO_URL") {
            None => None,
            Some(url) => {
                let config = OdooConfig {
                    url,
                    database: required("ODOO_DB")?,
                    username: required("ODOO_USERNAME")?,
                    api_key: required("ODOO_API_KEY")?,
                    company_currency: get("ODOO_COMPANY_CURRENCY").map(|c| normalize_code(&c)),
                    transport_paths: get("ODOO_JSONRPC_PATHS")
                        .map(|v| split_list(&v))
                        .unwrap_or_else(|| DEFAULT_TRANSPORT_PATHS.iter().map(|p| p.to_string()).collect()),
                };
                config.validate()?;
                Some(config)
            }
        };

        let overrides = match get("FX_RATE_OVERRIDES") {
            Some(raw) => FxOverrides::parse(&raw).map_err(|e| anyhow!(e))?,
            None => FxOverrides::default(),
        };
        let fx = FxConfig {
            api_base_url: get("FX_API_BASE_URL").unwrap_or_else(|| DEFAULT_FX_API_BASE_URL.to_string()),
            concurrency: parsed(get("FX_CONCURRENCY"), 4usize).max(1),
            overrides,
        };
        fx.validate()?;

        let mut reporting = ReportingConfig::default();
        if let Some(currency) = get("REPORTING_CURRENCY") {
            reporting.reporting_currency = normalize_code(&currency);
        }
        if let Some(names) = get("INTERCOMPANY_NAMES") {
            reporting.intercompany_names = split_list(&names);
        }
        if let Some(markers) = get("INTERCOMPANY_POSTING_GROUP_MARKERS") {
            reporting.intercompany_posting_group_markers = split_list(&markers);
        }
        if let Some(years) = get("DEFAULT_FISCAL_YEARS") {
            let parsed_years: Vec<FiscalYear> = parse_fiscal_years(&years)?;
            if !parsed_years.is_empty() {
                reporting.default_fiscal_years = parsed_years;
            }
        }
        if let Some(types) = get("DEFAULT_ENTRY_TYPES") {
            reporting.default_entry_types = split_list(&types);
        }
        if let Some(currencies) = get("BC_COMPANY_CURRENCIES") {
            reporting.company_currencies = parse_company_currencies(&currencies)?;
        }
        reporting.group_limit = parsed(get("GROUP_LIMIT"), reporting.group_limit);

        let pager_defaults = PagerConfig::default();
        let pager = PagerConfig {
            batch_size: parsed(get("BC_PAGE_SIZE"), pager_defaults.batch_size).max(1),
            max_batches: parsed(get("BC_MAX_BATCHES"), pager_defaults.max_batches).max(1),
        };

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parsed(get("HTTP_MAX_RETRIES"), retry_defaults.max_retries),
            base_delay: std::time::Duration::from_millis(parsed(
                get("HTTP_RETRY_BASE_MS"),
                retry_defaults.base_delay.as_millis() as u64,
            )),
            max_delay: std::time::Duration::from_millis(parsed(
                get("HTTP_RETRY_MAX_MS"),
                retry_defaults.max_delay.as_millis() as u64,
            )),
        };

        Ok(Self {
            business_central,
            odoo,
            fx,
            pager,
            retry,
            reporting,
            server_host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parsed(get("SERVER_PORT"), 8080),
            cors_origins: get("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]),
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    const MINIMAL: [(&str, &str); 3] = [
        ("BC_TENANT_ID", "tenant-1"),
        ("BC_CLIENT_ID", "client"),
        ("BC_CLIENT_SECRET", "secret"),
    ];

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_source(source(&MINIMAL)).unwrap();

        assert_eq!(config.business_central.environment, "Production");
        assert_eq!(
            config.business_central.token_url,
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
        assert!(config.odoo.is_none());
        assert_eq!(config.fx.api_base_url, DEFAULT_FX_API_BASE_URL);
        assert_eq!(config.reporting.reporting_currency, "INR");
        assert_eq!(config.server_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_injected_source_ignores_process_env() {
        std::env::set_var("BC_PAGE_SIZE", "7");
        std::env::set_var("HTTP_MAX_RETRIES", "0");
        let config = AppConfig::from_source(source(&MINIMAL));
        std::env::remove_var("BC_PAGE_SIZE");
        std::env::remove_var("HTTP_MAX_RETRIES");

        let config = config.unwrap();
        assert_eq!(config.pager.batch_size, 1000);
        assert_eq!(config.pager.max_batches, 500);
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.max_delay, std::time::Duration::from_millis(8000));
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let err = AppConfig::from_source(source(&MINIMAL[..2])).unwrap_err();
        assert!(err.to_string().contains("BC_CLIENT_SECRET"));
    }

    #[test]
    fn test_full_config() {
        let mut pairs = MINIMAL.to_vec();
        pairs.extend([
            ("BC_COMPANIES", "CRONUS IN, CRONUS AE"),
            ("BC_COMPANY_CURRENCIES", "Cronus AE=aed"),
            ("ODOO_URL", "https://odoo.example.com"),
            ("ODOO_DB", "prod"),
            ("ODOO_USERNAME", "api@example.com"),
            ("ODOO_API_KEY", "k"),
            ("FX_RATE_OVERRIDES", "AED:INR=22.6"),
            ("FX_CONCURRENCY", "8"),
            ("INTERCOMPANY_NAMES", "Example Holdings UAE LLC"),
            ("DEFAULT_FISCAL_YEARS", "FY26,FY24"),
            ("GROUP_LIMIT", "10"),
            ("BC_PAGE_SIZE", "250"),
            ("HTTP_RETRY_BASE_MS", "10"),
        ]);
        let config = AppConfig::from_source(source(&pairs)).unwrap();

        assert_eq!(config.business_central.companies, vec!["CRONUS IN", "CRONUS AE"]);
        assert_eq!(config.reporting.company_currency("cronus ae"), "AED");
        assert_eq!(config.odoo.as_ref().unwrap().transport_paths.len(), 3);
        assert_eq!(config.fx.overrides.get("AED", "INR"), Some(22.6));
        assert_eq!(config.fx.concurrency, 8);
        assert_eq!(config.reporting.default_fiscal_years[0].label(), "FY24");
        assert_eq!(config.reporting.group_limit, 10);
        assert_eq!(config.pager.batch_size, 250);
        assert_eq!(config.retry.base_delay, std::time::Duration::from_millis(10));
    }

    #[test]
    fn test_incomplete_odoo_block_is_fatal() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("ODOO_URL", "https://odoo.example.com"));
        assert!(AppConfig::from_source(source(&pairs)).is_err());
    }

    #[test]
    fn test_bad_override_is_fatal() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("FX_RATE_OVERRIDES", "AED-INR"));
        assert!(AppConfig::from_source(source(&pairs)).is_err());
    }
}
