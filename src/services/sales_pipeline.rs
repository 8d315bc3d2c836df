// ============================================================================
// Sales Pipeline
// ============================================================================
//
// fetch (Business Central per company, Odoo) -> adapt to SalesEntry ->
// classify -> resolve currency -> aggregate.
//
// The pipeline owns its clients and caches; nothing here is a module-level
// singleton, so tests build as many independent pipelines as they need.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use thiserror::Error;

use super::category_classifier::CategoryTable;
use super::currency_resolver::{CurrencyResolver, FxRateCache};
use super::erp::{
    adapt_erp_row, BusinessCentralClient, BusinessCentralError, BusinessCentralPageSource, DateFilter, OdooClient,
    OdooError, OdooInvoiceLine,
};
use super::fx_rate_client::FxRateClient;
use super::fy_aggregation::{build_fy_table, filter_entries, time_series, AggregationFilters, IntercompanyRules, Scope};
use super::key_inference::{infer_required_keys, FieldCandidates, FieldRole, KeyInferenceError};
use super::pager::{self, PagerConfig, PagerError};
use crate::models::report::{
    AnalyticsQuery, AnalyticsResponse, FetchDiagnostics, FyTableQuery, FyTableResponse, Granularity, OdooRowsQuery,
    ReportMeta, SourceSelection,
};
use crate::models::{parse_fiscal_years, FiscalYear, SalesEntry};
use crate::utils::sanitize_option_for_log;
use crate::utils::text::{non_empty, normalize_code};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Odoo is not configured")]
    OdooNotConfigured,

    #[error(transparent)]
    BusinessCentral(#[from] BusinessCentralError),

    #[error(transparent)]
    Odoo(#[from] OdooError),

    #[error(transparent)]
    KeyInference(#[from] KeyInferenceError),

    #[error("Business Central paging failed for company '{company}': {source}")]
    BusinessCentralPager {
        company: String,
        source: PagerError<BusinessCentralError>,
    },

    #[error("Odoo paging failed: {0}")]
    OdooPager(#[from] PagerError<OdooError>),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub reporting_currency: String,
    pub intercompany_names: Vec<String>,
    pub intercompany_posting_group_markers: Vec<String>,
    pub default_fiscal_years: Vec<FiscalYear>,
    pub default_entry_types: Vec<String>,
    /// Uppercased company name -> functional currency
    pub company_currencies: HashMap<String, String>,
    pub group_limit: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        let current = FiscalYear::containing(Utc::now().date_naive()).end_year();
        Self {
            reporting_currency: "INR".to_string(),
            intercompany_names: Vec::new(),
            intercompany_posting_group_markers: vec![
                "INTERCO".to_string(),
                "INTER-CO".to_string(),
                "RELATED".to_string(),
            ],
            default_fiscal_years: (current - 2..=current).map(FiscalYear::ending_in).collect(),
            default_entry_types: vec!["Sale".to_string()],
            company_currencies: HashMap::new(),
            group_limit: 50,
        }
    }
}

impl ReportingConfig {
    /// Functional currency of a Business Central company; unlisted companies
    /// book in the reporting currency.
    pub fn company_currency(&self, company: &str) -> &str {
        self.company_currencies
            .get(&normalize_code(company))
            .map(String::as_str)
            .unwrap_or(&self.reporting_currency)
    }

    pub fn intercompany_rules(&self) -> IntercompanyRules {
        IntercompanyRules::new(&self.intercompany_names, &self.intercompany_posting_group_markers)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// What to load from the upstreams for one report.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub service: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub source: SourceSelection,
    pub include_odoo: bool,
}

/// A raw Odoo line next to its classified, currency-resolved canonical row.
#[derive(Debug, Clone)]
pub struct OdooRow {
    pub line: OdooInvoiceLine,
    pub entry: SalesEntry,
}

#[derive(Debug, Clone)]
pub struct OdooRowsReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub rows: Vec<OdooRow>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_date_param(name: &str, raw: Option<&str>) -> Result<Option<NaiveDate>> {
    match non_empty(raw) {
        None => Ok(None),
        Some(value) => NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| PipelineError::BadRequest(format!("Invalid {} '{}', expected YYYY-MM-DD", name, value))),
    }
}

fn parse_source(raw: Option<&str>) -> Result<SourceSelection> {
    raw.unwrap_or_default().parse().map_err(PipelineError::BadRequest)
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct SalesPipeline {
    business_central: BusinessCentralClient,
    odoo: Option<OdooClient>,
    fx_client: FxRateClient,
    fx_cache: Arc<FxRateCache>,
    categories: CategoryTable,
    candidates: FieldCandidates,
    pager: PagerConfig,
    reporting: ReportingConfig,
}

impl SalesPipeline {
    pub fn new(
        business_central: BusinessCentralClient,
        odoo: Option<OdooClient>,
        fx_client: FxRateClient,
        fx_cache: Arc<FxRateCache>,
        categories: CategoryTable,
        pager: PagerConfig,
        reporting: ReportingConfig,
    ) -> Self {
        Self {
            business_central,
            odoo,
            fx_client,
            fx_cache,
            categories,
            candidates: FieldCandidates::default(),
            pager,
            reporting,
        }
    }

    /// Replace the field-name candidates used for key inference.
    pub fn with_candidates(mut self, candidates: FieldCandidates) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn reporting(&self) -> &ReportingConfig {
        &self.reporting
    }

    pub fn has_odoo(&self) -> bool {
        self.odoo.is_some()
    }

    fn service_or_default(&self, requested: Option<&str>) -> Result<String> {
        let service = non_empty(requested).unwrap_or_else(|| self.business_central.config().service.clone());
        if !service.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PipelineError::BadRequest(format!("Invalid service name '{}'", service)));
        }
        Ok(service)
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Every ledger entry of one company within the date window.
    async fn load_company(
        &self,
        company: &str,
        service: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SalesEntry>> {
        let Some(sample) = self.business_central.fetch_sample(company, service).await? else {
            tracing::info!(company, service, "No ledger entries published for company");
            return Ok(Vec::new());
        };

        let keys = infer_required_keys(&sample, &self.candidates)?;
        let cursor_field = keys.require(FieldRole::Cursor)?;
        let date_field = keys.require(FieldRole::PostingDate)?;

        let source = BusinessCentralPageSource {
            client: &self.business_central,
            company,
            service,
            cursor_field,
            date_filter: Some(DateFilter {
                field: date_field.to_string(),
                from,
                to,
            }),
        };

        let rows = pager::fetch_all(&source, &self.pager)
            .await
            .map_err(|err| PipelineError::BusinessCentralPager {
                company: company.to_string(),
                source: err,
            })?;

        let company_currency = self.reporting.company_currency(company);
        tracing::info!(company, rows = rows.len(), currency = company_currency, "Loaded Business Central entries");

        Ok(rows
            .iter()
            .map(|row| adapt_erp_row(row, &keys, company, company_currency))
            .collect())
    }

    async fn load_odoo_lines(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<OdooRow>> {
        let odoo = self.odoo.as_ref().ok_or(PipelineError::OdooNotConfigured)?;
        let fallback_currency = odoo.config().company_currency.as_deref();

        let lines = odoo.fetch_invoice_lines(from, to, &self.pager).await?;
        Ok(lines
            .into_iter()
            .map(|line| {
                let entry = line.to_sales_entry(fallback_currency);
                OdooRow { line, entry }
            })
            .collect())
    }

    /// Fetch, adapt, classify and currency-resolve every row the request
    /// covers.
    pub async fn load_entries(&self, request: &LoadRequest) -> Result<(Vec<SalesEntry>, FetchDiagnostics)> {
        let mut diagnostics = FetchDiagnostics::default();
        let mut entries = Vec::new();

        if request.source.includes_erp() {
            let companies = self.business_central.reporting_companies().await?;
            for company in &companies {
                let rows = self
                    .load_company(company, &request.service, request.from, request.to)
                    .await?;
                diagnostics.erp_rows += rows.len();
                entries.extend(rows);
            }
            diagnostics.companies = companies;
        }

        if request.include_odoo && request.source.includes_crm() {
            if self.odoo.is_some() {
                let rows = self.load_odoo_lines(request.from, request.to).await?;
                diagnostics.crm_rows = rows.len();
                entries.extend(rows.into_iter().map(|row| row.entry));
            } else if request.source == SourceSelection::Odoo {
                return Err(PipelineError::OdooNotConfigured);
            } else {
                tracing::debug!("Odoo not configured, reporting Business Central rows only");
            }
        }

        self.categories.classify_all(&mut entries);

        let fx_report = CurrencyResolver::new(&self.fx_cache, &self.fx_client, &self.reporting.reporting_currency)
            .resolve_entries(&mut entries)
            .await;
        diagnostics.fx_unique_keys = fx_report.unique_keys;
        diagnostics.fx_failed_keys = fx_report.failed;
        diagnostics.unresolved_amounts = fx_report.unresolved_rows;

        Ok((entries, diagnostics))
    }

    // ========================================================================
    // Reports
    // ========================================================================

    fn entry_types(&self, raw: Option<&str>) -> Vec<String> {
        match non_empty(raw) {
            Some(list) => split_list(&list),
            None => self.reporting.default_entry_types.clone(),
        }
    }

    pub async fn fy_table(&self, query: &FyTableQuery) -> Result<FyTableResponse> {
        let fiscal_years = match non_empty(query.fy.as_deref()) {
            Some(list) => parse_fiscal_years(&list).map_err(|e| PipelineError::BadRequest(e.to_string()))?,
            None => self.reporting.default_fiscal_years.clone(),
        };
        let scope = Scope::FiscalYears(fiscal_years.clone());
        let (from, to) = scope
            .date_bounds()
            .ok_or_else(|| PipelineError::BadRequest("At least one fiscal year is required".to_string()))?;

        let source = parse_source(query.source.as_deref())?;
        let service = self.service_or_default(query.service.as_deref())?;
        let include_odoo = query.include_odoo.unwrap_or(true);
        let exclude_intercompany = query.exclude_intercompany.unwrap_or(true);

        let filters = AggregationFilters {
            entry_types: self.entry_types(query.include_entry_types.as_deref()),
            exclude_intercompany,
            customer: non_empty(query.customer.as_deref()),
            description: non_empty(query.description.as_deref()),
            master_category: non_empty(query.master_category.as_deref()),
            category: non_empty(query.category_filter.as_deref()),
            sub_category: non_empty(query.sub_category.as_deref()),
            broad_category: non_empty(query.category.as_deref()),
        };

        tracing::info!(
            service = %service,
            fy = %sanitize_option_for_log(&query.fy),
            customer = %sanitize_option_for_log(&filters.customer),
            description = %sanitize_option_for_log(&filters.description),
            category = %sanitize_option_for_log(&filters.broad_category),
            "Building FY table"
        );

        let request = LoadRequest {
            service: service.clone(),
            from,
            to,
            source,
            include_odoo,
        };
        let (entries, fetch) = self.load_entries(&request).await?;

        let group_limit = query.group_limit.unwrap_or(self.reporting.group_limit);
        let mut table = build_fy_table(
            &entries,
            &fiscal_years,
            &filters,
            &self.reporting.intercompany_rules(),
            group_limit,
        );
        table.debug.fetch = Some(fetch);

        Ok(FyTableResponse {
            meta: ReportMeta {
                service,
                reporting_currency: self.reporting.reporting_currency.clone(),
                source,
                include_odoo,
                exclude_intercompany,
                from,
                to,
                fiscal_years: fiscal_years.iter().map(FiscalYear::label).collect(),
                granularity: None,
                generated_at: Utc::now(),
            },
            table,
        })
    }

    pub async fn sales_analytics(&self, query: &AnalyticsQuery) -> Result<AnalyticsResponse> {
        let today = Utc::now().date_naive();
        let to = parse_date_param("to", query.to.as_deref())?.unwrap_or(today);
        let from = parse_date_param("from", query.from.as_deref())?
            .unwrap_or_else(|| FiscalYear::containing(to).start_date());
        if from > to {
            return Err(PipelineError::BadRequest(format!("'from' ({}) is after 'to' ({})", from, to)));
        }

        let granularity: Granularity = query
            .granularity
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(PipelineError::BadRequest)?;
        let source = parse_source(query.source.as_deref())?;
        let service = self.service_or_default(query.service.as_deref())?;
        let include_odoo = query.include_odoo.unwrap_or(true);
        let exclude_intercompany = query.exclude_intercompany.unwrap_or(true);

        tracing::info!(service = %service, %from, %to, ?granularity, "Building sales analytics");

        let request = LoadRequest {
            service: service.clone(),
            from,
            to,
            source,
            include_odoo,
        };
        let (entries, fetch) = self.load_entries(&request).await?;

        let filters = AggregationFilters {
            entry_types: self.entry_types(query.include_entry_types.as_deref()),
            exclude_intercompany,
            ..AggregationFilters::default()
        };
        let (used, mut debug) = filter_entries(
            &entries,
            &Scope::Range { from, to },
            &filters,
            &self.reporting.intercompany_rules(),
        );
        let points = time_series(&used, from, to, granularity);
        debug.fetch = Some(fetch);

        Ok(AnalyticsResponse {
            meta: ReportMeta {
                service,
                reporting_currency: self.reporting.reporting_currency.clone(),
                source,
                include_odoo,
                exclude_intercompany,
                from,
                to,
                fiscal_years: Vec::new(),
                granularity: Some(granularity),
                generated_at: Utc::now(),
            },
            points,
            debug,
        })
    }

    /// Raw Odoo lines with their currency resolution, for the export sheet.
    pub async fn odoo_rows(&self, query: &OdooRowsQuery) -> Result<OdooRowsReport> {
        let today = Utc::now().date_naive();
        let to = parse_date_param("to", query.to.as_deref())?.unwrap_or(today);
        let from = parse_date_param("from", query.from.as_deref())?
            .unwrap_or_else(|| FiscalYear::containing(to).start_date());
        if from > to {
            return Err(PipelineError::BadRequest(format!("'from' ({}) is after 'to' ({})", from, to)));
        }

        let mut rows = self.load_odoo_lines(from, to).await?;
        let mut entries: Vec<SalesEntry> = rows.iter().map(|row| row.entry.clone()).collect();

        self.categories.classify_all(&mut entries);
        CurrencyResolver::new(&self.fx_cache, &self.fx_client, &self.reporting.reporting_currency)
            .resolve_entries(&mut entries)
            .await;

        for (row, entry) in rows.iter_mut().zip(entries) {
            row.entry = entry;
        }
        tracing::info!(rows = rows.len(), %from, %to, "Prepared Odoo rows export");
        Ok(OdooRowsReport { from, to, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_currency_lookup() {
        let mut config = ReportingConfig::default();
        config.company_currencies.insert("CRONUS AE".to_string(), "AED".to_string());

        assert_eq!(config.company_currency("Cronus AE"), "AED");
        assert_eq!(config.company_currency("CRONUS IN"), "INR");
    }

    #[test]
    fn test_default_fiscal_years_cover_three_years() {
        let config = ReportingConfig::default();
        assert_eq!(config.default_fiscal_years.len(), 3);
        let current = FiscalYear::containing(Utc::now().date_naive());
        assert_eq!(config.default_fiscal_years.last(), Some(&current));
    }

    #[test]
    fn test_parse_date_param() {
        assert_eq!(parse_date_param("from", None).unwrap(), None);
        assert_eq!(parse_date_param("from", Some(" ")).unwrap(), None);
        assert_eq!(
            parse_date_param("from", Some("2024-04-01")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 1)
        );
        assert!(matches!(
            parse_date_param("from", Some("01/04/2024")),
            Err(PipelineError::BadRequest(_))
        ));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("Sale, Return,,"), vec!["Sale", "Return"]);
    }
}
