// ============================================================================
// Report Models - query parameters and JSON payloads of the reporting API
// ============================================================================

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Query Parameters
// ============================================================================

/// `GET /fy-table` and `GET /fy-table.xlsx`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FyTableQuery {
    pub service: Option<String>,
    /// Comma separated, e.g. `FY24,FY25,FY26`
    pub fy: Option<String>,
    /// Comma separated entry types, e.g. `Sale`
    pub include_entry_types: Option<String>,
    pub exclude_intercompany: Option<bool>,
    pub include_odoo: Option<bool>,
    /// `all` | `bc` | `odoo`
    pub source: Option<String>,
    pub customer: Option<String>,
    pub description: Option<String>,
    /// Broad filter over every category field
    pub category: Option<String>,
    pub master_category: Option<String>,
    /// Filter on the category field alone
    pub category_filter: Option<String>,
    pub sub_category: Option<String>,
    pub group_limit: Option<usize>,
}

/// `GET /sales-analytics`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub service: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub granularity: Option<String>,
    pub include_entry_types: Option<String>,
    pub exclude_intercompany: Option<bool>,
    pub include_odoo: Option<bool>,
    pub source: Option<String>,
}

/// `GET /odoo-rows.xlsx`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OdooRowsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Which upstreams feed a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSelection {
    #[default]
    All,
    Bc,
    Odoo,
}

impl SourceSelection {
    pub fn includes_erp(&self) -> bool {
        matches!(self, SourceSelection::All | SourceSelection::Bc)
    }

    pub fn includes_crm(&self) -> bool {
        matches!(self, SourceSelection::All | SourceSelection::Odoo)
    }
}

impl FromStr for SourceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(SourceSelection::All),
            "bc" | "erp" => Ok(SourceSelection::Bc),
            "odoo" | "crm" => Ok(SourceSelection::Odoo),
            other => Err(format!("Invalid source '{}'. Must be 'all', 'bc' or 'odoo'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Month,
    Quarter,
    Year,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "month" => Ok(Granularity::Month),
            "quarter" => Ok(Granularity::Quarter),
            "year" => Ok(Granularity::Year),
            other => Err(format!(
                "Invalid granularity '{}'. Must be 'month', 'quarter' or 'year'",
                other
            )),
        }
    }
}

// ============================================================================
// Aggregation Output
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotal {
    pub key: String,
    pub amount: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupViews {
    pub by_company: Vec<GroupTotal>,
    pub by_customer: Vec<GroupTotal>,
    pub by_description: Vec<GroupTotal>,
    pub by_category: Vec<GroupTotal>,
    pub by_master_category: Vec<GroupTotal>,
    pub by_sub_category: Vec<GroupTotal>,
    pub by_product_base_name: Vec<GroupTotal>,
}

impl GroupViews {
    /// Sheet title and rows, in export order.
    pub fn named(&self) -> [(&'static str, &[GroupTotal]); 7] {
        [
            ("By Company", self.by_company.as_slice()),
            ("By Customer", self.by_customer.as_slice()),
            ("By Description", self.by_description.as_slice()),
            ("By Category", self.by_category.as_slice()),
            ("By Master Category", self.by_master_category.as_slice()),
            ("By Sub Category", self.by_sub_category.as_slice()),
            ("By Product Base Name", self.by_product_base_name.as_slice()),
        ]
    }
}

/// Upstream-side counters collected while loading rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchDiagnostics {
    pub companies: Vec<String>,
    pub erp_rows: usize,
    pub crm_rows: usize,
    pub fx_unique_keys: usize,
    pub fx_failed_keys: usize,
    pub unresolved_amounts: usize,
}

/// Per-stage counters of the aggregation filter chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub input_rows: usize,
    pub used_rows: usize,
    pub skipped_wrong_type: usize,
    pub skipped_bad_date: usize,
    pub skipped_outside_range: usize,
    pub skipped_intercompany: usize,
    pub skipped_customer_filter: usize,
    pub skipped_description_filter: usize,
    pub skipped_master_category_filter: usize,
    pub skipped_category_filter: usize,
    pub skipped_sub_category_filter: usize,
    pub skipped_broad_category_filter: usize,
    /// Used rows without a category match
    pub unmapped_category: usize,
    /// Used rows whose amount could not be resolved (counted as zero)
    pub unresolved_amount: usize,
    /// Used rows with NaN/Infinity amounts (coerced to zero)
    pub non_finite_amount: usize,
    /// CRM rows that match the intercompany list; they are not excluded
    pub crm_intercompany_matches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchDiagnostics>,
}

impl Diagnostics {
    pub fn skipped_total(&self) -> usize {
        self.skipped_wrong_type
            + self.skipped_bad_date
            + self.skipped_outside_range
            + self.skipped_intercompany
            + self.skipped_customer_filter
            + self.skipped_description_filter
            + self.skipped_master_category_filter
            + self.skipped_category_filter
            + self.skipped_sub_category_filter
            + self.skipped_broad_category_filter
    }
}

/// One pivot row: a fiscal month and its amount under each FY column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FyTableRow {
    pub quarter: String,
    pub month: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FyTable {
    pub columns: Vec<String>,
    pub rows: Vec<FyTableRow>,
    pub totals: BTreeMap<String, f64>,
    pub groups: GroupViews,
    pub debug: Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeta {
    pub service: String,
    pub reporting_currency: String,
    pub source: SourceSelection,
    pub include_odoo: bool,
    pub exclude_intercompany: bool,
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fiscal_years: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FyTableResponse {
    pub meta: ReportMeta,
    pub table: FyTable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsPoint {
    pub period: String,
    pub amount: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsResponse {
    pub meta: ReportMeta,
    pub points: Vec<AnalyticsPoint>,
    pub debug: Diagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_selection_parse() {
        assert_eq!("".parse::<SourceSelection>().unwrap(), SourceSelection::All);
        assert_eq!("BC".parse::<SourceSelection>().unwrap(), SourceSelection::Bc);
        assert_eq!("odoo".parse::<SourceSelection>().unwrap(), SourceSelection::Odoo);
        assert!("sap".parse::<SourceSelection>().is_err());
        assert!(SourceSelection::All.includes_crm());
        assert!(!SourceSelection::Bc.includes_crm());
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!("Quarter".parse::<Granularity>().unwrap(), Granularity::Quarter);
        assert!("week".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_fy_row_flattens_columns() {
        let mut values = BTreeMap::new();
        values.insert("FY25".to_string(), 100.0);
        let row = FyTableRow {
            quarter: "FQ1".to_string(),
            month: "Apr".to_string(),
            values,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["quarter"], "FQ1");
        assert_eq!(json["FY25"], 100.0);
    }
}
