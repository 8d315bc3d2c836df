use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::category::{CategoryRecord, UNMAPPED};

/// Upstream system that produced a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Business Central ledger entries
    Erp,
    /// Odoo posted customer invoice lines
    Crm,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Erp => "erp",
            Source::Crm => "crm",
        }
    }
}

/// How the reporting-currency amount of a row was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionMethod {
    CompanyCurrency,
    DocumentCurrency,
    FxRate,
    Unresolved,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::CompanyCurrency => "companyCurrency",
            ResolutionMethod::DocumentCurrency => "documentCurrency",
            ResolutionMethod::FxRate => "fxRate",
            ResolutionMethod::Unresolved => "unresolved",
        }
    }
}

/// Canonical sales row. Both upstream adapters produce this shape and the
/// aggregation engine only ever sees this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesEntry {
    pub source: Source,
    /// `None` when the upstream date could not be parsed.
    pub posting_date: Option<NaiveDate>,
    pub entry_type: String,
    /// Amount in the reporting currency; `None` means "could not resolve",
    /// which is different from a zero sale.
    pub amount: Option<f64>,
    pub customer_name: String,
    pub customer_posting_group: String,
    pub description: String,
    pub sku: String,
    pub company_name: String,

    pub document_currency: Option<String>,
    pub document_amount: Option<f64>,
    pub company_currency: Option<String>,
    pub company_amount: Option<f64>,
    pub fx_rate: Option<f64>,
    pub resolution: Option<ResolutionMethod>,

    pub category: Option<CategoryRecord>,
}

impl SalesEntry {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            posting_date: None,
            entry_type: String::new(),
            amount: None,
            customer_name: String::new(),
            customer_posting_group: String::new(),
            description: String::new(),
            sku: String::new(),
            company_name: String::new(),
            document_currency: None,
            document_amount: None,
            company_currency: None,
            company_amount: None,
            fx_rate: None,
            resolution: None,
            category: None,
        }
    }

    pub fn master_category(&self) -> &str {
        self.category.as_ref().map_or(UNMAPPED, |c| c.master_category.as_str())
    }

    pub fn category_name(&self) -> &str {
        self.category.as_ref().map_or(UNMAPPED, |c| c.category.as_str())
    }

    pub fn sub_category(&self) -> &str {
        self.category.as_ref().map_or(UNMAPPED, |c| c.sub_category.as_str())
    }

    pub fn product_base_name(&self) -> &str {
        self.category.as_ref().map_or(UNMAPPED, |c| c.product_base_name.as_str())
    }

    pub fn is_unmapped(&self) -> bool {
        self.category.is_none()
    }
}

/// Parse the date formats seen from both upstreams: `2024-04-15`,
/// `2024-04-15T00:00:00Z`, `2024-04-15 10:22:01`.
pub fn parse_posting_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
