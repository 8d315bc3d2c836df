// ============================================================================
// FY Bucketing / Aggregation Engine
// ============================================================================
//
// Pure functions over canonical rows. Every row walks the same filter chain
// and stops at the first stage it fails, incrementing that stage's counter:
//
//   entry type -> posting date -> scope -> intercompany -> customer
//   -> description -> master category -> category -> sub category -> broad
//
// Rows that pass feed the FY x month pivot, the group-by views and the
// time series. Output does not depend on input order.
//
// ============================================================================

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};

use crate::models::report::{AnalyticsPoint, Diagnostics, FyTable, FyTableRow, Granularity, GroupTotal, GroupViews};
use crate::models::{FiscalMonth, FiscalYear, SalesEntry, Source, FISCAL_MONTHS};
use crate::utils::text::{contains_ci, normalize_alnum};

const BLANK_KEY: &str = "(blank)";

/// Which posting dates a report covers.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    FiscalYears(Vec<FiscalYear>),
    Range { from: NaiveDate, to: NaiveDate },
}

impl Scope {
    pub fn contains(&self, date: NaiveDate) -> bool {
        match self {
            Scope::FiscalYears(years) => years.iter().any(|fy| fy.contains(date)),
            Scope::Range { from, to } => *from <= date && date <= *to,
        }
    }

    /// Earliest and latest date in scope, used for upstream date filters.
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Scope::FiscalYears(years) => {
                let first = years.iter().min()?;
                let last = years.iter().max()?;
                Some((first.start_date(), last.end_date()))
            }
            Scope::Range { from, to } => Some((*from, *to)),
        }
    }
}

/// Related-party detection: normalized customer name in the list, or a
/// posting group containing one of the markers.
#[derive(Debug, Clone, Default)]
pub struct IntercompanyRules {
    names: HashSet<String>,
    posting_group_markers: Vec<String>,
}

impl IntercompanyRules {
    pub fn new<S: AsRef<str>>(names: &[S], posting_group_markers: &[S]) -> Self {
        Self {
            names: names
                .iter()
                .map(|n| normalize_alnum(n.as_ref()))
                .filter(|n| !n.is_empty())
                .collect(),
            posting_group_markers: posting_group_markers
                .iter()
                .map(|m| m.as_ref().trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, entry: &SalesEntry) -> bool {
        self.names.contains(&normalize_alnum(&entry.customer_name))
            || (!entry.customer_posting_group.trim().is_empty()
                && self
                    .posting_group_markers
                    .iter()
                    .any(|marker| contains_ci(&entry.customer_posting_group, marker)))
    }
}

/// User-selected row filters. `None`/empty means "no filter".
#[derive(Debug, Clone, Default)]
pub struct AggregationFilters {
    pub entry_types: Vec<String>,
    pub exclude_intercompany: bool,
    pub customer: Option<String>,
    pub description: Option<String>,
    pub master_category: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    /// Matches master category, category, sub category or base product name
    pub broad_category: Option<String>,
}

fn passes(value: &str, filter: &Option<String>) -> bool {
    filter.as_deref().map_or(true, |needle| contains_ci(value, needle))
}

/// Amount that goes into sums: unresolved and non-finite amounts count as 0.
pub fn effective_amount(entry: &SalesEntry) -> f64 {
    entry.amount.filter(|a| a.is_finite()).unwrap_or(0.0)
}

/// Run the filter chain. Returns the surviving rows and the stage counters.
pub fn filter_entries<'a>(
    entries: &'a [SalesEntry],
    scope: &Scope,
    filters: &AggregationFilters,
    intercompany: &IntercompanyRules,
) -> (Vec<&'a SalesEntry>, Diagnostics) {
    let mut diagnostics = Diagnostics {
        input_rows: entries.len(),
        ..Diagnostics::default()
    };
    let mut used = Vec::with_capacity(entries.len());

    for entry in entries {
        if !filters.entry_types.is_empty()
            && !filters
                .entry_types
                .iter()
                .any(|t| t.trim().eq_ignore_ascii_case(entry.entry_type.trim()))
        {
            diagnostics.skipped_wrong_type += 1;
            continue;
        }

        let Some(date) = entry.posting_date else {
            diagnostics.skipped_bad_date += 1;
            continue;
        };

        if !scope.contains(date) {
            diagnostics.skipped_outside_range += 1;
            continue;
        }

        if intercompany.matches(entry) {
            match entry.source {
                Source::Erp if filters.exclude_intercompany => {
                    diagnostics.skipped_intercompany += 1;
                    continue;
                }
                Source::Crm => diagnostics.crm_intercompany_matches += 1,
                Source::Erp => {}
            }
        }

        if !passes(&entry.customer_name, &filters.customer) {
            diagnostics.skipped_customer_filter += 1;
            continue;
        }
        if !passes(&entry.description, &filters.description) {
            diagnostics.skipped_description_filter += 1;
            continue;
        }
        if !passes(entry.master_category(), &filters.master_category) {
            diagnostics.skipped_master_category_filter += 1;
            continue;
        }
        if !passes(entry.category_name(), &filters.category) {
            diagnostics.skipped_category_filter += 1;
            continue;
        }
        if !passes(entry.sub_category(), &filters.sub_category) {
            diagnostics.skipped_sub_category_filter += 1;
            continue;
        }
        if let Some(needle) = filters.broad_category.as_deref() {
            let hit = [
                entry.master_category(),
                entry.category_name(),
                entry.sub_category(),
                entry.product_base_name(),
            ]
            .iter()
            .any(|field| contains_ci(field, needle));
            if !hit {
                diagnostics.skipped_broad_category_filter += 1;
                continue;
            }
        }

        diagnostics.used_rows += 1;
        if entry.is_unmapped() {
            diagnostics.unmapped_category += 1;
        }
        match entry.amount {
            None => diagnostics.unresolved_amount += 1,
            Some(a) if !a.is_finite() => diagnostics.non_finite_amount += 1,
            Some(_) => {}
        }
        used.push(entry);
    }

    (used, diagnostics)
}

/// Sum and count per key, largest amount first (ties by key), at most
/// `limit` entries when `limit > 0`.
pub fn group_totals<'a, F>(entries: &[&'a SalesEntry], key_of: F, limit: usize) -> Vec<GroupTotal>
where
    F: Fn(&'a SalesEntry) -> &'a str,
{
    let mut groups: HashMap<&str, (f64, usize)> = HashMap::new();
    for entry in entries {
        let key = match key_of(*entry).trim() {
            "" => BLANK_KEY,
            key => key,
        };
        let slot = groups.entry(key).or_insert((0.0, 0));
        slot.0 += effective_amount(entry);
        slot.1 += 1;
    }

    let mut totals: Vec<GroupTotal> = groups
        .into_iter()
        .map(|(key, (amount, count))| GroupTotal {
            key: key.to_string(),
            amount,
            count,
        })
        .collect();
    totals.sort_by(|a, b| b.amount.total_cmp(&a.amount).then_with(|| a.key.cmp(&b.key)));
    if limit > 0 {
        totals.truncate(limit);
    }
    totals
}

pub fn build_group_views(entries: &[&SalesEntry], limit: usize) -> GroupViews {
    GroupViews {
        by_company: group_totals(entries, |e| e.company_name.as_str(), limit),
        by_customer: group_totals(entries, |e| e.customer_name.as_str(), limit),
        by_description: group_totals(entries, |e| e.description.as_str(), limit),
        by_category: group_totals(entries, SalesEntry::category_name, limit),
        by_master_category: group_totals(entries, SalesEntry::master_category, limit),
        by_sub_category: group_totals(entries, SalesEntry::sub_category, limit),
        by_product_base_name: group_totals(entries, SalesEntry::product_base_name, limit),
    }
}

/// Fiscal-year x month pivot over `fiscal_years`, plus group views and
/// diagnostics.
pub fn build_fy_table(
    entries: &[SalesEntry],
    fiscal_years: &[FiscalYear],
    filters: &AggregationFilters,
    intercompany: &IntercompanyRules,
    group_limit: usize,
) -> FyTable {
    let scope = Scope::FiscalYears(fiscal_years.to_vec());
    let (used, diagnostics) = filter_entries(entries, &scope, filters, intercompany);

    let columns: Vec<String> = fiscal_years.iter().map(FiscalYear::label).collect();
    let zeroes: BTreeMap<String, f64> = columns.iter().map(|c| (c.clone(), 0.0)).collect();

    let mut rows: Vec<FyTableRow> = FISCAL_MONTHS
        .iter()
        .map(|month| FyTableRow {
            quarter: month.quarter_label(),
            month: month.name().to_string(),
            values: zeroes.clone(),
        })
        .collect();
    let mut totals = zeroes;

    for entry in &used {
        let Some(date) = entry.posting_date else {
            continue;
        };
        let column = FiscalYear::containing(date).label();
        let amount = effective_amount(entry);

        if let Some(cell) = rows[FiscalMonth::of(date).index()].values.get_mut(&column) {
            *cell += amount;
        }
        if let Some(total) = totals.get_mut(&column) {
            *total += amount;
        }
    }

    tracing::debug!(
        input = diagnostics.input_rows,
        used = diagnostics.used_rows,
        skipped = diagnostics.skipped_total(),
        unmapped = diagnostics.unmapped_category,
        unresolved = diagnostics.unresolved_amount,
        "Built FY table"
    );

    FyTable {
        columns,
        rows,
        totals,
        groups: build_group_views(&used, group_limit),
        debug: diagnostics,
    }
}

/// `2024-04`, `FY25-Q1` or `FY25`.
pub fn period_label(date: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Month => date.format("%Y-%m").to_string(),
        Granularity::Quarter => format!(
            "{}-Q{}",
            FiscalYear::containing(date).label(),
            FiscalMonth::of(date).quarter()
        ),
        Granularity::Year => FiscalYear::containing(date).label(),
    }
}

/// Every period touched between `from` and `to`, chronologically.
fn periods_between(from: NaiveDate, to: NaiveDate, granularity: Granularity) -> Vec<String> {
    let mut periods: Vec<String> = Vec::new();
    let mut cursor = from.with_day(1).unwrap_or(from);

    while cursor <= to {
        let label = period_label(cursor, granularity);
        if periods.last() != Some(&label) {
            periods.push(label);
        }
        cursor = match cursor.checked_add_months(chrono::Months::new(1)) {
            Some(next) => next,
            None => break,
        };
    }
    periods
}

/// Time series of used rows between `from` and `to`, zero-filled.
pub fn time_series(entries: &[&SalesEntry], from: NaiveDate, to: NaiveDate, granularity: Granularity) -> Vec<AnalyticsPoint> {
    let mut points: Vec<AnalyticsPoint> = periods_between(from, to, granularity)
        .into_iter()
        .map(|period| AnalyticsPoint {
            period,
            amount: 0.0,
            count: 0,
        })
        .collect();
    let index: HashMap<String, usize> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (p.period.clone(), i))
        .collect();

    for entry in entries {
        let Some(date) = entry.posting_date else {
            continue;
        };
        if let Some(&i) = index.get(&period_label(date, granularity)) {
            points[i].amount += effective_amount(entry);
            points[i].count += 1;
        }
    }
    points
}
