// ============================================================================
// Currency Resolver
// ============================================================================
//
// Turns document/company amounts into the reporting currency:
//
// 1. company currency is the reporting currency -> company amount
// 2. document currency is the reporting currency -> document amount
// 3. otherwise the company (else document) amount times the historical rate
//    for (posting date, currency -> reporting currency)
// 4. nothing usable -> amount stays `None`
//
// Rates are collected per unique (date, pair) first, fetched with a bounded
// number of lookups in flight, and memoized for the life of the process.
// A failed lookup is memoized as unresolved and never aborts the batch.
//
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::future::Future;

use chrono::NaiveDate;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::fx_rate_client::FxError;
use crate::middleware::metrics::record_fx_lookup;
use crate::models::{ResolutionMethod, SalesEntry};
use crate::utils::text::normalize_code;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FxKey {
    pub date: NaiveDate,
    pub base: String,
    pub quote: String,
}

/// Anything that can produce a historical daily rate.
pub trait FxRateProvider: Sync {
    fn fetch_rate(&self, key: &FxKey) -> impl Future<Output = Result<f64, FxError>> + Send;
}

// ============================================================================
// Overrides
// ============================================================================

/// Deployment-specific pinned rates, e.g. for a pair the rate service does
/// not quote.
#[derive(Debug, Clone, Default)]
pub struct FxOverrides {
    pins: HashMap<(String, String), f64>,
}

impl FxOverrides {
    /// Parse `AED:INR=22.6,USD:INR=83`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut overrides = Self::default();

        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (pair, rate) = item
                .split_once('=')
                .ok_or_else(|| format!("FX override '{}' must look like BASE:QUOTE=RATE", item))?;
            let (base, quote) = pair
                .split_once(':')
                .ok_or_else(|| format!("FX override '{}' must look like BASE:QUOTE=RATE", item))?;
            let rate: f64 = rate
                .trim()
                .parse()
                .map_err(|_| format!("FX override '{}' has a non-numeric rate", item))?;
            if !rate.is_finite() || rate <= 0.0 {
                return Err(format!("FX override '{}' must be a positive rate", item));
            }
            overrides = overrides.with_pin(base, quote, rate);
        }

        Ok(overrides)
    }

    pub fn with_pin(mut self, base: &str, quote: &str, rate: f64) -> Self {
        self.pins.insert((normalize_code(base), normalize_code(quote)), rate);
        self
    }

    pub fn get(&self, base: &str, quote: &str) -> Option<f64> {
        self.pins
            .get(&(normalize_code(base), normalize_code(quote)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

// ============================================================================
// Rate Memo
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FxBatchReport {
    pub unique_keys: usize,
    pub overridden: usize,
    pub from_cache: usize,
    pub fetched: usize,
    pub failed: usize,
    pub unresolved_rows: usize,
}

/// Process-wide memo of historical rates. `None` marks a lookup that failed.
pub struct FxRateCache {
    memo: DashMap<FxKey, Option<f64>>,
    overrides: FxOverrides,
    concurrency: usize,
}

impl FxRateCache {
    pub fn new(overrides: FxOverrides, concurrency: usize) -> Self {
        Self {
            memo: DashMap::new(),
            overrides,
            concurrency: concurrency.max(1),
        }
    }

    /// Rate for `key` from the overrides or the memo, without any I/O.
    pub fn lookup(&self, key: &FxKey) -> Option<f64> {
        self.overrides
            .get(&key.base, &key.quote)
            .or_else(|| self.memo.get(key).and_then(|entry| *entry))
    }

    pub fn is_memoized(&self, key: &FxKey) -> bool {
        self.memo.contains_key(key)
    }

    /// Make sure every key has been looked up once. Unique keys missing from
    /// the memo are fetched with at most `concurrency` requests in flight.
    pub async fn prefetch<P: FxRateProvider>(&self, provider: &P, keys: &[FxKey]) -> FxBatchReport {
        let mut seen = HashSet::new();
        let unique: Vec<&FxKey> = keys.iter().filter(|k| seen.insert(*k)).collect();

        let mut report = FxBatchReport {
            unique_keys: unique.len(),
            ..FxBatchReport::default()
        };

        let mut pending = Vec::new();
        for key in unique {
            if self.overrides.get(&key.base, &key.quote).is_some() {
                record_fx_lookup("override");
                report.overridden += 1;
            } else if self.memo.contains_key(key) {
                record_fx_lookup("hit");
                report.from_cache += 1;
            } else {
                record_fx_lookup("miss");
                pending.push(key.clone());
            }
        }

        let results: Vec<(FxKey, Result<f64, FxError>)> = stream::iter(pending)
            .map(move |key: FxKey| async move {
                let result = provider.fetch_rate(&key).await;
                (key, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for (key, result) in results {
            match result {
                Ok(rate) if rate.is_finite() && rate > 0.0 => {
                    self.memo.insert(key, Some(rate));
                    report.fetched += 1;
                }
                Ok(rate) => {
                    tracing::warn!(date = %key.date, base = %key.base, quote = %key.quote, rate, "FX service returned an unusable rate");
                    record_fx_lookup("failed");
                    self.memo.insert(key, None);
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(date = %key.date, base = %key.base, quote = %key.quote, error = %e, "FX lookup failed, rows stay unresolved");
                    record_fx_lookup("failed");
                    self.memo.insert(key, None);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Rates for `keys`, index for index.
    pub async fn resolve_batch<P: FxRateProvider>(
        &self,
        provider: &P,
        keys: &[FxKey],
    ) -> (Vec<Option<f64>>, FxBatchReport) {
        let report = self.prefetch(provider, keys).await;
        let rates = keys.iter().map(|key| self.lookup(key)).collect();
        (rates, report)
    }
}

// ============================================================================
// Per-row resolution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub amount: Option<f64>,
    pub method: ResolutionMethod,
    pub rate: Option<f64>,
}

fn is_currency(currency: &Option<String>, wanted: &str) -> bool {
    currency
        .as_deref()
        .map(normalize_code)
        .is_some_and(|c| c == wanted)
}

fn direct_amount(entry: &SalesEntry, reporting: &str) -> Option<(f64, ResolutionMethod)> {
    if is_currency(&entry.company_currency, reporting) {
        if let Some(amount) = entry.company_amount {
            return Some((amount, ResolutionMethod::CompanyCurrency));
        }
    }
    if is_currency(&entry.document_currency, reporting) {
        if let Some(amount) = entry.document_amount {
            return Some((amount, ResolutionMethod::DocumentCurrency));
        }
    }
    None
}

/// Best non-reporting (currency, amount) pair: company side first.
fn foreign_amount(entry: &SalesEntry) -> Option<(String, f64)> {
    let company = entry
        .company_currency
        .as_deref()
        .map(normalize_code)
        .filter(|c| !c.is_empty())
        .zip(entry.company_amount);

    company.or_else(|| {
        entry
            .document_currency
            .as_deref()
            .map(normalize_code)
            .filter(|c| !c.is_empty())
            .zip(entry.document_amount)
    })
}

/// FX key a row needs, or `None` when it resolves without a rate (or cannot
/// resolve at all).
pub fn fx_key_for(entry: &SalesEntry, reporting_currency: &str) -> Option<FxKey> {
    let reporting = normalize_code(reporting_currency);
    if direct_amount(entry, &reporting).is_some() {
        return None;
    }
    let (currency, _) = foreign_amount(entry)?;
    Some(FxKey {
        date: entry.posting_date?,
        base: currency,
        quote: reporting,
    })
}

pub fn resolve_amount<F>(entry: &SalesEntry, reporting_currency: &str, rate_of: F) -> Resolution
where
    F: Fn(&FxKey) -> Option<f64>,
{
    let reporting = normalize_code(reporting_currency);

    if let Some((amount, method)) = direct_amount(entry, &reporting) {
        return Resolution {
            amount: Some(amount),
            method,
            rate: None,
        };
    }

    let converted = foreign_amount(entry).and_then(|(currency, amount)| {
        let key = FxKey {
            date: entry.posting_date?,
            base: currency,
            quote: reporting.clone(),
        };
        rate_of(&key).map(|rate| (amount * rate, rate))
    });

    match converted {
        Some((amount, rate)) => Resolution {
            amount: Some(amount),
            method: ResolutionMethod::FxRate,
            rate: Some(rate),
        },
        None => Resolution {
            amount: None,
            method: ResolutionMethod::Unresolved,
            rate: None,
        },
    }
}

/// Resolves a whole batch of rows against one rate memo and provider.
pub struct CurrencyResolver<'a, P: FxRateProvider> {
    cache: &'a FxRateCache,
    provider: &'a P,
    reporting_currency: &'a str,
}

impl<'a, P: FxRateProvider> CurrencyResolver<'a, P> {
    pub fn new(cache: &'a FxRateCache, provider: &'a P, reporting_currency: &'a str) -> Self {
        Self {
            cache,
            provider,
            reporting_currency,
        }
    }

    pub async fn resolve_entries(&self, entries: &mut [SalesEntry]) -> FxBatchReport {
        let keys: Vec<FxKey> = entries
            .iter()
            .filter_map(|entry| fx_key_for(entry, self.reporting_currency))
            .collect();

        let mut report = self.cache.prefetch(self.provider, &keys).await;

        for entry in entries.iter_mut() {
            let resolution = resolve_amount(entry, self.reporting_currency, |key| self.cache.lookup(key));
            entry.amount = resolution.amount;
            entry.fx_rate = resolution.rate;
            entry.resolution = Some(resolution.method);
            if resolution.amount.is_none() {
                report.unresolved_rows += 1;
            }
        }

        tracing::info!(
            rows = entries.len(),
            unique_keys = report.unique_keys,
            fetched = report.fetched,
            cached = report.from_cache,
            overridden = report.overridden,
            failed = report.failed,
            unresolved = report.unresolved_rows,
            "Currency resolution finished"
        );

        report
    }
}
