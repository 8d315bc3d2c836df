// ============================================================================
// Category Classifier
// ============================================================================
//
// Static lookup of product descriptions and SKUs against the category table
// embedded in the binary (data/category_table.tsv).
//
// - CRM rows carry a SKU: exact match of the trimmed uppercase SKU, nothing
//   else.
// - ERP rows carry free text: exact match of the normalized description
//   against the table names, then the first product base code contained in
//   the description, trying longer codes first so "MR672F" wins over "MR67".
//
// Anything unmatched stays `None` and is reported as UNMAPPED.
//
// ============================================================================

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::models::{CategoryRecord, SalesEntry, Source};
use crate::utils::text::{normalize_alnum, normalize_code};

const EMBEDDED_TABLE: &str = include_str!("../../data/category_table.tsv");

#[derive(Debug, Deserialize)]
struct TableRow {
    sku: String,
    name: String,
    master_category: String,
    category: String,
    sub_category: String,
    product_base_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
    by_name: HashMap<String, CategoryRecord>,
    by_sku: HashMap<String, CategoryRecord>,
    /// Normalized base code → record, longest code first
    base_codes: Vec<(String, CategoryRecord)>,
}

impl CategoryTable {
    /// Table compiled into the binary.
    pub fn embedded() -> Result<Self, csv::Error> {
        Self::from_tsv(EMBEDDED_TABLE)
    }

    /// Parse a tab separated table with a header row
    /// (`sku name master_category category sub_category product_base_name`).
    pub fn from_tsv(text: &str) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut entries = Vec::new();
        for row in reader.deserialize::<TableRow>() {
            let row = row?;
            let sku = row.sku;
            entries.push((
                sku,
                CategoryRecord {
                    name: row.name,
                    master_category: row.master_category,
                    category: row.category,
                    sub_category: row.sub_category,
                    product_base_name: row.product_base_name,
                },
            ));
        }

        Ok(Self::from_records(entries))
    }

    /// Build from `(sku, record)` pairs. An empty SKU only feeds the
    /// description lookups. The first record wins for duplicate keys.
    pub fn from_records(entries: Vec<(String, CategoryRecord)>) -> Self {
        let mut table = CategoryTable::default();
        let mut seen_codes = HashSet::new();

        for (sku, record) in entries {
            let sku = normalize_code(&sku);
            if !sku.is_empty() {
                table.by_sku.entry(sku).or_insert_with(|| record.clone());
            }

            let name = normalize_alnum(&record.name);
            if !name.is_empty() {
                table.by_name.entry(name).or_insert_with(|| record.clone());
            }

            let code = normalize_alnum(&record.product_base_name);
            if !code.is_empty() && seen_codes.insert(code.clone()) {
                table.base_codes.push((code, record));
            }
        }

        // Longest first; ties broken alphabetically so the order is stable
        table
            .base_codes
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        tracing::debug!(
            skus = table.by_sku.len(),
            names = table.by_name.len(),
            base_codes = table.base_codes.len(),
            "Category table loaded"
        );

        table
    }

    pub fn classify_sku(&self, sku: &str) -> Option<&CategoryRecord> {
        let key = normalize_code(sku);
        if key.is_empty() {
            return None;
        }
        self.by_sku.get(&key)
    }

    pub fn classify_description(&self, description: &str) -> Option<&CategoryRecord> {
        let normalized = normalize_alnum(description);
        if normalized.is_empty() {
            return None;
        }

        if let Some(record) = self.by_name.get(&normalized) {
            return Some(record);
        }

        self.base_codes
            .iter()
            .find(|(code, _)| normalized.contains(code.as_str()))
            .map(|(_, record)| record)
    }

    /// Lookup path chosen by the row's source system.
    pub fn classify(&self, entry: &SalesEntry) -> Option<&CategoryRecord> {
        match entry.source {
            Source::Crm => self.classify_sku(&entry.sku),
            Source::Erp => self.classify_description(&entry.description),
        }
    }

    /// Attach categories in place; returns how many rows stayed unmapped.
    pub fn classify_all(&self, entries: &mut [SalesEntry]) -> usize {
        let mut unmapped = 0;
        for entry in entries.iter_mut() {
            entry.category = self.classify(entry).cloned();
            if entry.category.is_none() {
                unmapped += 1;
            }
        }
        unmapped
    }

    pub fn len(&self) -> usize {
        self.base_codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sku.is_empty() && self.by_name.is_empty() && self.base_codes.is_empty()
    }
}
