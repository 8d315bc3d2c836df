// ============================================================================
// Spreadsheet Export
// ============================================================================
//
// In-memory xlsx workbooks for the report endpoints:
//
// - FY table: "FY Table" pivot with a totals row, one sheet per group view,
//   "Debug" with the diagnostics counters and request metadata.
// - Odoo rows: one line per invoice line with the currency resolution that
//   was applied.
//
// ============================================================================

use rust_xlsxwriter::{Format, FormatAlign, Workbook, Worksheet, XlsxError};
use serde_json::Value;
use thiserror::Error;

use crate::models::report::{FyTableResponse, GroupTotal, ReportMeta};
use crate::services::sales_pipeline::OdooRow;

pub const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const AMOUNT_FORMAT: &str = "#,##0.00;[Red]-#,##0.00";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Spreadsheet error: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;

struct Formats {
    header: Format,
    amount: Format,
    total_label: Format,
    total_amount: Format,
}

impl Formats {
    fn new() -> Self {
        Self {
            header: Format::new().set_bold().set_align(FormatAlign::Center),
            amount: Format::new().set_num_format(AMOUNT_FORMAT),
            total_label: Format::new().set_bold(),
            total_amount: Format::new().set_bold().set_num_format(AMOUNT_FORMAT),
        }
    }
}

fn write_header(sheet: &mut Worksheet, headers: &[&str], formats: &Formats) -> Result<()> {
    for (col, title) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &formats.header)?;
    }
    sheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn write_optional_number(sheet: &mut Worksheet, row: u32, col: u16, value: Option<f64>, format: &Format) -> Result<()> {
    if let Some(number) = value.filter(|n| n.is_finite()) {
        sheet.write_number_with_format(row, col, number, format)?;
    }
    Ok(())
}

/// File name for an FY table download, e.g. `fy-table-FY24-FY26.xlsx`.
pub fn fy_table_filename(meta: &ReportMeta) -> String {
    match (meta.fiscal_years.first(), meta.fiscal_years.last()) {
        (Some(first), Some(last)) if first != last => format!("fy-table-{}-{}.xlsx", first, last),
        (Some(only), _) => format!("fy-table-{}.xlsx", only),
        _ => "fy-table.xlsx".to_string(),
    }
}

pub fn odoo_rows_filename(meta_from: chrono::NaiveDate, meta_to: chrono::NaiveDate) -> String {
    format!("odoo-rows-{}-{}.xlsx", meta_from.format("%Y%m%d"), meta_to.format("%Y%m%d"))
}

// ============================================================================
// FY Table Workbook
// ============================================================================

pub fn fy_table_workbook(report: &FyTableResponse) -> Result<Vec<u8>> {
    let formats = Formats::new();
    let mut workbook = Workbook::new();
    let table = &report.table;

    {
        let sheet = workbook.add_worksheet().set_name("FY Table")?;
        let mut headers = vec!["Quarter", "Month"];
        headers.extend(table.columns.iter().map(String::as_str));
        write_header(sheet, &headers, &formats)?;

        for (i, row) in table.rows.iter().enumerate() {
            let r = i as u32 + 1;
            sheet.write_string(r, 0, &row.quarter)?;
            sheet.write_string(r, 1, &row.month)?;
            for (c, column) in table.columns.iter().enumerate() {
                let value = row.values.get(column).copied().unwrap_or(0.0);
                sheet.write_number_with_format(r, c as u16 + 2, value, &formats.amount)?;
            }
        }

        let total_row = table.rows.len() as u32 + 1;
        sheet.write_string_with_format(total_row, 0, "Total", &formats.total_label)?;
        for (c, column) in table.columns.iter().enumerate() {
            let value = table.totals.get(column).copied().unwrap_or(0.0);
            sheet.write_number_with_format(total_row, c as u16 + 2, value, &formats.total_amount)?;
        }
        sheet.set_column_width(0, 10)?;
        sheet.set_column_width(1, 10)?;
        for c in 0..table.columns.len() {
            sheet.set_column_width(c as u16 + 2, 18)?;
        }
    }

    for (name, groups) in table.groups.named() {
        let sheet = workbook.add_worksheet().set_name(name)?;
        write_group_sheet(sheet, groups, &formats)?;
    }

    {
        let sheet = workbook.add_worksheet().set_name("Debug")?;
        write_header(sheet, &["Key", "Value"], &formats)?;

        let mut r = 1;
        let mut pairs: Vec<(String, String)> = Vec::new();
        flatten_json("", &serde_json::to_value(&report.meta)?, &mut pairs);
        flatten_json("", &serde_json::to_value(&table.debug)?, &mut pairs);
        for (key, value) in pairs {
            sheet.write_string(r, 0, &key)?;
            match value.parse::<f64>() {
                Ok(number) if !value.is_empty() => sheet.write_number(r, 1, number)?,
                _ => sheet.write_string(r, 1, &value)?,
            };
            r += 1;
        }
        sheet.set_column_width(0, 32)?;
        sheet.set_column_width(1, 40)?;
    }

    Ok(workbook.save_to_buffer()?)
}

fn write_group_sheet(sheet: &mut Worksheet, groups: &[GroupTotal], formats: &Formats) -> Result<()> {
    write_header(sheet, &["Key", "Amount", "Rows"], formats)?;
    for (i, group) in groups.iter().enumerate() {
        let r = i as u32 + 1;
        sheet.write_string(r, 0, &group.key)?;
        sheet.write_number_with_format(r, 1, group.amount, &formats.amount)?;
        sheet.write_number(r, 2, group.count as f64)?;
    }
    sheet.set_column_width(0, 40)?;
    sheet.set_column_width(1, 18)?;
    Ok(())
}

/// `{"a": {"b": 1}}` -> `[("a.b", "1")]`, arrays joined with commas.
fn flatten_json(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_json(&path, inner, out);
            }
        }
        Value::Array(items) => {
            let joined: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            out.push((prefix.to_string(), joined.join(", ")));
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Null => out.push((prefix.to_string(), String::new())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

// ============================================================================
// Odoo Rows Workbook
// ============================================================================

const ODOO_HEADERS: [&str; 20] = [
    "Line ID",
    "Date",
    "Move",
    "Move Type",
    "Company",
    "Customer",
    "SKU",
    "Product",
    "Label",
    "Quantity",
    "Document Amount",
    "Document Currency",
    "Company Amount",
    "Company Currency",
    "FX Rate",
    "Resolved Amount",
    "Resolution",
    "Master Category",
    "Category",
    "Sub Category",
];

pub fn odoo_rows_workbook(rows: &[OdooRow], reporting_currency: &str) -> Result<Vec<u8>> {
    let formats = Formats::new();
    let rate_format = Format::new().set_num_format("0.000000");
    let mut workbook = Workbook::new();

    let resolved_header = format!("Resolved Amount ({})", reporting_currency);
    let mut headers = ODOO_HEADERS.to_vec();
    headers[15] = resolved_header.as_str();

    let sheet = workbook.add_worksheet().set_name("Odoo Rows")?;
    write_header(sheet, &headers, &formats)?;

    for (i, row) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        let line = &row.line;
        let entry = &row.entry;

        sheet.write_number(r, 0, line.id as f64)?;
        if let Some(date) = line.date {
            sheet.write_string(r, 1, date.format("%Y-%m-%d").to_string())?;
        }
        sheet.write_string(r, 2, &line.move_name)?;
        sheet.write_string(r, 3, &line.move_type)?;
        sheet.write_string(r, 4, &line.company)?;
        sheet.write_string(r, 5, &line.partner)?;
        sheet.write_string(r, 6, &line.sku)?;
        sheet.write_string(r, 7, &line.product)?;
        sheet.write_string(r, 8, &line.label)?;
        sheet.write_number(r, 9, line.quantity)?;
        write_optional_number(sheet, r, 10, entry.document_amount, &formats.amount)?;
        sheet.write_string(r, 11, entry.document_currency.as_deref().unwrap_or_default())?;
        write_optional_number(sheet, r, 12, entry.company_amount, &formats.amount)?;
        sheet.write_string(r, 13, entry.company_currency.as_deref().unwrap_or_default())?;
        write_optional_number(sheet, r, 14, entry.fx_rate, &rate_format)?;
        write_optional_number(sheet, r, 15, entry.amount, &formats.amount)?;
        sheet.write_string(r, 16, entry.resolution.map_or("", |method| method.as_str()))?;
        sheet.write_string(r, 17, entry.master_category())?;
        sheet.write_string(r, 18, entry.category_name())?;
        sheet.write_string(r, 19, entry.sub_category())?;
    }

    sheet.set_column_width(7, 36)?;
    sheet.set_column_width(8, 36)?;

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::{Diagnostics, FyTable, FyTableRow, GroupViews, SourceSelection};
    use crate::models::{ResolutionMethod, SalesEntry, Source};
    use crate::services::erp::OdooInvoiceLine;
    use chrono::{NaiveDate, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn report() -> FyTableResponse {
        let mut values = BTreeMap::new();
        values.insert("FY25".to_string(), 100.0);
        FyTableResponse {
            meta: ReportMeta {
                service: "salesLedgerEntries".to_string(),
                reporting_currency: "INR".to_string(),
                source: SourceSelection::All,
                include_odoo: true,
                exclude_intercompany: true,
                from: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
                fiscal_years: vec!["FY25".to_string()],
                granularity: None,
                generated_at: Utc::now(),
            },
            table: FyTable {
                columns: vec!["FY25".to_string()],
                rows: vec![FyTableRow {
                    quarter: "FQ1".to_string(),
                    month: "Apr".to_string(),
                    values: values.clone(),
                }],
                totals: values,
                groups: GroupViews {
                    by_customer: vec![GroupTotal {
                        key: "Acme Corp".to_string(),
                        amount: 100.0,
                        count: 1,
                    }],
                    ..GroupViews::default()
                },
                debug: Diagnostics {
                    input_rows: 1,
                    used_rows: 1,
                    ..Diagnostics::default()
                },
            },
        }
    }

    #[test]
    fn test_fy_table_workbook_is_xlsx() {
        let bytes = fy_table_workbook(&report()).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn test_filenames() {
        let mut meta = report().meta;
        assert_eq!(fy_table_filename(&meta), "fy-table-FY25.xlsx");
        meta.fiscal_years = vec!["FY24".to_string(), "FY26".to_string()];
        assert_eq!(fy_table_filename(&meta), "fy-table-FY24-FY26.xlsx");
        meta.fiscal_years.clear();
        assert_eq!(fy_table_filename(&meta), "fy-table.xlsx");
    }

    #[test]
    fn test_flatten_json() {
        let mut out = Vec::new();
        flatten_json("", &json!({"a": 1, "b": {"c": ["x", "y"]}, "d": null}), &mut out);
        assert!(out.contains(&("a".to_string(), "1".to_string())));
        assert!(out.contains(&("b.c".to_string(), "x, y".to_string())));
        assert!(out.contains(&("d".to_string(), String::new())));
    }

    #[test]
    fn test_odoo_rows_workbook_is_xlsx() {
        let line = OdooInvoiceLine {
            id: 1,
            date: NaiveDate::from_ymd_opt(2024, 6, 3),
            move_name: "INV/2024/0001".to_string(),
            move_type: "out_invoice".to_string(),
            partner: "Globex".to_string(),
            product: "[LM8UU] Linear bushing".to_string(),
            sku: "LM8UU".to_string(),
            label: "Linear bushing".to_string(),
            quantity: 2.0,
            price_subtotal: 10.0,
            balance: Some(-830.0),
            currency: "USD".to_string(),
            company_currency: "INR".to_string(),
            company: "Example India".to_string(),
        };
        let mut entry = SalesEntry::new(Source::Crm);
        entry.amount = Some(830.0);
        entry.resolution = Some(ResolutionMethod::CompanyCurrency);

        let bytes = odoo_rows_workbook(&[OdooRow { line, entry }], "INR").unwrap();
        assert!(bytes.starts_with(b"PK"));
        assert!(odoo_rows_workbook(&[], "INR").unwrap().starts_with(b"PK"));
    }
}
