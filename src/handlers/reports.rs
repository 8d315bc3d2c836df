use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};

use crate::middleware::error_handling::Result;
use crate::models::report::{AnalyticsQuery, AnalyticsResponse, FyTableQuery, FyTableResponse, OdooRowsQuery};
use crate::services::export_service::{
    fy_table_filename, fy_table_workbook, odoo_rows_filename, odoo_rows_workbook, XLSX_CONTENT_TYPE,
};
use crate::AppState;

fn xlsx_response(filename: String, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        bytes,
    )
        .into_response()
}

/// FY x month pivot with group views and diagnostics
pub async fn fy_table(
    State(state): State<AppState>,
    Query(query): Query<FyTableQuery>,
) -> Result<Json<FyTableResponse>> {
    let report = state.pipeline.fy_table(&query).await?;
    Ok(Json(report))
}

/// Same report as an xlsx download
pub async fn fy_table_xlsx(State(state): State<AppState>, Query(query): Query<FyTableQuery>) -> Result<Response> {
    let report = state.pipeline.fy_table(&query).await?;
    let bytes = fy_table_workbook(&report)?;
    Ok(xlsx_response(fy_table_filename(&report.meta), bytes))
}

pub async fn sales_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsResponse>> {
    let report = state.pipeline.sales_analytics(&query).await?;
    Ok(Json(report))
}

/// Raw Odoo invoice lines with currency-resolution columns
pub async fn odoo_rows_xlsx(State(state): State<AppState>, Query(query): Query<OdooRowsQuery>) -> Result<Response> {
    let report = state.pipeline.odoo_rows(&query).await?;
    let bytes = odoo_rows_workbook(&report.rows, &state.pipeline.reporting().reporting_currency)?;
    Ok(xlsx_response(odoo_rows_filename(report.from, report.to), bytes))
}
