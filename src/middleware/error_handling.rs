// ============================================================================
// Error Handling - structured error responses for the reporting API
// ============================================================================
//
// Query mistakes map to 400 with the message that explains them. Everything
// else is fatal for the request: it is logged with full detail and answered
// with 500 and `{error, details}` instead of a partial report.
//
// ============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::export_service::ExportError;
use crate::services::sales_pipeline::PipelineError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Report failed: {0}")]
    Pipeline(PipelineError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::BadRequest(msg) => AppError::BadRequest(msg),
            PipelineError::OdooNotConfigured => {
                AppError::BadRequest("Odoo is not configured on this server".to_string())
            }
            other => AppError::Pipeline(other),
        }
    }
}

impl AppError {
    fn summary(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "Bad request",
            AppError::Pipeline(PipelineError::BusinessCentral(_))
            | AppError::Pipeline(PipelineError::BusinessCentralPager { .. }) => "Business Central request failed",
            AppError::Pipeline(PipelineError::Odoo(_)) | AppError::Pipeline(PipelineError::OdooPager(_)) => {
                "Odoo request failed"
            }
            AppError::Pipeline(PipelineError::KeyInference(_)) => "Upstream field mapping failed",
            AppError::Pipeline(_) => "Report failed",
            AppError::Export(_) => "Spreadsheet export failed",
            AppError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let details = match &self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Pipeline(err) => err.to_string(),
            AppError::Export(err) => err.to_string(),
            AppError::Internal(err) => format!("{:#}", err),
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::debug!(details = %details, "Rejected request");
        }

        let body = Json(json!({
            "error": self.summary(),
            "details": details,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pager::PagerError;
    use crate::services::erp::OdooError;

    #[test]
    fn test_bad_request_maps_to_400() {
        let response = AppError::from(PipelineError::BadRequest("Invalid fiscal year".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::from(PipelineError::OdooNotConfigured).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_pager_ceiling_is_a_500() {
        let err = PipelineError::OdooPager(PagerError::<OdooError>::TooManyBatches { limit: 3 });
        let app_error = AppError::from(err);
        assert_eq!(app_error.summary(), "Odoo request failed");
        assert_eq!(app_error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
