pub mod category_classifier;
pub mod currency_resolver;
pub mod erp;
pub mod export_service;
pub mod fx_rate_client;
pub mod fy_aggregation;
pub mod key_inference;
pub mod pager;
pub mod retry;
pub mod sales_pipeline;

pub use category_classifier::CategoryTable;
pub use currency_resolver::{CurrencyResolver, FxBatchReport, FxKey, FxOverrides, FxRateCache, FxRateProvider};
pub use fx_rate_client::{FxConfig, FxError, FxRateClient};
pub use fy_aggregation::{AggregationFilters, IntercompanyRules, Scope};
pub use key_inference::{FieldCandidates, FieldRole, KeyInferenceError, ResolvedKeys};
pub use pager::{PageSource, PagerConfig, PagerError};
pub use retry::RetryPolicy;
pub use sales_pipeline::{LoadRequest, OdooRow, OdooRowsReport, PipelineError, ReportingConfig, SalesPipeline};
