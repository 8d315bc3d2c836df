pub mod category;
pub mod fiscal;
pub mod report;
pub mod sales;

pub use category::CategoryRecord;
pub use fiscal::{parse_fiscal_years, FiscalMonth, FiscalYear, FiscalYearParseError, FISCAL_MONTHS};
pub use sales::{parse_posting_date, ResolutionMethod, SalesEntry, Source};
