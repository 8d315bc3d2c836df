// Upstream Integration Module
// Business Central (OData) and Odoo (JSON-RPC) clients plus the shared token cache

pub mod business_central_client;
pub mod odoo_client;
pub mod token_cache;

pub use business_central_client::{
    adapt_erp_row, BusinessCentralClient, BusinessCentralConfig, BusinessCentralError, BusinessCentralPageSource,
    Company, DateFilter,
};
pub use odoo_client::{OdooClient, OdooConfig, OdooError, OdooInvoiceLine, DEFAULT_TRANSPORT_PATHS};
pub use token_cache::{CachedToken, Clock, SystemClock, TokenCache, TokenKey};
