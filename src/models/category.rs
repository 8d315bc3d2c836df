use serde::{Deserialize, Serialize};

/// Label used wherever a row could not be matched to the lookup table.
pub const UNMAPPED: &str = "UNMAPPED";

/// Reference data row of the product lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub name: String,
    pub master_category: String,
    pub category: String,
    pub sub_category: String,
    pub product_base_name: String,
}
