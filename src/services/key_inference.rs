// ============================================================================
// Field Key Inference
// ============================================================================
//
// Published ERP web services name their columns differently per deployment
// (`Posting_Date`, `PostingDate`, `posting date`...). Given one sample record
// this module resolves each semantic role to the actual column name. The
// candidate lists are plain data so deployments can extend them.
//
// ============================================================================

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::utils::text::squash_field_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldRole {
    PostingDate,
    Amount,
    AmountLcy,
    CurrencyCode,
    CustomerName,
    CustomerPostingGroup,
    EntryType,
    Description,
    Sku,
    Cursor,
}

impl FieldRole {
    /// Roles without which the pipeline cannot run.
    pub const MANDATORY: [FieldRole; 3] = [FieldRole::PostingDate, FieldRole::Amount, FieldRole::Cursor];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldRole::PostingDate => "postingDate",
            FieldRole::Amount => "amount",
            FieldRole::AmountLcy => "amountLcy",
            FieldRole::CurrencyCode => "currencyCode",
            FieldRole::CustomerName => "customerName",
            FieldRole::CustomerPostingGroup => "customerPostingGroup",
            FieldRole::EntryType => "entryType",
            FieldRole::Description => "description",
            FieldRole::Sku => "sku",
            FieldRole::Cursor => "cursor",
        }
    }
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyInferenceError {
    #[error("required field '{role}' not found in upstream record (available: {available})")]
    MissingField { role: FieldRole, available: String },
}

/// Ordered candidate column names per role.
#[derive(Debug, Clone)]
pub struct FieldCandidates {
    roles: Vec<(FieldRole, Vec<String>)>,
}

impl FieldCandidates {
    pub fn new(roles: Vec<(FieldRole, Vec<String>)>) -> Self {
        Self { roles }
    }

    /// Put `names` in front of the existing candidates for `role`.
    pub fn prefer(mut self, role: FieldRole, names: &[&str]) -> Self {
        let preferred: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        match self.roles.iter_mut().find(|(r, _)| *r == role) {
            Some((_, existing)) => {
                let mut merged = preferred;
                merged.extend(existing.drain(..));
                *existing = merged;
            }
            None => self.roles.push((role, preferred)),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(FieldRole, Vec<String>)> {
        self.roles.iter()
    }
}

impl Default for FieldCandidates {
    /// Column names seen on Business Central ledger entry web services.
    fn default() -> Self {
        fn names(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }

        Self::new(vec![
            (FieldRole::PostingDate, names(&["Posting_Date", "PostingDate", "Document_Date", "Date"])),
            (
                FieldRole::Amount,
                names(&["Sales_Amount_Actual", "Amount", "Sales_Amount", "Line_Amount", "Sales"]),
            ),
            (
                FieldRole::AmountLcy,
                names(&["Amount_LCY", "Sales_LCY", "Sales_Amount_LCY", "AmountLCY"]),
            ),
            (FieldRole::CurrencyCode, names(&["Currency_Code", "CurrencyCode", "Currency"])),
            (
                FieldRole::CustomerName,
                names(&["Customer_Name", "Sell_to_Customer_Name", "Bill_to_Name", "CustomerName", "Source_Name"]),
            ),
            (
                FieldRole::CustomerPostingGroup,
                names(&["Customer_Posting_Group", "CustomerPostingGroup", "Posting_Group"]),
            ),
            (
                FieldRole::EntryType,
                names(&["Entry_Type", "Document_Type", "Item_Ledger_Entry_Type", "EntryType"]),
            ),
            (FieldRole::Description, names(&["Description", "Item_Description", "Item_Name"])),
            (FieldRole::Sku, names(&["Item_No", "No", "ItemNo", "SKU"])),
            (FieldRole::Cursor, names(&["Entry_No", "EntryNo", "Entry_Number", "id"])),
        ])
    }
}

/// Role → actual column name for one upstream feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedKeys {
    fields: HashMap<FieldRole, String>,
}

impl ResolvedKeys {
    pub fn get(&self, role: FieldRole) -> Option<&str> {
        self.fields.get(&role).map(String::as_str)
    }

    pub fn require(&self, role: FieldRole) -> Result<&str, KeyInferenceError> {
        self.get(role).ok_or_else(|| KeyInferenceError::MissingField {
            role,
            available: String::new(),
        })
    }

    /// Value of `role` in `row`, if the role was resolved and present.
    pub fn value<'a>(&self, row: &'a Map<String, Value>, role: FieldRole) -> Option<&'a Value> {
        self.get(role).and_then(|key| row.get(key))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Resolve each role against the keys of `sample`: a case-insensitive exact
/// pass over all candidates, then a pass ignoring whitespace, underscores and
/// hyphens. Unresolved roles are simply absent.
pub fn infer_keys(sample: &Map<String, Value>, candidates: &FieldCandidates) -> ResolvedKeys {
    let mut fields = HashMap::new();

    for (role, names) in candidates.iter() {
        let exact = names.iter().find_map(|candidate| {
            sample
                .keys()
                .find(|key| key.eq_ignore_ascii_case(candidate))
        });

        let matched = exact.or_else(|| {
            names.iter().find_map(|candidate| {
                let wanted = squash_field_name(candidate);
                sample.keys().find(|key| squash_field_name(key) == wanted)
            })
        });

        if let Some(key) = matched {
            fields.insert(*role, key.clone());
        }
    }

    ResolvedKeys { fields }
}

/// `infer_keys` plus the check that every mandatory role resolved.
pub fn infer_required_keys(
    sample: &Map<String, Value>,
    candidates: &FieldCandidates,
) -> Result<ResolvedKeys, KeyInferenceError> {
    let keys = infer_keys(sample, candidates);

    for role in FieldRole::MANDATORY {
        if keys.get(role).is_none() {
            let mut available: Vec<&str> = sample.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(KeyInferenceError::MissingField {
                role,
                available: available.join(", "),
            });
        }
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_case_insensitive_exact_match() {
        let sample = record(json!({
            "posting_date": "2024-04-01",
            "AMOUNT": 10,
            "entry_no": 1,
        }));
        let keys = infer_keys(&sample, &FieldCandidates::default());
        assert_eq!(keys.get(FieldRole::PostingDate), Some("posting_date"));
        assert_eq!(keys.get(FieldRole::Amount), Some("AMOUNT"));
        assert_eq!(keys.get(FieldRole::Cursor), Some("entry_no"));
        assert_eq!(keys.get(FieldRole::Sku), None);
    }

    #[test]
    fn test_separator_insensitive_second_pass() {
        let sample = record(json!({
            "Posting Date": "2024-04-01",
            "Sales Amount Actual": 10,
            "EntryNo": 1,
            "Customer Name": "Acme",
        }));
        let keys = infer_keys(&sample, &FieldCandidates::default());
        assert_eq!(keys.get(FieldRole::PostingDate), Some("Posting Date"));
        assert_eq!(keys.get(FieldRole::Amount), Some("Sales Amount Actual"));
        assert_eq!(keys.get(FieldRole::CustomerName), Some("Customer Name"));
    }

    #[test]
    fn test_exact_pass_wins_over_higher_priority_fuzzy_candidate() {
        // "Posting Date" only matches fuzzily; "Date" matches exactly
        let sample = record(json!({ "Posting Date": "x", "date": "y" }));
        let keys = infer_keys(&sample, &FieldCandidates::default());
        assert_eq!(keys.get(FieldRole::PostingDate), Some("date"));
    }

    #[test]
    fn test_candidate_priority_order() {
        let sample = record(json!({ "Amount": 1, "Sales_Amount_Actual": 2 }));
        let keys = infer_keys(&sample, &FieldCandidates::default());
        assert_eq!(keys.get(FieldRole::Amount), Some("Sales_Amount_Actual"));
    }

    #[test]
    fn test_missing_mandatory_field_is_error() {
        let sample = record(json!({ "Posting_Date": "2024-04-01", "Entry_No": 1 }));
        let err = infer_required_keys(&sample, &FieldCandidates::default()).unwrap_err();
        match err {
            KeyInferenceError::MissingField { role, available } => {
                assert_eq!(role, FieldRole::Amount);
                assert_eq!(available, "Entry_No, Posting_Date");
            }
        }
    }

    #[test]
    fn test_prefer_adds_deployment_specific_names() {
        let candidates = FieldCandidates::default().prefer(FieldRole::Amount, &["Net_Sales"]);
        let sample = record(json!({ "Net_Sales": 1, "Amount": 2 }));
        assert_eq!(infer_keys(&sample, &candidates).get(FieldRole::Amount), Some("Net_Sales"));
    }
}
