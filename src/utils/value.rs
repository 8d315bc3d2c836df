//! Lenient readers for loosely-typed upstream JSON values.

use serde_json::Value;

/// Numbers and numeric strings (`"1,250.50"` included) as `f64`.
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse().ok()
            }
        }
        _ => None,
    }
}

pub fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Strings as-is, numbers and booleans rendered; null and `false` (Odoo's
/// "empty") become an empty string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "true".to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_f64() {
        assert_eq!(value_to_f64(&json!(12.5)), Some(12.5));
        assert_eq!(value_to_f64(&json!("1,250.50")), Some(1250.5));
        assert_eq!(value_to_f64(&json!(" -3 ")), Some(-3.0));
        assert_eq!(value_to_f64(&json!("")), None);
        assert_eq!(value_to_f64(&json!(null)), None);
        assert_eq!(value_to_f64(&json!("n/a")), None);
    }

    #[test]
    fn test_value_to_i64_and_string() {
        assert_eq!(value_to_i64(&json!(42)), Some(42));
        assert_eq!(value_to_i64(&json!("17")), Some(17));
        assert_eq!(value_to_string(&json!(false)), "");
        assert_eq!(value_to_string(&json!(" Acme ")), "Acme");
        assert_eq!(value_to_string(&json!(7)), "7");
    }
}
