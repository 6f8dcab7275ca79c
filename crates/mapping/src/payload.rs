//! Read helpers for unified exchange payloads.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Looks up a dotted path (`info.status`) in a JSON payload.
pub fn value_at<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Reads a decimal that may be encoded as a JSON string or number. Null and missing read as `None`.
pub fn decimal_at(payload: &Value, path: &str) -> Option<Decimal> {
    value_at(payload, path).and_then(as_decimal)
}

pub fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .ok(),
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
        }
        _ => None,
    }
}

/// Reads an identifier that may be encoded as a string or an integer.
pub fn string_at(payload: &Value, path: &str) -> Option<String> {
    match value_at(payload, path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rule comparison: numbers compare by value, strings case-insensitively, anything else exactly.
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn walks_dotted_paths() {
        let payload = json!({ "info": { "status": "FILLED", "fills": [{ "qty": "1" }] } });
        assert_eq!(value_at(&payload, "info.status"), Some(&json!("FILLED")));
        assert_eq!(value_at(&payload, "info.fills.0.qty"), Some(&json!("1")));
        assert_eq!(value_at(&payload, "info.missing"), None);
        assert_eq!(value_at(&payload, "info.status.deeper"), None);
    }

    #[test]
    fn reads_decimals_from_strings_and_numbers() {
        let payload = json!({ "a": "0.50000000", "b": 2.5, "c": null, "d": "", "e": 3 });
        assert_eq!(decimal_at(&payload, "a"), Some(dec!(0.5)));
        assert_eq!(decimal_at(&payload, "b"), Some(dec!(2.5)));
        assert_eq!(decimal_at(&payload, "c"), None);
        assert_eq!(decimal_at(&payload, "d"), None);
        assert_eq!(decimal_at(&payload, "e"), Some(dec!(3)));
    }

    #[test]
    fn matches_rule_values_loosely() {
        assert!(values_match(&json!(1), &json!(1.0)));
        assert!(values_match(&json!("Closed"), &json!("closed")));
        assert!(!values_match(&json!("1"), &json!(1)));
        assert!(values_match(&json!(true), &json!(true)));
    }
}
