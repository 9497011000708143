//! Field validators for untrusted JSON.
//!
//! Each validator is a pure `&Value -> Result<T, ValidationError>`. The
//! sanitizer decides what an error means: the full-document tier falls back
//! to the field default, the patch tier drops the field.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::ops::RangeInclusive;
use std::sync::LazyLock;

use crate::error::ValidationError;

static PURCHASE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z0-9_-]{1,64}$").expect("purchase key pattern"));

/// Boolean flag. Accepts JSON booleans, `"true"`/`"false"` and numbers.
pub fn flag(raw: &Value) -> Result<bool, ValidationError> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ValidationError::WrongType("boolean")),
        },
        Value::Number(_) => number(raw).map(|n| n != 0.0),
        _ => Err(ValidationError::WrongType("boolean")),
    }
}

/// Finite number from a JSON number or a numeric string.
pub fn number(raw: &Value) -> Result<f64, ValidationError> {
    let n = match raw {
        Value::Number(n) => n.as_f64().ok_or(ValidationError::NotFinite)?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::WrongType("number"))?,
        _ => return Err(ValidationError::WrongType("number")),
    };
    if n.is_finite() {
        Ok(n)
    } else {
        Err(ValidationError::NotFinite)
    }
}

/// Non-negative integer: floored, then checked against `range`.
pub fn whole(raw: &Value, range: RangeInclusive<u64>) -> Result<u64, ValidationError> {
    let n = number(raw)?;
    let floored = n.floor();
    if floored < *range.start() as f64 || floored > *range.end() as f64 {
        return Err(ValidationError::OutOfRange(n, *range.start(), *range.end()));
    }
    Ok(floored as u64)
}

/// String truncated to `max_chars` characters.
pub fn text(raw: &Value, max_chars: usize) -> Result<String, ValidationError> {
    match raw {
        Value::String(s) => Ok(s.chars().take(max_chars).collect()),
        _ => Err(ValidationError::WrongType("string")),
    }
}

/// Non-empty string no longer than `max_chars`; used for badge ids.
pub fn label(raw: &Value, max_chars: usize) -> Result<String, ValidationError> {
    match raw {
        Value::String(s) if s.is_empty() => Err(ValidationError::Empty),
        Value::String(s) if s.chars().count() > max_chars => Err(ValidationError::TooLong(max_chars)),
        Value::String(s) => Ok(s.clone()),
        _ => Err(ValidationError::WrongType("string")),
    }
}

/// Non-negative money amount rounded to cents. Values too large to scale
/// to cents are rejected.
pub fn amount(raw: &Value) -> Result<f64, ValidationError> {
    let n = number(raw)?;
    if n < 0.0 {
        return Err(ValidationError::OutOfRange(n, 0, u64::MAX));
    }
    let cents = (n * 100.0).round();
    if !cents.is_finite() {
        return Err(ValidationError::NotFinite);
    }
    Ok(cents / 100.0)
}

/// RFC 3339 string, bare `YYYY-MM-DD` date, or epoch milliseconds.
pub fn timestamp(raw: &Value) -> Result<DateTime<Utc>, ValidationError> {
    match raw {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
                .ok_or_else(|| ValidationError::BadTimestamp(s.to_string()))
        }
        Value::Number(_) => {
            let millis = number(raw)?;
            DateTime::from_timestamp_millis(millis as i64)
                .ok_or_else(|| ValidationError::BadTimestamp(millis.to_string()))
        }
        _ => Err(ValidationError::WrongType("timestamp")),
    }
}

/// Millisecond-precision UTC timestamp with a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn purchase_key(key: &str) -> Result<(), ValidationError> {
    if PURCHASE_KEY.is_match(key) {
        Ok(())
    } else {
        Err(ValidationError::BadKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flag_accepts_bools_and_literal_strings() {
        assert_eq!(flag(&json!(true)), Ok(true));
        assert_eq!(flag(&json!("false")), Ok(false));
        assert_eq!(flag(&json!(1)), Ok(true));
        assert_eq!(flag(&json!(0)), Ok(false));
        assert!(flag(&json!("yes")).is_err());
        assert!(flag(&json!(null)).is_err());
        assert!(flag(&json!({})).is_err());
    }

    #[test]
    fn number_coerces_numeric_strings() {
        assert_eq!(number(&json!("42.5")), Ok(42.5));
        assert_eq!(number(&json!(7)), Ok(7.0));
        assert!(number(&json!("abc")).is_err());
        assert!(number(&json!(null)).is_err());
        assert!(number(&json!([1])).is_err());
        assert_eq!(number(&json!("inf")), Err(ValidationError::NotFinite));
    }

    #[test]
    fn whole_floors_before_range_check() {
        assert_eq!(whole(&json!(12.9), 0..=100), Ok(12));
        assert_eq!(whole(&json!(999.4), 1..=999), Ok(999));
        assert!(whole(&json!(0.5), 1..=999).is_err());
        assert!(whole(&json!(-1), 0..=100).is_err());
        assert!(whole(&json!(1000), 1..=999).is_err());
    }

    #[test]
    fn text_truncates_by_chars() {
        assert_eq!(text(&json!("paypal"), 3), Ok("pay".to_string()));
        assert_eq!(text(&json!("ééé"), 2), Ok("éé".to_string()));
        assert!(text(&json!(5), 3).is_err());
    }

    #[test]
    fn label_rejects_empty_and_long() {
        assert_eq!(label(&json!("first-win"), 64), Ok("first-win".to_string()));
        assert_eq!(label(&json!(""), 64), Err(ValidationError::Empty));
        assert_eq!(label(&json!("x".repeat(65)), 64), Err(ValidationError::TooLong(64)));
    }

    #[test]
    fn amount_rounds_to_cents() {
        assert_eq!(amount(&json!(4.999)), Ok(5.0));
        assert_eq!(amount(&json!("2.345")), Ok(2.35));
        assert!(amount(&json!(-0.01)).is_err());
    }

    #[test]
    fn amount_rejects_values_that_overflow_cents() {
        assert_eq!(amount(&json!(1e308)), Err(ValidationError::NotFinite));
        assert_eq!(amount(&json!("1.7e308")), Err(ValidationError::NotFinite));
        assert!(amount(&json!(1e300)).is_ok_and(f64::is_finite));
    }

    #[test]
    fn timestamp_formats() {
        let dt = timestamp(&json!("2024-03-05T10:20:30+02:00")).unwrap();
        assert_eq!(format_timestamp(dt), "2024-03-05T08:20:30.000Z");
        let day = timestamp(&json!("2024-03-05")).unwrap();
        assert_eq!(format_timestamp(day), "2024-03-05T00:00:00.000Z");
        let epoch = timestamp(&json!(0)).unwrap();
        assert_eq!(format_timestamp(epoch), "1970-01-01T00:00:00.000Z");
        assert!(timestamp(&json!("not a date")).is_err());
        assert!(timestamp(&json!(true)).is_err());
    }

    #[test]
    fn purchase_keys_are_case_insensitive_identifiers() {
        assert!(purchase_key("Valid-Key_1").is_ok());
        assert!(purchase_key("hotPinkShip").is_ok());
        assert!(purchase_key("bad key!").is_err());
        assert!(purchase_key("").is_err());
        assert!(purchase_key(&"a".repeat(65)).is_err());
    }
}
