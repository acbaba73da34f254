//! Typed coercion of resolved cell strings.
//!
//! Every cell is a string until commit time. Coercion turns it into the JSON
//! value stored on the record; a failure becomes a row error, never an abort.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::{Number, Value};

use crate::schema::{FieldDef, ValueType};

/// Digits with optional sign and `.`/`,` separators, after currency and
/// whitespace have been stripped.
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d[\d.,]*$").expect("valid regex"));

/// `1,234` / `1,234,567` style grouping with a single separator kind.
static GROUPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d{1,3}([.,]\d{3})+$").expect("valid regex"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected} for {field}: '{value}'")]
pub struct CoercionError {
    pub field: String,
    pub value: String,
    pub expected: &'static str,
}

/// Coerce `raw` to the JSON value for `field`.
pub fn coerce(field: &FieldDef, raw: &str) -> Result<Value, CoercionError> {
    let trimmed = raw.trim();
    let fail = |expected: &'static str| CoercionError {
        field: field.name.to_string(),
        value: trimmed.to_string(),
        expected,
    };

    match field.value_type {
        ValueType::String => Ok(Value::String(trimmed.to_string())),
        ValueType::Number => parse_number(trimmed)
            .map(Value::Number)
            .ok_or_else(|| fail("number")),
        ValueType::Date => parse_date(trimmed)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| fail("date")),
        ValueType::Enum => canonical_choice(field.allowed_values, trimmed)
            .map(|v| Value::String(v.to_string()))
            .ok_or_else(|| fail("option")),
    }
}

/// Parse a number written with optional currency sign and either `.` or
/// `,` as the decimal separator.
pub fn parse_number(raw: &str) -> Option<Number> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '£'))
        .collect();
    if !NUMBER_RE.is_match(&cleaned) {
        return None;
    }

    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        // Both present: the later one is the decimal separator.
        (Some(dot), Some(comma)) if dot > comma => cleaned.replace(',', ""),
        (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
        (None, Some(_)) if GROUPED_RE.is_match(&cleaned) => cleaned.replace(',', ""),
        (None, Some(_)) if cleaned.matches(',').count() == 1 => cleaned.replace(',', "."),
        (None, Some(_)) => return None,
        (Some(_), None) if cleaned.matches('.').count() > 1 => {
            if !GROUPED_RE.is_match(&cleaned) {
                return None;
            }
            cleaned.replace('.', "")
        }
        _ => cleaned,
    };

    if let Ok(int) = normalized.parse::<i64>() {
        return Some(Number::from(int));
    }
    let float = normalized.parse::<f64>().ok()?;
    if float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
        return Some(Number::from(float as i64));
    }
    Number::from_f64(float)
}

/// Parse ISO, slash-separated or RFC 3339 dates.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

fn canonical_choice(allowed: &'static [&'static str], raw: &str) -> Option<&'static str> {
    allowed
        .iter()
        .copied()
        .find(|candidate| candidate.eq_ignore_ascii_case(raw))
}
