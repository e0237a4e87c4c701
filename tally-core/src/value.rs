//! Scalar cell values and their canonical identity form.
//!
//! Cells coming out of the document API are loosely typed: the same column can
//! hold `"123"` on one fetch and `123.0` after a round trip through a store.
//! `Value::identity_key` collapses those spellings so key comparisons do not
//! drift with the representation.

use chrono::NaiveDate;
use std::fmt;

/// Largest integer an f64 represents exactly (2^53).
const F64_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// 2^127; integral floats below this fit an `i128` exactly.
const I128_EXACT_BOUND: f64 = 1.7014118346046923e38;

/// One cell of a [`crate::Table`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < F64_EXACT_INT => Some(*f as i64),
            _ => None,
        }
    }

    /// Canonical text used to compare identity keys across sources.
    ///
    /// Integral numbers and numeric strings share one spelling (`"123"`,
    /// `123`, `123.0` all give `"123"`); digit strings are compared digit for
    /// digit, never through `f64`. Boolean text folds to `true`/`false` so a
    /// `"TRUE"` cell matches the `Bool` it reads back as. `Null` and blank
    /// text have no key.
    pub fn identity_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(canonical_number(*f)),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") {
                    return Some(s.to_ascii_lowercase());
                }
                if let Some(digits) = canonical_digits(s) {
                    return Some(digits);
                }
                match s.parse::<f64>() {
                    Ok(f) if f.is_finite() => Some(canonical_number(f)),
                    _ => Some(s.to_string()),
                }
            }
        }
    }

    /// Map a JSON cell from the API onto a scalar.
    /// Arrays and objects (lookups, rich cells) are kept as their JSON text.
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Best-effort typing of a raw text cell (CSV files, spreadsheet cells).
    pub fn infer(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() {
            return Value::Null;
        }

        // keep zero-padded codes ("0042") as text
        let zero_padded = s.len() > 1 && s.starts_with('0') && !s.starts_with("0.");
        if !zero_padded {
            if let Ok(i) = s.parse::<i64>() {
                return Value::Integer(i);
            }
            if s.bytes().any(|b| b.is_ascii_digit()) {
                if let Ok(f) = s.parse::<f64>() {
                    if f.is_finite() {
                        return Value::Float(f);
                    }
                }
            }
        }

        if s.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Value::Date(d);
        }

        Value::Text(raw.to_string())
    }
}

/// Integral floats print as the exact integer they hold; `i128` covers every
/// such float below 2^127 without rounding.
fn canonical_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < I128_EXACT_BOUND {
        (f as i128).to_string()
    } else {
        f.to_string()
    }
}

/// `[+-]digits` without leading zeros; `None` for anything else.
fn canonical_digits(s: &str) -> Option<String> {
    let (negative, digits) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    Some(match (trimmed.is_empty(), negative) {
        (true, _) => "0".to_string(),
        (false, true) => format!("-{trimmed}"),
        (false, false) => trimmed.to_string(),
    })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}
