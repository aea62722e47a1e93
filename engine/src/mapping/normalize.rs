//! Cell normalization: raw cells to typed field values.
//!
//! Nothing in here fails. A cell that cannot be interpreted as its target
//! kind becomes [`FieldValue::Absent`], which reaches the store as `null`.
//!
//! ```text
//!   "R$ 1.234,56"  ──number──▶  1234.56
//!   "  Cimento  "  ──text────▶  "Cimento"
//!   "01/04/2025"   ──date────▶  2025-04-01
//!   "-" / "nan"    ──any─────▶  Absent
//! ```

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::operations::apply_all;
use crate::profile::{FieldKind, FieldSpec};
use crate::source::Cell;

const TRUNCATION_MARKER: &str = "...";

/// Textual placeholders that mean "no value" in SINAPI exports.
const MISSING_MARKERS: [&str; 11] = ["-", "–", "—", "nan", "null", "none", "n/a", "#n/a", "#n/d", "#ref!", "#value!"];

static NUMBER_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?[0-9.,]+$").expect("valid number regex"));

/// A normalized, typed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Integer(i64),
    Bool(bool),
    Date(NaiveDate),
    Absent,
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    /// JSON representation sent to the store.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Absent => Value::Null,
        }
    }

    /// Text form used for joins and failure context.
    pub fn key_text(&self) -> Option<String> {
        match self {
            FieldValue::Absent => None,
            FieldValue::Text(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Interpret a profile default (or constant) as a value of `kind`.
    pub fn from_json(value: &Value, kind: FieldKind) -> FieldValue {
        match value {
            Value::Null => FieldValue::Absent,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match kind {
                FieldKind::Integer => n.as_i64().map(FieldValue::Integer).unwrap_or(FieldValue::Absent),
                FieldKind::Text => FieldValue::Text(n.to_string()),
                _ => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Absent),
            },
            Value::String(s) => convert_text(s, kind),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Absent => Ok(()),
        }
    }
}

/// True for blank text and the usual missing-value placeholders.
pub fn is_missing_marker(text: &str) -> bool {
    let t = text.trim();
    t.is_empty() || MISSING_MARKERS.iter().any(|m| t.eq_ignore_ascii_case(m))
}

/// Parse a Brazilian-formatted (or plain) number.
///
/// Currency symbols and spaces are dropped. When both `.` and `,` appear
/// the later one is the decimal separator; a single `,` is decimal; repeated
/// separators of one kind are thousands groupings.
///
/// ```
/// use sinapi_load::mapping::normalize::normalize_number;
/// assert_eq!(normalize_number("R$ 1.234,56"), Some(1234.56));
/// assert_eq!(normalize_number("1,234.56"), Some(1234.56));
/// assert_eq!(normalize_number("-"), None);
/// ```
pub fn normalize_number(raw: &str) -> Option<f64> {
    if is_missing_marker(raw) {
        return None;
    }

    let cleaned: String = raw
        .replace("R$", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$' && *c != '%' && *c != '\u{a0}')
        .collect();

    if cleaned.is_empty() || !NUMBER_CHARS.is_match(&cleaned) {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');

    let canonical = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) if cleaned.matches(',').count() == 1 => cleaned.replace(',', "."),
        (Some(_), None) => cleaned.replace(',', ""),
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    canonical.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Trim and truncate text so that it never exceeds `max_length` characters.
///
/// Truncated text ends with `...` and is exactly `max_length` long.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    let count = text.chars().count();
    if count <= max_length {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_length <= marker_len {
        return text.chars().take(max_length).collect();
    }
    let kept: String = text.chars().take(max_length - marker_len).collect();
    format!("{}{}", kept, TRUNCATION_MARKER)
}

/// Parse a date in ISO, Brazilian or compact form; `MM/YYYY` is the first of the month.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let t = text.trim();
    let head = t.get(..10).unwrap_or(t);
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(head, fmt) {
            return Some(d);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y%m%d") {
        return Some(d);
    }
    for (fmt, src) in [("%d/%m/%Y", format!("01/{}", t)), ("%Y-%m-%d", format!("{}-01", t))] {
        if let Ok(d) = NaiveDate::parse_from_str(&src, fmt) {
            return Some(d);
        }
    }
    None
}

/// Spreadsheet serial day number to date (1900 date system).
fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30).map(|epoch| epoch + Duration::days(serial.trunc() as i64))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "1" | "sim" | "s" | "yes" | "y" | "verdadeiro" | "x" => Some(true),
        "false" | "0" | "nao" | "não" | "n" | "no" | "falso" => Some(false),
        _ => None,
    }
}

fn convert_text(text: &str, kind: FieldKind) -> FieldValue {
    if is_missing_marker(text) {
        return FieldValue::Absent;
    }
    let value = match kind {
        FieldKind::Text => Some(FieldValue::Text(text.trim().to_string())),
        FieldKind::Number => normalize_number(text).map(FieldValue::Number),
        FieldKind::Integer => normalize_number(text)
            .filter(|n| n.fract() == 0.0 && n.abs() < 9.0e15)
            .map(|n| FieldValue::Integer(n as i64)),
        FieldKind::Date => parse_date(text).map(FieldValue::Date),
        FieldKind::Boolean => parse_bool(text).map(FieldValue::Bool),
    };
    value.unwrap_or(FieldValue::Absent)
}

/// Normalize one raw cell according to its field spec.
///
/// Order: missing-marker check, trim, text operations, kind conversion,
/// truncation, and finally the field default when the result is absent.
pub fn normalize_cell(cell: &Cell, spec: &FieldSpec) -> FieldValue {
    let value = match cell {
        Cell::Empty => FieldValue::Absent,
        Cell::Number(n) if spec.operations.is_empty() => match spec.kind {
            FieldKind::Number if n.is_finite() => FieldValue::Number(*n),
            FieldKind::Integer if n.is_finite() && n.fract() == 0.0 => FieldValue::Integer(*n as i64),
            FieldKind::Date => serial_to_date(*n).map(FieldValue::Date).unwrap_or(FieldValue::Absent),
            _ => cell.as_text().map(|t| convert_text(&t, spec.kind)).unwrap_or(FieldValue::Absent),
        },
        Cell::Bool(b) if spec.kind == FieldKind::Boolean => FieldValue::Bool(*b),
        _ => match cell.as_text() {
            Some(raw) if !is_missing_marker(&raw) => match apply_all(&spec.operations, raw.trim()) {
                Some(text) => convert_text(&text, spec.kind),
                None => FieldValue::Absent,
            },
            _ => FieldValue::Absent,
        },
    };

    let value = match (value, spec.max_length) {
        (FieldValue::Text(s), Some(max)) => FieldValue::Text(truncate_text(&s, max)),
        (v, _) => v,
    };

    match (&value, &spec.default) {
        (FieldValue::Absent, Some(default)) => FieldValue::from_json(default, spec.kind),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Matcher;

    fn spec(kind: FieldKind) -> FieldSpec {
        FieldSpec {
            name: "f".into(),
            matcher: Matcher::Equals { label: "F".into() },
            kind,
            max_length: None,
            default: None,
            operations: vec![],
        }
    }

    #[test]
    fn test_normalize_number_brazilian() {
        assert_eq!(normalize_number("R$ 1.234,56"), Some(1234.56));
        assert_eq!(normalize_number("1.234.567"), Some(1234567.0));
        assert_eq!(normalize_number("12,5"), Some(12.5));
        assert_eq!(normalize_number("1,234,567"), Some(1234567.0));
        assert_eq!(normalize_number("0.75"), Some(0.75));
        assert_eq!(normalize_number("-3,10"), Some(-3.1));
    }

    #[test]
    fn test_normalize_number_missing() {
        for raw in ["", "   ", "-", "—", "nan", "NaN", "N/A", "#N/D", "abc", "12a"] {
            assert_eq!(normalize_number(raw), None, "{:?}", raw);
        }
    }

    #[test]
    fn test_truncate_text_exact_length() {
        let long = "x".repeat(1500);
        let out = truncate_text(&long, 1000);
        assert_eq!(out.chars().count(), 1000);
        assert!(out.ends_with("..."));
        assert_eq!(truncate_text("curto", 100), "curto");
        assert_eq!(truncate_text("abcdef", 2), "ab");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "ç".repeat(120);
        let out = truncate_text(&text, 100);
        assert_eq!(out.chars().count(), 100);
    }

    #[test]
    fn test_parse_date_formats() {
        let d = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert_eq!(parse_date("2025-04-01"), Some(d));
        assert_eq!(parse_date("2025-04-01T00:00:00"), Some(d));
        assert_eq!(parse_date("01/04/2025"), Some(d));
        assert_eq!(parse_date("20250401"), Some(d));
        assert_eq!(parse_date("04/2025"), Some(d));
        assert_eq!(parse_date("2025-04"), Some(d));
        assert_eq!(parse_date("abril"), None);
    }

    #[test]
    fn test_serial_date() {
        let mut s = spec(FieldKind::Date);
        s.default = None;
        assert_eq!(
            normalize_cell(&Cell::Number(45748.0), &s),
            FieldValue::Date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap())
        );
    }

    #[test]
    fn test_normalize_cell_text_trim_and_truncate() {
        let mut s = spec(FieldKind::Text);
        s.max_length = Some(10);
        assert_eq!(
            normalize_cell(&Cell::Text("  Cimento Portland CP II  ".into()), &s),
            FieldValue::Text("Cimento...".into())
        );
        assert_eq!(normalize_cell(&Cell::Text(" - ".into()), &s), FieldValue::Absent);
    }

    #[test]
    fn test_normalize_cell_default_applied() {
        let mut s = spec(FieldKind::Date);
        s.default = Some(Value::from("2025-04-01"));
        assert_eq!(
            normalize_cell(&Cell::Empty, &s),
            FieldValue::Date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap())
        );
        assert_eq!(
            normalize_cell(&Cell::Text("garbage".into()), &s),
            FieldValue::Date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap())
        );
    }

    #[test]
    fn test_normalize_cell_integer() {
        let s = spec(FieldKind::Integer);
        assert_eq!(normalize_cell(&Cell::Number(87.0), &s), FieldValue::Integer(87));
        assert_eq!(normalize_cell(&Cell::Text(" 1234 ".into()), &s), FieldValue::Integer(1234));
        assert_eq!(normalize_cell(&Cell::Text("1.234.567".into()), &s), FieldValue::Integer(1234567));
        assert_eq!(normalize_cell(&Cell::Text("87,5".into()), &s), FieldValue::Absent);
    }

    #[test]
    fn test_numeric_cell_as_text_field() {
        let s = spec(FieldKind::Text);
        assert_eq!(normalize_cell(&Cell::Number(1234.0), &s), FieldValue::Text("1234".into()));
    }

    #[test]
    fn test_bool_values() {
        let s = spec(FieldKind::Boolean);
        assert_eq!(normalize_cell(&Cell::Text("Sim".into()), &s), FieldValue::Bool(true));
        assert_eq!(normalize_cell(&Cell::Bool(false), &s), FieldValue::Bool(false));
        assert_eq!(normalize_cell(&Cell::Text("talvez".into()), &s), FieldValue::Absent);
    }

    #[test]
    fn test_to_json() {
        assert_eq!(FieldValue::Absent.to_json(), Value::Null);
        assert_eq!(FieldValue::Number(f64::NAN).to_json(), Value::Null);
        assert_eq!(
            FieldValue::Date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()).to_json(),
            Value::from("2025-04-01")
        );
        assert_eq!(FieldValue::Integer(7).key_text().as_deref(), Some("7"));
    }
}
