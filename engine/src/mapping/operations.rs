//! Text operations applied to a cell before type conversion.
//!
//! Operations run in declaration order on the trimmed cell text. An
//! operation that produces an empty string makes the value absent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// All available text operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Remove leading and trailing whitespace
    Trim,

    /// Convert to uppercase
    Uppercase,

    /// Convert to lowercase
    Lowercase,

    /// Replace using regex pattern
    Replace {
        pattern: String,
        #[serde(default)]
        value: String,
    },

    /// Remove all non-digit characters
    DigitsOnly,

    /// Map values using a lookup table, then substring rules
    Map {
        mapping: HashMap<String, String>,
        #[serde(default)]
        case_insensitive: bool,
        /// Checked in order when no exact key matches
        #[serde(default)]
        contains: Vec<ContainsRule>,
        /// Value to use when nothing matched (None keeps the input)
        #[serde(default)]
        default_unmapped: Option<String>,
    },
}

/// `needle` found anywhere in the value maps to `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainsRule {
    pub needle: String,
    pub value: String,
}

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Option<Regex>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn compiled(pattern: &str) -> Option<Regex> {
    let mut cache = REGEX_CACHE.lock().unwrap_or_else(|e| e.into_inner());
    cache
        .entry(pattern.to_string())
        .or_insert_with(|| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(%pattern, error = %e, "invalid replace pattern, operation skipped");
                None
            }
        })
        .clone()
}

impl Operation {
    /// Apply this operation to a value
    pub fn apply(&self, value: &str) -> String {
        match self {
            Operation::Trim => value.trim().to_string(),
            Operation::Uppercase => value.to_uppercase(),
            Operation::Lowercase => value.to_lowercase(),
            Operation::Replace { pattern, value: replacement } => match compiled(pattern) {
                Some(re) => re.replace_all(value, replacement.as_str()).into_owned(),
                None => value.to_string(),
            },
            Operation::DigitsOnly => value.chars().filter(|c| c.is_ascii_digit()).collect(),
            Operation::Map {
                mapping,
                case_insensitive,
                contains,
                default_unmapped,
            } => apply_map(value, mapping, *case_insensitive, contains, default_unmapped.as_deref()),
        }
    }
}

fn apply_map(
    value: &str,
    mapping: &HashMap<String, String>,
    case_insensitive: bool,
    contains: &[ContainsRule],
    default_unmapped: Option<&str>,
) -> String {
    let found = if case_insensitive {
        let key = value.to_lowercase();
        mapping.iter().find(|(k, _)| k.to_lowercase() == key).map(|(_, v)| v)
    } else {
        mapping.get(value)
    };
    if let Some(mapped) = found {
        return mapped.clone();
    }

    let haystack = if case_insensitive { value.to_lowercase() } else { value.to_string() };
    for rule in contains {
        let needle = if case_insensitive { rule.needle.to_lowercase() } else { rule.needle.clone() };
        if !needle.is_empty() && haystack.contains(&needle) {
            return rule.value.clone();
        }
    }

    match default_unmapped {
        Some(d) => d.to_string(),
        None => value.to_string(),
    }
}

/// Run a pipeline of operations; `None` when the result is empty.
pub fn apply_all(operations: &[Operation], value: &str) -> Option<String> {
    let out = operations
        .iter()
        .fold(value.to_string(), |acc, op| op.apply(&acc));
    if out.trim().is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tipo_map() -> Operation {
        let mut mapping = HashMap::new();
        mapping.insert("INSUMO".to_string(), "INSUMO".to_string());
        mapping.insert("COMPOSIÇÃO".to_string(), "COMPOSIÇÃO".to_string());
        Operation::Map {
            mapping,
            case_insensitive: false,
            contains: vec![
                ContainsRule { needle: "INSUMO".into(), value: "INSUMO".into() },
                ContainsRule { needle: "COMP".into(), value: "COMPOSIÇÃO".into() },
            ],
            default_unmapped: Some("INSUMO".into()),
        }
    }

    #[test]
    fn test_map_exact_contains_default() {
        let ops = vec![Operation::Uppercase, tipo_map()];
        assert_eq!(apply_all(&ops, "composição").as_deref(), Some("COMPOSIÇÃO"));
        assert_eq!(apply_all(&ops, "Composicao").as_deref(), Some("COMPOSIÇÃO"));
        assert_eq!(apply_all(&ops, "insumos diversos").as_deref(), Some("INSUMO"));
        assert_eq!(apply_all(&ops, "outro").as_deref(), Some("INSUMO"));
    }

    #[test]
    fn test_map_without_default_keeps_input() {
        let op = Operation::Map {
            mapping: HashMap::from([("un".to_string(), "UN".to_string())]),
            case_insensitive: true,
            contains: vec![],
            default_unmapped: None,
        };
        assert_eq!(op.apply("UN"), "UN");
        assert_eq!(op.apply("kg"), "kg");
    }

    #[test]
    fn test_replace_and_digits() {
        let op = Operation::Replace { pattern: r"[.\-]".into(), value: String::new() };
        assert_eq!(op.apply("12.345-6"), "123456");
        assert_eq!(Operation::DigitsOnly.apply("cód. 0087"), "0087");
    }

    #[test]
    fn test_invalid_pattern_is_noop() {
        let op = Operation::Replace { pattern: "(".into(), value: "x".into() };
        assert_eq!(op.apply("abc"), "abc");
    }

    #[test]
    fn test_empty_result_is_absent() {
        assert_eq!(apply_all(&[Operation::DigitsOnly], "abc"), None);
        assert_eq!(apply_all(&[], "  x "), Some("  x ".to_string()));
    }

    #[test]
    fn test_deserialize_tagged() {
        let op: Operation = serde_json::from_str(r#"{"type": "replace", "pattern": "\\s+", "value": " "}"#).unwrap();
        assert_eq!(op.apply("a   b"), "a b");
        let op: Operation = serde_json::from_str(r#"{"type": "digits_only"}"#).unwrap();
        assert_eq!(op, Operation::DigitsOnly);
    }
}
