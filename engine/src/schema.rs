//! Header-level schema validation.
//!
//! Runs before any cell is parsed: a source whose headers do not contain
//! the expected columns is rejected as a whole, listing every missing hint.
//!
//! Matching is done on normalized labels: lowercase, accents folded,
//! line breaks and runs of whitespace collapsed to one space.

use crate::error::SchemaMismatchError;
use crate::source::RawTable;

/// Normalize a column label (or a hint) for comparison.
///
/// ```
/// use sinapi_load::schema::normalize_label;
/// assert_eq!(normalize_label("Código da\nComposição "), "codigo da composicao");
/// ```
pub fn normalize_label(label: &str) -> String {
    let folded: String = label.chars().map(fold_char).collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        '\u{a0}' => ' ',
        other => other,
    }
}

/// True when the normalized hint occurs inside the normalized label.
pub fn label_contains(label: &str, hint: &str) -> bool {
    let hint = normalize_label(hint);
    !hint.is_empty() && normalize_label(label).contains(&hint)
}

/// Outcome of checking a table's headers against required hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub matched: Vec<(String, String)>,
    pub unmatched: Vec<String>,
}

impl SchemaReport {
    pub fn passed(&self) -> bool {
        self.unmatched.is_empty()
    }
}

/// Check every hint against the headers without stopping at the first miss.
pub fn check_columns(headers: &[String], hints: &[String]) -> SchemaReport {
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();

    for hint in hints {
        match headers.iter().find(|h| label_contains(h, hint)) {
            Some(label) => matched.push((hint.clone(), label.clone())),
            None => unmatched.push(hint.clone()),
        }
    }

    SchemaReport { matched, unmatched }
}

/// Validate a table's headers, failing with every unmatched hint.
pub fn validate_columns(table: &RawTable, hints: &[String]) -> Result<SchemaReport, SchemaMismatchError> {
    let report = check_columns(table.headers(), hints);

    if !report.passed() {
        tracing::error!(
            source = %table.source_id(),
            unmatched = ?report.unmatched,
            "required columns not found"
        );
        return Err(SchemaMismatchError {
            source_id: table.source_id().to_string(),
            unmatched: report.unmatched,
            available: table.headers().to_vec(),
        });
    }

    tracing::info!(
        source = %table.source_id(),
        columns = table.headers().len(),
        "schema validated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawTable;

    fn headers() -> Vec<String> {
        vec![
            "Código da\nFamília".to_string(),
            "Código do\r\nInsumo".to_string(),
            "DESCRIÇÃO DO INSUMO".to_string(),
            "Unidade".to_string(),
        ]
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Preço\n  Mediano  AC "), "preco mediano ac");
        assert_eq!(normalize_label("MANUTENÇÃO"), "manutencao");
    }

    #[test]
    fn test_all_hints_matched() {
        let hints = vec!["Código da".to_string(), "codigo do".to_string(), "Descrição do Insumo".to_string()];
        let report = check_columns(&headers(), &hints);
        assert!(report.passed());
        assert_eq!(report.matched[2].1, "DESCRIÇÃO DO INSUMO");
    }

    #[test]
    fn test_every_unmatched_hint_reported() {
        let hints = vec!["Grupo".to_string(), "Unidade".to_string(), "Tipo".to_string()];
        let report = check_columns(&headers(), &hints);
        assert_eq!(report.unmatched, vec!["Grupo", "Tipo"]);
    }

    #[test]
    fn test_validate_columns_error() {
        let table = RawTable::new("t.csv", headers(), vec![]);
        let err = validate_columns(&table, &["Manutenção".to_string()]).unwrap_err();
        assert_eq!(err.unmatched, vec!["Manutenção"]);
        assert_eq!(err.available.len(), 4);
    }

    #[test]
    fn test_empty_hint_never_matches() {
        assert!(!label_contains("Unidade", "  "));
    }
}
