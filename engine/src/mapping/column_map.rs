//! Raw header → canonical field resolution.

use serde::Serialize;

use crate::error::SchemaMismatchError;
use crate::profile::{FieldSpec, Matcher};
use crate::schema::normalize_label;

impl Matcher {
    /// Does this raw column label satisfy the matcher?
    pub fn matches(&self, label: &str) -> bool {
        let label = normalize_label(label);
        match self {
            Matcher::Contains { any } => any.iter().any(|phrase| {
                let phrase = normalize_label(phrase);
                !phrase.is_empty() && label.contains(&phrase)
            }),
            Matcher::Equals { label: expected } => label == normalize_label(expected),
            Matcher::Token { token } => {
                let token = normalize_label(token);
                label
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|word| !word.is_empty() && word == token)
            }
        }
    }
}

/// Resolution of one canonical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnBinding {
    pub field: String,
    /// Column position in the raw table
    pub column: Option<usize>,
    /// Raw label as it appears in the source
    pub label: Option<String>,
}

/// Canonical field → raw column, in profile field order.
///
/// Built from headers alone, so building twice from the same headers gives
/// the same map. When several columns match a field, the leftmost wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMap {
    bindings: Vec<ColumnBinding>,
}

impl ColumnMap {
    pub fn build(headers: &[String], fields: &[FieldSpec]) -> Self {
        let bindings = fields
            .iter()
            .map(|spec| {
                let hit = headers
                    .iter()
                    .enumerate()
                    .find(|(_, label)| spec.matcher.matches(label));
                ColumnBinding {
                    field: spec.name.clone(),
                    column: hit.map(|(i, _)| i),
                    label: hit.map(|(_, l)| l.clone()),
                }
            })
            .collect();
        Self { bindings }
    }

    pub fn bindings(&self) -> &[ColumnBinding] {
        &self.bindings
    }

    pub fn column(&self, field: &str) -> Option<usize> {
        self.bindings
            .iter()
            .find(|b| b.field == field)
            .and_then(|b| b.column)
    }

    pub fn resolved_count(&self) -> usize {
        self.bindings.iter().filter(|b| b.column.is_some()).count()
    }

    pub fn unresolved(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .filter(|b| b.column.is_none())
            .map(|b| b.field.as_str())
            .collect()
    }

    /// Fail when any of the given fields has no source column.
    pub fn ensure_resolved(
        &self,
        required: &[String],
        source_id: &str,
        headers: &[String],
    ) -> Result<(), SchemaMismatchError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|f| self.column(f).is_none())
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaMismatchError {
                source_id: source_id.to_string(),
                unmatched: missing,
                available: headers.to_vec(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FieldKind;

    fn field(name: &str, matcher: Matcher) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            matcher,
            kind: FieldKind::Text,
            max_length: None,
            default: None,
            operations: vec![],
        }
    }

    fn headers() -> Vec<String> {
        vec![
            "Código da\nComposição".into(),
            "Descrição".into(),
            "Unidade".into(),
            "AC".into(),
            "Preço\nSP".into(),
            "Descrição Complementar".into(),
        ]
    }

    #[test]
    fn test_matchers() {
        assert!(Matcher::Contains { any: vec!["codigo da composicao".into()] }.matches("Código da\nComposição"));
        assert!(Matcher::Equals { label: "descricao".into() }.matches("DESCRIÇÃO "));
        assert!(!Matcher::Equals { label: "descricao".into() }.matches("Descrição Complementar"));
        assert!(Matcher::Token { token: "SP".into() }.matches("Preço\nSP"));
        assert!(!Matcher::Token { token: "MA".into() }.matches("Manutenção"));
    }

    #[test]
    fn test_first_matching_column_wins() {
        let fields = vec![field("descricao", Matcher::Contains { any: vec!["descricao".into()] })];
        let map = ColumnMap::build(&headers(), &fields);
        assert_eq!(map.column("descricao"), Some(1));
    }

    #[test]
    fn test_build_is_deterministic() {
        let fields = vec![
            field("codigo", Matcher::Contains { any: vec!["codigo".into()] }),
            field("preco_ac", Matcher::Token { token: "AC".into() }),
            field("preco_sp", Matcher::Token { token: "SP".into() }),
            field("grupo", Matcher::Equals { label: "Grupo".into() }),
        ];
        let a = ColumnMap::build(&headers(), &fields);
        let b = ColumnMap::build(&headers(), &fields);
        assert_eq!(a, b);
        assert_eq!(a.resolved_count(), 3);
        assert_eq!(a.unresolved(), vec!["grupo"]);
        assert_eq!(a.bindings()[2].label.as_deref(), Some("Preço\nSP"));
    }

    #[test]
    fn test_ensure_resolved_lists_missing() {
        let fields = vec![
            field("codigo", Matcher::Contains { any: vec!["codigo".into()] }),
            field("grupo", Matcher::Equals { label: "Grupo".into() }),
        ];
        let map = ColumnMap::build(&headers(), &fields);
        assert!(map.ensure_resolved(&["codigo".into()], "x", &headers()).is_ok());
        let err = map
            .ensure_resolved(&["codigo".into(), "grupo".into()], "x", &headers())
            .unwrap_err();
        assert_eq!(err.unmatched, vec!["grupo"]);
    }
}
