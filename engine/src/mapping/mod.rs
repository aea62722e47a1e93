//! Column mapping and normalization.
//!
//! ```text
//!   RawTable ──ColumnMap──▶ canonical fields ──normalize──▶ NormalizedTable
//!   (raw labels)            (per FieldSpec)                 (typed values)
//! ```

pub mod column_map;
pub mod normalize;
pub mod operations;

use std::collections::BTreeMap;

use crate::profile::FieldSpec;
use crate::source::{Cell, RawTable};

pub use column_map::{ColumnBinding, ColumnMap};
pub use normalize::{normalize_cell, normalize_number, truncate_text, FieldValue};
pub use operations::Operation;

/// One source row after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub line: usize,
    pub values: BTreeMap<String, FieldValue>,
}

impl NormalizedRow {
    pub fn get(&self, field: &str) -> &FieldValue {
        self.values.get(field).unwrap_or(&FieldValue::Absent)
    }
}

/// A source table expressed in canonical fields.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub source_id: String,
    pub rows: Vec<NormalizedRow>,
}

/// Normalize every row of `table`. Fields without a column take their
/// default, or stay absent.
pub fn normalize_table(table: &RawTable, map: &ColumnMap, fields: &[FieldSpec]) -> NormalizedTable {
    let columns: Vec<(&FieldSpec, Option<usize>)> =
        fields.iter().map(|spec| (spec, map.column(&spec.name))).collect();

    let rows = table
        .rows()
        .iter()
        .map(|raw| {
            let values = columns
                .iter()
                .map(|(spec, column)| {
                    let cell = column.map(|c| raw.cell(c)).unwrap_or(&Cell::Empty);
                    (spec.name.clone(), normalize_cell(cell, spec))
                })
                .collect();
            NormalizedRow { line: raw.line, values }
        })
        .collect();

    tracing::debug!(
        source = %table.source_id(),
        fields = fields.len(),
        resolved = map.resolved_count(),
        "table normalized"
    );

    NormalizedTable {
        source_id: table.source_id().to_string(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{FieldKind, Matcher};
    use crate::source::RawRow;

    #[test]
    fn test_normalize_table() {
        let table = RawTable::new(
            "t.csv",
            vec!["Código".into(), "Preço".into()],
            vec![
                RawRow { line: 2, cells: vec![Cell::Text("10".into()), Cell::Text("R$ 1.234,56".into())] },
                RawRow { line: 3, cells: vec![Cell::Text("11".into())] },
            ],
        );
        let fields = vec![
            FieldSpec {
                name: "codigo".into(),
                matcher: Matcher::Equals { label: "Codigo".into() },
                kind: FieldKind::Text,
                max_length: None,
                default: None,
                operations: vec![],
            },
            FieldSpec {
                name: "preco".into(),
                matcher: Matcher::Contains { any: vec!["preco".into()] },
                kind: FieldKind::Number,
                max_length: None,
                default: None,
                operations: vec![],
            },
            FieldSpec {
                name: "unidade".into(),
                matcher: Matcher::Equals { label: "Unidade".into() },
                kind: FieldKind::Text,
                max_length: None,
                default: Some(serde_json::Value::from("UN")),
                operations: vec![],
            },
        ];
        let map = ColumnMap::build(table.headers(), &fields);
        let out = normalize_table(&table, &map, &fields);

        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].get("preco"), &FieldValue::Number(1234.56));
        assert_eq!(out.rows[1].get("preco"), &FieldValue::Absent);
        assert_eq!(out.rows[1].get("unidade"), &FieldValue::Text("UN".into()));
        assert_eq!(out.rows[1].line, 3);
    }
}
