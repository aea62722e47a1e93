//! Record assembly: join sources, stamp control fields, drop unusable rows.
//!
//! ```text
//!   primary rows ──┬── join secondaries on natural key (first match wins)
//!                  ├── control fields (reference date, provenance, active, constants)
//!                  └── required-field and duplicate-key check ──▶ records | excluded
//! ```
//!
//! The primary source decides which records exist. Secondary rows only
//! contribute fields.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::mapping::{FieldValue, NormalizedRow, NormalizedTable};
use crate::profile::{FieldKind, ImportProfile, WriteStrategy};

/// A record ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub natural_key: String,
    /// Line of the primary row it came from
    pub line: usize,
    pub fields: BTreeMap<String, FieldValue>,
}

impl NormalizedRecord {
    pub fn get(&self, field: &str) -> &FieldValue {
        self.fields.get(field).unwrap_or(&FieldValue::Absent)
    }

    /// JSON object sent to the store; absent values become `null`.
    pub fn to_row(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

/// Values applied identically to every record of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunControls {
    pub reference_date: NaiveDate,
    pub provenance: String,
    /// Under upsert, a repeated primary key would overwrite the earlier row
    pub write: WriteStrategy,
}

/// A primary row that was not turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedRow {
    pub line: usize,
    pub reason: String,
}

/// Non-fatal anomaly found while joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssemblyWarning {
    /// Primary key with no row in a secondary source
    MissingInSecondary { key: String, secondary: String },
    /// Secondary row whose key is not in the primary; dropped
    OrphanInSecondary { key: String, secondary: String, line: usize },
    /// Key seen more than once in the same source; the first occurrence is joined
    DuplicateKey { key: String, source: String, line: usize },
}

#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub records: Vec<NormalizedRecord>,
    pub excluded: Vec<ExcludedRow>,
    pub warnings: Vec<AssemblyWarning>,
}

/// Join `secondaries` onto `primary` and apply controls.
///
/// `secondaries` are positionally aligned with `profile.secondaries`.
pub fn assemble(
    profile: &ImportProfile,
    primary: &NormalizedTable,
    secondaries: &[NormalizedTable],
    controls: &RunControls,
) -> Assembly {
    let mut assembly = Assembly::default();

    let indexes: Vec<SecondaryIndex> = secondaries
        .iter()
        .zip(profile.secondaries.iter())
        .map(|(table, spec)| {
            let name = spec.display_name(&table.source_id);
            let fields = spec
                .fields
                .iter()
                .filter(|f| f.name != profile.natural_key)
                .map(|f| f.name.clone())
                .collect();
            SecondaryIndex::build(table, name, fields, &profile.natural_key, &mut assembly.warnings)
        })
        .collect();

    // key -> line of its first occurrence
    let mut primary_keys: HashMap<String, usize> = HashMap::new();
    let required = profile.identifying_fields();

    for row in &primary.rows {
        let missing: Vec<&str> = required
            .iter()
            .filter(|f| row.get(f).is_absent())
            .map(|f| f.as_str())
            .collect();
        if !missing.is_empty() {
            assembly.excluded.push(ExcludedRow {
                line: row.line,
                reason: format!("missing required field(s): {}", missing.join(", ")),
            });
            continue;
        }

        let Some(key) = row.get(&profile.natural_key).key_text() else {
            continue;
        };
        if let Some(&first) = primary_keys.get(&key) {
            if controls.write == WriteStrategy::Upsert {
                assembly.excluded.push(ExcludedRow {
                    line: row.line,
                    reason: format!("duplicate natural key {} (first on line {})", key, first),
                });
                continue;
            }
            assembly.warnings.push(AssemblyWarning::DuplicateKey {
                key: key.clone(),
                source: primary.source_id.clone(),
                line: row.line,
            });
        } else {
            primary_keys.insert(key.clone(), row.line);
        }

        let mut fields = row.values.clone();
        for index in &indexes {
            match index.rows.get(&key) {
                Some(sec) => {
                    for name in &index.fields {
                        fields.insert(name.clone(), sec.get(name).clone());
                    }
                }
                None => {
                    for name in &index.fields {
                        fields.insert(name.clone(), FieldValue::Absent);
                    }
                    assembly.warnings.push(AssemblyWarning::MissingInSecondary {
                        key: key.clone(),
                        secondary: index.name.clone(),
                    });
                }
            }
        }

        apply_controls(profile, controls, &mut fields);

        assembly.records.push(NormalizedRecord {
            natural_key: key,
            line: row.line,
            fields,
        });
    }

    for index in &indexes {
        for (key, row) in &index.rows {
            if !primary_keys.contains_key(key) {
                assembly.warnings.push(AssemblyWarning::OrphanInSecondary {
                    key: key.clone(),
                    secondary: index.name.clone(),
                    line: row.line,
                });
            }
        }
    }

    tracing::info!(
        records = assembly.records.len(),
        excluded = assembly.excluded.len(),
        warnings = assembly.warnings.len(),
        "records assembled"
    );

    assembly
}

fn apply_controls(profile: &ImportProfile, controls: &RunControls, fields: &mut BTreeMap<String, FieldValue>) {
    let c = &profile.controls;
    if let Some(name) = &c.reference_date_field {
        fields.insert(name.clone(), FieldValue::Date(controls.reference_date));
    }
    if let Some(name) = &c.provenance_field {
        fields.insert(name.clone(), FieldValue::Text(controls.provenance.clone()));
    }
    if let Some(name) = &c.active_field {
        fields.insert(name.clone(), FieldValue::Bool(true));
    }
    for (name, value) in &c.constants {
        let kind = match value {
            Value::Number(n) if n.is_i64() => FieldKind::Integer,
            Value::Number(_) => FieldKind::Number,
            _ => FieldKind::Text,
        };
        fields.insert(name.clone(), FieldValue::from_json(value, kind));
    }
}

struct SecondaryIndex<'a> {
    name: String,
    fields: Vec<String>,
    rows: BTreeMap<String, &'a NormalizedRow>,
}

impl<'a> SecondaryIndex<'a> {
    fn build(
        table: &'a NormalizedTable,
        name: String,
        fields: Vec<String>,
        natural_key: &str,
        warnings: &mut Vec<AssemblyWarning>,
    ) -> Self {
        let mut rows = BTreeMap::new();
        for row in &table.rows {
            let Some(key) = row.get(natural_key).key_text() else {
                continue;
            };
            if rows.contains_key(&key) {
                warnings.push(AssemblyWarning::DuplicateKey {
                    key,
                    source: table.source_id.clone(),
                    line: row.line,
                });
                continue;
            }
            rows.insert(key, row);
        }
        Self { name, fields, rows }
    }
}
