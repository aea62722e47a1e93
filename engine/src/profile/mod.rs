//! Dataset profiles.
//!
//! A profile describes one import: the target table, the natural key, how
//! raw columns resolve to canonical fields, which sources are joined and
//! which control fields every record receives. The engine itself has no
//! per-dataset code; everything dataset-specific lives in a profile.

pub mod registry;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ProfileError, ProfileResult};
use crate::mapping::operations::Operation;

pub use registry::ProfileRegistry;

/// A complete import description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProfile {
    /// Short identifier (`insumos`, `manutencoes`, ...)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Target table in the remote store
    pub table: String,

    /// Canonical field holding the natural key
    pub natural_key: String,

    /// Default write strategy, overridable per run
    #[serde(default)]
    pub write: WriteStrategy,

    /// Fields whose absence excludes a row before writing
    #[serde(default)]
    pub required: Vec<String>,

    /// Source that defines row existence
    pub primary: SourceSpec,

    /// Sources joined onto the primary by natural key
    #[serde(default)]
    pub secondaries: Vec<SourceSpec>,

    /// Fields stamped identically on every record of a run
    #[serde(default)]
    pub controls: ControlFields,

    /// Post-load checks
    #[serde(default)]
    pub verify: VerifySpec,
}

/// How to read and map one source table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Name used in logs and warnings
    #[serde(default)]
    pub label: Option<String>,

    /// Default sheet when the locator names none
    #[serde(default)]
    pub sheet: Option<String>,

    /// 0-based index of the header row
    #[serde(default)]
    pub header_row: usize,

    /// Hints that must each match some raw header before parsing starts
    #[serde(default)]
    pub required_columns: Vec<String>,

    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// Templated field sets, expanded into `fields` on load
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<FieldFamily>,
}

impl SourceSpec {
    pub fn display_name(&self, fallback: &str) -> String {
        self.label
            .clone()
            .or_else(|| self.sheet.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One canonical field and the column it derives from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Canonical target field
    pub name: String,

    /// How to find the raw column
    #[serde(rename = "match")]
    pub matcher: Matcher,

    #[serde(default)]
    pub kind: FieldKind,

    /// Text longer than this is truncated with a `...` marker
    #[serde(default)]
    pub max_length: Option<usize>,

    /// Value used when the normalized cell is absent
    #[serde(default)]
    pub default: Option<Value>,

    /// Text operations applied after trimming, in order
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// Column matching rule, evaluated on normalized labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Matcher {
    /// Label contains any of these phrases
    Contains { any: Vec<String> },
    /// Label equals this text
    Equals { label: String },
    /// Label has this standalone word (e.g. a state code)
    Token { token: String },
}

/// Target type of a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Number,
    Integer,
    Date,
    Boolean,
}

/// How records reach the target table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Insert, merging rows that share the natural key
    #[default]
    Upsert,
    /// Plain insert; duplicates fail if the table enforces uniqueness
    Insert,
}

/// A family of fields sharing a shape, one per token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFamily {
    /// Field name with a `{token}` placeholder (lowercased token)
    pub name_template: String,
    /// Defaults to the 27 federative units
    #[serde(default = "state_tokens")]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl FieldFamily {
    fn expand(&self) -> Vec<FieldSpec> {
        self.tokens
            .iter()
            .map(|token| FieldSpec {
                name: self.name_template.replace("{token}", &token.to_lowercase()),
                matcher: Matcher::Token {
                    token: token.clone(),
                },
                kind: self.kind,
                max_length: self.max_length,
                default: None,
                operations: Vec::new(),
            })
            .collect()
    }
}

/// Control fields applied to every record of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlFields {
    /// Receives the run's reference date
    #[serde(default)]
    pub reference_date_field: Option<String>,

    /// Receives the run's provenance tag
    #[serde(default)]
    pub provenance_field: Option<String>,

    /// Receives `true`
    #[serde(default)]
    pub active_field: Option<String>,

    /// Fixed values
    #[serde(default)]
    pub constants: BTreeMap<String, Value>,
}

/// What to read back after loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySpec {
    /// Column whose value distribution is reported
    #[serde(default)]
    pub distribution_field: Option<String>,

    /// Column whose most recent values are sampled
    #[serde(default)]
    pub latest_field: Option<String>,

    #[serde(default = "default_latest_limit")]
    pub latest_limit: usize,
}

fn default_latest_limit() -> usize {
    5
}

impl Default for VerifySpec {
    fn default() -> Self {
        Self {
            distribution_field: None,
            latest_field: None,
            latest_limit: default_latest_limit(),
        }
    }
}

impl ImportProfile {
    /// Parse a profile from JSON, expanding families and validating it.
    pub fn from_json(json: &str) -> ProfileResult<Self> {
        let profile: ImportProfile = serde_json::from_str(json)?;
        profile.prepare()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Expand field families and check internal consistency.
    pub fn prepare(mut self) -> ProfileResult<Self> {
        expand_families(&mut self.primary);
        for secondary in &mut self.secondaries {
            expand_families(secondary);
        }
        self.check()?;
        Ok(self)
    }

    /// All sources, primary first.
    pub fn sources(&self) -> impl Iterator<Item = &SourceSpec> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }

    /// Fields that must resolve to a column in the primary source.
    pub fn identifying_fields(&self) -> Vec<String> {
        let mut fields = vec![self.natural_key.clone()];
        for f in &self.required {
            if !fields.contains(f) {
                fields.push(f.clone());
            }
        }
        fields
    }

    fn check(&self) -> ProfileResult<()> {
        let invalid = |msg: String| Err(ProfileError::invalid(&self.name, msg));

        if self.name.trim().is_empty() {
            return invalid("name is empty".into());
        }
        if self.table.trim().is_empty() {
            return invalid("table is empty".into());
        }

        for (idx, source) in self.sources().enumerate() {
            let source_name = source.display_name(&format!("source {}", idx));
            if source.field(&self.natural_key).is_none() {
                return invalid(format!(
                    "natural key '{}' has no field in {}",
                    self.natural_key, source_name
                ));
            }
            let mut seen = BTreeSet::new();
            for field in &source.fields {
                if !seen.insert(field.name.as_str()) {
                    return invalid(format!("field '{}' declared twice in {}", field.name, source_name));
                }
            }
        }

        for required in &self.required {
            if self.primary.field(required).is_none() {
                return invalid(format!("required field '{}' is not a primary field", required));
            }
        }

        let primary_fields: BTreeSet<&str> = self.primary.fields.iter().map(|f| f.name.as_str()).collect();
        for secondary in &self.secondaries {
            for field in &secondary.fields {
                if field.name != self.natural_key && primary_fields.contains(field.name.as_str()) {
                    return invalid(format!(
                        "field '{}' is produced by both the primary and {}",
                        field.name,
                        secondary.display_name("a secondary source")
                    ));
                }
            }
        }

        Ok(())
    }
}

fn expand_families(source: &mut SourceSpec) {
    let families = std::mem::take(&mut source.families);
    for family in &families {
        source.fields.extend(family.expand());
    }
}

/// Brazilian federative units, in SINAPI column order.
pub const STATES: [&str; 27] = [
    "AC", "AL", "AM", "AP", "BA", "CE", "DF", "ES", "GO", "MA", "MG", "MS", "MT", "PA", "PB", "PE",
    "PI", "PR", "RJ", "RN", "RO", "RR", "RS", "SC", "SE", "SP", "TO",
];

fn state_tokens() -> Vec<String> {
    STATES.iter().map(|s| s.to_string()).collect()
}
