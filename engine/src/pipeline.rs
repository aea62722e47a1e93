//! End-to-end import pipeline.
//!
//! ```text
//!   read ─▶ schema ─▶ map+normalize ─▶ assemble ─▶ ping ─▶ [replace] ─▶ load ─▶ verify ─▶ report
//!   └──────────── local, no remote state touched ────────┘
//! ```
//!
//! Everything before the preflight ping is pure and can be run alone with
//! [`prepare`] (used by the `map` command and dry runs). A fatal error
//! anywhere up to and including the ping aborts before a single batch is
//! attempted.
//!
//! # Example
//!
//! ```rust,ignore
//! use sinapi_load::{run_import, ImportSources, MemoryStore, ProfileRegistry, RunConfig};
//!
//! let registry = ProfileRegistry::builtin()?;
//! let profile = registry.resolve("insumos")?;
//! let sources = ImportSources::for_profile(&profile, "insumos.csv".parse()?, vec![]);
//! let report = run_import(&profile, &sources, &MemoryStore::new(), &RunConfig::default()).await?;
//! println!("{}", report.summary());
//! ```

use chrono::Local;
use serde::Serialize;
use uuid::Uuid;

use crate::assemble::{assemble, Assembly, RunControls};
use crate::config::RunConfig;
use crate::error::{PipelineResult, StoreError};
use crate::load::{BatchLoader, LoadOptions};
use crate::mapping::{normalize_table, ColumnMap, NormalizedTable};
use crate::profile::{ImportProfile, SourceSpec, WriteStrategy};
use crate::report::{run_scope, verify, RunReport, RunStatus};
use crate::schema::validate_columns;
use crate::source::{read_source, SourceLocator};
use crate::store::RemoteStore;

/// Where the primary and each secondary source are read from.
#[derive(Debug, Clone)]
pub struct ImportSources {
    pub primary: SourceLocator,
    /// Aligned with the profile's secondaries
    pub secondaries: Vec<SourceLocator>,
}

impl ImportSources {
    /// Fill in sheet and header-row defaults from the profile.
    ///
    /// A secondary without an explicit locator is read from the primary
    /// file, using the sheet named in the profile.
    pub fn for_profile(profile: &ImportProfile, primary: SourceLocator, secondaries: Vec<SourceLocator>) -> Self {
        let primary = with_defaults(primary, &profile.primary);
        let mut given = secondaries.into_iter();
        let secondaries = profile
            .secondaries
            .iter()
            .map(|spec| {
                let locator = given.next().unwrap_or_else(|| SourceLocator::new(primary.path.clone()));
                with_defaults(locator, spec)
            })
            .collect();
        Self { primary, secondaries }
    }

    pub fn source_ids(&self) -> Vec<String> {
        std::iter::once(&self.primary)
            .chain(self.secondaries.iter())
            .map(SourceLocator::source_id)
            .collect()
    }
}

fn with_defaults(mut locator: SourceLocator, spec: &SourceSpec) -> SourceLocator {
    if locator.sheet.is_none() {
        locator.sheet = spec.sheet.clone();
    }
    if locator.header_row == 0 {
        locator.header_row = spec.header_row;
    }
    locator
}

/// Per-source result of reading and mapping.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub rows: usize,
    pub columns: ColumnMap,
}

/// Output of the local stages.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub sources: Vec<SourceSummary>,
    /// Data rows read from the primary source
    pub rows_read: usize,
    pub assembly: Assembly,
}

/// Read, validate, map, normalize and assemble without touching the store.
pub fn prepare(profile: &ImportProfile, sources: &ImportSources, controls: &RunControls) -> PipelineResult<Prepared> {
    let (primary_table, primary_summary) =
        read_and_normalize(&sources.primary, &profile.primary, &profile.identifying_fields())?;

    let mut summaries = vec![primary_summary];
    let mut secondary_tables = Vec::with_capacity(profile.secondaries.len());
    let key_only = vec![profile.natural_key.clone()];
    for (locator, spec) in sources.secondaries.iter().zip(profile.secondaries.iter()) {
        let (table, summary) = read_and_normalize(locator, spec, &key_only)?;
        secondary_tables.push(table);
        summaries.push(summary);
    }

    let rows_read = primary_table.rows.len();
    let assembly = assemble(profile, &primary_table, &secondary_tables, controls);

    Ok(Prepared {
        sources: summaries,
        rows_read,
        assembly,
    })
}

fn read_and_normalize(
    locator: &SourceLocator,
    spec: &SourceSpec,
    must_resolve: &[String],
) -> PipelineResult<(NormalizedTable, SourceSummary)> {
    let raw = read_source(locator)?;
    validate_columns(&raw, &spec.required_columns)?;

    let map = ColumnMap::build(raw.headers(), &spec.fields);
    map.ensure_resolved(must_resolve, raw.source_id(), raw.headers())?;
    let unresolved = map.unresolved();
    if !unresolved.is_empty() {
        tracing::warn!(source = %raw.source_id(), fields = ?unresolved, "fields without a source column");
    }

    let table = normalize_table(&raw, &map, &spec.fields);
    let summary = SourceSummary {
        source_id: raw.source_id().to_string(),
        rows: raw.row_count(),
        columns: map,
    };
    Ok((table, summary))
}

/// Run a complete import and return its report.
///
/// `Err` only for fatal conditions (unreadable source, schema mismatch,
/// store unavailable at preflight). Rejected batches and records are part
/// of the report, not errors.
pub async fn run_import<S: RemoteStore + ?Sized>(
    profile: &ImportProfile,
    sources: &ImportSources,
    store: &S,
    config: &RunConfig,
) -> PipelineResult<RunReport> {
    config.validate(profile)?;
    let started_at = Local::now();
    let run_id = Uuid::new_v4();
    tracing::info!(%run_id, profile = %profile.name, table = %profile.table, "import started");

    let prepared = prepare(profile, sources, &config.controls(profile))?;

    store.ping(&profile.table).await.map_err(|e| match e {
        StoreError::Unavailable(_) => e,
        other => StoreError::Unavailable(other.to_string()),
    })?;

    let scope = run_scope(profile, &config.provenance, config.reference_date);

    let replaced = if config.replace {
        let removed = store.delete(&profile.table, &scope).await?;
        tracing::info!(removed, "previous rows with this provenance removed");
        Some(removed)
    } else {
        None
    };

    let mode = config.write_mode(profile);
    let loader = BatchLoader::new(
        store,
        &profile.table,
        LoadOptions {
            batch_size: config.batch_size,
            pace: config.pace,
            mode,
        },
    );
    let outcome = loader.load(&prepared.assembly.records).await;
    let written = outcome.written;

    let verification = verify(store, profile, &scope, written).await;

    let assembly = prepared.assembly;
    let mut report = RunReport {
        run_id,
        profile: profile.name.clone(),
        table: profile.table.clone(),
        sources: sources.source_ids(),
        provenance: config.provenance.clone(),
        reference_date: config.reference_date,
        write_mode: match config.strategy(profile) {
            WriteStrategy::Upsert => "upsert".to_string(),
            WriteStrategy::Insert => "insert".to_string(),
        },
        dry_run: config.dry_run,
        started_at,
        finished_at: started_at,
        rows_read: prepared.rows_read,
        excluded: assembly.excluded,
        warning_count: assembly.warnings.len(),
        warnings: assembly.warnings,
        replaced,
        attempted: 0,
        written: 0,
        failed: 0,
        success_rate: 0.0,
        batches: 0,
        fallback_batches: 0,
        status: RunStatus::Failure,
        verification: Some(verification),
        failures: Vec::new(),
        log_file: config.log_file.clone(),
    };
    report.apply_outcome(outcome);
    report.finished_at = Local::now();

    if let Some(dir) = &config.report_dir {
        report.write_to(dir)?;
    }

    tracing::info!(
        status = ?report.status,
        written = report.written,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileRegistry;

    #[test]
    fn test_secondary_defaults_to_primary_file() {
        let registry = ProfileRegistry::builtin().unwrap();
        let profile = registry.get("composicoes_mao_obra").unwrap();
        let sources = ImportSources::for_profile(profile, SourceLocator::new("mao_de_obra.xlsx"), vec![]);

        assert_eq!(sources.primary.sheet.as_deref(), Some("SEM Desoneração"));
        assert_eq!(sources.secondaries.len(), 1);
        assert_eq!(sources.secondaries[0].path, sources.primary.path);
        assert_eq!(sources.secondaries[0].sheet.as_deref(), Some("COM Desoneração"));
    }

    #[test]
    fn test_explicit_sheet_kept() {
        let registry = ProfileRegistry::builtin().unwrap();
        let profile = registry.get("manutencoes").unwrap();
        let locator: SourceLocator = "m.xlsx#Planilha1".parse().unwrap();
        let sources = ImportSources::for_profile(profile, locator, vec![]);
        assert_eq!(sources.primary.sheet.as_deref(), Some("Planilha1"));
        assert_eq!(sources.source_ids(), vec!["m.xlsx#Planilha1"]);
    }
}
