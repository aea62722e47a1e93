//! Post-load verification and the run report.
//!
//! The report is the durable artifact of a run: counts, outcome class,
//! every excluded row and every per-record failure, plus what the store
//! says after the load. It is written as pretty JSON to
//! `reports/import_<profile>_<timestamp>.json`.

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::assemble::{AssemblyWarning, ExcludedRow};
use crate::error::ReportError;
use crate::load::{LoadOutcome, RecordFailure};
use crate::profile::ImportProfile;
use crate::store::{value_text, Filter, Order, RemoteStore};

/// Outcome class of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every attempted record was written
    FullSuccess,
    /// Some written, some failed
    PartialSuccess,
    /// Nothing written (or nothing to write)
    Failure,
}

impl RunStatus {
    pub fn classify(attempted: usize, written: usize, failed: usize) -> Self {
        if attempted == 0 || written == 0 {
            RunStatus::Failure
        } else if failed == 0 {
            RunStatus::FullSuccess
        } else {
            RunStatus::PartialSuccess
        }
    }

    /// Process exit code: 0 full success, 2 partial, 1 failure.
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::FullSuccess => 0,
            RunStatus::PartialSuccess => 2,
            RunStatus::Failure => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::FullSuccess => "FULL SUCCESS",
            RunStatus::PartialSuccess => "PARTIAL SUCCESS",
            RunStatus::Failure => "FAILURE",
        }
    }
}

/// What the store reports after loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Verification {
    /// Filters the count was scoped to
    pub scope: BTreeMap<String, String>,
    pub remote_count: Option<u64>,
    pub expected: usize,
    pub matches: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub distribution: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub latest: Vec<Value>,
    /// Verification problems; these never change the run status
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Filters selecting the rows a run is responsible for.
///
/// Provenance tag if the profile stamps one, else the reference date,
/// else the whole table.
pub fn run_scope(profile: &ImportProfile, provenance: &str, reference_date: NaiveDate) -> Vec<Filter> {
    if let Some(field) = &profile.controls.provenance_field {
        vec![Filter::eq(field, provenance)]
    } else if let Some(field) = &profile.controls.reference_date_field {
        vec![Filter::eq(field, reference_date.format("%Y-%m-%d").to_string())]
    } else {
        Vec::new()
    }
}

/// Read back counts, distribution and latest values. Never fails: each
/// query error is recorded and the next check still runs.
pub async fn verify<S: RemoteStore + ?Sized>(
    store: &S,
    profile: &ImportProfile,
    scope: &[Filter],
    expected: usize,
) -> Verification {
    let mut v = Verification {
        scope: scope.iter().map(|f| (f.column.clone(), f.value.clone())).collect(),
        expected,
        ..Verification::default()
    };

    match store.count(&profile.table, scope).await {
        Ok(n) => {
            v.remote_count = Some(n);
            v.matches = Some(n == expected as u64);
            if n != expected as u64 {
                tracing::warn!(remote = n, expected, "remote count differs from written count");
            }
        }
        Err(e) => v.errors.push(format!("count: {}", e)),
    }

    if let Some(field) = &profile.verify.distribution_field {
        match store.select_column(&profile.table, field, scope, None, None).await {
            Ok(values) => {
                for value in values {
                    let key = match value_text(&value) {
                        s if s.is_empty() => "(null)".to_string(),
                        s => s,
                    };
                    *v.distribution.entry(key).or_insert(0) += 1;
                }
            }
            Err(e) => v.errors.push(format!("distribution of {}: {}", field, e)),
        }
    }

    if let Some(field) = &profile.verify.latest_field {
        let order = Order::desc(field.clone());
        match store
            .select_column(&profile.table, field, &[], Some(&order), Some(profile.verify.latest_limit))
            .await
        {
            Ok(values) => v.latest = values,
            Err(e) => v.errors.push(format!("latest {}: {}", field, e)),
        }
    }

    tracing::info!(
        remote_count = ?v.remote_count,
        expected,
        errors = v.errors.len(),
        "verification finished"
    );
    v
}

/// The complete record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub profile: String,
    pub table: String,
    pub sources: Vec<String>,
    pub provenance: String,
    pub reference_date: NaiveDate,
    pub write_mode: String,
    pub dry_run: bool,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,

    pub rows_read: usize,
    pub excluded: Vec<ExcludedRow>,
    pub warning_count: usize,
    pub warnings: Vec<AssemblyWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<u64>,

    pub attempted: usize,
    pub written: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub batches: usize,
    pub fallback_batches: usize,
    pub status: RunStatus,

    pub verification: Option<Verification>,
    pub failures: Vec<RecordFailure>,
    pub log_file: Option<PathBuf>,
}

impl RunReport {
    /// Fill the load counters and derive the status.
    pub fn apply_outcome(&mut self, outcome: LoadOutcome) {
        self.attempted = outcome.attempted;
        self.written = outcome.written;
        self.failed = outcome.failed;
        self.success_rate = (outcome.success_rate() * 100.0).round() / 100.0;
        self.batches = outcome.batches;
        self.fallback_batches = outcome.fallback_batches;
        self.status = RunStatus::classify(outcome.attempted, outcome.written, outcome.failed);
        self.failures = outcome.failures;
    }

    /// Multi-line human summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Import {} -> {} [{}]\n", self.profile, self.table, self.status.label()));
        out.push_str(&format!("   Rows read:   {}\n", self.rows_read));
        out.push_str(&format!("   Excluded:    {}\n", self.excluded.len()));
        out.push_str(&format!("   Warnings:    {}\n", self.warning_count));
        out.push_str(&format!("   Attempted:   {}\n", self.attempted));
        out.push_str(&format!("   Written:     {}\n", self.written));
        out.push_str(&format!("   Failed:      {}\n", self.failed));
        out.push_str(&format!("   Success:     {:.2}%\n", self.success_rate));
        if let Some(v) = &self.verification {
            match v.remote_count {
                Some(n) => out.push_str(&format!("   Remote rows: {} (expected {})\n", n, v.expected)),
                None => out.push_str("   Remote rows: unavailable\n"),
            }
        }
        out
    }

    pub fn file_name(&self) -> String {
        format!("import_{}_{}.json", self.profile, self.started_at.format("%Y%m%d_%H%M%S"))
    }

    /// Write the report into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        tracing::info!(path = %path.display(), "report written");
        Ok(path)
    }
}
