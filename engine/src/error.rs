//! Error types for the ingestion engine.
//!
//! Only conditions that must abort a run before remote state is touched
//! are modelled as errors here:
//!
//! - [`SourceError`] - missing, empty or corrupt input
//! - [`SchemaMismatchError`] - required columns could not be resolved
//! - [`ProfileError`] - dataset profile could not be loaded
//! - [`StoreError`] - remote store failures (fatal only when unreachable)
//! - [`ConfigError`] - store credentials or run settings are unusable
//! - [`ReportError`] - the run artifact could not be written
//! - [`PipelineError`] - top-level, run-aborting errors
//!
//! Per-record and per-batch outcomes are plain values (see
//! [`crate::load::RecordFailure`] and [`crate::assemble::AssemblyWarning`]).

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Source Errors
// =============================================================================

/// Errors while reading a tabular source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The file does not exist.
    #[error("Source not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The source has no readable data rows.
    #[error("Source has no data rows: {0}")]
    Empty(String),

    /// The source exists but cannot be decoded.
    #[error("Source unreadable ({source_id}): {message}")]
    Unreadable { source_id: String, message: String },

    /// The requested sheet is not present in the workbook.
    #[error("Sheet '{sheet}' not found in {source_id} (available: {})", .available.join(", "))]
    SheetNotFound {
        source_id: String,
        sheet: String,
        available: Vec<String>,
    },

    /// The file extension is not a supported tabular format.
    #[error("Unsupported source format: {0} (expected .csv, .txt, .xlsx, .xlsm, .xls or .ods)")]
    UnsupportedFormat(String),
}

impl SourceError {
    pub fn unreadable(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Unreadable {
            source_id: source_id.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Schema Errors
// =============================================================================

/// Required columns could not be matched against the raw headers.
///
/// Always lists every unmatched hint, never only the first one.
#[derive(Debug, Clone, Error)]
#[error("Schema mismatch in {source_id}: unmatched {}", .unmatched.join(", "))]
pub struct SchemaMismatchError {
    pub source_id: String,
    pub unmatched: Vec<String>,
    pub available: Vec<String>,
}

// =============================================================================
// Profile Errors
// =============================================================================

/// Errors while loading a dataset profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// No built-in profile with this name and no file at this path.
    #[error("Profile not found: {0}")]
    NotFound(String),

    /// The profile is structurally invalid.
    #[error("Invalid profile '{name}': {message}")]
    Invalid { name: String, message: String },

    /// IO error.
    #[error("Profile IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Profile JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProfileError {
    pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        ProfileError::Invalid {
            name: name.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Remote Store Errors
// =============================================================================

/// Errors from the remote tabular store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Credentials missing/invalid or store unreachable. Fatal.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error status.
    #[error("Store rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Transport failure (timeout, connection reset, ...).
    #[error("Store request failed: {0}")]
    Transport(String),

    /// The store answered with something we could not interpret.
    #[error("Invalid store response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// True when no write can succeed at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Report Errors
// =============================================================================

/// Errors while persisting the run artifact.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Report IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Run-aborting errors.
///
/// Every variant is raised before the first batch is written, except
/// [`PipelineError::Report`] which is raised after loading finished.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source reading error.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Required columns missing.
    #[error(transparent)]
    Schema(#[from] SchemaMismatchError),

    /// Profile error.
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote store cannot be used.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Report could not be written.
    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for profile operations.
pub type ProfileResult<T> = Result<T, ProfileError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let err: PipelineError = SourceError::Empty("insumos.csv".into()).into();
        assert!(err.to_string().contains("insumos.csv"));

        let err: PipelineError = StoreError::Unavailable("SUPABASE_URL not set".into()).into();
        assert!(err.to_string().contains("SUPABASE_URL"));
    }

    #[test]
    fn test_schema_mismatch_lists_every_hint() {
        let err = SchemaMismatchError {
            source_id: "insumos.csv".into(),
            unmatched: vec!["Código da".into(), "Descrição do Insumo".into()],
            available: vec!["Unidade".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Código da"));
        assert!(msg.contains("Descrição do Insumo"));
    }

    #[test]
    fn test_sheet_not_found_lists_available() {
        let err = SourceError::SheetNotFound {
            source_id: "mao_de_obra.xlsx".into(),
            sheet: "COM".into(),
            available: vec!["SEM Desoneração".into(), "COM Desoneração".into()],
        };
        assert!(err.to_string().contains("SEM Desoneração, COM Desoneração"));
    }

    #[test]
    fn test_unavailable_is_fatal() {
        assert!(StoreError::Unavailable("no key".into()).is_unavailable());
        assert!(!StoreError::Transport("timeout".into()).is_unavailable());
    }
}
