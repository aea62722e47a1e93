//! # sinapi-load - Resilient batch ingestion for SINAPI tables
//!
//! Loads SINAPI reference tables (input prices, labour compositions,
//! maintenance registries) from CSV exports and spreadsheets into a
//! Supabase/PostgREST table, isolating bad records instead of losing whole
//! batches, and leaving a JSON report and a log file behind every run.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │ CSV / XLSX │──▶│  Schema  │──▶│ Map +       │──▶│ Assemble │──▶│ Batch load │──▶│ Verify + │
//! │  (source)  │   │ (hints)  │   │ normalize   │   │  (join)  │   │ (fallback) │   │  report  │
//! └────────────┘   └──────────┘   └─────────────┘   └──────────┘   └────────────┘   └──────────┘
//! ```
//!
//! Datasets are described by JSON [`ImportProfile`]s; three ship built in
//! (`insumos`, `manutencoes`, `composicoes_mao_obra`).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sinapi_load::{run_import, ImportSources, PostgrestStore, ProfileRegistry, RunConfig, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let profile = ProfileRegistry::builtin()?.resolve("insumos")?;
//!     let sources = ImportSources::for_profile(&profile, "insumos.csv".parse()?, vec![]);
//!     let store = PostgrestStore::new(&StoreConfig::from_env()?)?;
//!     let report = run_import(&profile, &sources, &store, &RunConfig::default()).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types, fatal conditions only
//! - [`source`] - Delimited and spreadsheet readers
//! - [`schema`] - Header validation
//! - [`mapping`] - Column resolution and value normalization
//! - [`profile`] - Dataset profiles and registry
//! - [`assemble`] - Multi-source join and control fields
//! - [`store`] - Remote store trait, PostgREST and in-memory backends
//! - [`load`] - Batch loader with per-record fallback
//! - [`report`] - Verification and run report
//! - [`pipeline`] - End-to-end orchestration

// Core modules
pub mod config;
pub mod error;
pub mod logging;

// Reading
pub mod schema;
pub mod source;

// Transformation
pub mod assemble;
pub mod mapping;
pub mod profile;

// Loading
pub mod load;
pub mod store;

// Orchestration
pub mod pipeline;
pub mod report;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    PipelineError,
    PipelineResult,
    ProfileError,
    ReportError,
    SchemaMismatchError,
    SourceError,
    StoreError,
};

// =============================================================================
// Re-exports - Sources
// =============================================================================

pub use source::{read_source, Cell, RawRow, RawTable, SourceLocator};
pub use schema::{normalize_label, validate_columns, SchemaReport};

// =============================================================================
// Re-exports - Profiles and mapping
// =============================================================================

pub use profile::{FieldKind, FieldSpec, ImportProfile, Matcher, ProfileRegistry, WriteStrategy};
pub use mapping::{normalize_number, normalize_table, ColumnMap, FieldValue, NormalizedTable, Operation};
pub use assemble::{assemble, Assembly, AssemblyWarning, ExcludedRow, NormalizedRecord, RunControls};

// =============================================================================
// Re-exports - Store and loading
// =============================================================================

pub use store::{Filter, MemoryStore, PostgrestStore, RemoteStore, WriteMode};
pub use load::{BatchLoader, LoadOptions, LoadOutcome, RecordFailure};

// =============================================================================
// Re-exports - Pipeline and reporting
// =============================================================================

pub use config::{RunConfig, StoreConfig};
pub use pipeline::{prepare, run_import, ImportSources, Prepared};
pub use report::{verify, RunReport, RunStatus, Verification};
