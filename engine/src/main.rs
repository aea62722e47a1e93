//! sinapi-load CLI - Load SINAPI tables into Supabase
//!
//! # Main Commands
//!
//! ```bash
//! sinapi-load import insumos docs/insumos.csv
//! sinapi-load import composicoes_mao_obra docs/mao_de_obra.xlsx
//! sinapi-load import manutencoes "docs/manutencoes.xlsx#Manutenções" --dry-run
//! sinapi-load verify composicoes_mao_obra
//! ```
//!
//! # Inspection Commands
//!
//! ```bash
//! sinapi-load inspect docs/insumos.csv     # headers, row count, matching profiles
//! sinapi-load map insumos docs/insumos.csv # column resolution and assembly, no writes
//! sinapi-load profiles list
//! sinapi-load profiles show manutencoes
//! ```
//!
//! Exit codes: 0 full success, 2 partial success, 1 failure or fatal error.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sinapi_load::{
    config::{
        RunConfig, StoreConfig, DEFAULT_BATCH_SIZE, DEFAULT_PACE_MS, DEFAULT_PROVENANCE, DEFAULT_REPORT_DIR,
        DEFAULT_TIMEOUT_SECS,
    },
    logging,
    pipeline::{prepare, run_import, ImportSources},
    profile::{ImportProfile, ProfileRegistry, WriteStrategy},
    report::{run_scope, verify},
    source::{read_source, SourceLocator},
    store::{MemoryStore, PostgrestStore, RemoteStore},
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sinapi-load")]
#[command(about = "Load SINAPI price tables and registries into Supabase", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a source into the profile's table
    Import {
        /// Profile name or path to a profile JSON file
        profile: String,

        /// Primary source (`path` or `path#Sheet`)
        source: SourceLocator,

        /// Secondary sources, in profile order (default: sheets of the primary file)
        #[arg(long = "secondary")]
        secondaries: Vec<SourceLocator>,

        /// Records per write call
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Pause between write calls, in milliseconds
        #[arg(long, default_value_t = DEFAULT_PACE_MS)]
        pace_ms: u64,

        /// Plain insert instead of the profile's write strategy
        #[arg(long, conflicts_with = "upsert")]
        insert: bool,

        /// Upsert on the natural key instead of the profile's write strategy
        #[arg(long)]
        upsert: bool,

        /// Delete rows carrying this run's provenance tag before loading
        #[arg(long)]
        replace: bool,

        /// Reference date stamped on records (default: today)
        #[arg(long)]
        reference_date: Option<NaiveDate>,

        /// Provenance tag stamped on records
        #[arg(long, default_value = DEFAULT_PROVENANCE)]
        provenance: String,

        /// Directory for the JSON run report
        #[arg(long, default_value = DEFAULT_REPORT_DIR)]
        report_dir: PathBuf,

        /// Directory for the run log file
        #[arg(long, default_value = logging::DEFAULT_LOG_DIR)]
        log_dir: PathBuf,

        /// Store request timeout, in seconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,

        /// Run against an in-memory store; nothing is sent anywhere
        #[arg(long)]
        dry_run: bool,
    },

    /// Show headers, row count and matching profiles of a source
    Inspect {
        /// Source (`path` or `path#Sheet`)
        source: SourceLocator,

        /// 0-based header row
        #[arg(long, default_value_t = 0)]
        header_row: usize,

        /// Number of sample rows to print
        #[arg(short = 'n', long, default_value_t = 5)]
        rows: usize,
    },

    /// Resolve columns and assemble records without writing
    Map {
        /// Profile name or path to a profile JSON file
        profile: String,

        /// Primary source (`path` or `path#Sheet`)
        source: SourceLocator,

        /// Secondary sources, in profile order
        #[arg(long = "secondary")]
        secondaries: Vec<SourceLocator>,

        /// Write assembled records as JSON to this file (default: print column bindings)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage import profiles
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Query the store for what a profile's table currently holds
    Verify {
        /// Profile name or path to a profile JSON file
        profile: String,

        /// Provenance tag to scope the count to
        #[arg(long, default_value = DEFAULT_PROVENANCE)]
        provenance: String,

        /// Reference date to scope the count to (default: today)
        #[arg(long)]
        reference_date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List available profiles
    List,

    /// Show a profile as JSON
    Show {
        /// Profile name or path
        name: String,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Import {
            profile,
            source,
            secondaries,
            batch_size,
            pace_ms,
            insert,
            upsert,
            replace,
            reference_date,
            provenance,
            report_dir,
            log_dir,
            timeout_secs,
            dry_run,
        } => {
            let write = match (insert, upsert) {
                (true, _) => Some(WriteStrategy::Insert),
                (_, true) => Some(WriteStrategy::Upsert),
                _ => None,
            };
            let config = RunConfig {
                batch_size,
                pace: Duration::from_millis(pace_ms),
                write,
                replace,
                reference_date: reference_date.unwrap_or_else(|| RunConfig::default().reference_date),
                provenance,
                report_dir: Some(report_dir),
                dry_run,
                log_file: None,
            };
            cmd_import(&profile, source, secondaries, config, &log_dir, Duration::from_secs(timeout_secs)).await
        }

        Commands::Inspect { source, header_row, rows } => {
            logging::init();
            cmd_inspect(source.with_header_row(header_row), rows).map(|_| ExitCode::SUCCESS)
        }

        Commands::Map {
            profile,
            source,
            secondaries,
            output,
        } => {
            logging::init();
            cmd_map(&profile, source, secondaries, output.as_deref()).map(|_| ExitCode::SUCCESS)
        }

        Commands::Profiles { action } => {
            logging::init();
            cmd_profiles(action).map(|_| ExitCode::SUCCESS)
        }

        Commands::Verify {
            profile,
            provenance,
            reference_date,
        } => {
            logging::init();
            let date = reference_date.unwrap_or_else(|| RunConfig::default().reference_date);
            cmd_verify(&profile, &provenance, date).await.map(|_| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn resolve_profile(name: &str) -> CliResult<ImportProfile> {
    Ok(ProfileRegistry::new()?.resolve(name)?)
}

async fn cmd_import(
    profile_name: &str,
    source: SourceLocator,
    secondaries: Vec<SourceLocator>,
    mut config: RunConfig,
    log_dir: &Path,
    timeout: Duration,
) -> CliResult<ExitCode> {
    let profile = resolve_profile(profile_name)?;

    match logging::init_with_file(log_dir, &profile.name) {
        Ok(path) => config.log_file = Some(path),
        Err(e) => {
            logging::init();
            tracing::warn!(error = %e, "log file unavailable, logging to console only");
        }
    }

    let sources = ImportSources::for_profile(&profile, source, secondaries);
    eprintln!("📄 Importing {} -> {}", profile.name, profile.table);
    for id in sources.source_ids() {
        eprintln!("   Source: {}", id);
    }

    let store: Box<dyn RemoteStore> = if config.dry_run {
        eprintln!("   Dry run: writing to an in-memory store");
        Box::new(MemoryStore::new())
    } else {
        let store_config = StoreConfig::from_env()?.with_timeout(timeout);
        Box::new(PostgrestStore::new(&store_config)?)
    };

    let report = run_import(&profile, &sources, store.as_ref(), &config).await?;

    eprintln!("\n{}", report.summary());
    for failure in report.failures.iter().take(10) {
        eprintln!("   ⚠️  {} (line {}, batch {}): {}", failure.natural_key, failure.line, failure.batch, failure.error);
    }
    if report.failures.len() > 10 {
        eprintln!("   ... and {} more (see report)", report.failures.len() - 10);
    }
    if let Some(dir) = &config.report_dir {
        eprintln!("💾 Report: {}", dir.join(report.file_name()).display());
    }
    if let Some(log) = &config.log_file {
        eprintln!("📝 Log: {}", log.display());
    }

    Ok(ExitCode::from(report.status.exit_code()))
}

fn cmd_inspect(source: SourceLocator, sample_rows: usize) -> CliResult<()> {
    eprintln!("📄 Inspecting: {}", source.source_id());
    let table = read_source(&source)?;

    eprintln!("   Rows: {}", table.row_count());
    eprintln!("   Columns ({}):", table.headers().len());
    for (i, header) in table.headers().iter().enumerate() {
        eprintln!("     {:>3}  {}", i, header.replace(['\n', '\r'], " "));
    }

    let registry = ProfileRegistry::new()?;
    let compatible = registry.find_compatible(table.headers());
    if compatible.is_empty() {
        eprintln!("   No matching profile");
    } else {
        for profile in compatible {
            eprintln!("   ✅ Matches profile: {}", profile.name);
        }
    }

    let sample: Vec<serde_json::Map<String, serde_json::Value>> = table
        .rows()
        .iter()
        .take(sample_rows)
        .map(|row| {
            table
                .headers()
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), serde_json::to_value(row.cell(i)).unwrap_or_default()))
                .collect()
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

fn cmd_map(
    profile_name: &str,
    source: SourceLocator,
    secondaries: Vec<SourceLocator>,
    output: Option<&Path>,
) -> CliResult<()> {
    let profile = resolve_profile(profile_name)?;
    let sources = ImportSources::for_profile(&profile, source, secondaries);
    let prepared = prepare(&profile, &sources, &RunConfig::default().controls(&profile))?;

    for summary in &prepared.sources {
        eprintln!("📄 {} ({} rows)", summary.source_id, summary.rows);
        for binding in summary.columns.bindings() {
            match &binding.label {
                Some(label) => eprintln!("   {:<24} <- {}", binding.field, label.replace(['\n', '\r'], " ")),
                None => eprintln!("   {:<24} <- (unresolved)", binding.field),
            }
        }
    }

    let assembly = &prepared.assembly;
    eprintln!("\n⚙️  Records: {}", assembly.records.len());
    eprintln!("   Excluded: {}", assembly.excluded.len());
    for excluded in assembly.excluded.iter().take(10) {
        eprintln!("     line {}: {}", excluded.line, excluded.reason);
    }
    eprintln!("   Warnings: {}", assembly.warnings.len());

    if let Some(path) = output {
        let rows: Vec<_> = assembly.records.iter().map(|r| r.to_row()).collect();
        fs::write(path, serde_json::to_string_pretty(&rows)?)?;
        eprintln!("💾 Saved to: {}", path.display());
    } else {
        println!("{}", serde_json::to_string_pretty(&prepared.sources)?);
    }
    Ok(())
}

fn cmd_profiles(action: ProfileAction) -> CliResult<()> {
    let registry = ProfileRegistry::new()?;
    match action {
        ProfileAction::List => {
            for profile in registry.list() {
                println!("{:<22} {:<30} {}", profile.name, profile.table, profile.description);
            }
        }
        ProfileAction::Show { name } => {
            let profile = registry.resolve(&name)?;
            println!("{}", profile.to_json()?);
        }
    }
    Ok(())
}

async fn cmd_verify(profile_name: &str, provenance: &str, reference_date: NaiveDate) -> CliResult<()> {
    let profile = resolve_profile(profile_name)?;
    let store = PostgrestStore::new(&StoreConfig::from_env()?)?;
    store.ping(&profile.table).await?;

    let scope = run_scope(&profile, provenance, reference_date);
    let v = verify(&store, &profile, &scope, 0).await;

    println!("📊 {}", profile.table);
    for (column, value) in &v.scope {
        println!("   Scope: {} = {}", column, value);
    }
    match v.remote_count {
        Some(n) => println!("   Rows: {}", n),
        None => println!("   Rows: unavailable"),
    }
    for (value, count) in &v.distribution {
        println!("   {:<20} {}", value, count);
    }
    if !v.latest.is_empty() {
        let latest: Vec<String> = v.latest.iter().map(sinapi_load::store::value_text).collect();
        println!("   Latest: {}", latest.join(", "));
    }
    for error in &v.errors {
        println!("   ⚠️  {}", error);
    }
    Ok(())
}
