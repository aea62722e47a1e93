//! Run and store configuration.
//!
//! Store credentials come from the environment (a `.env` file is loaded
//! first). Run settings come from the command line and default to the
//! values below.

use chrono::{Local, NaiveDate};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::assemble::RunControls;
use crate::error::ConfigError;
use crate::profile::{ImportProfile, WriteStrategy};
use crate::store::WriteMode;

/// Records per write call
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Pause between write calls
pub const DEFAULT_PACE_MS: u64 = 100;

/// Provenance tag stamped on imported rows
pub const DEFAULT_PROVENANCE: &str = "SINAPI_OFICIAL";

/// Default directory for run reports
pub const DEFAULT_REPORT_DIR: &str = "reports";

/// Per-request timeout against the store
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const URL_VARS: [&str; 2] = ["SUPABASE_URL", "VITE_SUPABASE_URL"];
const SERVICE_KEY_VARS: [&str; 2] = ["SUPABASE_SERVICE_KEY", "VITE_SUPABASE_ROLE_KEY"];
const ANON_KEY_VARS: [&str; 2] = ["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"];

/// Which kind of key authenticates the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Bypasses row-level security
    Service,
    /// Subject to row-level security; writes may be refused
    Anon,
}

/// Connection settings for the remote store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
    pub key_kind: KeyKind,
    pub timeout: Duration,
}

impl StoreConfig {
    /// Read credentials from the environment, loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolve credentials through `lookup`, trying each variable in order.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|n| lookup(*n))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let url = first(&URL_VARS[..]).ok_or_else(|| ConfigError::MissingVar(URL_VARS.join(" or ")))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!("store URL must be http(s): {}", url)));
        }

        let (key, key_kind) = match first(&SERVICE_KEY_VARS[..]) {
            Some(key) => (key, KeyKind::Service),
            None => match first(&ANON_KEY_VARS[..]) {
                Some(key) => (key, KeyKind::Anon),
                None => {
                    let all: Vec<&str> = SERVICE_KEY_VARS.iter().chain(ANON_KEY_VARS.iter()).copied().collect();
                    return Err(ConfigError::MissingVar(all.join(" or ")));
                }
            },
        };

        if key_kind == KeyKind::Anon {
            tracing::warn!("using an anon key; row-level security may reject writes (set SUPABASE_SERVICE_KEY)");
        }

        Ok(Self {
            url,
            key,
            key_kind,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Settings for one import run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub batch_size: usize,
    /// Pause between consecutive write calls
    pub pace: Duration,
    /// Overrides the profile's write strategy
    pub write: Option<WriteStrategy>,
    /// Delete this run's provenance-tagged rows before loading
    pub replace: bool,
    pub reference_date: NaiveDate,
    pub provenance: String,
    /// Where the JSON report goes; `None` skips writing it
    pub report_dir: Option<PathBuf>,
    pub dry_run: bool,
    /// Log file of this run, recorded in the report
    pub log_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pace: Duration::from_millis(DEFAULT_PACE_MS),
            write: None,
            replace: false,
            reference_date: Local::now().date_naive(),
            provenance: DEFAULT_PROVENANCE.to_string(),
            report_dir: Some(PathBuf::from(DEFAULT_REPORT_DIR)),
            dry_run: false,
            log_file: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self, profile: &ImportProfile) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be at least 1".to_string()));
        }
        if self.provenance.trim().is_empty() {
            return Err(ConfigError::Invalid("provenance tag is empty".to_string()));
        }
        if self.replace && profile.controls.provenance_field.is_none() {
            return Err(ConfigError::Invalid(format!(
                "--replace needs a provenance field, and profile '{}' has none",
                profile.name
            )));
        }
        Ok(())
    }

    pub fn strategy(&self, profile: &ImportProfile) -> WriteStrategy {
        self.write.unwrap_or(profile.write)
    }

    pub fn write_mode(&self, profile: &ImportProfile) -> WriteMode {
        match self.strategy(profile) {
            WriteStrategy::Insert => WriteMode::Insert,
            WriteStrategy::Upsert => WriteMode::Upsert {
                on_conflict: profile.natural_key.clone(),
            },
        }
    }

    pub fn controls(&self, profile: &ImportProfile) -> RunControls {
        RunControls {
            reference_date: self.reference_date,
            provenance: self.provenance.clone(),
            write: self.strategy(profile),
        }
    }
}
