use crate::writer::OutputFormat;
use std::path::PathBuf;
use tracing::warn;

pub const LOG_ENV: &str = "WDL2CWL_LOG";
pub const OUTPUT_FORMAT_ENV: &str = "WDL2CWL_OUTPUT_FORMAT";
pub const CACHE_DIR_ENV: &str = "WDL2CWL_CACHE_DIR";
pub const CACHE_TTL_ENV: &str = "WDL2CWL_CACHE_TTL_HOURS";
pub const JOBS_ENV: &str = "WDL2CWL_JOBS";

pub const DEFAULT_LOG_FILTER: &str = "wdl2cwl=info";

/// Settings the orchestration layer reads from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_filter: String,
    pub output_format: OutputFormat,
    /// On-disk parsed-import cache; in-memory only when unset.
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_hours: i64,
    pub jobs: usize,
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            output_format: OutputFormat::Yaml,
            cache_dir: None,
            cache_ttl_hours: 24,
            jobs: default_jobs(),
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(filter) = value(LOG_ENV) {
            config.log_filter = filter;
        }
        if let Some(format) = value(OUTPUT_FORMAT_ENV) {
            match format.parse::<OutputFormat>() {
                Ok(format) => config.output_format = format,
                Err(_) => warn!(value = %format, "ignoring {}", OUTPUT_FORMAT_ENV),
            }
        }
        config.cache_dir = value(CACHE_DIR_ENV).map(PathBuf::from);
        if let Some(ttl) = value(CACHE_TTL_ENV) {
            match ttl.parse::<i64>() {
                Ok(hours) if hours > 0 => config.cache_ttl_hours = hours,
                _ => warn!(value = %ttl, "ignoring {}", CACHE_TTL_ENV),
            }
        }
        if let Some(jobs) = value(JOBS_ENV) {
            match jobs.parse::<usize>() {
                Ok(n) if n > 0 => config.jobs = n,
                _ => warn!(value = %jobs, "ignoring {}", JOBS_ENV),
            }
        }
        config
    }
}
