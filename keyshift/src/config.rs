//! Configuration constants and defaults for a migration run
//!
//! Every stage receives a [`MigrateConfig`] explicitly; nothing is read from
//! global state once a run has started.

use chrono::{DateTime, Utc};
use std::{path::PathBuf, time::Duration};
use uuid::Uuid;

use crate::error::{MigrateError, Result};

/// Default directory holding `{model}/{model}_*.jsonl` files
pub const DEFAULT_EXPORT_DIR: &str = "exports";

/// Default logical database used for restore/decode round-trips
///
/// Staging keys never touch the target database; they live here under a
/// per-run prefix and are removed when the run ends.
pub const DEFAULT_TEMP_DB: u8 = 15;

/// Number of keys requested per SCAN page
pub const DEFAULT_SCAN_COUNT: usize = 1000;

/// Number of per-record errors printed in the end-of-run summary
pub const DEFAULT_ERROR_SAMPLE: usize = 20;

/// Maximum number of sleeps before a rate-limited call is given up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay of the linear backoff (`base × attempt`)
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(2);

/// Pause between two external provider calls
pub const DEFAULT_RATE_LIMIT_PAUSE: Duration = Duration::from_millis(100);

/// Prefix shared by every staging key, followed by the run id
pub const TEMP_KEY_PREFIX: &str = "_keyshift_tmp";

/// Linear retry policy for rate-limited external calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    /// Delay slept after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base: DEFAULT_RETRY_BASE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Directory the dump files are read from
    pub input_dir: PathBuf,

    /// Directory transformed and index files are written to
    pub output_dir: PathBuf,

    /// Logical database used for staging keys
    pub temp_db: u8,

    /// Unique staging prefix of this run, `_keyshift_tmp:{uuid}:`
    pub temp_prefix: String,

    pub scan_count: usize,

    pub error_sample: usize,

    pub retry: RetryPolicy,

    pub rate_limit_pause: Duration,

    /// Parse and count without mutating the target store
    pub dry_run: bool,

    pub skip_records: bool,

    pub skip_indexes: bool,

    /// Dump target keys about to be replaced before restoring over them
    pub backup: bool,

    /// Timestamp stamped into every migrated record
    pub migrated_at: DateTime<Utc>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            output_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            temp_db: DEFAULT_TEMP_DB,
            temp_prefix: format!("{TEMP_KEY_PREFIX}:{}:", Uuid::new_v4().simple()),
            scan_count: DEFAULT_SCAN_COUNT,
            error_sample: DEFAULT_ERROR_SAMPLE,
            retry: RetryPolicy::default(),
            rate_limit_pause: DEFAULT_RATE_LIMIT_PAUSE,
            dry_run: true,
            skip_records: false,
            skip_indexes: false,
            backup: true,
            migrated_at: Utc::now(),
        }
    }
}

impl MigrateConfig {
    /// Rejects combinations that cannot describe a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.skip_records && self.skip_indexes {
            return Err(MigrateError::Config(
                "--skip-records and --skip-indexes together leave nothing to load".to_owned(),
            ));
        }

        if self.scan_count == 0 {
            return Err(MigrateError::Config("scan count must be positive".to_owned()));
        }

        if !self.temp_prefix.starts_with(TEMP_KEY_PREFIX) {
            return Err(MigrateError::Config(format!(
                "staging prefix `{}` must start with `{TEMP_KEY_PREFIX}`",
                self.temp_prefix
            )));
        }

        Ok(())
    }
}

/// Configuration builder for a migration run
#[derive(Debug)]
pub struct ConfigBuilder {
    config: MigrateConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MigrateConfig::default(),
        }
    }

    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Sets both input and output directory
    pub fn export_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.input_dir(dir.clone()).output_dir(dir)
    }

    pub fn temp_db(mut self, db: u8) -> Self {
        self.config.temp_db = db;
        self
    }

    pub fn scan_count(mut self, count: usize) -> Self {
        self.config.scan_count = count;
        self
    }

    pub fn error_sample(mut self, size: usize) -> Self {
        self.config.error_sample = size;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn rate_limit_pause(mut self, pause: Duration) -> Self {
        self.config.rate_limit_pause = pause;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    pub fn skip_records(mut self, skip: bool) -> Self {
        self.config.skip_records = skip;
        self
    }

    pub fn skip_indexes(mut self, skip: bool) -> Self {
        self.config.skip_indexes = skip;
        self
    }

    pub fn backup(mut self, backup: bool) -> Self {
        self.config.backup = backup;
        self
    }

    pub fn migrated_at(mut self, at: DateTime<Utc>) -> Self {
        self.config.migrated_at = at;
        self
    }

    pub fn build(self) -> MigrateConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(10),
        };

        let delays = (1..=policy.max_retries)
            .map(|attempt| policy.delay(attempt))
            .collect::<Vec<_>>();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30)
            ]
        );
    }

    #[test]
    fn skipping_everything_is_rejected() {
        let config = ConfigBuilder::new()
            .skip_records(true)
            .skip_indexes(true)
            .build();

        assert!(matches!(config.validate(), Err(MigrateError::Config(_))));
    }

    #[test]
    fn staging_prefix_is_unique_per_run() {
        let a = MigrateConfig::default();
        let b = MigrateConfig::default();

        assert!(a.temp_prefix.starts_with("_keyshift_tmp:"));
        assert_ne!(a.temp_prefix, b.temp_prefix);
        assert!(a.validate().is_ok());
    }
}
