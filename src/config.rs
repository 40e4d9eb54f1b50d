use std::path::Path;
use std::time::Duration;
use config::{Config, Environment, File};
use serde::Deserialize;
use crate::types::DatabaseError;

/// Smallest supported leaf page size
pub const MIN_PAGE_SIZE: usize = 1024;

/// Executor configuration
///
/// Load priority: ENV (`POSTGRUSTQL_*`) > config file > defaults
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutorConfig {
    /// How long a lock request may wait before failing
    #[serde(default = "default_lock_wait_timeout_ms")]
    pub lock_wait_timeout_ms: u64,
    /// Memory budget of a posting list read, in bytes
    #[serde(default = "default_fts_result_cache_limit")]
    pub fts_result_cache_limit: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Longest value stored in an FTS CONFIG table
    #[serde(default = "default_max_config_value_len")]
    pub max_config_value_len: usize,
}

fn default_lock_wait_timeout_ms() -> u64 { 50_000 }
fn default_fts_result_cache_limit() -> usize { 2_000_000_000 }
fn default_page_size() -> usize { 16_384 }
fn default_max_config_value_len() -> usize { 200 }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            lock_wait_timeout_ms: default_lock_wait_timeout_ms(),
            fts_result_cache_limit: default_fts_result_cache_limit(),
            page_size: default_page_size(),
            max_config_value_len: default_max_config_value_len(),
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by environment variables
    pub fn load() -> Result<Self, DatabaseError> {
        Self::build(None)
    }

    /// Defaults, then the given file, then environment variables
    pub fn from_file(path: &Path) -> Result<Self, DatabaseError> {
        Self::build(Some(path))
    }

    fn build(path: Option<&Path>) -> Result<Self, DatabaseError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(Environment::with_prefix("POSTGRUSTQL").try_parsing(true));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(DatabaseError::Config(config::ConfigError::Message(format!(
                "page_size {} is below the minimum of {MIN_PAGE_SIZE}", self.page_size
            ))));
        }
        if self.lock_wait_timeout_ms == 0 {
            return Err(DatabaseError::Config(config::ConfigError::Message(
                "lock_wait_timeout_ms must be positive".to_string(),
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.lock_wait_timeout(), Duration::from_secs(50));
        assert_eq!(config.page_size, 16_384);
        assert_eq!(config.max_config_value_len, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "page_size = 4096").unwrap();
        writeln!(file, "fts_result_cache_limit = 1000").unwrap();

        let config = ExecutorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.fts_result_cache_limit, 1000);
        assert_eq!(config.lock_wait_timeout_ms, 50_000);
    }

    #[test]
    fn test_small_page_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "page_size = 512").unwrap();
        assert!(matches!(ExecutorConfig::from_file(file.path()), Err(DatabaseError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = ExecutorConfig::from_file(Path::new("/nonexistent/postgrust-fts.toml"));
        assert!(result.is_err());
    }
}
