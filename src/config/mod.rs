//! Engine configuration
//!
//! Loaded from a TOML file when one exists, otherwise built entirely from
//! defaults. The loaded value is immutable and handed to components at
//! construction time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub scheduling: SchedulingConfig,
    pub jobs: JobsConfig,
    pub images: ImagesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Allowed drift between "now" and a scheduled start for a pipeline
    /// to count as due
    pub tolerance_minutes: u32,
    /// Interval applied when a custom-interval schedule carries no value
    pub custom_interval_hours: u32,
    /// Scheduler loop tick
    pub tick_seconds: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            tolerance_minutes: 5,
            custom_interval_hours: 6,
            tick_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub default_queue: String,
    pub high_queue: String,
    pub low_queue: String,
    /// Whole-run time budget
    pub timeout_seconds: u64,
    /// Budget for pipelines flagged as large payloads
    pub large_timeout_seconds: u64,
    pub memory_limit_mb: u64,
    pub large_memory_limit_mb: u64,
    pub retry: RetryConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_queue: "default".to_string(),
            high_queue: "high".to_string(),
            low_queue: "low".to_string(),
            timeout_seconds: 600,
            large_timeout_seconds: 1800,
            memory_limit_mb: 512,
            large_memory_limit_mb: 2048,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Fixed backoff between attempts
    pub backoff_seconds: u64,
    /// Give up early once this many distinct error messages were seen
    pub max_distinct_errors: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: 60,
            max_distinct_errors: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub media_dir: PathBuf,
    /// Bounded fan-out of the image fetch pool
    pub concurrency: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("media"),
            concurrency: 4,
        }
    }
}

impl Config {
    /// Load from `path`; a missing file is the default configuration
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            EngineError::configuration(format!("cannot parse {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/feedpipe.toml")).unwrap();
        assert_eq!(config.scheduling.tolerance_minutes, 5);
        assert_eq!(config.jobs.retry.max_attempts, 3);
        assert_eq!(config.jobs.default_queue, "default");
    }

    #[test]
    fn partial_files_keep_defaults_for_the_rest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[scheduling]\ntolerance_minutes = 10\n\n[jobs]\ntimeout_seconds = 120"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.scheduling.tolerance_minutes, 10);
        assert_eq!(config.jobs.timeout_seconds, 120);
        assert_eq!(config.jobs.retry.backoff_seconds, 60);
        assert_eq!(config.images.concurrency, 4);
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scheduling = nope").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
