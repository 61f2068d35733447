// crates/jobs/src/config.rs
//! Job-control configuration.
//!
//! Values come from an optional TOML file, then `CBWSH_*` environment
//! overrides, then defaults for anything left unset.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default cap on simultaneously active jobs.
pub const DEFAULT_MAX_JOBS: usize = 10;

const FALLBACK_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    /// Maximum number of Running/Stopped jobs.
    pub max_jobs: usize,
    /// Shell used as `<shell> -c <command>`.
    pub shell: String,
    /// Let jobs write to the parent's stdout/stderr instead of /dev/null.
    pub inherit_output: bool,
    /// Finished jobs older than this are swept by the cleanup task.
    pub cleanup_max_age_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            shell: default_shell(),
            inherit_output: false,
            cleanup_max_age_secs: 3600,
            cleanup_interval_secs: 60,
        }
    }
}

impl JobsConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `CBWSH_MAX_JOBS`, `CBWSH_SHELL` and `CBWSH_JOB_OUTPUT`.
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(raw) = std::env::var("CBWSH_MAX_JOBS") {
            self.max_jobs = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "CBWSH_MAX_JOBS",
                message: format!("not a number: {raw:?}"),
            })?;
        }
        if let Ok(shell) = std::env::var("CBWSH_SHELL") {
            if !shell.trim().is_empty() {
                self.shell = shell;
            }
        }
        if let Ok(mode) = std::env::var("CBWSH_JOB_OUTPUT") {
            self.inherit_output = match mode.trim() {
                "inherit" => true,
                "null" => false,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "CBWSH_JOB_OUTPUT",
                        message: format!("expected 'inherit' or 'null', got {other:?}"),
                    })
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_jobs == 0 {
            return Err(ConfigError::Invalid {
                key: "max_jobs",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.shell.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "shell",
                message: "cannot be empty".to_string(),
            });
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "cleanup_interval_secs",
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_SHELL.to_string())
}
