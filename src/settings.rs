//! User settings (`settings.toml` in the config directory)
//!
//! ```toml
//! jobs = 4
//! api_base = "https://cloud.mongodb.com/api/atlas/v1.0"
//! timeout_secs = 60
//!
//! [retry]
//! max_attempts = 5
//! base_delay_secs = 2.0
//! backoff_factor = 2.0
//! max_delay_secs = 60
//!
//! [poll]
//! interval_secs = 30
//! timeout_secs = 3600
//! ```
//!
//! Every key is optional. Command-line flags take precedence.

use anyhow::{Context, Result};
use atlaskit::backend::http::{DEFAULT_API_BASE, DEFAULT_TIMEOUT};
use atlaskit::{PollConfig, RetryConfig};
use declarative::ExecuteOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cli::ApplyArgs;
use crate::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Resources worked on in parallel
    pub jobs: usize,
    /// Atlas admin API base URL
    pub api_base: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub retry: RetrySettings,
    pub poll: PollSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: 4,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            retry: RetrySettings::default(),
            poll: PollSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub backoff_factor: f64,
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_attempts: config.max_attempts,
            base_delay_secs: config.base_delay.as_secs_f64(),
            backoff_factor: config.backoff_factor,
            max_delay_secs: config.max_delay.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        let config = PollConfig::default();
        Self {
            interval_secs: config.interval.as_secs(),
            timeout_secs: config.timeout.as_secs(),
        }
    }
}

impl Settings {
    /// Load settings from the config directory, or defaults if absent
    pub fn load() -> Result<Self> {
        let path = paths::settings_file()?;
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid settings format in {}", path.display()))?;
        settings.validate()?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            anyhow::bail!("jobs must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if !self.retry.base_delay_secs.is_finite() || self.retry.base_delay_secs < 0.0 {
            anyhow::bail!("retry.base_delay_secs must be a non-negative number");
        }
        if self.retry.base_delay_secs > self.retry.max_delay_secs as f64 {
            anyhow::bail!("retry.base_delay_secs cannot exceed retry.max_delay_secs");
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            anyhow::bail!("retry.backoff_factor must be at least 1.0");
        }
        if self.poll.interval_secs == 0 {
            anyhow::bail!("poll.interval_secs must be at least 1");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, args: &ApplyArgs) -> Result<Self> {
        if let Some(jobs) = args.jobs {
            self.jobs = jobs;
        }
        if let Some(retries) = args.retries {
            self.retry.max_attempts = retries;
        }
        if let Some(interval) = args.poll_interval {
            self.poll.interval_secs = interval;
        }
        if let Some(timeout) = args.poll_timeout {
            self.poll.timeout_secs = timeout;
        }
        self.validate().context("Invalid command-line option")?;
        Ok(self)
    }

    pub fn retry_config(&self) -> RetryConfig {
        let max_delay = Duration::from_secs(self.retry.max_delay_secs);
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::try_from_secs_f64(self.retry.base_delay_secs)
                .unwrap_or(max_delay),
            backoff_factor: self.retry.backoff_factor,
            max_delay,
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.poll.interval_secs),
            Duration::from_secs(self.poll.timeout_secs),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Engine options for a run
    pub fn execute_options(&self, dry_run: bool) -> ExecuteOptions {
        ExecuteOptions {
            dry_run,
            jobs: self.jobs,
            retry: self.retry_config(),
            poll: self.poll_config(),
        }
    }
}
