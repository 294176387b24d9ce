//! Configuration for the aggregation engine.
//!
//! Loaded from `.sitetrack/settings.json` in the project directory. Every
//! field has a default, so a missing file or a partial file is fine.
//!
//! # Example settings.json
//!
//! ```json
//! {
//!   "debounceMs": 300,
//!   "throttleMs": 1000,
//!   "interItemDelayMs": 10,
//!   "fetchRetries": 2,
//!   "fetchBackoff": { "kind": "linear", "step_ms": 500 }
//! }
//! ```

use crate::error::{EngineError, Result};
use crate::retry::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_debounce_ms() -> u64 {
    300
}

fn default_throttle_ms() -> u64 {
    1000
}

fn default_inter_item_delay_ms() -> u64 {
    10
}

fn default_fetch_retries() -> u32 {
    2
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Quiet period before dirty tasks are recomputed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Minimum gap between two rollup refreshes of the same project.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Pause between two tasks within one recomputation pass.
    #[serde(default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,

    /// Retries after the first failed subtask fetch.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    /// Delay schedule between subtask fetch attempts.
    #[serde(default)]
    pub fetch_backoff: Backoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            throttle_ms: default_throttle_ms(),
            inter_item_delay_ms: default_inter_item_delay_ms(),
            fetch_retries: default_fetch_retries(),
            fetch_backoff: Backoff::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a project directory.
    ///
    /// Returns defaults when the settings file does not exist.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::settings_path(project_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            EngineError::config_with_path(format!("failed to parse settings: {e}"), path)
        })
    }

    /// Load and reject invalid values.
    pub fn load_validated(project_dir: &Path) -> Result<Self> {
        let config = Self::load(project_dir)?;
        let report = config.validate();
        match report.errors.into_iter().next() {
            Some(issue) => Err(EngineError::InvalidConfig {
                field: issue.field,
                reason: issue.reason,
            }),
            None => Ok(config),
        }
    }

    /// Get the settings.json path for a project.
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".sitetrack/settings.json")
    }

    /// Check values for problems.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.debounce_ms == 0 {
            report.error("debounceMs", "must be greater than zero");
        }
        if self.throttle_ms == 0 {
            report.error("throttleMs", "must be greater than zero");
        }
        if self.fetch_retries > 0 && self.fetch_backoff == (Backoff::Linear { step_ms: 0 }) {
            report.error("fetchBackoff", "linear step must be greater than zero");
        }
        if self.fetch_retries > 0 && self.fetch_backoff == (Backoff::Exponential { base_ms: 0 }) {
            report.error("fetchBackoff", "exponential base must be greater than zero");
        }
        if self.inter_item_delay_ms >= self.debounce_ms && self.debounce_ms > 0 {
            report.warning(
                "interItemDelayMs",
                "is not smaller than the debounce window; passes will lag behind edits",
            );
        }
        if self.fetch_retries > 5 {
            report.warning("fetchRetries", "more than 5 retries delays expansion noticeably");
        }
        report
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }

    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.fetch_retries, self.fetch_backoff)
    }

    #[must_use]
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    #[must_use]
    pub fn with_throttle_ms(mut self, ms: u64) -> Self {
        self.throttle_ms = ms;
        self
    }

    #[must_use]
    pub fn with_inter_item_delay_ms(mut self, ms: u64) -> Self {
        self.inter_item_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_fetch_retries(mut self, retries: u32) -> Self {
        self.fetch_retries = retries;
        self
    }

    #[must_use]
    pub fn with_fetch_backoff(mut self, backoff: Backoff) -> Self {
        self.fetch_backoff = backoff;
        self
    }
}

/// One problem found by [`EngineConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub field: String,
    pub reason: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Problems that make the configuration unusable.
    pub errors: Vec<ConfigIssue>,
    /// Suspicious but accepted values.
    pub warnings: Vec<ConfigIssue>,
}

impl ValidationReport {
    /// Valid when there are no errors; warnings do not count.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// 0 if valid, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_valid() {
            0
        } else {
            1
        }
    }

    fn error(&mut self, field: &str, reason: &str) {
        self.errors.push(ConfigIssue {
            field: field.to_string(),
            reason: reason.to_string(),
        });
    }

    fn warning(&mut self, field: &str, reason: &str) {
        self.warnings.push(ConfigIssue {
            field: field.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_settings(dir: &TempDir, json: &str) {
        let path = EngineConfig::settings_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, json).unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce_window(), Duration::from_millis(300));
        assert_eq!(config.throttle_window(), Duration::from_millis(1000));
        assert_eq!(config.inter_item_delay(), Duration::from_millis(10));
        assert_eq!(config.fetch_policy(), RetryPolicy::default());
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            EngineConfig::load(dir.path()).unwrap(),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        write_settings(&dir, r#"{"debounceMs": 120, "fetchRetries": 0}"#);
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.debounce_ms, 120);
        assert_eq!(config.fetch_retries, 0);
        assert_eq!(config.throttle_ms, 1000);
    }

    #[test]
    fn test_load_exponential_backoff() {
        let dir = TempDir::new().unwrap();
        write_settings(
            &dir,
            r#"{"fetchBackoff": {"kind": "exponential", "base_ms": 250}}"#,
        );
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.fetch_backoff, Backoff::Exponential { base_ms: 250 });
    }

    #[test]
    fn test_load_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        write_settings(&dir, "{ not json");
        match EngineConfig::load(dir.path()) {
            Err(EngineError::Config { path, .. }) => assert!(path.is_some()),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_windows() {
        let config = EngineConfig::default()
            .with_debounce_ms(0)
            .with_throttle_ms(0);
        let report = config.validate();
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_validate_zero_step_only_matters_with_retries() {
        let config = EngineConfig::default().with_fetch_backoff(Backoff::Linear { step_ms: 0 });
        assert!(!config.validate().is_valid());
        assert!(config.with_fetch_retries(0).validate().is_valid());
    }

    #[test]
    fn test_validate_warns_on_slow_pacing() {
        let config = EngineConfig::default().with_inter_item_delay_ms(500);
        let report = config.validate();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].field, "interItemDelayMs");
    }

    #[test]
    fn test_load_validated_surfaces_first_error() {
        let dir = TempDir::new().unwrap();
        write_settings(&dir, r#"{"throttleMs": 0}"#);
        match EngineConfig::load_validated(dir.path()) {
            Err(EngineError::InvalidConfig { field, .. }) => assert_eq!(field, "throttleMs"),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }
}
