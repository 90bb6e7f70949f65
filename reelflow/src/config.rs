//! Runtime configuration.
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a usable configuration. Environment overrides are applied on top.

use crate::core::StageKind;
use crate::errors::ConfigurationError;
use crate::observability::LogFormat;
use crate::resilience::PollingConfig;
use crate::stages::StagePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Overrides the artifact scratch directory.
pub const ENV_TEMP_DIR: &str = "REELFLOW_TEMP_DIR";
/// Keeps local artifacts after the workflow ends when truthy.
pub const ENV_KEEP_LOCAL_ARTIFACTS: &str = "REELFLOW_KEEP_LOCAL_ARTIFACTS";
/// Overrides the polling deadline, in seconds.
pub const ENV_POLL_DEADLINE_SECS: &str = "REELFLOW_POLL_DEADLINE_SECS";
/// Overrides the fallback log level.
pub const ENV_LOG_LEVEL: &str = "REELFLOW_LOG_LEVEL";

/// Top-level configuration for a workflow orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReelflowConfig {
    /// Policy for the fetch stage.
    pub fetch: StagePolicy,
    /// Policy for the generate-script stage.
    pub script: StagePolicy,
    /// Policy for render job submission.
    pub media: StagePolicy,
    /// Policy for the publish stage.
    pub publish: StagePolicy,
    /// Render job polling.
    pub polling: PollingConfig,
    /// Root for per-workflow scratch directories.
    pub temp_dir: PathBuf,
    /// Leave local artifacts on disk after the workflow ends.
    pub keep_local_artifacts: bool,
    /// Longest accepted script hint, in characters.
    pub max_hint_chars: usize,
    /// Fallback log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log line format.
    pub log_format: LogFormat,
}

impl Default for ReelflowConfig {
    fn default() -> Self {
        Self {
            fetch: StagePolicy::fetch(),
            script: StagePolicy::script(),
            media: StagePolicy::media(),
            publish: StagePolicy::publish(),
            polling: PollingConfig::default(),
            temp_dir: std::env::temp_dir().join("reelflow"),
            keep_local_artifacts: false,
            max_hint_chars: 500,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl ReelflowConfig {
    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::new("<document>", e.to_string()))
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::new(path.display().to_string(), format!("cannot read: {e}"))
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigurationError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by the `REELFLOW_*` names.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_TEMP_DIR) {
            self.temp_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_KEEP_LOCAL_ARTIFACTS) {
            self.keep_local_artifacts = parse_flag(&raw)
                .ok_or_else(|| ConfigurationError::new(ENV_KEEP_LOCAL_ARTIFACTS, "expected a boolean"))?;
        }
        if let Some(raw) = lookup(ENV_POLL_DEADLINE_SECS) {
            self.polling.deadline_secs = raw.trim().parse().map_err(|_| {
                ConfigurationError::new(ENV_POLL_DEADLINE_SECS, format!("not a number: '{raw}'"))
            })?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        Ok(self)
    }

    /// Returns the policy for `stage`.
    ///
    /// Validation has no remote call and uses the fetch policy.
    #[must_use]
    pub fn policy(&self, stage: StageKind) -> &StagePolicy {
        match stage {
            StageKind::Validate | StageKind::Fetch => &self.fetch,
            StageKind::GenerateScript => &self.script,
            StageKind::ProduceMedia => &self.media,
            StageKind::Publish => &self.publish,
        }
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.fetch.validate("fetch")?;
        self.script.validate("script")?;
        self.media.validate("media")?;
        self.publish.validate("publish")?;
        self.polling.validate().map_err(|m| ConfigurationError::new("polling", m))?;
        if self.temp_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::new("temp_dir", "must not be empty"));
        }
        if self.max_hint_chars == 0 {
            return Err(ConfigurationError::new("max_hint_chars", "must be positive"));
        }
        EnvFilter::try_new(&self.log_level)
            .map_err(|e| ConfigurationError::new("log_level", e.to_string()))?;
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        let config = ReelflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling.deadline_secs, 1800);
        assert_eq!(config.media.max_job_submissions, 1);
    }

    #[test]
    fn test_partial_json() {
        let config = ReelflowConfig::from_json_str(
            r#"{
                "fetch": {"retry": {"max_attempts": 4}},
                "polling": {"deadline_secs": 600},
                "keep_local_artifacts": true,
                "log_format": "json"
            }"#,
        )
        .unwrap();

        assert_eq!(config.fetch.retry.max_attempts, 4);
        assert_eq!(config.polling.deadline_secs, 600);
        assert_eq!(config.polling.initial_interval_ms, 10_000);
        assert!(config.keep_local_artifacts);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.publish, StagePolicy::publish());
    }

    #[test]
    fn test_malformed_json() {
        let err = ReelflowConfig::from_json_str("{not json").unwrap_err();
        assert_eq!(err.field, "<document>");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_hint_chars": 80}}"#).unwrap();

        let config = ReelflowConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_hint_chars, 80);

        assert!(ReelflowConfig::from_file("/definitely/not/here.json").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ReelflowConfig::default()
            .with_overrides_from(lookup(&[
                (ENV_TEMP_DIR, "/scratch/reelflow"),
                (ENV_KEEP_LOCAL_ARTIFACTS, "yes"),
                (ENV_POLL_DEADLINE_SECS, "900"),
                (ENV_LOG_LEVEL, "debug"),
            ]))
            .unwrap();

        assert_eq!(config.temp_dir, PathBuf::from("/scratch/reelflow"));
        assert!(config.keep_local_artifacts);
        assert_eq!(config.polling.deadline_secs, 900);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_bad_env_overrides() {
        let err = ReelflowConfig::default()
            .with_overrides_from(lookup(&[(ENV_POLL_DEADLINE_SECS, "soon")]))
            .unwrap_err();
        assert_eq!(err.field, ENV_POLL_DEADLINE_SECS);

        let err = ReelflowConfig::default()
            .with_overrides_from(lookup(&[(ENV_KEEP_LOCAL_ARTIFACTS, "maybe")]))
            .unwrap_err();
        assert_eq!(err.field, ENV_KEEP_LOCAL_ARTIFACTS);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ReelflowConfig::default();
        config.polling.deadline_secs = 7201;
        assert_eq!(config.validate().unwrap_err().field, "polling");

        let mut config = ReelflowConfig::default();
        config.script.breaker.failure_threshold = 0;
        assert_eq!(config.validate().unwrap_err().field, "script.breaker");

        let mut config = ReelflowConfig::default();
        config.max_hint_chars = 0;
        assert_eq!(config.validate().unwrap_err().field, "max_hint_chars");
    }

    #[test]
    fn test_policy_lookup() {
        let config = ReelflowConfig::default();
        assert_eq!(config.policy(StageKind::Publish), &config.publish);
        assert_eq!(config.policy(StageKind::ProduceMedia), &config.media);
    }
}
