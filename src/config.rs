use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::classifier::{Backoff, ModelConfig, RetryPolicy};
use crate::pipeline::types::AnalysisMode;

/// Application-level constants
pub const APP_NAME: &str = "tutorlog-annotator";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for every configuration variable.
const ENV_PREFIX: &str = "ANNOTATOR_";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,tutorlog_lib=info,reqwest=warn,hyper=warn"
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

/// Everything one batch run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatorConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Input rows are flat tutor turns (`Bot Response` column only).
    pub legacy_format: bool,
    pub mode: AnalysisMode,
    pub model: ModelConfig,
    pub api_url: String,
    pub access_token: Option<String>,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub request_timeout_secs: u64,
    /// Wall-clock budget for the whole batch.
    pub deadline: Option<Duration>,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("data/interactions.json"),
            output_path: PathBuf::from("output/enriched.json"),
            legacy_format: false,
            mode: AnalysisMode::StudentPairs,
            model: ModelConfig::default(),
            api_url: "http://localhost:8000/query".to_string(),
            access_token: None,
            retry: RetryPolicy::default(),
            workers: 4,
            request_timeout_secs: 60,
            deadline: None,
        }
    }
}

impl AnnotatorConfig {
    /// Defaults overridden by `ANNOTATOR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `ANNOTATOR_*` name. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let mut config = Self::default();

        if let Some(v) = vars.get("INPUT") {
            config.input_path = PathBuf::from(v);
        }
        if let Some(v) = vars.get("OUTPUT") {
            config.output_path = PathBuf::from(v);
        }
        if let Some(v) = vars.parsed("LEGACY_FORMAT", parse_bool)? {
            config.legacy_format = v;
        }
        if let Some(v) = vars.parsed("MODE", |s| {
            AnalysisMode::from_str(s).ok_or_else(|| "expected agent_only or student_pairs".to_string())
        })? {
            config.mode = v;
        }
        if let Some(v) = vars.get("MODEL") {
            config.model.name = v;
        }
        if let Some(v) = vars.get("PROVIDER") {
            config.model.provider = v;
        }
        if let Some(v) = vars.get("API_URL") {
            config.api_url = v;
        }
        config.access_token = vars.get("ACCESS_TOKEN");

        if let Some(v) = vars.parsed("MAX_ATTEMPTS", parse_u64)? {
            config.retry.max_attempts = u32::try_from(v).map_err(|_| invalid("MAX_ATTEMPTS", &v.to_string(), "too large"))?;
        }
        if let Some(v) = vars.parsed("SUCCESS_DELAY_MS", parse_u64)? {
            config.retry.success_delay = Duration::from_millis(v);
        }
        if let Some(v) = vars.parsed("FAILURE_DELAY_MS", parse_u64)? {
            config.retry.failure_delay = Duration::from_millis(v);
        }
        let max_delay = vars
            .parsed("MAX_DELAY_MS", parse_u64)?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(30));
        if let Some(v) = vars.parsed("BACKOFF", |s| match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "exponential" => Ok(Backoff::Exponential { max_delay }),
            _ => Err("expected fixed or exponential".to_string()),
        })? {
            config.retry.backoff = v;
        }

        if let Some(v) = vars.parsed("WORKERS", parse_u64)? {
            if v == 0 {
                return Err(invalid("WORKERS", "0", "must be at least 1"));
            }
            config.workers = v as usize;
        }
        if let Some(v) = vars.parsed("TIMEOUT_SECS", parse_u64)? {
            config.request_timeout_secs = v;
        }
        if let Some(v) = vars.parsed("DEADLINE_SECS", parse_u64)? {
            config.deadline = Some(Duration::from_secs(v));
        }

        Ok(config)
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{suffix}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(
        &self,
        suffix: &str,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<Option<T>, ConfigError> {
        self.get(suffix)
            .map(|raw| parse(&raw).map_err(|reason| invalid(suffix, &raw, &reason)))
            .transpose()
    }
}

fn invalid(suffix: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var: format!("{ENV_PREFIX}{suffix}"),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_u64(s: &str) -> Result<u64, String> {
    s.parse::<u64>().map_err(|e| e.to_string())
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected true or false".to_string()),
    }
}
