use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

pub const CONFIG_VERSION: &str = "1.0";

/// Service configuration. Every field has a default, so `{"version": "1.0"}`
/// is a complete document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub version: String,
    #[serde(default = "default_uploads_root")]
    pub uploads_root: String,
    /// Defaults to `~/.snapscribe/data/snapscribe.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub recognition: RecognitionSettings,
}

fn default_uploads_root() -> String {
    "uploads".to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_session_idle_secs() -> u64 {
    30 * 60
}

fn default_max_sessions() -> u64 {
    10_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            uploads_root: default_uploads_root(),
            database_path: None,
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
            pipeline: PipelineSettings::default(),
            retry: RetrySettings::default(),
            recognition: RecognitionSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Configured path, `~` expanded, or the per-user default.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(crate::secrets::expand_home(path))),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,
    #[serde(default = "default_item_concurrency")]
    pub item_concurrency: usize,
    #[serde(default)]
    pub strict_merge: bool,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_inter_item_delay_ms() -> u64 {
    1_000
}

fn default_item_concurrency() -> usize {
    1
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            inter_item_delay_ms: default_inter_item_delay_ms(),
            item_concurrency: default_item_concurrency(),
            strict_merge: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_rate_limit_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_rate_limit_cooldown_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            rate_limit_cooldown_ms: default_rate_limit_cooldown_ms(),
        }
    }
}

/// The OpenAI-compatible endpoint used for recognition and merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to `model` when unset.
    #[serde(default)]
    pub merge_model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env_var() -> Option<String> {
    Some("SNAPSCRIBE_API_KEY".to_string())
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    4_096
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            merge_model: None,
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env_var(),
            request_timeout_secs: default_request_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl RecognitionSettings {
    pub fn api_key_source(&self) -> SecretSource<'_> {
        SecretSource {
            direct: self.api_key.as_deref(),
            file: self.api_key_file.as_deref(),
            env_var: self.api_key_env_var.as_deref(),
        }
    }

    pub fn merge_model(&self) -> &str {
        self.merge_model.as_deref().unwrap_or(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_document_gets_defaults() {
        let config: ServiceConfig = serde_json::from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.uploads_root, "uploads");
        assert!(config.worker_count >= 1);
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.recognition.merge_model(), "gpt-4o-mini");
        assert_eq!(
            config.recognition.api_key_env_var.as_deref(),
            Some("SNAPSCRIBE_API_KEY")
        );
    }

    #[test]
    fn test_camel_case_fields() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{
                "version": "1.0",
                "uploadsRoot": "/srv/uploads",
                "sessionIdleSecs": 60,
                "pipeline": {"failureThreshold": 2, "itemConcurrency": 4, "strictMerge": true},
                "recognition": {"model": "vision-large", "mergeModel": "text-large"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.uploads_root, "/srv/uploads");
        assert_eq!(config.session_idle_secs, 60);
        assert_eq!(config.pipeline.failure_threshold, 2);
        assert_eq!(config.pipeline.inter_item_delay_ms, 1_000);
        assert!(config.pipeline.strict_merge);
        assert_eq!(config.recognition.merge_model(), "text-large");
    }

    #[test]
    fn test_database_path_default_and_override() {
        let mut config = ServiceConfig::default();
        let default = config.database_path().unwrap();
        assert!(default.ends_with("snapscribe.db"));

        config.database_path = Some("/var/lib/snapscribe/jobs.db".to_string());
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/var/lib/snapscribe/jobs.db")
        );
    }
}
