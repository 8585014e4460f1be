use std::path::Path;

use crate::config::schema::{ServiceConfig, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses, checks against the embedded schema, deserializes, then applies
/// the checks a schema cannot express.
pub fn load_config_from_str(content: &str) -> Result<ServiceConfig, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&value)?;

    let config: ServiceConfig = serde_json::from_value(value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Embedded schema is not valid JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Embedded schema does not compile: {}", e),
    })?;

    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.uploads_root.trim().is_empty() {
        return Err(invalid("uploadsRoot must not be blank".to_string()));
    }

    if config.worker_count == 0 {
        return Err(invalid("workerCount must be at least 1".to_string()));
    }

    if config.pipeline.failure_threshold == 0 {
        return Err(invalid(
            "pipeline.failureThreshold must be at least 1".to_string(),
        ));
    }

    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.maxAttempts must be at least 1".to_string()));
    }

    let recognition = &config.recognition;
    if recognition.model.trim().is_empty() || recognition.merge_model().trim().is_empty() {
        return Err(invalid("recognition models must not be blank".to_string()));
    }
    if recognition.api_key.is_some() && recognition.api_key_file.is_some() {
        return Err(invalid(
            "recognition.apiKey and recognition.apiKeyFile are mutually exclusive".to_string(),
        ));
    }

    Ok(())
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation { message }
}
