//! Credential lookup for the recognition endpoint.
//!
//! A key can be given inline, as a file path (mounted secrets), or as the
//! name of an environment variable, checked in that order.

use std::fs;

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No credential source configured")]
    NoSource,

    #[error("Cannot read credential file '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' is not set")]
    EnvVarMissing { name: String },

    #[error("Environment variable '{name}' is not valid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Credential from {origin} is empty")]
    Empty { origin: String },
}

/// Where a credential may come from. Empty strings count as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretSource<'a> {
    pub direct: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

impl<'a> SecretSource<'a> {
    pub fn is_configured(&self) -> bool {
        [self.direct, self.file, self.env_var]
            .iter()
            .any(|source| non_empty(*source).is_some())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn resolve_secret(source: SecretSource<'_>) -> Result<SecretString, SecretError> {
    if let Some(value) = non_empty(source.direct) {
        return Ok(SecretString::from(value.trim().to_string()));
    }

    if let Some(path) = non_empty(source.file) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::File {
            path: expanded.clone(),
            source: e,
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SecretError::Empty { origin: expanded });
        }
        return Ok(SecretString::from(trimmed.to_string()));
    }

    if let Some(name) = non_empty(source.env_var) {
        return match std::env::var(name) {
            Ok(value) if value.trim().is_empty() => Err(SecretError::Empty {
                origin: format!("${}", name),
            }),
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarMissing {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSource)
}

/// `None` when nothing is configured; errors only for a configured source
/// that cannot be read.
pub fn resolve_secret_optional(
    source: SecretSource<'_>,
) -> Result<Option<SecretString>, SecretError> {
    if !source.is_configured() {
        return Ok(None);
    }
    resolve_secret(source).map(Some)
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().into_owned(),
        _ => path.to_string(),
    }
}
