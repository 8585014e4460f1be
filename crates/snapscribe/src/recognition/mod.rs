//! The external recognition capability and the per-image retry envelope
//! around it.

use async_trait::async_trait;
use thiserror::Error;

use crate::store::{ImageData, ObjectStoreError};

pub mod driver;
pub mod http;
pub mod prompts;

pub use driver::{DriverError, RecognitionDriver, RetryPolicy};
pub use http::{VisionClient, VisionClientSettings};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// Quota or rate limit; retried after an extra cooldown.
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help (missing object, unsupported media).
    #[error("{0}")]
    Permanent(String),
}

impl RecognitionError {
    /// Sorts a raw failure message into a kind.
    pub fn classify(message: &str) -> Self {
        let message = message.trim().to_string();
        if is_rate_limit_message(&message) {
            return RecognitionError::RateLimited(message);
        }

        let lower = message.to_lowercase();
        if lower.contains("not found") || lower.contains("unsupported") {
            return RecognitionError::Permanent(message);
        }

        RecognitionError::Transient(message)
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, RecognitionError::Permanent(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RecognitionError::RateLimited(_))
    }
}

impl From<ObjectStoreError> for RecognitionError {
    fn from(err: ObjectStoreError) -> Self {
        if err.is_retryable() {
            RecognitionError::Transient(err.to_string())
        } else {
            RecognitionError::Permanent(err.to_string())
        }
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("ratelimit")
        || lower.contains("quota")
        || lower.contains("resource exhausted")
        || lower.contains("resource_exhausted")
        || lower.contains("too many requests")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("merge request failed: {0}")]
    Failed(String),

    #[error("merge returned no text")]
    EmptyOutput,
}

/// Reads source code out of one image.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Blank text is a valid answer (the image held no code).
    async fn recognize(&self, image: &ImageData) -> Result<String, RecognitionError>;
}

/// Second pass that stitches ordered fragments into one artifact,
/// dropping duplicated overlap between neighbours.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(&self, fragments: &[String]) -> Result<String, MergeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_flavours() {
        for message in [
            "HTTP 429: slow down",
            "Rate limit reached for requests",
            "You exceeded your current quota",
            "RESOURCE_EXHAUSTED",
            "Resource exhausted (e.g. check quota)",
            "Too Many Requests",
        ] {
            let err = RecognitionError::classify(message);
            assert!(err.is_rate_limited(), "{}", message);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_classify_permanent() {
        let err = RecognitionError::classify("Image not found: a.png");
        assert!(!err.is_retryable());
        assert!(!RecognitionError::classify("unsupported media type").is_retryable());
    }

    #[test]
    fn test_classify_defaults_to_transient() {
        let err = RecognitionError::classify("  connection reset by peer\n");
        assert_eq!(
            err,
            RecognitionError::Transient("connection reset by peer".to_string())
        );
        assert!(err.is_retryable());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_object_store_errors_map_by_retryability() {
        let missing: RecognitionError = ObjectStoreError::NotFound("x.png".into()).into();
        assert!(!missing.is_retryable());

        let io: RecognitionError = ObjectStoreError::Io {
            reference: "x.png".into(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk"),
        }
        .into();
        assert!(io.is_retryable());
    }
}
