use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::{RecognitionError, Recognizer};
use crate::job::ImageRef;
use crate::store::ObjectStore;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(30);

/// Retry envelope for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Added on top of the backoff when the failure was a rate limit.
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            rate_limit_cooldown: DEFAULT_RATE_LIMIT_COOLDOWN,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry `retry_index` (0 for the first retry):
    /// `base_delay * 2^retry_index`, plus the cooldown after a rate limit.
    pub fn delay_before_retry(&self, retry_index: u32, error: &RecognitionError) -> Duration {
        let factor = 1u32.checked_shl(retry_index).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(factor);
        if error.is_rate_limited() {
            backoff.saturating_add(self.rate_limit_cooldown)
        } else {
            backoff
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("recognition failed after {attempts} attempt(s): {last_error}")]
    RecognitionFailed { attempts: u32, last_error: String },
}

/// Fetches an image and runs it through the recognizer, retrying transient
/// failures with exponential backoff.
pub struct RecognitionDriver {
    objects: Arc<dyn ObjectStore>,
    recognizer: Arc<dyn Recognizer>,
    policy: RetryPolicy,
}

impl RecognitionDriver {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        recognizer: Arc<dyn Recognizer>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            objects,
            recognizer,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn recognize(&self, image: &ImageRef) -> Result<String, DriverError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.attempt(image).await {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "recognized");
                    return Ok(text);
                }
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                warn!(attempt, error = %error, "giving up on image");
                return Err(DriverError::RecognitionFailed {
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let delay = self.policy.delay_before_retry(attempt - 1, &error);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                rate_limited = error.is_rate_limited(),
                error = %error,
                "recognition attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, image: &ImageRef) -> Result<String, RecognitionError> {
        let data = self.objects.fetch(image).await?;
        self.recognizer.recognize(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ImageData, MemoryObjectStore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Answers from a fixed script, then succeeds with "ok".
    struct Scripted {
        script: Mutex<VecDeque<Result<String, RecognitionError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(script: Vec<Result<String, RecognitionError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Recognizer for Scripted {
        async fn recognize(&self, _image: &ImageData) -> Result<String, RecognitionError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    fn driver(recognizer: Arc<Scripted>) -> RecognitionDriver {
        let objects = MemoryObjectStore::new();
        objects.insert("0001.png", vec![0u8; 4]);
        RecognitionDriver::new(Arc::new(objects), recognizer, RetryPolicy::default())
    }

    fn assert_waited(started: Instant, expected: Duration) {
        let elapsed = started.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(20),
            "waited {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    fn transient(msg: &str) -> Result<String, RecognitionError> {
        Err(RecognitionError::Transient(msg.to_string()))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        let err = RecognitionError::Transient("x".into());
        assert_eq!(policy.delay_before_retry(0, &err), Duration::from_millis(500));
        assert_eq!(policy.delay_before_retry(1, &err), Duration::from_millis(1000));
        assert_eq!(policy.delay_before_retry(2, &err), Duration::from_millis(2000));
    }

    #[test]
    fn test_rate_limit_adds_cooldown() {
        let policy = RetryPolicy::default();
        let err = RecognitionError::RateLimited("429".into());
        assert_eq!(
            policy.delay_before_retry(1, &err),
            Duration::from_millis(1000) + Duration::from_secs(30)
        );
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::default();
        let err = RecognitionError::Transient("x".into());
        assert!(policy.delay_before_retry(64, &err) >= Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_twice_then_succeed() {
        let recognizer = Scripted::new(vec![transient("503"), transient("503")]);
        let driver = driver(recognizer.clone());
        let started = Instant::now();

        let text = driver.recognize(&"0001.png".into()).await.unwrap();

        assert_eq!(text, "ok");
        assert_eq!(recognizer.calls(), 3);
        assert_waited(started, Duration::from_millis(500 + 1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let recognizer = Scripted::new(vec![transient("a"), transient("b"), transient("c")]);
        let driver = driver(recognizer.clone());

        let err = driver.recognize(&"0001.png".into()).await.unwrap_err();

        assert_eq!(
            err,
            DriverError::RecognitionFailed {
                attempts: 3,
                last_error: "c".to_string()
            }
        );
        assert_eq!(recognizer.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_cooldown() {
        let recognizer = Scripted::new(vec![Err(RecognitionError::RateLimited(
            "429 Too Many Requests".into(),
        ))]);
        let driver = driver(recognizer.clone());
        let started = Instant::now();

        driver.recognize(&"0001.png".into()).await.unwrap();

        assert_waited(started, Duration::from_millis(500) + Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_image_is_not_retried() {
        let recognizer = Scripted::new(vec![]);
        let driver = driver(recognizer.clone());
        let started = Instant::now();

        let err = driver.recognize(&"0404.png".into()).await.unwrap_err();

        let DriverError::RecognitionFailed {
            attempts,
            last_error,
        } = err;
        assert_eq!(attempts, 1);
        assert!(last_error.contains("not found"));
        assert_eq!(recognizer.calls(), 0);
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_text_is_success() {
        let recognizer = Scripted::new(vec![Ok(String::new())]);
        let driver = driver(recognizer.clone());
        assert_eq!(driver.recognize(&"0001.png".into()).await.unwrap(), "");
        assert_eq!(recognizer.calls(), 1);
    }
}
