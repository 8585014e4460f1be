use std::time::Duration;

use crate::config::ServiceConfig;
use crate::recognition::RetryPolicy;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_INTER_ITEM_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Consecutive item failures that abort the run.
    pub failure_threshold: u32,
    /// Pause after each recognized item, before the next one starts.
    /// Items already in flight keep running through it.
    pub inter_item_delay: Duration,
    /// Items in flight at once. Output order never depends on it.
    pub item_concurrency: usize,
    /// Fail the job instead of concatenating when the merge pass errors.
    pub strict_merge: bool,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            inter_item_delay: DEFAULT_INTER_ITEM_DELAY,
            item_concurrency: 1,
            strict_merge: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &ServiceConfig) -> Self {
        let pipeline = &config.pipeline;
        let retry = &config.retry;
        Self {
            failure_threshold: pipeline.failure_threshold,
            inter_item_delay: Duration::from_millis(pipeline.inter_item_delay_ms),
            item_concurrency: pipeline.item_concurrency.max(1),
            strict_merge: pipeline.strict_merge,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                base_delay: Duration::from_millis(retry.base_delay_ms),
                rate_limit_cooldown: Duration::from_millis(retry.rate_limit_cooldown_ms),
            },
        }
    }

    /// No pauses and no retry waits; for tests and local tooling.
    pub fn immediate() -> Self {
        Self {
            inter_item_delay: Duration::ZERO,
            retry: RetryPolicy {
                base_delay: Duration::ZERO,
                rate_limit_cooldown: Duration::ZERO,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.inter_item_delay, Duration::from_secs(1));
        assert_eq!(config.item_concurrency, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.retry.rate_limit_cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_from_service_config_matches_defaults() {
        assert_eq!(
            PipelineConfig::from_config(&ServiceConfig::default()),
            PipelineConfig::default()
        );
    }
}
