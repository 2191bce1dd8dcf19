use std::time::Duration;

use catastro_source::RecordSchema;

use crate::{fetch::RetryPolicy, rate_limit::JitterConfig, search::SearchConfig};

/// Builder for creating search configurations with ergonomic defaults
#[derive(Debug, Clone, Default)]
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    /// Create a new builder with sensible defaults
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
        }
    }

    /// Create a builder without jitter and with short backoff, for tests and trusted mirrors
    pub fn fast() -> Self {
        let mut builder = Self::new();
        builder.config.jitter = JitterConfig::none();
        builder.config.retry = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(500),
        };
        builder
    }

    /// Create a builder that retries harder and spreads requests out further
    pub fn cautious() -> Self {
        let mut builder = Self::new();
        builder.config.retry = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
        };
        builder.config.jitter = JitterConfig {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        };
        builder
    }

    /// Set the record count at which a region is considered truncated
    pub fn record_cap(mut self, record_cap: usize) -> Self {
        self.config.record_cap = record_cap.max(1);
        self
    }

    /// Set the total attempts per remote call, the first included
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts.max(1);
        self
    }

    /// Set the backoff schedule between retries
    pub fn backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.config.retry.initial_backoff = initial;
        self.config.retry.multiplier = multiplier.max(1.0);
        self.config.retry.max_backoff = max.max(initial);
        self
    }

    /// Replace the whole retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the randomised delay applied after every rate-limiter admission
    pub fn jitter(mut self, min: Duration, max: Duration) -> Self {
        self.config.jitter = JitterConfig {
            min: min.min(max),
            max: max.max(min),
        };
        self
    }

    /// Disable request jitter
    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = JitterConfig::none();
        self
    }

    /// Set the candidate count from which the spatial index replaces a linear scan
    pub fn spatial_index_threshold(mut self, threshold: usize) -> Self {
        self.config.spatial_index_threshold = threshold;
        self
    }

    /// Show a per-cell progress bar on stderr
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Use non-default record field names
    pub fn schema(mut self, schema: RecordSchema) -> Self {
        self.config.schema = schema;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> SearchConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use catastro_source::RECORD_CAP;

    use super::*;

    #[test]
    fn test_default_builder() {
        let config = SearchConfigBuilder::new().build();
        assert_eq!(config.record_cap, RECORD_CAP);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.jitter, JitterConfig::default());
        assert_eq!(config.spatial_index_threshold, 256);
        assert!(!config.show_progress);
    }

    #[test]
    fn test_fast_preset() {
        let config = SearchConfigBuilder::fast().build();
        assert!(config.jitter.is_disabled());
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_cautious_preset() {
        let config = SearchConfigBuilder::cautious().build();
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.jitter.max > JitterConfig::default().max);
    }

    #[test]
    fn test_method_chaining() {
        let config = SearchConfigBuilder::new()
            .record_cap(500)
            .max_attempts(4)
            .no_jitter()
            .spatial_index_threshold(0)
            .show_progress(true)
            .build();

        assert_eq!(config.record_cap, 500);
        assert_eq!(config.retry.max_attempts, 4);
        assert!(config.jitter.is_disabled());
        assert_eq!(config.spatial_index_threshold, 0);
        assert!(config.show_progress);
    }

    #[test]
    fn test_override_presets() {
        let config = SearchConfigBuilder::fast().max_attempts(7).build();
        assert_eq!(config.retry.max_attempts, 7);
        assert!(config.jitter.is_disabled(), "keeps the fast preset jitter");
    }

    #[test]
    fn test_invalid_values_are_clamped() {
        let config = SearchConfigBuilder::new()
            .record_cap(0)
            .max_attempts(0)
            .jitter(Duration::from_secs(2), Duration::from_secs(1))
            .backoff(Duration::from_secs(5), 0.5, Duration::from_secs(1))
            .build();

        assert_eq!(config.record_cap, 1);
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.jitter.min <= config.jitter.max);
        assert!((config.retry.multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.retry.max_backoff, Duration::from_secs(5));
    }
}
