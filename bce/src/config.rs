//! Configuration for the evaluation pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use arbiter::RetryPolicy;

/// Configuration for the behavioral change evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BceConfig {
    /// Pairwise check configuration
    pub checks: CheckConfig,
    /// Retry configuration for judge calls
    pub retry: RetryConfig,
    /// Polling configuration for completion waits
    pub polling: PollingConfig,
}

impl BceConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Pairwise check configuration.
///
/// The thresholds are tunable, but a contradiction finding is always gated
/// by two independent judgments: the pair must be sufficiently related AND
/// sufficiently conflicting. An unrelated pair is never a contradiction,
/// whatever its conflict score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Comparison rules per judge call
    pub batch_size: usize,
    /// Minimum contradiction severity for a finding to be kept
    pub contradiction_threshold: u8,
    /// Minimum relatedness severity for a finding to be kept
    pub relatedness_threshold: u8,
    /// Minimum score for an entailment to be proposed
    pub connection_threshold: u8,
    /// Maximum concurrent judge calls per evaluation
    pub max_concurrent_checks: usize,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            contradiction_threshold: 6,
            relatedness_threshold: 6,
            connection_threshold: 6,
            max_concurrent_checks: 10,
        }
    }
}

/// Retry configuration for judge calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per judge call, including the first
    pub max_attempts: u32,
    /// Delay between attempts (ms)
    pub interval_ms: u64,
}

impl RetryConfig {
    /// Build the retry policy this configuration describes.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.interval_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval_ms: 1000,
        }
    }
}

/// Polling configuration for completion waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between status reads (ms)
    pub interval_ms: u64,
}

impl PollingConfig {
    /// Delay between status reads.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 250 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BceConfig::default();
        assert_eq!(config.checks.batch_size, 5);
        assert_eq!(config.checks.contradiction_threshold, 6);
        assert_eq!(config.retry.max_attempts, 60);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = BceConfig::default();
        config.checks.batch_size = 8;

        let yaml = config.to_yaml().unwrap();
        let parsed = BceConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.checks.batch_size, 8);
        assert_eq!(parsed.polling.interval_ms, 250);
    }
}
