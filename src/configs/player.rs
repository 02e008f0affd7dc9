use serde::{Deserialize, Serialize};

/// Playback policy. The specific thresholds are deployment policy rather
/// than contract; defaults mirror the reference deployment.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    /// How long a candidate may sit in Loading without a manifest or first
    /// fragment before the engine advances to the next candidate.
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    /// In-place retry policy for network-class stream errors.
    #[serde(default)]
    pub network_retry: NetworkRetryConfig,
    /// After an in-place network recovery attempt, how long to wait for
    /// playback to resume before escalating to a candidate switch.
    #[serde(default = "default_recovery_wait_ms")]
    pub recovery_wait_ms: u64,
    /// Cadence of playback-position snapshots while actively playing.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkRetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl NetworkRetryConfig {
    /// Exponential backoff for the given zero-based attempt, capped.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exp = self.retry_delay_ms.saturating_mul(1u64 << attempt.min(16));
        exp.min(self.max_retry_delay_ms)
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: default_load_timeout_ms(),
            network_retry: NetworkRetryConfig::default(),
            recovery_wait_ms: default_recovery_wait_ms(),
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

impl Default for NetworkRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

fn default_load_timeout_ms() -> u64 {
    20_000
}

fn default_recovery_wait_ms() -> u64 {
    5_000
}

fn default_progress_interval_secs() -> u64 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    8_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = NetworkRetryConfig::default();
        assert_eq!(retry.backoff_ms(0), 1_000);
        assert_eq!(retry.backoff_ms(1), 2_000);
        assert_eq!(retry.backoff_ms(2), 4_000);
        assert_eq!(retry.backoff_ms(3), 8_000);
        assert_eq!(retry.backoff_ms(10), 8_000);
    }
}
