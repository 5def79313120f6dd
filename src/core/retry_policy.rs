/// 重连退避策略
use crate::core::config::StreamConfig;
use std::time::Duration;

/// 重试策略配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始延迟（毫秒）
    pub initial_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 是否添加抖动
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: false,
        }
    }
}

impl From<&StreamConfig> for RetryConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            max_retries: config.max_reconnect_attempts,
            initial_delay_ms: config.reconnect_base_delay_ms,
            max_delay_ms: config.reconnect_max_delay_ms,
            jitter: config.reconnect_jitter,
            ..Default::default()
        }
    }
}

/// 重试策略trait
pub trait RetryPolicy: Send + Sync {
    /// 已重试`attempt`次后是否还允许再试
    fn should_retry(&self, attempt: u32) -> bool;

    /// 第`attempt`次重试（从0开始）前的等待时间
    fn calculate_delay(&self, attempt: u32) -> Duration;
}

/// 指数退避重试策略
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetry {
    config: RetryConfig,
}

impl ExponentialBackoffRetry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

impl RetryPolicy for ExponentialBackoffRetry {
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_retries
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay =
            self.config.initial_delay_ms as f64 * self.config.backoff_factor.powi(exponent);

        let mut delay_ms = base_delay.min(self.config.max_delay_ms as f64) as u64;

        // 抖动后仍不超过上限
        if self.config.jitter && delay_ms > 0 {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0..=delay_ms / 4);
            delay_ms = (delay_ms + jitter).min(self.config.max_delay_ms);
        }

        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = ExponentialBackoffRetry::new(RetryConfig {
            max_retries: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            ..Default::default()
        });

        let delays: Vec<u64> = (0..8)
            .map(|attempt| policy.calculate_delay(attempt).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000, 10_000, 10_000]
        );
    }

    #[test]
    fn test_should_retry_stops_at_max() {
        let policy = ExponentialBackoffRetry::new(RetryConfig {
            max_retries: 3,
            ..Default::default()
        });
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = ExponentialBackoffRetry::new(RetryConfig::from(&StreamConfig {
            reconnect_max_delay_ms: 5_000,
            reconnect_jitter: true,
            ..Default::default()
        }));
        assert!(policy.config.jitter);

        for attempt in 0..10 {
            let delay = policy.calculate_delay(attempt);
            assert!(delay <= Duration::from_millis(5_000));
            assert!(delay >= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = ExponentialBackoffRetry::new(RetryConfig::default());
        assert_eq!(policy.calculate_delay(u32::MAX), Duration::from_millis(30_000));
    }
}
