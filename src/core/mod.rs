// 核心模块 - 配置、错误、数据模型与重连策略
pub mod config;
pub mod error;
pub mod retry_policy;
pub mod types;

pub use self::config::*;
pub use self::error::*;
pub use self::retry_policy::{ExponentialBackoffRetry, RetryConfig, RetryPolicy};
pub use self::types::*;
