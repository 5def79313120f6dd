use crate::core::error::DashboardError;
use crate::utils::logger::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// 推送流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 推送流地址（http(s)为SSE，ws(s)为WebSocket）
    pub url: String,
    /// 重连基础延迟（毫秒）
    pub reconnect_base_delay_ms: u64,
    /// 重连延迟上限（毫秒）
    pub reconnect_max_delay_ms: u64,
    /// 最大连续重连次数
    pub max_reconnect_attempts: u32,
    /// 重连延迟是否叠加随机抖动，避免多个客户端同时重连
    pub reconnect_jitter: bool,
    /// 建立连接超时（毫秒）
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/stream".to_string(),
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_jitter: false,
            connect_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// 定时轮询配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 轮询数据接口
    pub url: String,
    /// 轮询间隔（毫秒）
    pub interval_ms: u64,
    /// 单次请求超时（毫秒）
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/market-data".to_string(),
            interval_ms: 300_000,
            request_timeout_ms: 15_000,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// 网格布局配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// 网格列数
    pub columns: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self { columns: 12 }
    }
}

/// 看板同步核心的全局配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub stream: StreamConfig,
    pub sync: SyncConfig,
    pub layout: LayoutConfig,
    pub logging: LogConfig,
    /// 恢复前台时，轮询数据超过该时长（毫秒）则强制刷新
    pub resume_stale_after_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            sync: SyncConfig::default(),
            layout: LayoutConfig::default(),
            logging: LogConfig::default(),
            resume_stale_after_ms: 60_000,
        }
    }
}

impl DashboardConfig {
    /// 从YAML文件加载配置
    pub fn from_file(path: &str) -> Result<Self, DashboardError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| DashboardError::ConfigError(format!("读取配置文件失败: {}", e)))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, DashboardError> {
        let config: DashboardConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// 读取.env与进程环境变量覆盖配置
    pub fn apply_env(&mut self) -> Result<(), DashboardError> {
        dotenv::dotenv().ok(); // 加载.env文件，忽略错误
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// 使用自定义查找函数覆盖配置，便于测试
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), DashboardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DASH_STREAM_URL") {
            self.stream.url = url;
        }
        if let Some(url) = lookup("DASH_POLL_URL") {
            self.sync.url = url;
        }
        if let Some(value) = lookup("DASH_POLL_INTERVAL_MS") {
            self.sync.interval_ms = parse_env("DASH_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("DASH_RECONNECT_BASE_MS") {
            self.stream.reconnect_base_delay_ms = parse_env("DASH_RECONNECT_BASE_MS", &value)?;
        }
        if let Some(value) = lookup("DASH_RECONNECT_MAX_ATTEMPTS") {
            self.stream.max_reconnect_attempts =
                parse_env("DASH_RECONNECT_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("DASH_RECONNECT_JITTER") {
            self.stream.reconnect_jitter = parse_env("DASH_RECONNECT_JITTER", &value)?;
        }
        if let Some(value) = lookup("DASH_GRID_COLUMNS") {
            self.layout.columns = parse_env("DASH_GRID_COLUMNS", &value)?;
        }
        if let Some(level) = lookup("DASH_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.stream.url.trim().is_empty() {
            return Err(invalid("stream.url", "推送流地址不能为空"));
        }
        if self.sync.url.trim().is_empty() {
            return Err(invalid("sync.url", "轮询地址不能为空"));
        }
        if self.sync.interval_ms == 0 {
            return Err(invalid("sync.interval_ms", "轮询间隔必须大于0"));
        }
        if self.stream.reconnect_base_delay_ms == 0 {
            return Err(invalid(
                "stream.reconnect_base_delay_ms",
                "重连基础延迟必须大于0",
            ));
        }
        if self.stream.reconnect_max_delay_ms < self.stream.reconnect_base_delay_ms {
            return Err(invalid(
                "stream.reconnect_max_delay_ms",
                "重连延迟上限不能小于基础延迟",
            ));
        }
        if self.layout.columns == 0 {
            return Err(invalid("layout.columns", "网格列数必须大于0"));
        }
        Ok(())
    }

    pub fn resume_stale_after(&self) -> Duration {
        Duration::from_millis(self.resume_stale_after_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DashboardError> {
    value.trim().parse::<T>().map_err(|_| {
        DashboardError::ConfigError(format!("环境变量 {} 的值无效: {}", key, value))
    })
}

fn invalid(field: &str, reason: &str) -> DashboardError {
    DashboardError::ValidationError {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
