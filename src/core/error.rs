use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("网络请求错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("YAML配置错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP状态错误: {status} - {message}")]
    HttpStatus { status: u16, message: String },

    #[error("WebSocket错误: {0}")]
    WebSocketError(String),

    #[error("数据流错误: {0}")]
    StreamError(String),

    #[error("超时错误: 操作 '{operation}' 超时 ({timeout_ms}毫秒)")]
    TimeoutError { operation: String, timeout_ms: u64 },

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("参数验证错误: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("数据解析错误: {0}")]
    ParseError(String),

    #[error("布局错误: {0}")]
    LayoutError(String),

    #[error("存储错误: {0}")]
    StorageError(String),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DashboardError>;

impl DashboardError {
    /// 判断错误是否可以通过重试恢复
    pub fn is_retryable(&self) -> bool {
        match self {
            DashboardError::NetworkError(_) => true,
            DashboardError::WebSocketError(_) => true,
            DashboardError::StreamError(_) => true,
            DashboardError::TimeoutError { .. } => true,
            DashboardError::IoError(_) => true,
            DashboardError::HttpStatus { status, .. } => {
                // 5xx 和 429 通常是暂时性的
                *status == 429 || (*status >= 500 && *status < 600)
            }
            _ => false,
        }
    }

    /// 状态指示器上展示的简短描述
    pub fn user_friendly_message(&self) -> String {
        match self {
            DashboardError::NetworkError(_) => "网络连接问题，请检查网络状态".to_string(),
            DashboardError::WebSocketError(_) | DashboardError::StreamError(_) => {
                "实时数据连接中断，正在尝试恢复".to_string()
            }
            DashboardError::TimeoutError { operation, .. } => {
                format!("{}超时，请稍后重试", operation)
            }
            DashboardError::HttpStatus { status, .. } => {
                format!("数据服务返回异常状态 {}", status)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DashboardError::StreamError("closed".into()).is_retryable());
        assert!(DashboardError::HttpStatus {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(DashboardError::HttpStatus {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(!DashboardError::HttpStatus {
            status: 404,
            message: "missing".into()
        }
        .is_retryable());
        assert!(!DashboardError::ConfigError("bad".into()).is_retryable());
    }
}
