// 工具模块
pub mod logger;

pub use logger::{init_logger, parse_level, LogConfig, RotatingFileWriter};
