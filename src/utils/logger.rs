/// 统一日志模块
/// 基于env_logger输出到控制台，可选按日期写入文件并按大小轮转
use chrono::Local;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::core::error::DashboardError;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 默认日志级别，RUST_LOG优先
    pub level: String,
    /// 日志文件目录，为空则只输出到控制台
    pub log_dir: Option<String>,
    /// 单个日志文件大小上限（MB）
    pub max_file_size_mb: u64,
    /// 写文件时是否同时输出到控制台
    pub console_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            log_dir: None,
            max_file_size_mb: 10,
            console_output: true,
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> LevelFilter {
        parse_level(&self.level)
    }
}

/// 解析日志级别字符串，无法识别时回退为INFO
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_uppercase().as_str() {
        "OFF" => LevelFilter::Off,
        "ERROR" => LevelFilter::Error,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "INFO" => LevelFilter::Info,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// 按日期命名、超过大小自动轮转的日志文件
pub struct RotatingFileWriter {
    dir: PathBuf,
    prefix: String,
    max_size: u64,
    current_size: u64,
    /// 轮转序号，同一秒内多次轮转也不会互相覆盖
    rotation_seq: u32,
    file: Option<fs::File>,
}

impl RotatingFileWriter {
    pub fn new(dir: &str, prefix: &str, max_size_mb: u64) -> io::Result<Self> {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
        }

        let mut writer = Self {
            dir: PathBuf::from(dir),
            prefix: prefix.to_string(),
            max_size: max_size_mb.max(1) * 1024 * 1024,
            current_size: 0,
            rotation_seq: 0,
            file: None,
        };
        writer.open_current()?;
        Ok(writer)
    }

    /// 当前日志文件路径: {dir}/{prefix}_{YYYYMMDD}.log
    pub fn current_path(&self) -> PathBuf {
        let date = Local::now().format("%Y%m%d");
        self.dir.join(format!("{}_{}.log", self.prefix, date))
    }

    fn open_current(&mut self) -> io::Result<()> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;
        let current = self.current_path();
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let rotated = loop {
            self.rotation_seq += 1;
            let candidate = self.dir.join(format!(
                "{}_{}_{:03}_rotated.log",
                self.prefix, timestamp, self.rotation_seq
            ));
            if !candidate.exists() {
                break candidate;
            }
        };
        if current.exists() {
            fs::rename(&current, rotated)?;
        }
        self.open_current()
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        if self.file.is_none() {
            self.open_current()?;
        }
        let written = match self.file.as_mut() {
            Some(file) => file.write(buf)?,
            None => 0,
        };
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 同时写控制台和文件
struct TeeWriter {
    file: RotatingFileWriter,
    console: bool,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.console {
            let _ = io::stderr().write_all(buf);
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.console {
            let _ = io::stderr().flush();
        }
        self.file.flush()
    }
}

/// 初始化全局日志
pub fn init_logger(config: &LogConfig) -> Result<(), DashboardError> {
    let level = config.level_filter();
    let env = env_logger::Env::default().default_filter_or(level.as_str().to_lowercase());
    let mut builder = env_logger::Builder::from_env(env);

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(dir) = config.log_dir.as_deref().filter(|d| !d.trim().is_empty()) {
        let file = RotatingFileWriter::new(dir, "dashboard", config.max_file_size_mb)?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter {
            file,
            console: config.console_output,
        })));
    }

    builder
        .try_init()
        .map_err(|e| DashboardError::ConfigError(format!("日志初始化失败: {}", e)))?;

    log::info!("📝 日志系统已初始化，级别: {}", level);
    Ok(())
}
