//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! # 特性
//!
//! - 结构化日志：支持键值对
//! - 灵活输出：支持控制台和文件输出
//! - 日志级别：trace, debug, info, warn, error
//!
//! # 使用示例
//!
//! ```no_run
//! use mini_engine_rt::core::config::LoggingConfig;
//! use mini_engine_rt::core::log;
//!
//! log::init_logger(&LoggingConfig::default());
//! tracing::info!(instances = 2, "World committed");
//! ```

use std::path::Path;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use super::config::LogLevel;
use super::config::LoggingConfig;

const DEFAULT_LOG_FILE: &str = "mini_engine_rt.log";

/// 按天滚动的日志文件
///
/// 路径的父目录作为输出目录，文件名作为滚动文件的前缀。
fn file_appender(log_path: &str) -> RollingFileAppender {
    let path = Path::new(log_path);
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    RollingFileAppender::new(Rotation::DAILY, directory, prefix)
}

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。`RUST_LOG` 环境变量存在时优先使用它。
/// 控制台始终输出；`file_output` 打开时额外输出到不带 ANSI 颜色的日志文件。
pub fn init_logger(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = config.file_output.then(|| {
        let log_path = if config.log_file.is_empty() {
            DEFAULT_LOG_FILE
        } else {
            config.log_file.as_str()
        };
        fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file_appender(log_path))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

impl LogLevel {
    /// EnvFilter 使用的过滤字符串
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// 引擎核心日志 - Info 级别
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "mini_engine_rt::engine", $($arg)*)
    };
}

/// 引擎核心日志 - Warn 级别
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "mini_engine_rt::engine", $($arg)*)
    };
}

/// 引擎核心日志 - Error 级别
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "mini_engine_rt::engine", $($arg)*)
    };
}

/// 日志级别转换
impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}
