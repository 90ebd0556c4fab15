//! 核心功能模块
//!
//! 本模块提供了引擎的基础功能，包括数学库、日志系统、配置管理和错误处理。
//! 这些模块独立于具体的图形 API，可以在任何后端中使用。
//!
//! # 模块组织
//!
//! - `math`：数学库（nalgebra 类型别名与 GPU 布局辅助函数）
//! - `log`：日志系统，提供结构化的日志记录功能
//! - `config`：配置管理，支持从配置文件加载引擎设置
//! - `error`：错误处理，定义统一的错误类型

pub mod math;
pub mod log;
pub mod config;
pub mod error;

// 重新导出常用类型，方便使用
pub use math::{Vector3, Vector4, Matrix4};
pub use error::{Result, EngineError};
pub use config::Config;
