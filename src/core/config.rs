//! 配置管理模块
//!
//! 提供引擎配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "MiniEngine Raytracing"
//!
//! [graphics]
//! backend = "headless"  # 或 "dx12"
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//!
//! [raytracing]
//! shader_library = "assets/shaders/raytracing.dxil"
//! max_instances = 4096
//! axis_correction = "z_up_to_y_up"
//! model_path = "assets/models/sample.obj"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use super::math::{self, Matrix4};

/// 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 帧缓冲配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 光线追踪配置
    #[serde(default)]
    pub raytracing: RaytracingConfig,
}

/// 帧缓冲（输出分辨率）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 标题
    #[serde(default = "default_title")]
    pub title: String,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// 记录命令的无 GPU 后端
    Headless,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 光线追踪配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaytracingConfig {
    /// 编译好的 DXIL 着色器库路径
    #[serde(default = "default_shader_library")]
    pub shader_library: String,

    /// 允许注册的最大实例数
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    /// TLAS 实例变换使用的坐标轴修正
    #[serde(default = "default_axis_correction")]
    pub axis_correction: AxisCorrection,

    /// 演示程序加载的模型
    #[serde(default = "default_model_path")]
    pub model_path: String,
}

/// 坐标轴修正方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisCorrection {
    /// 不做修正
    None,
    /// Z 轴向上的模型转换为 Y 轴向上（绕 X 轴旋转 -90 度）
    ZUpToYUp,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "MiniEngine Raytracing".to_string() }
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") {
        GraphicsBackend::Dx12
    } else {
        GraphicsBackend::Headless
    }
}
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "mini_engine_rt.log".to_string() }
fn default_shader_library() -> String { "assets/shaders/raytracing.dxil".to_string() }
fn default_max_instances() -> usize { 4096 }
fn default_axis_correction() -> AxisCorrection { AxisCorrection::ZUpToYUp }
fn default_model_path() -> String { "assets/models/sample.obj".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Default for RaytracingConfig {
    fn default() -> Self {
        Self {
            shader_library: default_shader_library(),
            max_instances: default_max_instances(),
            axis_correction: default_axis_correction(),
            model_path: default_model_path(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    ///
    /// 成功返回 `Config` 实例，失败返回错误
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12`: 使用 DirectX 12 后端
    /// - `--headless`: 使用记录命令的无 GPU 后端
    /// - `--width <value>` / `--height <value>`: 输出分辨率
    /// - `--model <path>`: 演示模型路径
    /// - `--shader-library <path>`: DXIL 着色器库路径
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }

        let value_of = |flag: &str| -> Option<&String> {
            args.iter()
                .position(|a| a == flag)
                .and_then(|idx| args.get(idx + 1))
        };

        if let Some(width) = value_of("--width").and_then(|s| s.parse().ok()) {
            self.window.width = width;
        }

        if let Some(height) = value_of("--height").and_then(|s| s.parse().ok()) {
            self.window.height = height;
        }

        if let Some(model) = value_of("--model") {
            self.raytracing.model_path = model.clone();
        }

        if let Some(library) = value_of("--shader-library") {
            self.raytracing.shader_library = library.clone();
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Frame buffer dimensions must be greater than 0".to_string(),
            }.into());
        }

        if self.raytracing.max_instances == 0 {
            return Err(ConfigError::InvalidValue {
                field: "raytracing.max_instances".to_string(),
                reason: "At least one instance must be allowed".to_string(),
            }.into());
        }

        if !cfg!(target_os = "windows") && self.graphics.backend == GraphicsBackend::Dx12 {
            return Err(ConfigError::InvalidValue {
                field: "graphics.backend".to_string(),
                reason: "DX12 backend is only available on Windows".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Headless => "Headless",
        }
    }
}

impl AxisCorrection {
    /// 修正矩阵
    pub fn matrix(&self) -> Matrix4 {
        match self {
            AxisCorrection::None => Matrix4::identity(),
            AxisCorrection::ZUpToYUp => math::rotation_x(-0.5 * std::f32::consts::PI),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.raytracing.max_instances, 4096);
        assert_eq!(config.raytracing.axis_correction, AxisCorrection::ZUpToYUp);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.raytracing.max_instances = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [raytracing]
            max_instances = 8
            axis_correction = "none"
            "#,
        )
        .unwrap();

        assert_eq!(config.raytracing.max_instances, 8);
        assert_eq!(config.raytracing.axis_correction, AxisCorrection::None);
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["app", "--headless", "--width", "640", "--height", "360", "--model", "a.obj"]);

        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 360);
        assert_eq!(config.raytracing.model_path, "a.obj");
    }

    #[test]
    fn test_axis_correction_maps_z_to_y() {
        let m = AxisCorrection::ZUpToYUp.matrix();
        let z = m.transform_vector(&math::Vector3::new(0.0, 0.0, 1.0));
        assert!((z.y - 1.0).abs() < 1e-5);
        assert!(z.z.abs() < 1e-5);

        assert_eq!(AxisCorrection::None.matrix(), Matrix4::identity());
    }
}
