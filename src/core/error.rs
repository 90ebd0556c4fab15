//! 错误处理模块
//!
//! 定义了引擎中使用的统一错误类型。
//!
//! # 设计原则
//!
//! - 为每种错误类型提供清晰的上下文信息
//! - 支持错误链（error source）
//! - 易于模式匹配和错误处理
//! - 光线追踪子系统的错误单独分类，便于调用方区分"调用顺序错误"和"资源创建失败"

use std::fmt;
use std::path::PathBuf;

/// 引擎统一的 Result 类型
///
/// 所有可能返回错误的函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, EngineError>;

/// 引擎的错误类型
#[derive(Debug)]
pub enum EngineError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 网格加载错误
    MeshLoading(MeshLoadError),

    /// 光线追踪子系统错误
    Raytracing(RaytracingError),

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误
    Initialization(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 着色器加载/编译失败
    ShaderCompilation(String),

    /// 资源创建失败（缓冲区、纹理、描述符堆、根签名）
    ResourceCreation(String),

    /// 管线状态对象创建失败
    PipelineCreation(String),

    /// 渲染命令执行失败
    CommandExecution(String),
}

/// 网格加载相关的错误
#[derive(Debug)]
pub enum MeshLoadError {
    /// 文件不存在
    FileNotFound(PathBuf),

    /// 解析失败
    ParseError(String),

    /// 几何数据无效
    InvalidGeometry(String),

    /// 纹理解码失败
    TextureDecode(String),
}

/// 光线追踪子系统的错误
#[derive(Debug)]
pub enum RaytracingError {
    /// 在没有注册任何几何体的情况下提交
    EmptyWorld,

    /// 加速结构已经提交过
    AlreadyCommitted,

    /// 尚未提交几何体就进行了光线派发
    NotCommitted,

    /// 超出容量限制
    CapacityExceeded {
        what: &'static str,
        requested: usize,
        limit: usize,
    },

    /// 描述符布局与着色器表/根签名不一致
    LayoutMismatch(String),

    /// 不支持的资源（格式、维度等）
    UnsupportedResource(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "Configuration error: {}", e),
            EngineError::Graphics(e) => write!(f, "Graphics error: {}", e),
            EngineError::MeshLoading(e) => write!(f, "Mesh loading error: {}", e),
            EngineError::Raytracing(e) => write!(f, "Raytracing error: {}", e),
            EngineError::Io(e) => write!(f, "IO error: {}", e),
            EngineError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::ShaderCompilation(msg) => write!(f, "Shader compilation failed: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::PipelineCreation(msg) => write!(f, "Pipeline creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
        }
    }
}

impl fmt::Display for MeshLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshLoadError::FileNotFound(path) => write!(f, "Mesh file not found: {}", path.display()),
            MeshLoadError::ParseError(msg) => write!(f, "Failed to parse mesh: {}", msg),
            MeshLoadError::InvalidGeometry(msg) => write!(f, "Invalid geometry data: {}", msg),
            MeshLoadError::TextureDecode(msg) => write!(f, "Failed to decode texture: {}", msg),
        }
    }
}

impl fmt::Display for RaytracingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaytracingError::EmptyWorld => {
                write!(f, "No geometry registered before committing the acceleration structures")
            }
            RaytracingError::AlreadyCommitted => {
                write!(f, "Geometry has already been committed")
            }
            RaytracingError::NotCommitted => {
                write!(f, "Geometry must be committed before dispatching rays")
            }
            RaytracingError::CapacityExceeded { what, requested, limit } => {
                write!(f, "Capacity exceeded for {}: requested {}, limit {}", what, requested, limit)
            }
            RaytracingError::LayoutMismatch(msg) => write!(f, "Descriptor layout mismatch: {}", msg),
            RaytracingError::UnsupportedResource(msg) => write!(f, "Unsupported resource: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            EngineError::Config(e) => Some(e),
            EngineError::Graphics(e) => Some(e),
            EngineError::MeshLoading(e) => Some(e),
            EngineError::Raytracing(e) => Some(e),
            EngineError::Initialization(_) => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for MeshLoadError {}
impl std::error::Error for RaytracingError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<GraphicsError> for EngineError {
    fn from(err: GraphicsError) -> Self {
        EngineError::Graphics(err)
    }
}

impl From<MeshLoadError> for EngineError {
    fn from(err: MeshLoadError) -> Self {
        EngineError::MeshLoading(err)
    }
}

impl From<RaytracingError> for EngineError {
    fn from(err: RaytracingError) -> Self {
        EngineError::Raytracing(err)
    }
}

impl EngineError {
    /// 是否为光线追踪子系统的特定错误
    pub fn as_raytracing(&self) -> Option<&RaytracingError> {
        match self {
            EngineError::Raytracing(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: EngineError = RaytracingError::CapacityExceeded {
            what: "instances",
            requested: 10,
            limit: 4,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Raytracing error: Capacity exceeded for instances: requested 10, limit 4"
        );
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let err: EngineError = GraphicsError::ResourceCreation("heap".to_string()).into();
        assert!(err.source().is_some());
        assert!(err.as_raytracing().is_none());

        let err: EngineError = RaytracingError::EmptyWorld.into();
        assert!(matches!(err.as_raytracing(), Some(RaytracingError::EmptyWorld)));
    }
}
