//! GPU 资源描述模块
//!
//! 提供与具体图形 API 无关的缓冲区、纹理描述和资源状态定义。
//! 后端（DX12 / Headless）负责把这些描述转换为原生对象。

use crate::core::math::align_up;

/// 常量缓冲区对齐要求（字节）
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 加速结构缓冲区对齐要求（字节）
pub const ACCELERATION_STRUCTURE_ALIGNMENT: u64 = 256;

/// GPU 虚拟地址
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    /// 空地址
    pub const NULL: GpuAddress = GpuAddress(0);

    /// 偏移地址
    pub fn offset(self, bytes: u64) -> Self {
        GpuAddress(self.0 + bytes)
    }

    /// 是否为空地址
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// 资源所在的堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    /// GPU本地内存（仅GPU可访问）
    Default,
    /// 上传堆（CPU 可写，GPU 可读）
    Upload,
}

/// 资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    GenericRead,
    UnorderedAccess,
    RaytracingAccelerationStructure,
    NonPixelShaderResource,
    CopySource,
    CopyDest,
    RenderTarget,
    Present,
}

/// 资源格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 无类型（结构化缓冲区）
    Unknown,
    /// RGBA 8位无符号整数
    Rgba8Unorm,
    /// RGBA 32位浮点
    Rgba32Float,
    /// RGB 32位浮点（顶点位置）
    Rgb32Float,
    /// 16位索引
    R16Uint,
    /// 32位索引
    R32Uint,
}

impl Format {
    /// 每个元素（像素/顶点分量/索引）的字节数
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::Rgba8Unorm => 4,
            Format::Rgba32Float => 16,
            Format::Rgb32Float => 12,
            Format::R16Uint => 2,
            Format::R32Uint => 4,
        }
    }

    /// 是否可用作索引格式
    pub fn is_index_format(&self) -> bool {
        matches!(self, Format::R16Uint | Format::R32Uint)
    }
}

/// 缓冲区描述信息
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// 缓冲区大小（字节）
    pub size: u64,
    /// 堆类型
    pub heap: HeapType,
    /// 是否允许 UAV 访问
    pub allow_unordered_access: bool,
    /// 初始状态
    pub initial_state: ResourceState,
    /// 调试名称（可选）
    pub name: Option<String>,
}

impl BufferDesc {
    /// 上传堆缓冲区（实例描述符、着色器表、常量缓冲区、几何数据）
    pub fn upload(size: u64) -> Self {
        Self {
            size,
            heap: HeapType::Upload,
            allow_unordered_access: false,
            initial_state: ResourceState::GenericRead,
            name: None,
        }
    }

    /// 常量缓冲区，大小对齐到 256 字节
    pub fn constant(size: u64) -> Self {
        Self::upload(align_up(size, CONSTANT_BUFFER_ALIGNMENT))
    }

    /// 加速结构构建用的 scratch 缓冲区
    pub fn scratch(size: u64) -> Self {
        Self {
            size: align_up(size, ACCELERATION_STRUCTURE_ALIGNMENT),
            heap: HeapType::Default,
            allow_unordered_access: true,
            initial_state: ResourceState::UnorderedAccess,
            name: None,
        }
    }

    /// 加速结构结果缓冲区
    pub fn acceleration_structure(size: u64) -> Self {
        Self {
            size: align_up(size, ACCELERATION_STRUCTURE_ALIGNMENT),
            heap: HeapType::Default,
            allow_unordered_access: true,
            initial_state: ResourceState::RaytracingAccelerationStructure,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// 2D 纹理描述信息
#[derive(Debug, Clone)]
pub struct TextureDesc {
    /// 宽度
    pub width: u32,
    /// 高度
    pub height: u32,
    /// 纹理格式
    pub format: Format,
    /// 是否允许 UAV 访问
    pub allow_unordered_access: bool,
    /// 初始状态
    pub initial_state: ResourceState,
    /// 调试名称
    pub name: Option<String>,
}

impl TextureDesc {
    /// 着色器只读纹理（材质贴图）
    pub fn shader_resource(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            format,
            allow_unordered_access: false,
            initial_state: ResourceState::NonPixelShaderResource,
            name: None,
        }
    }

    /// 光线追踪输出纹理（UAV 可写，平时处于拷贝源状态）
    pub fn raytracing_output(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: Format::Rgba8Unorm,
            allow_unordered_access: true,
            initial_state: ResourceState::CopySource,
            name: Some("Raytracing Output".to_string()),
        }
    }

    /// 离屏帧缓冲（平时处于渲染目标状态）
    pub fn frame_buffer(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: Format::Rgba8Unorm,
            allow_unordered_access: false,
            initial_state: ResourceState::RenderTarget,
            name: Some("Frame Buffer".to_string()),
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 一行像素的字节数
    pub fn row_pitch(&self) -> u64 {
        self.width as u64 * self.format.size_in_bytes() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_buffer_alignment() {
        let desc = BufferDesc::constant(100);
        assert_eq!(desc.size, 256);
        assert_eq!(desc.heap, HeapType::Upload);

        let desc = BufferDesc::constant(300);
        assert_eq!(desc.size, 512);
    }

    #[test]
    fn test_acceleration_structure_buffers() {
        let scratch = BufferDesc::scratch(1000);
        assert_eq!(scratch.size, 1024);
        assert!(scratch.allow_unordered_access);
        assert_eq!(scratch.initial_state, ResourceState::UnorderedAccess);

        let result = BufferDesc::acceleration_structure(10);
        assert_eq!(result.size, 256);
        assert_eq!(result.initial_state, ResourceState::RaytracingAccelerationStructure);
    }

    #[test]
    fn test_gpu_address_offset() {
        let addr = GpuAddress(0x1000);
        assert_eq!(addr.offset(64), GpuAddress(0x1040));
        assert!(GpuAddress::NULL.is_null());
    }

    #[test]
    fn test_texture_row_pitch() {
        let desc = TextureDesc::raytracing_output(1280, 720);
        assert_eq!(desc.row_pitch(), 1280 * 4);
        assert!(desc.allow_unordered_access);
    }
}
