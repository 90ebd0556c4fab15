//! 描述符管理模块
//!
//! 提供与后端无关的描述符堆描述、描述符句柄和视图描述。
//!
//! 光线追踪只使用两类着色器可见的堆：
//!
//! - **CBV/SRV/UAV**：输出纹理 UAV、相机常量 CBV、TLAS 和每个实例的材质/几何 SRV
//! - **Sampler**：命中着色器共享的采样器

use super::device::Device;
use super::resource::{Format, GpuAddress};

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// 常量缓冲/着色资源/无序访问视图
    CbvSrvUav,
    /// 采样器
    Sampler,
}

impl DescriptorHeapType {
    /// 获取描述符堆类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapType::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapType::Sampler => "Sampler",
        }
    }
}

/// 描述符堆描述信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapDescriptor {
    /// 描述符堆类型
    pub heap_type: DescriptorHeapType,
    /// 描述符数量
    pub num_descriptors: u32,
    /// 是否着色器可见
    pub shader_visible: bool,
    /// 调试名称
    pub name: Option<String>,
}

impl DescriptorHeapDescriptor {
    /// 创建新的描述符堆描述符
    pub fn new(heap_type: DescriptorHeapType, num_descriptors: u32) -> Self {
        Self {
            heap_type,
            num_descriptors,
            shader_visible: true,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 创建 SRV/CBV/UAV 堆描述符
    pub fn cbv_srv_uav(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapType::CbvSrvUav, num_descriptors)
            .with_name("CBV/SRV/UAV Heap")
    }

    /// 创建采样器堆描述符
    pub fn sampler(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapType::Sampler, num_descriptors)
            .with_name("Sampler Heap")
    }
}

/// 描述符句柄（GPU 可见）
///
/// 着色器表中的描述符表参数就是这个句柄的 `ptr` 值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
    /// 描述符索引
    pub index: u32,
}

impl GpuDescriptorHandle {
    /// 创建新的 GPU 描述符句柄
    pub fn new(ptr: u64, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
            index: self.index + count,
        }
    }
}

/// 缓冲区 SRV 的元素解释方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferElements {
    /// 结构化缓冲区，按步长读取
    Structured { stride: u32 },
    /// 类型化缓冲区，按格式读取（索引缓冲区）
    Typed { format: Format },
}

/// 写入描述符堆的视图
pub enum ViewDesc<'a, D: Device + ?Sized> {
    /// 2D 纹理 SRV
    Texture2DSrv(&'a D::Texture),
    /// 缓冲区 SRV
    BufferSrv {
        buffer: &'a D::Buffer,
        num_elements: u32,
        elements: BufferElements,
    },
    /// 加速结构 SRV（只需要 GPU 地址）
    AccelerationStructureSrv(GpuAddress),
    /// 2D 纹理 UAV
    Texture2DUav(&'a D::Texture),
    /// 常量缓冲区视图
    ConstantBuffer { address: GpuAddress, size: u32 },
}

impl<D: Device + ?Sized> ViewDesc<'_, D> {
    /// 视图类型名称（日志用）
    pub fn kind_name(&self) -> &'static str {
        match self {
            ViewDesc::Texture2DSrv(_) => "Texture2D SRV",
            ViewDesc::BufferSrv { .. } => "Buffer SRV",
            ViewDesc::AccelerationStructureSrv(_) => "Acceleration Structure SRV",
            ViewDesc::Texture2DUav(_) => "Texture2D UAV",
            ViewDesc::ConstantBuffer { .. } => "CBV",
        }
    }
}

/// 采样器过滤方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Point,
    Linear,
    Anisotropic,
}

/// 纹理寻址模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

/// 采样器描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address_mode: AddressMode,
    pub max_anisotropy: u32,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl SamplerDesc {
    /// 线性过滤 + 重复寻址
    pub fn linear_wrap() -> Self {
        Self {
            filter: Filter::Linear,
            address_mode: AddressMode::Wrap,
            max_anisotropy: 1,
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self::linear_wrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_handle_offset() {
        let handle = GpuDescriptorHandle::new(0x1000, 0);
        let offset = handle.offset(10, 32);
        assert_eq!(offset.ptr, 0x1000 + 320);
        assert_eq!(offset.index, 10);
    }

    #[test]
    fn test_heap_descriptors_are_shader_visible() {
        let desc = DescriptorHeapDescriptor::cbv_srv_uav(18);
        assert_eq!(desc.heap_type, DescriptorHeapType::CbvSrvUav);
        assert_eq!(desc.num_descriptors, 18);
        assert!(desc.shader_visible);

        let desc = DescriptorHeapDescriptor::sampler(1);
        assert_eq!(desc.heap_type.name(), "Sampler");
        assert!(desc.shader_visible);
    }
}
