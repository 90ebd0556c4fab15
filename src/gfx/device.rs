//! 图形设备的统一抽象接口
//!
//! 光线追踪子系统只通过这里定义的 trait 访问 GPU：
//! `Device` 负责创建资源和查询信息，`RenderContext` 负责录制命令。
//! 所有具体后端（DirectX 12、Headless）都必须实现这两个 trait。

use super::accel::{AccelerationStructureInputs, BuildAccelerationStructureDesc, DispatchRaysDesc, PrebuildInfo};
use super::descriptor::{DescriptorHeapDescriptor, DescriptorHeapType, GpuDescriptorHandle, SamplerDesc, ViewDesc};
use super::pipeline::{RaytracingPipelineDesc, RootSignatureDesc, ShaderIdentifier};
use super::resource::{BufferDesc, Format, GpuAddress, ResourceState, TextureDesc};
use crate::core::error::Result;

/// GPU 缓冲区
pub trait GpuBuffer {
    /// 缓冲区起始 GPU 虚拟地址
    fn gpu_address(&self) -> GpuAddress;
    /// 缓冲区大小（字节）
    fn size(&self) -> u64;
}

/// GPU 2D 纹理
pub trait GpuTexture {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> Format;
}

/// 着色器可见的描述符堆
pub trait GpuDescriptorHeap {
    fn heap_type(&self) -> DescriptorHeapType;
    fn num_descriptors(&self) -> u32;
    /// 第一个描述符的 GPU 句柄
    fn gpu_start(&self) -> GpuDescriptorHandle;
}

/// 光线追踪管线（状态对象）
pub trait RaytracingPipeline {
    /// 查询导出名对应的着色器标识符
    ///
    /// 只有光线生成/未命中入口点和命中组拥有标识符。
    fn shader_identifier(&self, export: &str) -> Result<ShaderIdentifier>;
}

/// 资源屏障
pub enum ResourceBarrier<'a, D: Device + ?Sized> {
    /// UAV 屏障：等待之前对该缓冲区的写入（加速结构构建）完成
    Uav(&'a D::Buffer),
    /// 纹理状态转换
    Transition {
        texture: &'a D::Texture,
        before: ResourceState,
        after: ResourceState,
    },
}

/// 图形设备
pub trait Device {
    type Buffer: GpuBuffer;
    type Texture: GpuTexture;
    type DescriptorHeap: GpuDescriptorHeap;
    type RootSignature;
    type Pipeline: RaytracingPipeline;
    type Context: RenderContext<Self>;

    /// 获取后端的名称（如 "DirectX 12"）
    fn backend_name(&self) -> &str;

    /// 创建缓冲区
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<Self::Buffer>;

    /// 向上传堆缓冲区写入数据
    ///
    /// # 参数
    ///
    /// * `buffer` - 目标缓冲区（必须位于上传堆）
    /// * `offset` - 写入起始偏移（字节）
    /// * `data` - 写入的数据
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;

    /// 创建 2D 纹理，可选地上传初始像素数据（紧密排列的行）
    fn create_texture(&mut self, desc: &TextureDesc, initial_data: Option<&[u8]>) -> Result<Self::Texture>;

    /// 创建描述符堆
    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDescriptor) -> Result<Self::DescriptorHeap>;

    /// 描述符句柄的递增大小
    fn descriptor_increment_size(&self, heap_type: DescriptorHeapType) -> u32;

    /// 在描述符堆的指定槽位写入视图
    fn write_view(&mut self, heap: &Self::DescriptorHeap, index: u32, view: &ViewDesc<'_, Self>) -> Result<()>;

    /// 在采样器堆的指定槽位写入采样器
    fn write_sampler(&mut self, heap: &Self::DescriptorHeap, index: u32, desc: &SamplerDesc) -> Result<()>;

    /// 创建根签名
    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<Self::RootSignature>;

    /// 创建光线追踪管线
    fn create_raytracing_pipeline(&mut self, desc: &RaytracingPipelineDesc<'_, Self>) -> Result<Self::Pipeline>;

    /// 查询加速结构的预构建信息
    fn acceleration_structure_prebuild_info(&self, inputs: &AccelerationStructureInputs<'_>) -> Result<PrebuildInfo>;

    /// 开始录制一帧命令
    fn begin_frame(&mut self, ctx: &mut Self::Context) -> Result<()>;

    /// 提交录制的命令并等待 GPU 完成
    fn end_frame(&mut self, ctx: &mut Self::Context) -> Result<()>;

    /// 丢弃当前帧已录制的命令，不提交
    fn discard_frame(&mut self, ctx: &mut Self::Context) -> Result<()>;
}

/// 命令录制上下文
///
/// 录制本身不会失败；错误在 `Device::end_frame` 提交时报告。
pub trait RenderContext<D: Device + ?Sized> {
    fn build_raytracing_acceleration_structure(&mut self, desc: &BuildAccelerationStructureDesc<'_>);

    fn resource_barrier(&mut self, barrier: ResourceBarrier<'_, D>);

    fn set_pipeline_state(&mut self, pipeline: &D::Pipeline);

    fn set_compute_root_signature(&mut self, root_signature: &D::RootSignature);

    fn set_descriptor_heaps(&mut self, heaps: &[&D::DescriptorHeap]);

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc);

    fn copy_texture(&mut self, dst: &D::Texture, src: &D::Texture);
}
