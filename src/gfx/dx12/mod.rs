//! DirectX 12 图形 API 实现模块
//!
//! 本模块包含了所有 DirectX 12 相关的代码，包括：
//! - Device: D3D12 设备、命令队列、同步对象和资源创建
//! - Context: 命令分配器与 `ID3D12GraphicsCommandList4` 命令录制
//! - Descriptor: 着色器可见的描述符堆
//! - Pipeline: 根签名与光线追踪状态对象
//! - Accel: 加速结构构建输入的转换

mod accel;
mod context;
mod descriptor;
mod device;
mod pipeline;

use std::mem::ManuallyDrop;

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::gfx::resource::{Format, ResourceState};

pub use context::Dx12Context;
pub use descriptor::Dx12DescriptorHeap;
pub use device::{Dx12Buffer, Dx12Device, Dx12Texture};
pub use pipeline::{Dx12Pipeline, Dx12RootSignature};

fn map_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::Rgb32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::R16Uint => DXGI_FORMAT_R16_UINT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
    }
}

fn map_resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::RaytracingAccelerationStructure => D3D12_RESOURCE_STATE_RAYTRACING_ACCELERATION_STRUCTURE,
        ResourceState::NonPixelShaderResource => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

/// 不增加引用计数地把 COM 接口放进描述结构体
///
/// 返回值不能比 `resource` 活得更久。
fn borrowed<T: Interface>(resource: &T) -> ManuallyDrop<Option<T>> {
    unsafe { std::mem::transmute_copy(resource) }
}

/// 设置调试名称
fn set_debug_name(object: &ID3D12Object, name: &str) {
    let wide_name = windows::core::HSTRING::from(name);
    unsafe {
        let _ = object.SetName(&wide_name);
    }
}
