//! 图形后端模块
//!
//! 本模块封装了光线追踪所需的底层图形接口，包括：
//! - `device`：后端无关的 `Device` / `RenderContext` trait
//! - `headless`：无 GPU 的记录型后端（测试和非 Windows 平台）
//! - `dx12`：基于 DXR 的 DirectX 12 实现（仅 Windows）
//!
//! 上层的 `raytracing` 模块只依赖这里的 trait，不直接接触原生 API。

pub mod accel;
pub mod descriptor;
pub mod device;
#[cfg(target_os = "windows")]
pub mod dx12;
pub mod headless;
pub mod pipeline;
pub mod resource;

pub use device::{Device, GpuBuffer, GpuDescriptorHeap, GpuTexture, RaytracingPipeline, RenderContext, ResourceBarrier};
#[cfg(target_os = "windows")]
pub use dx12::Dx12Device;
pub use headless::HeadlessDevice;
