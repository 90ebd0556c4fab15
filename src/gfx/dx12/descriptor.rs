//! DirectX 12 描述符堆实现
//!
//! 封装 `ID3D12DescriptorHeap`，并把后端无关的视图描述写入堆中的槽位。

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_UNKNOWN;

use super::device::{Dx12Buffer, Dx12Texture};
use super::{map_format, set_debug_name};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::descriptor::{
    AddressMode, BufferElements, DescriptorHeapDescriptor, DescriptorHeapType, Filter, GpuDescriptorHandle,
    SamplerDesc,
};
use crate::gfx::device::GpuDescriptorHeap;
use crate::gfx::resource::GpuAddress;

/// DX12 描述符堆
///
/// 封装 ID3D12DescriptorHeap 并提供类型安全的访问接口。
pub struct Dx12DescriptorHeap {
    /// 底层 DX12 描述符堆
    heap: ID3D12DescriptorHeap,
    /// 描述符堆类型
    heap_type: DescriptorHeapType,
    /// 描述符增量大小
    increment_size: u32,
    /// CPU 句柄基址
    cpu_start: usize,
    /// GPU 句柄基址
    gpu_start: u64,
    /// 描述符数量
    num_descriptors: u32,
}

pub(super) fn map_heap_type(heap_type: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match heap_type {
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
    }
}

impl Dx12DescriptorHeap {
    /// 创建新的 DX12 描述符堆
    ///
    /// # 参数
    ///
    /// * `device` - DX12 设备
    /// * `desc` - 描述符堆描述信息
    pub fn new(device: &ID3D12Device5, desc: &DescriptorHeapDescriptor) -> Result<Self> {
        let heap_type = map_heap_type(desc.heap_type);
        let flags = if desc.shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };

        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type,
            NumDescriptors: desc.num_descriptors,
            Flags: flags,
            NodeMask: 0,
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&heap_desc).map_err(|e| {
                GraphicsError::ResourceCreation(format!(
                    "Failed to create {} descriptor heap: {:?}",
                    desc.heap_type.name(),
                    e
                ))
            })?;

            if let Some(name) = &desc.name {
                if let Ok(object) = heap.cast::<ID3D12Object>() {
                    set_debug_name(&object, name);
                }
            }

            let increment_size = device.GetDescriptorHandleIncrementSize(heap_type);
            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_start = heap.GetGPUDescriptorHandleForHeapStart().ptr;

            Ok(Self {
                heap,
                heap_type: desc.heap_type,
                increment_size,
                cpu_start,
                gpu_start,
                num_descriptors: desc.num_descriptors,
            })
        }
    }

    /// 获取底层 DX12 描述符堆
    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    /// 获取描述符增量大小
    pub fn increment_size(&self) -> u32 {
        self.increment_size
    }

    /// 获取指定索引的 CPU 句柄
    fn cpu_handle(&self, index: u32) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        if index >= self.num_descriptors {
            return Err(GraphicsError::ResourceCreation(format!(
                "descriptor index {} out of range ({} descriptors)",
                index, self.num_descriptors
            ))
            .into());
        }

        Ok(D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start + index as usize * self.increment_size as usize,
        })
    }

    fn expect_type(&self, heap_type: DescriptorHeapType) -> Result<()> {
        if self.heap_type != heap_type {
            return Err(GraphicsError::ResourceCreation(format!(
                "expected a {} heap, found {}",
                heap_type.name(),
                self.heap_type.name()
            ))
            .into());
        }
        Ok(())
    }

    pub(super) fn write_texture_srv(&self, device: &ID3D12Device5, index: u32, texture: &Dx12Texture) -> Result<()> {
        self.expect_type(DescriptorHeapType::CbvSrvUav)?;
        let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: map_format(texture.format_raw()),
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };

        let handle = self.cpu_handle(index)?;
        unsafe { device.CreateShaderResourceView(texture.resource(), Some(&desc), handle) };
        Ok(())
    }

    pub(super) fn write_buffer_srv(
        &self,
        device: &ID3D12Device5,
        index: u32,
        buffer: &Dx12Buffer,
        num_elements: u32,
        elements: BufferElements,
    ) -> Result<()> {
        self.expect_type(DescriptorHeapType::CbvSrvUav)?;
        let (format, stride) = match elements {
            BufferElements::Structured { stride } => (DXGI_FORMAT_UNKNOWN, stride),
            BufferElements::Typed { format } => (map_format(format), 0),
        };

        let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_SRV {
                    FirstElement: 0,
                    NumElements: num_elements,
                    StructureByteStride: stride,
                    Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                },
            },
        };

        let handle = self.cpu_handle(index)?;
        unsafe { device.CreateShaderResourceView(buffer.resource(), Some(&desc), handle) };
        Ok(())
    }

    pub(super) fn write_acceleration_structure_srv(
        &self,
        device: &ID3D12Device5,
        index: u32,
        address: GpuAddress,
    ) -> Result<()> {
        self.expect_type(DescriptorHeapType::CbvSrvUav)?;
        let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_UNKNOWN,
            ViewDimension: D3D12_SRV_DIMENSION_RAYTRACING_ACCELERATION_STRUCTURE,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                RaytracingAccelerationStructure: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_SRV {
                    Location: address.0,
                },
            },
        };

        // 加速结构 SRV 不绑定资源，只使用地址
        let handle = self.cpu_handle(index)?;
        unsafe { device.CreateShaderResourceView(None::<&ID3D12Resource>, Some(&desc), handle) };
        Ok(())
    }

    pub(super) fn write_texture_uav(&self, device: &ID3D12Device5, index: u32, texture: &Dx12Texture) -> Result<()> {
        self.expect_type(DescriptorHeapType::CbvSrvUav)?;
        let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: map_format(texture.format_raw()),
            ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
            Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_UAV {
                    MipSlice: 0,
                    PlaneSlice: 0,
                },
            },
        };

        let handle = self.cpu_handle(index)?;
        unsafe { device.CreateUnorderedAccessView(texture.resource(), None::<&ID3D12Resource>, Some(&desc), handle) };
        Ok(())
    }

    pub(super) fn write_constant_buffer(
        &self,
        device: &ID3D12Device5,
        index: u32,
        address: GpuAddress,
        size: u32,
    ) -> Result<()> {
        self.expect_type(DescriptorHeapType::CbvSrvUav)?;
        let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: address.0,
            SizeInBytes: size,
        };

        let handle = self.cpu_handle(index)?;
        unsafe { device.CreateConstantBufferView(Some(&desc), handle) };
        Ok(())
    }

    pub(super) fn write_sampler(&self, device: &ID3D12Device5, index: u32, desc: &SamplerDesc) -> Result<()> {
        self.expect_type(DescriptorHeapType::Sampler)?;

        let filter = match desc.filter {
            Filter::Point => D3D12_FILTER_MIN_MAG_MIP_POINT,
            Filter::Linear => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
            Filter::Anisotropic => D3D12_FILTER_ANISOTROPIC,
        };
        let address = match desc.address_mode {
            AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        };

        let sampler = D3D12_SAMPLER_DESC {
            Filter: filter,
            AddressU: address,
            AddressV: address,
            AddressW: address,
            MipLODBias: 0.0,
            MaxAnisotropy: desc.max_anisotropy,
            ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
            BorderColor: [0.0; 4],
            MinLOD: desc.min_lod,
            MaxLOD: desc.max_lod,
        };

        let handle = self.cpu_handle(index)?;
        unsafe { device.CreateSampler(&sampler, handle) };
        Ok(())
    }
}

impl GpuDescriptorHeap for Dx12DescriptorHeap {
    fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    fn num_descriptors(&self) -> u32 {
        self.num_descriptors
    }

    fn gpu_start(&self) -> GpuDescriptorHandle {
        GpuDescriptorHandle::new(self.gpu_start, 0)
    }
}
