//! DirectX 12 命令录制上下文

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;

use super::accel::BuildInputs;
use super::device::{Dx12Device, Dx12Texture};
use super::{borrowed, map_resource_state, Dx12DescriptorHeap, Dx12Pipeline, Dx12RootSignature};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::accel::{BuildAccelerationStructureDesc, DispatchRaysDesc};
use crate::gfx::device::{RenderContext, ResourceBarrier};

/// DX12 命令上下文
///
/// 持有一个命令分配器和一个 `ID3D12GraphicsCommandList4`。
/// 每帧由 `Dx12Device::begin_frame` 重置，`Dx12Device::end_frame` 提交。
pub struct Dx12Context {
    allocator: ID3D12CommandAllocator,
    command_list: ID3D12GraphicsCommandList4,
}

impl Dx12Context {
    pub(super) fn new(device: &ID3D12Device5) -> Result<Self> {
        unsafe {
            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create command allocator: {:?}", e)))?;

            let command_list: ID3D12GraphicsCommandList4 = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create command list: {:?}", e)))?;

            // 初始创建时命令列表是打开状态，需要先关闭
            command_list
                .Close()
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to close command list: {:?}", e)))?;

            Ok(Self { allocator, command_list })
        }
    }

    pub(super) fn reset(&mut self) -> Result<()> {
        unsafe {
            self.allocator
                .Reset()
                .map_err(|e| GraphicsError::CommandExecution(format!("Failed to reset command allocator: {:?}", e)))?;
            self.command_list
                .Reset(&self.allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| GraphicsError::CommandExecution(format!("Failed to reset command list: {:?}", e)))?;
        }
        Ok(())
    }

    pub(super) fn command_list(&self) -> &ID3D12GraphicsCommandList4 {
        &self.command_list
    }

    pub(super) fn close(&mut self) -> Result<ID3D12CommandList> {
        unsafe {
            self.command_list
                .Close()
                .map_err(|e| GraphicsError::CommandExecution(format!("Failed to close command list: {:?}", e)))?;
        }
        self.command_list
            .cast()
            .map_err(|e| GraphicsError::CommandExecution(format!("{:?}", e)).into())
    }
}

impl RenderContext<Dx12Device> for Dx12Context {
    fn build_raytracing_acceleration_structure(&mut self, desc: &BuildAccelerationStructureDesc<'_>) {
        let inputs = BuildInputs::new(&desc.inputs);
        let dx_desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC {
            DestAccelerationStructureData: desc.dest.0,
            Inputs: inputs.desc,
            SourceAccelerationStructureData: desc.source.map_or(0, |s| s.0),
            ScratchAccelerationStructureData: desc.scratch.0,
        };

        unsafe { self.command_list.BuildRaytracingAccelerationStructure(&dx_desc, None) };
    }

    fn resource_barrier(&mut self, barrier: ResourceBarrier<'_, Dx12Device>) {
        let dx_barrier = match barrier {
            ResourceBarrier::Uav(buffer) => D3D12_RESOURCE_BARRIER {
                Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                Anonymous: D3D12_RESOURCE_BARRIER_0 {
                    UAV: std::mem::ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                        pResource: borrowed(buffer.resource()),
                    }),
                },
            },
            ResourceBarrier::Transition { texture, before, after } => D3D12_RESOURCE_BARRIER {
                Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                Anonymous: D3D12_RESOURCE_BARRIER_0 {
                    Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                        pResource: borrowed(texture.resource()),
                        Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                        StateBefore: map_resource_state(before),
                        StateAfter: map_resource_state(after),
                    }),
                },
            },
        };

        unsafe { self.command_list.ResourceBarrier(&[dx_barrier]) };
    }

    fn set_pipeline_state(&mut self, pipeline: &Dx12Pipeline) {
        unsafe { self.command_list.SetPipelineState1(pipeline.state_object()) };
    }

    fn set_compute_root_signature(&mut self, root_signature: &Dx12RootSignature) {
        unsafe { self.command_list.SetComputeRootSignature(root_signature.root_signature()) };
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&Dx12DescriptorHeap]) {
        let heaps: Vec<Option<ID3D12DescriptorHeap>> = heaps.iter().map(|h| Some(h.heap().clone())).collect();
        unsafe { self.command_list.SetDescriptorHeaps(&heaps) };
    }

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) {
        let dx_desc = D3D12_DISPATCH_RAYS_DESC {
            RayGenerationShaderRecord: D3D12_GPU_VIRTUAL_ADDRESS_RANGE {
                StartAddress: desc.ray_generation.start.0,
                SizeInBytes: desc.ray_generation.size,
            },
            MissShaderTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: desc.miss.start.0,
                SizeInBytes: desc.miss.size,
                StrideInBytes: desc.miss.stride,
            },
            HitGroupTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: desc.hit_group.start.0,
                SizeInBytes: desc.hit_group.size,
                StrideInBytes: desc.hit_group.stride,
            },
            CallableShaderTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE::default(),
            Width: desc.width,
            Height: desc.height,
            Depth: desc.depth,
        };

        unsafe { self.command_list.DispatchRays(&dx_desc) };
    }

    fn copy_texture(&mut self, dst: &Dx12Texture, src: &Dx12Texture) {
        unsafe { self.command_list.CopyResource(dst.resource(), src.resource()) };
    }
}
