//! DirectX 12 设备
//!
//! 初始化流程：
//!
//! 1. 启用调试层（Debug 模式）
//! 2. 创建 D3D12 设备（`ID3D12Device5`）
//! 3. 检查光线追踪支持（`D3D12_RAYTRACING_TIER_1_0`）
//! 4. 创建命令队列
//! 5. 创建同步对象（Fence）

use tracing::{debug, info, warn};
use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_12_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use super::accel::BuildInputs;
use super::context::Dx12Context;
use super::descriptor::{map_heap_type, Dx12DescriptorHeap};
use super::pipeline::{self, Dx12Pipeline, Dx12RootSignature};
use super::{map_format, map_resource_state, set_debug_name};
use crate::core::error::{GraphicsError, Result};
use crate::core::math::align_up;
use crate::gfx::accel::{AccelerationStructureInputs, PrebuildInfo};
use crate::gfx::descriptor::{DescriptorHeapDescriptor, DescriptorHeapType, SamplerDesc, ViewDesc};
use crate::gfx::device::{Device, GpuBuffer, GpuTexture};
use crate::gfx::pipeline::{RaytracingPipelineDesc, RootSignatureDesc};
use crate::gfx::resource::{BufferDesc, Format, GpuAddress, HeapType, ResourceState, TextureDesc};

/// DX12 缓冲区
pub struct Dx12Buffer {
    resource: ID3D12Resource,
    address: GpuAddress,
    size: u64,
    /// 上传堆缓冲区保持常驻映射
    mapped: Option<*mut u8>,
}

impl Dx12Buffer {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl GpuBuffer for Dx12Buffer {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// DX12 2D 纹理
pub struct Dx12Texture {
    resource: ID3D12Resource,
    width: u32,
    height: u32,
    format: Format,
}

impl Dx12Texture {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub(super) fn format_raw(&self) -> Format {
        self.format
    }
}

impl GpuTexture for Dx12Texture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> Format {
        self.format
    }
}

/// DirectX 12 设备
///
/// 封装设备、命令队列和 Fence。每帧在 `end_frame` 中提交命令列表并等待一次 GPU 完成。
pub struct Dx12Device {
    device: ID3D12Device5,
    command_queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    fence_value: u64,
    fence_event: HANDLE,
    /// 纹理初始数据上传用的命令上下文
    upload_context: Dx12Context,
}

impl Dx12Device {
    /// 创建新的 DirectX 12 设备
    ///
    /// # 返回值
    ///
    /// 设备不支持 DXR 时返回 `GraphicsError::DeviceCreation`
    pub fn new() -> Result<Self> {
        unsafe {
            #[cfg(debug_assertions)]
            {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 Debug Layer enabled");
                        }
                    }
                    Err(_) => warn!("Failed to enable DX12 Debug Layer"),
                }
            }

            let mut device: Option<ID3D12Device5> = None;
            D3D12CreateDevice(None, D3D_FEATURE_LEVEL_12_0, &mut device)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create D3D12 device: {:?}", e)))?;
            let device = device
                .ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))?;

            let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS5::default();
            device
                .CheckFeatureSupport(
                    D3D12_FEATURE_D3D12_OPTIONS5,
                    &mut options as *mut _ as *mut _,
                    std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS5>() as u32,
                )
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to query raytracing tier: {:?}", e)))?;

            if options.RaytracingTier.0 < D3D12_RAYTRACING_TIER_1_0.0 {
                return Err(GraphicsError::DeviceCreation("Device does not support DXR".to_string()).into());
            }

            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let command_queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&queue_desc)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create command queue: {:?}", e)))?;

            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create fence: {:?}", e)))?;
            let fence_event = CreateEventA(None, false, false, None)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create fence event: {:?}", e)))?;

            let upload_context = Dx12Context::new(&device)?;

            info!(raytracing_tier = options.RaytracingTier.0, "DX12 device initialization complete");

            Ok(Self {
                device,
                command_queue,
                fence,
                fence_value: 1,
                fence_event,
                upload_context,
            })
        }
    }

    /// 创建一个命令上下文
    pub fn create_context(&self) -> Result<Dx12Context> {
        Dx12Context::new(&self.device)
    }

    /// 提交命令列表并等待 GPU 完成
    fn execute_and_wait(&mut self, command_list: ID3D12CommandList) -> Result<()> {
        unsafe {
            self.command_queue.ExecuteCommandLists(&[Some(command_list)]);

            let fence_value = self.fence_value;
            self.command_queue
                .Signal(&self.fence, fence_value)
                .map_err(|e| GraphicsError::CommandExecution(format!("Failed to signal fence: {:?}", e)))?;
            self.fence_value += 1;

            if self.fence.GetCompletedValue() < fence_value {
                self.fence
                    .SetEventOnCompletion(fence_value, self.fence_event)
                    .map_err(|e| GraphicsError::CommandExecution(format!("Failed to set fence event: {:?}", e)))?;
                WaitForSingleObject(self.fence_event, INFINITE);
            }
        }
        Ok(())
    }

    fn create_committed_resource(
        &self,
        heap: HeapType,
        desc: &D3D12_RESOURCE_DESC,
        state: D3D12_RESOURCE_STATES,
        name: Option<&str>,
    ) -> Result<ID3D12Resource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: match heap {
                HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
                HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
            },
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device
                .CreateCommittedResource(&heap_props, D3D12_HEAP_FLAG_NONE, desc, state, None, &mut resource)
                .map_err(|e| GraphicsError::ResourceCreation(format!("CreateCommittedResource failed: {:?}", e)))?;
        }
        let resource = resource
            .ok_or_else(|| GraphicsError::ResourceCreation("CreateCommittedResource returned nothing".to_string()))?;

        if let (Some(name), Ok(object)) = (name, resource.cast::<ID3D12Object>()) {
            set_debug_name(&object, name);
        }
        Ok(resource)
    }

    fn buffer_resource_desc(size: u64, flags: D3D12_RESOURCE_FLAGS) -> D3D12_RESOURCE_DESC {
        D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: flags,
        }
    }

    /// 通过临时上传缓冲区把像素拷贝进纹理
    fn upload_texture(&mut self, texture: &ID3D12Resource, desc: &TextureDesc, data: &[u8]) -> Result<()> {
        let row_pitch = desc.row_pitch();
        let upload_pitch = align_up(row_pitch, D3D12_TEXTURE_DATA_PITCH_ALIGNMENT as u64);
        let upload_size = upload_pitch * desc.height as u64;

        let upload = self.create_committed_resource(
            HeapType::Upload,
            &Self::buffer_resource_desc(upload_size, D3D12_RESOURCE_FLAG_NONE),
            D3D12_RESOURCE_STATE_GENERIC_READ,
            None,
        )?;

        unsafe {
            let mut mapped = std::ptr::null_mut();
            upload
                .Map(0, None, Some(&mut mapped))
                .map_err(|e| GraphicsError::ResourceCreation(format!("Failed to map upload buffer: {:?}", e)))?;
            for y in 0..desc.height as u64 {
                let src = data.as_ptr().add((y * row_pitch) as usize);
                let dst = (mapped as *mut u8).add((y * upload_pitch) as usize);
                std::ptr::copy_nonoverlapping(src, dst, row_pitch as usize);
            }
            upload.Unmap(0, None);
        }

        let src = D3D12_TEXTURE_COPY_LOCATION {
            pResource: super::borrowed(&upload),
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: 0,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: map_format(desc.format),
                        Width: desc.width,
                        Height: desc.height,
                        Depth: 1,
                        RowPitch: upload_pitch as u32,
                    },
                },
            },
        };
        let dst = D3D12_TEXTURE_COPY_LOCATION {
            pResource: super::borrowed(texture),
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
        };

        self.upload_context.reset()?;
        let list = self.upload_context.command_list().clone();
        unsafe {
            list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
            let barrier = D3D12_RESOURCE_BARRIER {
                Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                Anonymous: D3D12_RESOURCE_BARRIER_0 {
                    Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                        pResource: super::borrowed(texture),
                        Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                        StateBefore: D3D12_RESOURCE_STATE_COPY_DEST,
                        StateAfter: map_resource_state(desc.initial_state),
                    }),
                },
            };
            list.ResourceBarrier(&[barrier]);
        }
        let command_list = self.upload_context.close()?;
        // 上传缓冲区要存活到 GPU 拷贝完成
        self.execute_and_wait(command_list)?;
        drop(upload);
        Ok(())
    }
}

impl Drop for Dx12Device {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.fence_event);
        }
    }
}

impl Device for Dx12Device {
    type Buffer = Dx12Buffer;
    type Texture = Dx12Texture;
    type DescriptorHeap = Dx12DescriptorHeap;
    type RootSignature = Dx12RootSignature;
    type Pipeline = Dx12Pipeline;
    type Context = Dx12Context;

    fn backend_name(&self) -> &str {
        "DirectX 12"
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<Dx12Buffer> {
        let flags = if desc.allow_unordered_access {
            D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS
        } else {
            D3D12_RESOURCE_FLAG_NONE
        };

        let resource = self.create_committed_resource(
            desc.heap,
            &Self::buffer_resource_desc(desc.size, flags),
            map_resource_state(desc.initial_state),
            desc.name.as_deref(),
        )?;

        let mapped = if desc.heap == HeapType::Upload {
            let mut ptr = std::ptr::null_mut();
            unsafe {
                resource
                    .Map(0, None, Some(&mut ptr))
                    .map_err(|e| GraphicsError::ResourceCreation(format!("Failed to map buffer: {:?}", e)))?;
            }
            Some(ptr as *mut u8)
        } else {
            None
        };

        let address = GpuAddress(unsafe { resource.GetGPUVirtualAddress() });
        Ok(Dx12Buffer {
            resource,
            address,
            size: desc.size,
            mapped,
        })
    }

    fn write_buffer(&mut self, buffer: &Dx12Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let mapped = buffer
            .mapped
            .ok_or_else(|| GraphicsError::ResourceCreation("buffer is not CPU-writable".to_string()))?;

        if offset + data.len() as u64 > buffer.size {
            return Err(GraphicsError::ResourceCreation(format!(
                "write of {} bytes at offset {} overflows buffer of {} bytes",
                data.len(),
                offset,
                buffer.size
            ))
            .into());
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc, initial_data: Option<&[u8]>) -> Result<Dx12Texture> {
        let mut flags = D3D12_RESOURCE_FLAG_NONE;
        if desc.allow_unordered_access {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }
        if desc.initial_state == ResourceState::RenderTarget {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
        }

        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: map_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };

        let state = if initial_data.is_some() {
            D3D12_RESOURCE_STATE_COPY_DEST
        } else {
            map_resource_state(desc.initial_state)
        };
        let resource = self.create_committed_resource(HeapType::Default, &resource_desc, state, desc.name.as_deref())?;

        if let Some(data) = initial_data {
            let expected = desc.row_pitch() * desc.height as u64;
            if data.len() as u64 != expected {
                return Err(GraphicsError::ResourceCreation(format!(
                    "texture data is {} bytes, expected {}",
                    data.len(),
                    expected
                ))
                .into());
            }
            self.upload_texture(&resource, desc, data)?;
        }

        Ok(Dx12Texture {
            resource,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        })
    }

    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDescriptor) -> Result<Dx12DescriptorHeap> {
        Dx12DescriptorHeap::new(&self.device, desc)
    }

    fn descriptor_increment_size(&self, heap_type: DescriptorHeapType) -> u32 {
        unsafe { self.device.GetDescriptorHandleIncrementSize(map_heap_type(heap_type)) }
    }

    fn write_view(&mut self, heap: &Dx12DescriptorHeap, index: u32, view: &ViewDesc<'_, Self>) -> Result<()> {
        match view {
            ViewDesc::Texture2DSrv(texture) => heap.write_texture_srv(&self.device, index, texture),
            ViewDesc::BufferSrv { buffer, num_elements, elements } => {
                heap.write_buffer_srv(&self.device, index, buffer, *num_elements, *elements)
            }
            ViewDesc::AccelerationStructureSrv(address) => {
                heap.write_acceleration_structure_srv(&self.device, index, *address)
            }
            ViewDesc::Texture2DUav(texture) => heap.write_texture_uav(&self.device, index, texture),
            ViewDesc::ConstantBuffer { address, size } => {
                heap.write_constant_buffer(&self.device, index, *address, *size)
            }
        }
    }

    fn write_sampler(&mut self, heap: &Dx12DescriptorHeap, index: u32, desc: &SamplerDesc) -> Result<()> {
        heap.write_sampler(&self.device, index, desc)
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<Dx12RootSignature> {
        pipeline::create_root_signature(&self.device, desc)
    }

    fn create_raytracing_pipeline(&mut self, desc: &RaytracingPipelineDesc<'_, Self>) -> Result<Dx12Pipeline> {
        pipeline::create_raytracing_pipeline(&self.device, desc)
    }

    fn acceleration_structure_prebuild_info(&self, inputs: &AccelerationStructureInputs<'_>) -> Result<PrebuildInfo> {
        let build_inputs = BuildInputs::new(inputs);
        let mut info = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO::default();
        unsafe {
            self.device
                .GetRaytracingAccelerationStructurePrebuildInfo(&build_inputs.desc, &mut info);
        }

        if info.ResultDataMaxSizeInBytes == 0 {
            return Err(GraphicsError::ResourceCreation("acceleration structure prebuild returned zero size".to_string()).into());
        }

        Ok(PrebuildInfo {
            result_data_max_size: info.ResultDataMaxSizeInBytes,
            scratch_data_size: info.ScratchDataSizeInBytes,
            update_scratch_data_size: info.UpdateScratchDataSizeInBytes,
        })
    }

    fn begin_frame(&mut self, ctx: &mut Dx12Context) -> Result<()> {
        ctx.reset()
    }

    fn end_frame(&mut self, ctx: &mut Dx12Context) -> Result<()> {
        let command_list = ctx.close()?;
        self.execute_and_wait(command_list)
    }

    fn discard_frame(&mut self, ctx: &mut Dx12Context) -> Result<()> {
        // 关闭但不执行，下一次 begin_frame 会重置分配器
        ctx.close().map(|_| ())
    }
}
