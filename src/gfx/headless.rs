//! 无 GPU 的记录型后端
//!
//! `HeadlessDevice` 为资源分配假的 GPU 地址，并在 CPU 侧保存上传堆缓冲区的内容
//! 和描述符堆的槽位；`HeadlessContext` 把所有命令记录下来。
//! 它按照 D3D12 的规则做基本校验（状态转换、堆类型、对齐），
//! 既可以在非 Windows 平台运行演示程序，也方便测试检查 TLAS 和着色器表的字节内容。

use std::collections::HashMap;

use tracing::{debug, trace};

use super::accel::{
    AccelerationStructureInputs, BuildAccelerationStructureDesc, DispatchRaysDesc, PrebuildInfo,
};
use super::descriptor::{
    BufferElements, DescriptorHeapDescriptor, DescriptorHeapType, GpuDescriptorHandle, SamplerDesc, ViewDesc,
};
use super::device::{
    Device, GpuBuffer, GpuDescriptorHeap, GpuTexture, RaytracingPipeline, RenderContext, ResourceBarrier,
};
use super::pipeline::{
    DescriptorRangeType, HitGroupDesc, RaytracingPipelineDesc, RootParameter, RootSignatureDesc,
    ShaderIdentifier, SHADER_IDENTIFIER_SIZE,
};
use super::resource::{
    BufferDesc, Format, GpuAddress, HeapType, ResourceState, TextureDesc, CONSTANT_BUFFER_ALIGNMENT,
};
use crate::core::error::{GraphicsError, Result};
use crate::core::math::align_up;

/// 假 GPU 地址空间的起点
const ADDRESS_BASE: u64 = 0x0001_0000_0000;
/// 假描述符堆句柄空间的起点
const DESCRIPTOR_HANDLE_BASE: u64 = 0x00D0_0000_0000;
/// 每个描述符堆占用的句柄空间
const DESCRIPTOR_HEAP_SPAN: u64 = 0x0100_0000;
/// 资源之间的地址对齐
const RESOURCE_PLACEMENT_ALIGNMENT: u64 = 0x1_0000;

const CBV_SRV_UAV_INCREMENT: u32 = 32;
const SAMPLER_INCREMENT: u32 = 32;

/// 记录型缓冲区
#[derive(Debug)]
pub struct HeadlessBuffer {
    id: usize,
    address: GpuAddress,
    size: u64,
    heap: HeapType,
    name: Option<String>,
}

impl HeadlessBuffer {
    pub fn heap(&self) -> HeapType {
        self.heap
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl GpuBuffer for HeadlessBuffer {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// 记录型纹理
#[derive(Debug)]
pub struct HeadlessTexture {
    id: usize,
    width: u32,
    height: u32,
    format: Format,
    allow_unordered_access: bool,
    initial_state: ResourceState,
}

impl HeadlessTexture {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl GpuTexture for HeadlessTexture {
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

/// 记录型描述符堆
#[derive(Debug)]
pub struct HeadlessDescriptorHeap {
    id: usize,
    heap_type: DescriptorHeapType,
    num_descriptors: u32,
    gpu_start: GpuDescriptorHandle,
}

impl HeadlessDescriptorHeap {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl GpuDescriptorHeap for HeadlessDescriptorHeap {
    fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    fn num_descriptors(&self) -> u32 {
        self.num_descriptors
    }

    fn gpu_start(&self) -> GpuDescriptorHandle {
        self.gpu_start
    }
}

/// 记录型根签名
#[derive(Debug)]
pub struct HeadlessRootSignature {
    id: usize,
    desc: RootSignatureDesc,
}

impl HeadlessRootSignature {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }
}

/// 记录型光线追踪管线
#[derive(Debug)]
pub struct HeadlessPipeline {
    id: usize,
    identifiable_exports: Vec<String>,
    hit_groups: Vec<HitGroupDesc>,
    /// (局部根签名 ID, 关联的导出名)
    associations: Vec<(usize, Vec<String>)>,
    global_root_signature: usize,
    max_payload_size: u32,
    max_attribute_size: u32,
    max_trace_recursion_depth: u32,
}

impl HeadlessPipeline {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn hit_groups(&self) -> &[HitGroupDesc] {
        &self.hit_groups
    }

    pub fn associations(&self) -> &[(usize, Vec<String>)] {
        &self.associations
    }

    /// 导出名关联的局部根签名 ID
    pub fn root_signature_for(&self, export: &str) -> Option<usize> {
        self.associations
            .iter()
            .find(|(_, exports)| exports.iter().any(|e| e == export))
            .map(|(id, _)| *id)
    }

    pub fn global_root_signature(&self) -> usize {
        self.global_root_signature
    }

    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    pub fn max_attribute_size(&self) -> u32 {
        self.max_attribute_size
    }

    pub fn max_trace_recursion_depth(&self) -> u32 {
        self.max_trace_recursion_depth
    }
}

impl RaytracingPipeline for HeadlessPipeline {
    fn shader_identifier(&self, export: &str) -> Result<ShaderIdentifier> {
        let index = self
            .identifiable_exports
            .iter()
            .position(|e| e == export)
            .ok_or_else(|| {
                GraphicsError::PipelineCreation(format!("no shader identifier for export '{}'", export))
            })?;

        let mut bytes = [0u8; SHADER_IDENTIFIER_SIZE];
        bytes[0..4].copy_from_slice(&(self.id as u32).to_le_bytes());
        bytes[4..8].copy_from_slice(&(index as u32 + 1).to_le_bytes());
        let name = export.as_bytes();
        let len = name.len().min(SHADER_IDENTIFIER_SIZE - 8);
        bytes[8..8 + len].copy_from_slice(&name[..len]);
        Ok(ShaderIdentifier(bytes))
    }
}

/// 描述符堆槽位中的内容
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorRecord {
    Texture2DSrv { texture: usize },
    BufferSrv {
        address: GpuAddress,
        num_elements: u32,
        elements: BufferElements,
    },
    AccelerationStructureSrv(GpuAddress),
    Texture2DUav { texture: usize },
    ConstantBuffer { address: GpuAddress, size: u32 },
    Sampler(SamplerDesc),
}

/// 录制的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BuildAccelerationStructure {
        top_level: bool,
        dest: GpuAddress,
        source: Option<GpuAddress>,
        scratch: GpuAddress,
        /// BLAS 的几何体数量或 TLAS 的实例数量
        element_count: u32,
        instance_descs: Option<GpuAddress>,
        perform_update: bool,
    },
    UavBarrier { buffer: GpuAddress },
    Transition {
        texture: usize,
        before: ResourceState,
        after: ResourceState,
    },
    SetPipelineState { pipeline: usize },
    SetComputeRootSignature { root_signature: usize },
    SetDescriptorHeaps { heaps: Vec<usize> },
    DispatchRays(DispatchRaysDesc),
    CopyTexture { dst: usize, src: usize },
}

/// 记录型命令上下文
#[derive(Debug, Default)]
pub struct HeadlessContext {
    recording: bool,
    pending: Vec<Command>,
    submitted: Vec<Vec<Command>>,
    texture_states: HashMap<usize, ResourceState>,
    /// 帧开始时的纹理状态，丢弃帧时恢复
    frame_start_states: HashMap<usize, ResourceState>,
    validation_errors: Vec<String>,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前帧已录制但尚未提交的命令
    pub fn pending_commands(&self) -> &[Command] {
        &self.pending
    }

    /// 已提交的帧（每帧一个命令列表）
    pub fn submitted_frames(&self) -> &[Vec<Command>] {
        &self.submitted
    }

    /// 纹理在录制结束后的状态
    pub fn texture_state(&self, texture: &HeadlessTexture) -> ResourceState {
        self.texture_states
            .get(&texture.id)
            .copied()
            .unwrap_or(texture.initial_state)
    }

    fn record(&mut self, command: Command) {
        if !self.recording {
            self.validation_errors
                .push(format!("{:?} recorded outside of a frame", command));
        }
        trace!(?command, "Recorded command");
        self.pending.push(command);
    }

    fn expect_state(&mut self, texture: &HeadlessTexture, expected: ResourceState, usage: &str) {
        let current = self.texture_state(texture);
        if current != expected {
            self.validation_errors.push(format!(
                "texture {} used as {} in state {:?}, expected {:?}",
                texture.id, usage, current, expected
            ));
        }
    }
}

impl RenderContext<HeadlessDevice> for HeadlessContext {
    fn build_raytracing_acceleration_structure(&mut self, desc: &BuildAccelerationStructureDesc<'_>) {
        if desc.dest.is_null() || desc.scratch.is_null() {
            self.validation_errors
                .push("acceleration structure build with null destination or scratch".to_string());
        }

        let flags = desc.inputs.flags();
        if flags.perform_update && desc.source.is_none() {
            self.validation_errors
                .push("acceleration structure update without a source".to_string());
        }

        let (top_level, element_count, instance_descs) = match desc.inputs {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => (false, geometries.len() as u32, None),
            AccelerationStructureInputs::TopLevel { instance_descs, num_instances, .. } => {
                if instance_descs.is_null() {
                    self.validation_errors
                        .push("top level build without instance descriptors".to_string());
                }
                (true, num_instances, Some(instance_descs))
            }
        };

        self.record(Command::BuildAccelerationStructure {
            top_level,
            dest: desc.dest,
            source: desc.source,
            scratch: desc.scratch,
            element_count,
            instance_descs,
            perform_update: flags.perform_update,
        });
    }

    fn resource_barrier(&mut self, barrier: ResourceBarrier<'_, HeadlessDevice>) {
        match barrier {
            ResourceBarrier::Uav(buffer) => {
                self.record(Command::UavBarrier { buffer: buffer.address });
            }
            ResourceBarrier::Transition { texture, before, after } => {
                self.expect_state(texture, before, "transition source");
                self.texture_states.insert(texture.id, after);
                self.record(Command::Transition {
                    texture: texture.id,
                    before,
                    after,
                });
            }
        }
    }

    fn set_pipeline_state(&mut self, pipeline: &HeadlessPipeline) {
        self.record(Command::SetPipelineState { pipeline: pipeline.id });
    }

    fn set_compute_root_signature(&mut self, root_signature: &HeadlessRootSignature) {
        if root_signature.desc.local {
            self.validation_errors
                .push("local root signature bound as the global root signature".to_string());
        }
        self.record(Command::SetComputeRootSignature {
            root_signature: root_signature.id,
        });
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&HeadlessDescriptorHeap]) {
        let cbv_srv_uav = heaps.iter().filter(|h| h.heap_type == DescriptorHeapType::CbvSrvUav).count();
        let samplers = heaps.iter().filter(|h| h.heap_type == DescriptorHeapType::Sampler).count();
        if cbv_srv_uav > 1 || samplers > 1 {
            self.validation_errors
                .push("at most one descriptor heap of each type can be bound".to_string());
        }
        self.record(Command::SetDescriptorHeaps {
            heaps: heaps.iter().map(|h| h.id).collect(),
        });
    }

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) {
        self.record(Command::DispatchRays(*desc));
    }

    fn copy_texture(&mut self, dst: &HeadlessTexture, src: &HeadlessTexture) {
        self.expect_state(dst, ResourceState::CopyDest, "copy destination");
        self.expect_state(src, ResourceState::CopySource, "copy source");
        if dst.width != src.width || dst.height != src.height || dst.format != src.format {
            self.validation_errors
                .push(format!("copy between mismatched textures {} and {}", src.id, dst.id));
        }
        self.record(Command::CopyTexture { dst: dst.id, src: src.id });
    }
}

/// 记录型设备
#[derive(Debug)]
pub struct HeadlessDevice {
    next_id: usize,
    next_address: u64,
    buffer_contents: HashMap<usize, Vec<u8>>,
    heaps: HashMap<usize, Vec<Option<DescriptorRecord>>>,
    frames_submitted: u64,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        debug!("Creating headless device");
        Self {
            next_id: 1,
            next_address: ADDRESS_BASE,
            buffer_contents: HashMap::new(),
            heaps: HashMap::new(),
            frames_submitted: 0,
        }
    }

    /// 上传堆缓冲区的内容（其他堆返回 None）
    pub fn buffer_contents(&self, buffer: &HeadlessBuffer) -> Option<&[u8]> {
        self.buffer_contents.get(&buffer.id).map(|v| v.as_slice())
    }

    /// 描述符堆槽位中的内容
    pub fn descriptor(&self, heap: &HeadlessDescriptorHeap, index: u32) -> Option<&DescriptorRecord> {
        self.heaps
            .get(&heap.id)
            .and_then(|slots| slots.get(index as usize))
            .and_then(|slot| slot.as_ref())
    }

    /// 已提交的帧数
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    fn allocate_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn allocate_address(&mut self, size: u64) -> GpuAddress {
        let address = GpuAddress(self.next_address);
        self.next_address += align_up(size.max(1), RESOURCE_PLACEMENT_ALIGNMENT);
        address
    }

    fn slot_mut(
        &mut self,
        heap: &HeadlessDescriptorHeap,
        index: u32,
    ) -> Result<&mut Option<DescriptorRecord>> {
        self.heaps
            .get_mut(&heap.id)
            .and_then(|slots| slots.get_mut(index as usize))
            .ok_or_else(|| {
                GraphicsError::ResourceCreation(format!(
                    "descriptor index {} out of range for heap {} ({} descriptors)",
                    index, heap.id, heap.num_descriptors
                ))
                .into()
            })
    }
}

impl Device for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type DescriptorHeap = HeadlessDescriptorHeap;
    type RootSignature = HeadlessRootSignature;
    type Pipeline = HeadlessPipeline;
    type Context = HeadlessContext;

    fn backend_name(&self) -> &str {
        "Headless"
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<HeadlessBuffer> {
        if desc.size == 0 {
            return Err(GraphicsError::ResourceCreation("zero-sized buffer".to_string()).into());
        }

        let id = self.allocate_id();
        let address = self.allocate_address(desc.size);
        if desc.heap == HeapType::Upload {
            self.buffer_contents.insert(id, vec![0u8; desc.size as usize]);
        }

        trace!(id, size = desc.size, heap = ?desc.heap, name = ?desc.name, "Created buffer");
        Ok(HeadlessBuffer {
            id,
            address,
            size: desc.size,
            heap: desc.heap,
            name: desc.name.clone(),
        })
    }

    fn write_buffer(&mut self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let contents = self.buffer_contents.get_mut(&buffer.id).ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("buffer {} is not CPU-writable", buffer.id))
        })?;

        let end = offset as usize + data.len();
        if end > contents.len() {
            return Err(GraphicsError::ResourceCreation(format!(
                "write of {} bytes at offset {} overflows buffer of {} bytes",
                data.len(),
                offset,
                contents.len()
            ))
            .into());
        }

        contents[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc, initial_data: Option<&[u8]>) -> Result<HeadlessTexture> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GraphicsError::ResourceCreation("zero-sized texture".to_string()).into());
        }

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
        }

        let id = self.allocate_id();
        trace!(id, width = desc.width, height = desc.height, format = ?desc.format, "Created texture");

        Ok(HeadlessTexture {
            id,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            allow_unordered_access: desc.allow_unordered_access,
            initial_state: desc.initial_state,
        })
    }

    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDescriptor) -> Result<HeadlessDescriptorHeap> {
        if desc.num_descriptors == 0 {
            return Err(GraphicsError::ResourceCreation("empty descriptor heap".to_string()).into());
        }

        let id = self.allocate_id();
        self.heaps.insert(id, vec![None; desc.num_descriptors as usize]);
        let gpu_start = GpuDescriptorHandle::new(DESCRIPTOR_HANDLE_BASE + id as u64 * DESCRIPTOR_HEAP_SPAN, 0);

        debug!(
            id,
            heap_type = desc.heap_type.name(),
            num_descriptors = desc.num_descriptors,
            "Created descriptor heap"
        );

        Ok(HeadlessDescriptorHeap {
            id,
            heap_type: desc.heap_type,
            num_descriptors: desc.num_descriptors,
            gpu_start,
        })
    }

    fn descriptor_increment_size(&self, heap_type: DescriptorHeapType) -> u32 {
        match heap_type {
            DescriptorHeapType::CbvSrvUav => CBV_SRV_UAV_INCREMENT,
            DescriptorHeapType::Sampler => SAMPLER_INCREMENT,
        }
    }

    fn write_view(&mut self, heap: &HeadlessDescriptorHeap, index: u32, view: &ViewDesc<'_, Self>) -> Result<()> {
        if heap.heap_type != DescriptorHeapType::CbvSrvUav {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} written into a {} heap",
                view.kind_name(),
                heap.heap_type.name()
            ))
            .into());
        }

        let record = match view {
            ViewDesc::Texture2DSrv(texture) => DescriptorRecord::Texture2DSrv { texture: texture.id },
            ViewDesc::BufferSrv { buffer, num_elements, elements } => {
                let element_size = match elements {
                    BufferElements::Structured { stride } => *stride as u64,
                    BufferElements::Typed { format } => format.size_in_bytes() as u64,
                };
                if element_size == 0 || element_size * *num_elements as u64 > buffer.size {
                    return Err(GraphicsError::ResourceCreation(format!(
                        "buffer view of {} elements does not fit buffer {}",
                        num_elements, buffer.id
                    ))
                    .into());
                }
                DescriptorRecord::BufferSrv {
                    address: buffer.address,
                    num_elements: *num_elements,
                    elements: *elements,
                }
            }
            ViewDesc::AccelerationStructureSrv(address) => DescriptorRecord::AccelerationStructureSrv(*address),
            ViewDesc::Texture2DUav(texture) => {
                if !texture.allow_unordered_access {
                    return Err(GraphicsError::ResourceCreation(format!(
                        "texture {} does not allow unordered access",
                        texture.id
                    ))
                    .into());
                }
                DescriptorRecord::Texture2DUav { texture: texture.id }
            }
            ViewDesc::ConstantBuffer { address, size } => {
                if *size as u64 % CONSTANT_BUFFER_ALIGNMENT != 0 || address.0 % CONSTANT_BUFFER_ALIGNMENT != 0 {
                    return Err(GraphicsError::ResourceCreation(format!(
                        "constant buffer view of {} bytes is not 256-byte aligned",
                        size
                    ))
                    .into());
                }
                DescriptorRecord::ConstantBuffer {
                    address: *address,
                    size: *size,
                }
            }
        };

        *self.slot_mut(heap, index)? = Some(record);
        Ok(())
    }

    fn write_sampler(&mut self, heap: &HeadlessDescriptorHeap, index: u32, desc: &SamplerDesc) -> Result<()> {
        if heap.heap_type != DescriptorHeapType::Sampler {
            return Err(GraphicsError::ResourceCreation("sampler written into a non-sampler heap".to_string()).into());
        }

        *self.slot_mut(heap, index)? = Some(DescriptorRecord::Sampler(*desc));
        Ok(())
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<HeadlessRootSignature> {
        for parameter in &desc.parameters {
            let RootParameter::DescriptorTable(ranges) = parameter;
            let samplers = ranges.iter().filter(|r| r.range_type == DescriptorRangeType::Sampler).count();
            if samplers != 0 && samplers != ranges.len() {
                return Err(GraphicsError::PipelineCreation(
                    "descriptor table mixes samplers with CBV/SRV/UAV ranges".to_string(),
                )
                .into());
            }
        }

        let id = self.allocate_id();
        debug!(id, local = desc.local, tables = desc.table_count(), name = ?desc.name, "Created root signature");
        Ok(HeadlessRootSignature { id, desc: desc.clone() })
    }

    fn create_raytracing_pipeline(&mut self, desc: &RaytracingPipelineDesc<'_, Self>) -> Result<HeadlessPipeline> {
        desc.validate()?;

        if desc.global_root_signature.desc.local {
            return Err(GraphicsError::PipelineCreation(
                "global root signature was created as a local root signature".to_string(),
            )
            .into());
        }

        let associations = desc
            .local_root_signatures
            .iter()
            .map(|a| (a.root_signature.id, a.exports.clone()))
            .collect();

        let id = self.allocate_id();
        debug!(
            id,
            exports = desc.exports.len(),
            hit_groups = desc.hit_groups.len(),
            "Created raytracing pipeline"
        );

        Ok(HeadlessPipeline {
            id,
            identifiable_exports: desc.identifiable_exports(),
            hit_groups: desc.hit_groups.clone(),
            associations,
            global_root_signature: desc.global_root_signature.id,
            max_payload_size: desc.max_payload_size,
            max_attribute_size: desc.max_attribute_size,
            max_trace_recursion_depth: desc.max_trace_recursion_depth,
        })
    }

    fn acceleration_structure_prebuild_info(&self, inputs: &AccelerationStructureInputs<'_>) -> Result<PrebuildInfo> {
        let (result, scratch) = match inputs {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => {
                let mut triangles = 0u64;
                for geometry in geometries.iter() {
                    if !geometry.index_format.is_index_format() || geometry.index_count % 3 != 0 {
                        return Err(GraphicsError::ResourceCreation(format!(
                            "invalid triangle geometry: {} indices of {:?}",
                            geometry.index_count, geometry.index_format
                        ))
                        .into());
                    }
                    triangles += geometry.triangle_count() as u64;
                }
                (256 + 64 * triangles, 128 + 32 * triangles)
            }
            AccelerationStructureInputs::TopLevel { num_instances, .. } => {
                let n = *num_instances as u64;
                (256 + 128 * n, 128 + 64 * n)
            }
        };

        let scratch = align_up(scratch, 256);
        Ok(PrebuildInfo {
            result_data_max_size: align_up(result, 256),
            scratch_data_size: scratch,
            update_scratch_data_size: if inputs.flags().allow_update { scratch } else { 0 },
        })
    }

    fn begin_frame(&mut self, ctx: &mut HeadlessContext) -> Result<()> {
        if ctx.recording {
            return Err(GraphicsError::CommandExecution("begin_frame called while already recording".to_string()).into());
        }
        ctx.recording = true;
        ctx.frame_start_states = ctx.texture_states.clone();
        Ok(())
    }

    fn end_frame(&mut self, ctx: &mut HeadlessContext) -> Result<()> {
        if !ctx.recording {
            return Err(GraphicsError::CommandExecution("end_frame called without begin_frame".to_string()).into());
        }
        ctx.recording = false;

        if !ctx.validation_errors.is_empty() {
            let errors = std::mem::take(&mut ctx.validation_errors);
            ctx.pending.clear();
            return Err(GraphicsError::CommandExecution(errors.join("; ")).into());
        }

        let commands = std::mem::take(&mut ctx.pending);
        debug!(frame = self.frames_submitted, commands = commands.len(), "Submitted frame");
        ctx.submitted.push(commands);
        self.frames_submitted += 1;
        Ok(())
    }

    fn discard_frame(&mut self, ctx: &mut HeadlessContext) -> Result<()> {
        if !ctx.recording {
            return Err(GraphicsError::CommandExecution("discard_frame called without begin_frame".to_string()).into());
        }
        ctx.recording = false;
        ctx.validation_errors.clear();
        ctx.texture_states = std::mem::take(&mut ctx.frame_start_states);
        debug!(commands = ctx.pending.len(), "Discarded frame");
        ctx.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_buffer_roundtrip() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer(&BufferDesc::upload(16)).unwrap();
        device.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();

        let contents = device.buffer_contents(&buffer).unwrap();
        assert_eq!(&contents[4..8], &[1, 2, 3, 4]);
        assert!(device.write_buffer(&buffer, 14, &[0; 4]).is_err());
    }

    #[test]
    fn test_default_heap_buffer_is_not_writable() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer(&BufferDesc::scratch(1024)).unwrap();
        assert!(device.write_buffer(&buffer, 0, &[0]).is_err());
        assert!(device.buffer_contents(&buffer).is_none());
    }

    #[test]
    fn test_addresses_are_distinct() {
        let mut device = HeadlessDevice::new();
        let a = device.create_buffer(&BufferDesc::upload(64)).unwrap();
        let b = device.create_buffer(&BufferDesc::upload(64)).unwrap();
        assert_ne!(a.gpu_address(), b.gpu_address());
        assert!(b.gpu_address().0 >= a.gpu_address().0 + a.size());
    }

    #[test]
    fn test_sampler_in_view_heap_rejected() {
        let mut device = HeadlessDevice::new();
        let heap = device
            .create_descriptor_heap(&DescriptorHeapDescriptor::cbv_srv_uav(2))
            .unwrap();
        assert!(device.write_sampler(&heap, 0, &SamplerDesc::linear_wrap()).is_err());
        assert!(device
            .write_view(&heap, 2, &ViewDesc::AccelerationStructureSrv(GpuAddress(0x100)))
            .is_err());
        device
            .write_view(&heap, 1, &ViewDesc::AccelerationStructureSrv(GpuAddress(0x100)))
            .unwrap();
        assert_eq!(
            device.descriptor(&heap, 1),
            Some(&DescriptorRecord::AccelerationStructureSrv(GpuAddress(0x100)))
        );
    }

    #[test]
    fn test_invalid_transition_fails_submission() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let texture = device
            .create_texture(&TextureDesc::raytracing_output(4, 4), None)
            .unwrap();

        device.begin_frame(&mut ctx).unwrap();
        ctx.resource_barrier(ResourceBarrier::Transition {
            texture: &texture,
            before: ResourceState::RenderTarget,
            after: ResourceState::UnorderedAccess,
        });
        assert!(device.end_frame(&mut ctx).is_err());
        assert_eq!(device.frames_submitted(), 0);
    }

    #[test]
    fn test_frame_submission() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let texture = device
            .create_texture(&TextureDesc::raytracing_output(4, 4), None)
            .unwrap();

        assert!(device.end_frame(&mut ctx).is_err());

        device.begin_frame(&mut ctx).unwrap();
        ctx.resource_barrier(ResourceBarrier::Transition {
            texture: &texture,
            before: ResourceState::CopySource,
            after: ResourceState::UnorderedAccess,
        });
        device.end_frame(&mut ctx).unwrap();

        assert_eq!(device.frames_submitted(), 1);
        assert_eq!(ctx.submitted_frames().len(), 1);
        assert_eq!(ctx.texture_state(&texture), ResourceState::UnorderedAccess);
    }

    #[test]
    fn test_discarded_frame_is_not_submitted() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let texture = device
            .create_texture(&TextureDesc::raytracing_output(4, 4), None)
            .unwrap();

        assert!(device.discard_frame(&mut ctx).is_err());

        device.begin_frame(&mut ctx).unwrap();
        ctx.resource_barrier(ResourceBarrier::Transition {
            texture: &texture,
            before: ResourceState::CopySource,
            after: ResourceState::UnorderedAccess,
        });
        device.discard_frame(&mut ctx).unwrap();

        assert!(ctx.pending_commands().is_empty());
        assert!(ctx.submitted_frames().is_empty());
        assert_eq!(device.frames_submitted(), 0);
        assert_eq!(ctx.texture_state(&texture), ResourceState::CopySource);

        // 丢弃后可以开始新的一帧
        device.begin_frame(&mut ctx).unwrap();
        device.end_frame(&mut ctx).unwrap();
        assert_eq!(device.frames_submitted(), 1);
    }

    #[test]
    fn test_mixed_sampler_table_rejected() {
        use crate::gfx::pipeline::DescriptorRange;

        let mut device = HeadlessDevice::new();
        let desc = RootSignatureDesc::local(vec![RootParameter::DescriptorTable(vec![
            DescriptorRange::new(DescriptorRangeType::Srv, 1, 0, 0),
            DescriptorRange::new(DescriptorRangeType::Sampler, 1, 0, 1),
        ])]);
        assert!(device.create_root_signature(&desc).is_err());
    }
}
