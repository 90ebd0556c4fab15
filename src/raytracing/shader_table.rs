//! 着色器表
//!
//! 一个上传堆缓冲区，按顺序存放三段记录，所有记录使用同一个步长：
//!
//! ```text
//! [光线生成] [未命中 x 2] [实例 0 的命中组 x 2] [实例 1 的命中组 x 2] ...
//! ```
//!
//! 每条记录 = 32 字节着色器标识符 + 局部根签名的描述符表句柄（每个 8 字节）。
//! 实例 `i` 的第 `k` 个命中组位于命中组区域的 `HitGroupKind::COUNT * i + k`，
//! 与 TLAS 中的 `InstanceContributionToHitGroupIndex` 对应。

use tracing::{debug, info};

use super::descriptor_heaps::DescriptorHeaps;
use super::layout::{category_count, entry_points, max_table_count, HitGroupKind, ShaderCategory, HIT_GROUPS};
use super::pso::Pso;
use crate::core::error::{RaytracingError, Result};
use crate::core::math::align_up;
use crate::gfx::accel::{DispatchRaysDesc, ShaderTableRegion};
use crate::gfx::descriptor::GpuDescriptorHandle;
use crate::gfx::device::{Device, GpuBuffer, RaytracingPipeline};
use crate::gfx::pipeline::{ShaderIdentifier, SHADER_IDENTIFIER_SIZE, SHADER_RECORD_ALIGNMENT, SHADER_TABLE_ALIGNMENT};
use crate::gfx::resource::BufferDesc;

/// GPU 描述符句柄在记录中的大小
const DESCRIPTOR_HANDLE_SIZE: u64 = 8;

/// 着色器表的尺寸计算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTableLayout {
    pub ray_gen_count: u64,
    pub miss_count: u64,
    /// 每个实例的命中组数量
    pub hit_variant_count: u64,
    pub num_instances: u64,
    /// 记录步长
    pub stride: u64,
}

impl ShaderTableLayout {
    pub fn new(num_instances: u32) -> Result<Self> {
        let record_size = SHADER_IDENTIFIER_SIZE as u64 + max_table_count() as u64 * DESCRIPTOR_HANDLE_SIZE;
        let stride = align_up(record_size, SHADER_RECORD_ALIGNMENT);

        // 每段的起始地址也必须满足表对齐
        if stride % SHADER_TABLE_ALIGNMENT != 0 {
            return Err(RaytracingError::LayoutMismatch(format!(
                "shader record stride {} is not a multiple of {}",
                stride, SHADER_TABLE_ALIGNMENT
            ))
            .into());
        }

        Ok(Self {
            ray_gen_count: category_count(ShaderCategory::RayGenerator) as u64,
            miss_count: category_count(ShaderCategory::Miss) as u64,
            hit_variant_count: HitGroupKind::COUNT as u64,
            num_instances: num_instances as u64,
            stride,
        })
    }

    pub fn ray_gen_offset(&self) -> u64 {
        0
    }

    pub fn ray_gen_size(&self) -> u64 {
        self.ray_gen_count * self.stride
    }

    pub fn miss_offset(&self) -> u64 {
        self.ray_gen_offset() + self.ray_gen_size()
    }

    pub fn miss_size(&self) -> u64 {
        self.miss_count * self.stride
    }

    pub fn hit_group_offset(&self) -> u64 {
        self.miss_offset() + self.miss_size()
    }

    pub fn hit_group_size(&self) -> u64 {
        self.hit_variant_count * self.num_instances * self.stride
    }

    /// 实例 `instance` 的 `kind` 命中组记录的偏移
    pub fn hit_record_offset(&self, instance: u64, kind: HitGroupKind) -> u64 {
        self.hit_group_offset() + (self.hit_variant_count * instance + kind.index() as u64) * self.stride
    }

    pub fn total_size(&self) -> u64 {
        self.ray_gen_size() + self.miss_size() + self.hit_group_size()
    }
}

/// 一条着色器记录
fn record(identifier: &ShaderIdentifier, tables: &[GpuDescriptorHandle], stride: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(stride as usize);
    bytes.extend_from_slice(identifier.as_bytes());
    for table in tables {
        bytes.extend_from_slice(&table.ptr.to_le_bytes());
    }
    bytes.resize(stride as usize, 0);
    bytes
}

pub struct ShaderTable<D: Device> {
    buffer: D::Buffer,
    layout: ShaderTableLayout,
}

impl<D: Device> ShaderTable<D> {
    /// 创建着色器表并写入全部记录
    pub fn init(device: &mut D, pso: &Pso<D>, heaps: &DescriptorHeaps<D>, num_instances: u32) -> Result<Self> {
        let layout = ShaderTableLayout::new(num_instances)?;
        if heaps.layout().num_instances() != num_instances {
            return Err(RaytracingError::LayoutMismatch(format!(
                "shader table for {} instances, descriptor heap holds {}",
                num_instances,
                heaps.layout().num_instances()
            ))
            .into());
        }

        let buffer = device.create_buffer(&BufferDesc::upload(layout.total_size()).with_name("Shader Table"))?;
        let pipeline = pso.pipeline();
        let mut table = Vec::with_capacity(layout.total_size() as usize);

        for entry in entry_points(ShaderCategory::RayGenerator) {
            let id = pipeline.shader_identifier(entry)?;
            table.extend(record(&id, &[heaps.ray_gen_table()], layout.stride));
        }

        for entry in entry_points(ShaderCategory::Miss) {
            let id = pipeline.shader_identifier(entry)?;
            table.extend(record(&id, &[], layout.stride));
        }

        let hit_ids = HIT_GROUPS
            .iter()
            .map(|g| pipeline.shader_identifier(g.export))
            .collect::<Result<Vec<_>>>()?;
        let sampler_table = heaps.sampler_table();
        for instance in 0..num_instances {
            let srv_table = heaps.instance_srv_table(instance);
            for id in &hit_ids {
                table.extend(record(id, &[srv_table, sampler_table], layout.stride));
            }
        }

        debug_assert_eq!(table.len() as u64, layout.total_size());
        device.write_buffer(&buffer, 0, &table)?;

        info!(
            size = layout.total_size(),
            stride = layout.stride,
            instances = num_instances,
            "Shader table written"
        );
        debug!(
            miss_offset = layout.miss_offset(),
            hit_group_offset = layout.hit_group_offset(),
            "Shader table regions"
        );

        Ok(Self { buffer, layout })
    }

    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub fn layout(&self) -> &ShaderTableLayout {
        &self.layout
    }

    pub fn size(&self) -> u64 {
        self.layout.total_size()
    }

    /// 派发参数
    pub fn dispatch_rays_desc(&self, width: u32, height: u32) -> DispatchRaysDesc {
        let base = self.buffer.gpu_address();
        let layout = &self.layout;
        DispatchRaysDesc {
            ray_generation: ShaderTableRegion {
                start: base.offset(layout.ray_gen_offset()),
                size: layout.ray_gen_size(),
                stride: layout.stride,
            },
            miss: ShaderTableRegion {
                start: base.offset(layout.miss_offset()),
                size: layout.miss_size(),
                stride: layout.stride,
            },
            hit_group: ShaderTableRegion {
                start: base.offset(layout.hit_group_offset()),
                size: layout.hit_group_size(),
                stride: layout.stride,
            },
            width,
            height,
            depth: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Matrix4;
    use crate::geometry::{MaterialData, MeshData, ModelData};
    use crate::gfx::headless::{HeadlessContext, HeadlessDevice};
    use crate::gfx::pipeline::ShaderLibrary;
    use crate::gfx::resource::TextureDesc;
    use crate::model::Model;
    use crate::raytracing::world::World;

    fn build(device: &mut HeadlessDevice, n: usize) -> (Pso<HeadlessDevice>, DescriptorHeaps<HeadlessDevice>, ShaderTable<HeadlessDevice>) {
        let data = ModelData {
            name: "Quads".to_string(),
            meshes: (0..n).map(|i| MeshData::quad(format!("Q{}", i), 1.0, 0)).collect(),
            materials: vec![MaterialData::default()],
        };
        let model = Model::upload(device, &data, Matrix4::identity()).unwrap();
        let mut world = World::new(4096, Matrix4::identity());
        world.regist_geometry(&model).unwrap();

        let mut ctx = HeadlessContext::new();
        device.begin_frame(&mut ctx).unwrap();
        world.commit_regist_geometry(device, &mut ctx).unwrap();
        device.end_frame(&mut ctx).unwrap();

        let output = device.create_texture(&TextureDesc::raytracing_output(4, 4), None).unwrap();
        let cb = device.create_buffer(&BufferDesc::constant(96)).unwrap();
        let heaps = DescriptorHeaps::init(device, world.instances(), world.tlas().unwrap(), &output, &cb).unwrap();
        let pso = Pso::init(device, &ShaderLibrary::empty_container()).unwrap();
        let table = ShaderTable::init(device, &pso, &heaps, n as u32).unwrap();
        (pso, heaps, table)
    }

    #[test]
    fn test_layout_sizes() {
        for n in 1..=8u32 {
            let layout = ShaderTableLayout::new(n).unwrap();
            assert_eq!(layout.stride, 64);
            assert_eq!(layout.total_size(), 64 * (1 + 2 + 2 * n as u64));
            assert_eq!(layout.miss_offset() % SHADER_TABLE_ALIGNMENT, 0);
            assert_eq!(layout.hit_group_offset() % SHADER_TABLE_ALIGNMENT, 0);
        }
    }

    #[test]
    fn test_two_instances_hit_region() {
        let mut device = HeadlessDevice::new();
        let (_, _, table) = build(&mut device, 2);

        let desc = table.dispatch_rays_desc(640, 480);
        assert_eq!(desc.hit_group.size, 2 * 2 * 64);
        assert_eq!(desc.hit_group.stride, 64);
        assert_eq!(desc.ray_generation.size, 64);
        assert_eq!(desc.miss.size, 128);
        assert_eq!(desc.ray_generation.start, table.buffer().gpu_address());
        assert_eq!(desc.miss.start.0 - desc.ray_generation.start.0, 64);
        assert_eq!(desc.hit_group.start.0 - desc.ray_generation.start.0, 192);
        assert_eq!((desc.width, desc.height, desc.depth), (640, 480, 1));
    }

    #[test]
    fn test_record_contents() {
        let mut device = HeadlessDevice::new();
        let (pso, heaps, table) = build(&mut device, 3);
        let bytes = device.buffer_contents(table.buffer()).unwrap().to_vec();
        let layout = *table.layout();
        let pipeline = pso.pipeline();
        let handle_at = |offset: u64| {
            let start = offset as usize;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[start..start + 8]);
            u64::from_le_bytes(raw)
        };

        let ray_gen = &bytes[0..32];
        assert_eq!(ray_gen, pipeline.shader_identifier("rayGen").unwrap().as_bytes());
        assert_eq!(handle_at(32), heaps.ray_gen_table().ptr);

        let shadow_miss = layout.miss_offset() as usize + 64;
        assert_eq!(
            &bytes[shadow_miss..shadow_miss + 32],
            pipeline.shader_identifier("shadowMiss").unwrap().as_bytes()
        );
        assert!(bytes[shadow_miss + 32..shadow_miss + 64].iter().all(|b| *b == 0));

        for i in 0..3u64 {
            for group in HIT_GROUPS {
                let offset = layout.hit_record_offset(i, group.kind);
                let start = offset as usize;
                assert_eq!(
                    &bytes[start..start + 32],
                    pipeline.shader_identifier(group.export).unwrap().as_bytes()
                );
                assert_eq!(handle_at(offset + 32), heaps.instance_srv_table(i as u32).ptr);
                assert_eq!(handle_at(offset + 40), heaps.sampler_table().ptr);
            }
        }
    }

    #[test]
    fn test_instance_count_mismatch() {
        let mut device = HeadlessDevice::new();
        let (pso, heaps, _) = build(&mut device, 2);
        assert!(ShaderTable::init(&mut device, &pso, &heaps, 3).is_err());
    }
}
