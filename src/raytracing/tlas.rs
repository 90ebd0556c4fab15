//! 顶层加速结构（TLAS）
//!
//! 每个实例对应一个实例描述符：
//!
//! - `InstanceID = i`
//! - `InstanceContributionToHitGroupIndex = HitGroupKind::COUNT * i + PbrCameraRay`，
//!   这样每个实例的命中组记录在着色器表中是连续的
//! - 变换 = 实例的世界矩阵 × 坐标轴修正
//!
//! TLAS 以 `ALLOW_UPDATE` 构建，修改实例变换后可以原地更新。

use tracing::{debug, info};

use super::blas::{AccelerationStructureBuffers, BlasBuffer};
use super::instance::Instance;
use super::layout::HitGroupKind;
use crate::core::error::{RaytracingError, Result};
use crate::core::math::{to_row_major_3x4, Matrix4};
use crate::gfx::accel::{
    AccelerationStructureInputs, BuildAccelerationStructureDesc, BuildFlags, RaytracingInstanceDesc,
};
use crate::gfx::descriptor::ViewDesc;
use crate::gfx::device::{Device, GpuBuffer, RenderContext, ResourceBarrier};
use crate::gfx::resource::{BufferDesc, GpuAddress};

/// 对所有光线类型可见
const INSTANCE_MASK_ALL: u8 = 0xFF;

const INSTANCE_FLAG_NONE: u8 = 0;

fn build_flags(perform_update: bool) -> BuildFlags {
    BuildFlags {
        allow_update: true,
        prefer_fast_trace: true,
        perform_update,
    }
}

/// 计算实例描述符
///
/// # 参数
///
/// * `instances` - 按注册顺序排列的实例
/// * `blas_addresses` - 与实例一一对应的 BLAS 地址
/// * `axis_correction` - 追加在世界矩阵之后的坐标轴修正
pub fn instance_descs<D: Device>(
    instances: &[Instance<D>],
    blas_addresses: &[GpuAddress],
    axis_correction: &Matrix4,
) -> Result<Vec<RaytracingInstanceDesc>> {
    if instances.len() != blas_addresses.len() {
        return Err(RaytracingError::LayoutMismatch(format!(
            "{} instances but {} BLAS",
            instances.len(),
            blas_addresses.len()
        ))
        .into());
    }

    Ok(instances
        .iter()
        .zip(blas_addresses)
        .enumerate()
        .map(|(i, (instance, blas))| {
            let transform = instance.world_matrix() * axis_correction;
            RaytracingInstanceDesc::new(
                to_row_major_3x4(&transform),
                i as u32,
                INSTANCE_MASK_ALL,
                (HitGroupKind::COUNT * i + HitGroupKind::PbrCameraRay.index()) as u32,
                INSTANCE_FLAG_NONE,
                *blas,
            )
        })
        .collect())
}

pub struct TlasBuffer<D: Device> {
    buffers: AccelerationStructureBuffers<D>,
    num_instances: u32,
}

impl<D: Device> TlasBuffer<D> {
    /// 写入实例描述符并录制 TLAS 构建命令
    pub fn init(
        device: &mut D,
        rc: &mut D::Context,
        instances: &[Instance<D>],
        blas: &BlasBuffer<D>,
        axis_correction: &Matrix4,
    ) -> Result<Self> {
        let num_instances = instances.len() as u32;
        let descs = instance_descs(instances, &blas_addresses(blas), axis_correction)?;

        let desc_bytes: &[u8] = bytemuck::cast_slice(&descs);
        let instance_desc = device.create_buffer(
            &BufferDesc::upload(desc_bytes.len() as u64).with_name("TLAS Instance Descs"),
        )?;
        device.write_buffer(&instance_desc, 0, desc_bytes)?;

        let inputs = AccelerationStructureInputs::TopLevel {
            instance_descs: instance_desc.gpu_address(),
            num_instances,
            flags: build_flags(false),
        };
        let info = device.acceleration_structure_prebuild_info(&inputs)?;
        let mut buffers = AccelerationStructureBuffers::allocate(device, &info, "TLAS")?;

        rc.build_raytracing_acceleration_structure(&BuildAccelerationStructureDesc {
            inputs,
            dest: buffers.result.gpu_address(),
            source: None,
            scratch: buffers.scratch.gpu_address(),
        });
        rc.resource_barrier(ResourceBarrier::Uav(&buffers.result));

        info!(
            instances = num_instances,
            result_size = info.result_data_max_size,
            "Recorded TLAS build"
        );

        buffers.instance_desc = Some(instance_desc);
        Ok(Self { buffers, num_instances })
    }

    /// 重写实例变换并原地更新 TLAS
    ///
    /// 实例数量必须与构建时一致。
    pub fn update(
        &mut self,
        device: &mut D,
        rc: &mut D::Context,
        instances: &[Instance<D>],
        blas: &BlasBuffer<D>,
        axis_correction: &Matrix4,
    ) -> Result<()> {
        if instances.len() as u32 != self.num_instances {
            return Err(RaytracingError::LayoutMismatch(format!(
                "TLAS was built with {} instances, update has {}",
                self.num_instances,
                instances.len()
            ))
            .into());
        }

        let instance_desc = self
            .buffers
            .instance_desc
            .as_ref()
            .ok_or_else(|| RaytracingError::LayoutMismatch("TLAS has no instance descriptor buffer".to_string()))?;

        let descs = instance_descs(instances, &blas_addresses(blas), axis_correction)?;
        device.write_buffer(instance_desc, 0, bytemuck::cast_slice(&descs))?;

        let result = self.buffers.result.gpu_address();
        rc.build_raytracing_acceleration_structure(&BuildAccelerationStructureDesc {
            inputs: AccelerationStructureInputs::TopLevel {
                instance_descs: instance_desc.gpu_address(),
                num_instances: self.num_instances,
                flags: build_flags(true),
            },
            dest: result,
            source: Some(result),
            scratch: self.buffers.scratch.gpu_address(),
        });
        rc.resource_barrier(ResourceBarrier::Uav(&self.buffers.result));

        debug!(instances = self.num_instances, "Recorded TLAS update");
        Ok(())
    }

    pub fn gpu_address(&self) -> GpuAddress {
        self.buffers.result.gpu_address()
    }

    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }

    pub fn buffers(&self) -> &AccelerationStructureBuffers<D> {
        &self.buffers
    }

    pub fn instance_desc_buffer(&self) -> Option<&D::Buffer> {
        self.buffers.instance_desc.as_ref()
    }

    /// 作为着色器资源绑定时使用的 SRV（按 GPU 地址寻址，不绑定资源）
    pub fn acceleration_structure_srv(&self) -> ViewDesc<'_, D> {
        ViewDesc::AccelerationStructureSrv(self.gpu_address())
    }
}

fn blas_addresses<D: Device>(blas: &BlasBuffer<D>) -> Vec<GpuAddress> {
    blas.iter().map(|b| b.result.gpu_address()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::{rotation_x, translation};
    use crate::geometry::{MaterialData, MeshData, ModelData};
    use crate::gfx::headless::{Command, HeadlessContext, HeadlessDevice};
    use crate::model::Model;

    fn instances(device: &mut HeadlessDevice, count: usize, world: Matrix4) -> Vec<Instance<HeadlessDevice>> {
        let data = ModelData {
            name: "Quads".to_string(),
            meshes: (0..count).map(|i| MeshData::quad(format!("Q{}", i), 1.0, 0)).collect(),
            materials: vec![MaterialData::default()],
        };
        let model = Model::upload(device, &data, world).unwrap();
        model
            .meshes
            .iter()
            .map(|m| Instance::new(m, &m.parts[0], model.world_matrix))
            .collect()
    }

    fn read_descs(bytes: &[u8]) -> Vec<RaytracingInstanceDesc> {
        bytes
            .chunks_exact(RaytracingInstanceDesc::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    #[test]
    fn test_instance_descs_hit_group_contribution() {
        let mut device = HeadlessDevice::new();
        for n in 1..=8 {
            let instances = instances(&mut device, n, Matrix4::identity());
            let addresses: Vec<_> = (0..n as u64).map(|i| GpuAddress(0x1000 * (i + 1))).collect();
            let descs = instance_descs(&instances, &addresses, &Matrix4::identity()).unwrap();

            assert_eq!(descs.len(), n);
            for (i, desc) in descs.iter().enumerate() {
                assert_eq!(desc.instance_id(), i as u32);
                assert_eq!(desc.instance_mask(), 0xFF);
                assert_eq!(desc.hit_group_contribution() as usize, HitGroupKind::COUNT * i);
                assert_eq!(desc.acceleration_structure, addresses[i].0);
            }
            assert!(descs
                .windows(2)
                .all(|w| w[0].hit_group_contribution() < w[1].hit_group_contribution()));
        }
    }

    #[test]
    fn test_instance_transform_includes_world_matrix() {
        let mut device = HeadlessDevice::new();
        let instances = instances(&mut device, 1, translation(1.0, 2.0, 3.0));
        let correction = rotation_x(-0.5 * std::f32::consts::PI);
        let descs = instance_descs(&instances, &[GpuAddress(0x1000)], &correction).unwrap();

        let t = descs[0].transform;
        assert_eq!([t[3], t[7], t[11]], [1.0, 2.0, 3.0]);
        // 修正后的 Y 轴由原来的 Z 轴给出
        assert!((t[6] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_instance_desc_buffer_size_per_count() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();

        for n in 1..=8 {
            let instances = instances(&mut device, n, Matrix4::identity());

            device.begin_frame(&mut ctx).unwrap();
            let blas = BlasBuffer::init(&mut device, &mut ctx, &instances).unwrap();
            let tlas = TlasBuffer::init(&mut device, &mut ctx, &instances, &blas, &Matrix4::identity()).unwrap();
            device.end_frame(&mut ctx).unwrap();

            let desc_buffer = tlas.instance_desc_buffer().unwrap();
            assert_eq!(tlas.num_instances(), n as u32);
            assert_eq!(desc_buffer.size(), (n * RaytracingInstanceDesc::SIZE) as u64);
            assert_eq!(device.buffer_contents(desc_buffer).unwrap().len(), n * 64);
        }
        assert_eq!(ctx.submitted_frames().len(), 8);
    }

    #[test]
    fn test_mismatched_blas_count() {
        let mut device = HeadlessDevice::new();
        let instances = instances(&mut device, 2, Matrix4::identity());
        assert!(instance_descs(&instances, &[GpuAddress(0x1000)], &Matrix4::identity()).is_err());
    }

    #[test]
    fn test_init_and_update() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let mut instances = instances(&mut device, 3, Matrix4::identity());

        device.begin_frame(&mut ctx).unwrap();
        let blas = BlasBuffer::init(&mut device, &mut ctx, &instances).unwrap();
        let mut tlas = TlasBuffer::init(&mut device, &mut ctx, &instances, &blas, &Matrix4::identity()).unwrap();
        device.end_frame(&mut ctx).unwrap();

        assert_eq!(tlas.num_instances(), 3);
        let bytes = device.buffer_contents(tlas.instance_desc_buffer().unwrap()).unwrap();
        assert_eq!(bytes.len(), 3 * RaytracingInstanceDesc::SIZE);

        let descs = read_descs(bytes);
        for (i, desc) in descs.iter().enumerate() {
            assert_eq!(desc.acceleration_structure, blas.get(i).unwrap().result.gpu_address().0);
        }

        instances[1].set_world_matrix(translation(0.0, 5.0, 0.0));
        device.begin_frame(&mut ctx).unwrap();
        tlas.update(&mut device, &mut ctx, &instances, &blas, &Matrix4::identity())
            .unwrap();
        device.end_frame(&mut ctx).unwrap();

        let bytes = device.buffer_contents(tlas.instance_desc_buffer().unwrap()).unwrap();
        let descs = read_descs(bytes);
        assert_eq!(descs[1].transform[7], 5.0);

        match &ctx.submitted_frames()[1][0] {
            Command::BuildAccelerationStructure { top_level, source, perform_update, element_count, .. } => {
                assert!(top_level);
                assert!(perform_update);
                assert_eq!(*source, Some(tlas.gpu_address()));
                assert_eq!(*element_count, 3);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
