//! 底层加速结构（BLAS）
//!
//! 每个实例一个 BLAS，只包含一个不透明的三角形几何体。

use tracing::debug;

use super::instance::Instance;
use crate::core::error::Result;
use crate::gfx::accel::{AccelerationStructureInputs, BuildAccelerationStructureDesc, BuildFlags, PrebuildInfo};
use crate::gfx::device::{Device, GpuBuffer, RenderContext, ResourceBarrier};
use crate::gfx::resource::BufferDesc;

/// 一个加速结构使用的缓冲区
pub struct AccelerationStructureBuffers<D: Device> {
    /// 构建用的临时缓冲区（UAV 状态）
    pub scratch: D::Buffer,
    /// 构建结果（加速结构状态）
    pub result: D::Buffer,
    /// TLAS 的实例描述符（上传堆）
    pub instance_desc: Option<D::Buffer>,
}

impl<D: Device> AccelerationStructureBuffers<D> {
    /// 按预构建信息分配 scratch 和 result 缓冲区（大小对齐到 256 字节）
    pub(super) fn allocate(device: &mut D, info: &PrebuildInfo, name: &str) -> Result<Self> {
        let scratch_size = info.scratch_data_size.max(info.update_scratch_data_size);
        let scratch = device.create_buffer(
            &BufferDesc::scratch(scratch_size).with_name(format!("{} Scratch", name)),
        )?;
        let result = device.create_buffer(
            &BufferDesc::acceleration_structure(info.result_data_max_size).with_name(name),
        )?;

        Ok(Self {
            scratch,
            result,
            instance_desc: None,
        })
    }
}

/// 所有实例的 BLAS，顺序与实例一致
pub struct BlasBuffer<D: Device> {
    buffers: Vec<AccelerationStructureBuffers<D>>,
}

impl<D: Device> BlasBuffer<D> {
    /// 为每个实例录制 BLAS 构建命令
    ///
    /// 每次构建之后插入一个 UAV 屏障，保证 TLAS 构建读取时结果已经写完。
    pub fn init(device: &mut D, rc: &mut D::Context, instances: &[Instance<D>]) -> Result<Self> {
        let mut buffers = Vec::with_capacity(instances.len());

        for (i, instance) in instances.iter().enumerate() {
            let geometries = std::slice::from_ref(instance.geometry());
            let inputs = AccelerationStructureInputs::BottomLevel {
                geometries,
                flags: BuildFlags::fast_trace(),
            };

            let info = device.acceleration_structure_prebuild_info(&inputs)?;
            let as_buffers = AccelerationStructureBuffers::allocate(device, &info, &format!("BLAS {}", i))?;

            rc.build_raytracing_acceleration_structure(&BuildAccelerationStructureDesc {
                inputs,
                dest: as_buffers.result.gpu_address(),
                source: None,
                scratch: as_buffers.scratch.gpu_address(),
            });
            rc.resource_barrier(ResourceBarrier::Uav(&as_buffers.result));

            debug!(
                instance = i,
                triangles = instance.geometry().triangle_count(),
                result_size = info.result_data_max_size,
                scratch_size = info.scratch_data_size,
                "Recorded BLAS build"
            );
            buffers.push(as_buffers);
        }

        Ok(Self { buffers })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AccelerationStructureBuffers<D>> {
        self.buffers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccelerationStructureBuffers<D>> {
        self.buffers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Matrix4;
    use crate::geometry::{MaterialData, MeshData, ModelData};
    use crate::gfx::headless::{Command, HeadlessContext, HeadlessDevice};
    use crate::model::Model;

    #[test]
    fn test_one_blas_per_instance() {
        let data = ModelData {
            name: "Pair".to_string(),
            meshes: vec![MeshData::quad("A", 1.0, 0), MeshData::quad("B", 1.0, 0)],
            materials: vec![MaterialData::default()],
        };
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let model = Model::upload(&mut device, &data, Matrix4::identity()).unwrap();
        let instances: Vec<_> = model
            .meshes
            .iter()
            .map(|m| Instance::new(m, &m.parts[0], Matrix4::identity()))
            .collect();

        device.begin_frame(&mut ctx).unwrap();
        let blas = BlasBuffer::init(&mut device, &mut ctx, &instances).unwrap();
        device.end_frame(&mut ctx).unwrap();

        assert_eq!(blas.len(), 2);
        let commands = &ctx.submitted_frames()[0];
        assert_eq!(commands.len(), 4);

        for (i, buffers) in blas.iter().enumerate() {
            assert!(buffers.instance_desc.is_none());
            assert_eq!(buffers.result.size() % 256, 0);
            match &commands[i * 2] {
                Command::BuildAccelerationStructure { top_level, dest, element_count, .. } => {
                    assert!(!top_level);
                    assert_eq!(*dest, buffers.result.gpu_address());
                    assert_eq!(*element_count, 1);
                }
                other => panic!("unexpected command {:?}", other),
            }
            assert_eq!(
                commands[i * 2 + 1],
                Command::UavBarrier { buffer: buffers.result.gpu_address() }
            );
        }
    }
}
