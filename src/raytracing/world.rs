//! 光线追踪世界
//!
//! 收集模型中的网格/材质对，并持有两级加速结构。
//! 注册顺序决定实例下标，也就决定了命中组记录和描述符块的位置。

use tracing::{debug, info};

use super::blas::BlasBuffer;
use super::instance::Instance;
use super::layout::HitGroupKind;
use super::tlas::TlasBuffer;
use crate::core::error::{RaytracingError, Result};
use crate::core::math::Matrix4;
use crate::gfx::accel::INSTANCE_FIELD_LIMIT;
use crate::gfx::device::Device;
use crate::model::Model;

/// 已提交的加速结构
struct AccelerationStructures<D: Device> {
    blas: BlasBuffer<D>,
    tlas: TlasBuffer<D>,
}

pub struct World<D: Device> {
    instances: Vec<Instance<D>>,
    max_instances: usize,
    axis_correction: Matrix4,
    structures: Option<AccelerationStructures<D>>,
}

impl<D: Device> World<D> {
    /// # 参数
    ///
    /// * `max_instances` - 配置中的实例上限
    /// * `axis_correction` - TLAS 实例变换追加的坐标轴修正
    pub fn new(max_instances: usize, axis_correction: Matrix4) -> Self {
        Self {
            instances: Vec::new(),
            max_instances,
            axis_correction,
            structures: None,
        }
    }

    /// 实例数量上限
    ///
    /// 除配置值外，`InstanceID` 和命中组贡献值都只有 24 位。
    pub fn capacity(&self) -> usize {
        self.max_instances.min(INSTANCE_FIELD_LIMIT / HitGroupKind::COUNT)
    }

    /// 为模型中的每个网格/材质对创建一个实例
    ///
    /// 超出容量时整个模型都不会被注册。
    pub fn regist_geometry(&mut self, model: &Model<D>) -> Result<()> {
        if self.is_committed() {
            return Err(RaytracingError::AlreadyCommitted.into());
        }

        let requested = self.instances.len() + model.part_count();
        let limit = self.capacity();
        if requested > limit {
            return Err(RaytracingError::CapacityExceeded {
                what: "instances",
                requested,
                limit,
            }
            .into());
        }

        for mesh in &model.meshes {
            for part in &mesh.parts {
                debug!(
                    instance = self.instances.len(),
                    mesh = %mesh.name,
                    material = %part.material.name,
                    "Registered instance"
                );
                self.instances.push(Instance::new(mesh, part, model.world_matrix));
            }
        }

        Ok(())
    }

    /// 构建所有 BLAS，然后构建 TLAS
    ///
    /// 只能调用一次；没有实例时返回 `EmptyWorld`，且不会录制任何命令。
    pub fn commit_regist_geometry(&mut self, device: &mut D, rc: &mut D::Context) -> Result<()> {
        if self.is_committed() {
            return Err(RaytracingError::AlreadyCommitted.into());
        }
        if self.instances.is_empty() {
            return Err(RaytracingError::EmptyWorld.into());
        }

        let blas = BlasBuffer::init(device, rc, &self.instances)?;
        let tlas = TlasBuffer::init(device, rc, &self.instances, &blas, &self.axis_correction)?;

        info!(instances = self.instances.len(), "Committed raytracing world");
        self.structures = Some(AccelerationStructures { blas, tlas });
        Ok(())
    }

    /// 修改实例的世界矩阵，需要调用 `update_tlas` 才会生效
    pub fn set_instance_transform(&mut self, index: usize, world_matrix: Matrix4) -> Result<()> {
        let count = self.instances.len();
        let instance = self.instances.get_mut(index).ok_or(RaytracingError::CapacityExceeded {
            what: "instance index",
            requested: index + 1,
            limit: count,
        })?;
        instance.set_world_matrix(world_matrix);
        Ok(())
    }

    /// 用当前的实例变换原地更新 TLAS
    pub fn update_tlas(&mut self, device: &mut D, rc: &mut D::Context) -> Result<()> {
        let structures = self.structures.as_mut().ok_or(RaytracingError::NotCommitted)?;
        structures
            .tlas
            .update(device, rc, &self.instances, &structures.blas, &self.axis_correction)
    }

    pub fn instances(&self) -> &[Instance<D>] {
        &self.instances
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn is_committed(&self) -> bool {
        self.structures.is_some()
    }

    pub fn blas(&self) -> Option<&BlasBuffer<D>> {
        self.structures.as_ref().map(|s| &s.blas)
    }

    pub fn tlas(&self) -> Option<&TlasBuffer<D>> {
        self.structures.as_ref().map(|s| &s.tlas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use crate::geometry::{MaterialData, MeshData, ModelData, Subset};
    use crate::gfx::headless::{HeadlessContext, HeadlessDevice};

    /// 一个网格、两个部件（两种材质）
    fn two_part_model(device: &mut HeadlessDevice) -> Model<HeadlessDevice> {
        let mut mesh = MeshData::quad("Mesh", 1.0, 0);
        mesh.subsets.push(Subset {
            material: 1,
            indices: vec![0, 1, 2],
        });
        let data = ModelData {
            name: "TwoParts".to_string(),
            meshes: vec![mesh],
            materials: vec![MaterialData::default(), MaterialData::solid("Red", [255, 0, 0, 255])],
        };
        Model::upload(device, &data, Matrix4::identity()).unwrap()
    }

    fn raytracing_error(err: EngineError) -> RaytracingError {
        match err {
            EngineError::Raytracing(e) => e,
            other => panic!("expected a raytracing error, got {}", other),
        }
    }

    #[test]
    fn test_two_pair_scenario() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let model = two_part_model(&mut device);

        let mut world = World::new(4096, Matrix4::identity());
        world.regist_geometry(&model).unwrap();
        assert_eq!(world.instance_count(), 2);

        device.begin_frame(&mut ctx).unwrap();
        world.commit_regist_geometry(&mut device, &mut ctx).unwrap();
        device.end_frame(&mut ctx).unwrap();

        assert_eq!(world.blas().unwrap().len(), 2);
        assert_eq!(world.tlas().unwrap().num_instances(), 2);
        assert_eq!(world.instances()[1].material().name, "Red");
        assert_eq!(world.instances()[1].geometry().index_count, 3);
    }

    #[test]
    fn test_instance_count_sums_over_models() {
        let mut device = HeadlessDevice::new();
        let model = two_part_model(&mut device);

        let mut world = World::new(4096, Matrix4::identity());
        for _ in 0..3 {
            world.regist_geometry(&model).unwrap();
        }
        assert_eq!(world.instance_count(), 6);
    }

    #[test]
    fn test_empty_world_commit() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let mut world: World<HeadlessDevice> = World::new(4096, Matrix4::identity());

        device.begin_frame(&mut ctx).unwrap();
        let err = world.commit_regist_geometry(&mut device, &mut ctx).unwrap_err();
        assert!(matches!(raytracing_error(err), RaytracingError::EmptyWorld));
        assert!(ctx.pending_commands().is_empty());
        assert!(!world.is_committed());
    }

    #[test]
    fn test_register_after_commit() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let model = two_part_model(&mut device);
        let mut world = World::new(4096, Matrix4::identity());
        world.regist_geometry(&model).unwrap();

        device.begin_frame(&mut ctx).unwrap();
        world.commit_regist_geometry(&mut device, &mut ctx).unwrap();
        device.end_frame(&mut ctx).unwrap();

        let err = world.regist_geometry(&model).unwrap_err();
        assert!(matches!(raytracing_error(err), RaytracingError::AlreadyCommitted));

        device.begin_frame(&mut ctx).unwrap();
        let err = world.commit_regist_geometry(&mut device, &mut ctx).unwrap_err();
        assert!(matches!(raytracing_error(err), RaytracingError::AlreadyCommitted));
    }

    #[test]
    fn test_capacity_is_all_or_nothing() {
        let mut device = HeadlessDevice::new();
        let model = two_part_model(&mut device);
        let mut world = World::new(3, Matrix4::identity());

        world.regist_geometry(&model).unwrap();
        let err = world.regist_geometry(&model).unwrap_err();
        match raytracing_error(err) {
            RaytracingError::CapacityExceeded { requested, limit, .. } => {
                assert_eq!(requested, 4);
                assert_eq!(limit, 3);
            }
            other => panic!("unexpected error {}", other),
        }
        assert_eq!(world.instance_count(), 2);
    }

    #[test]
    fn test_capacity_respects_instance_field_width() {
        let world: World<HeadlessDevice> = World::new(usize::MAX, Matrix4::identity());
        assert_eq!(world.capacity(), (1 << 24) / HitGroupKind::COUNT);
    }

    #[test]
    fn test_update_before_commit() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let model = two_part_model(&mut device);
        let mut world = World::new(16, Matrix4::identity());
        world.regist_geometry(&model).unwrap();

        world.set_instance_transform(1, Matrix4::identity()).unwrap();
        assert!(world.set_instance_transform(2, Matrix4::identity()).is_err());

        let err = world.update_tlas(&mut device, &mut ctx).unwrap_err();
        assert!(matches!(raytracing_error(err), RaytracingError::NotCommitted));
    }
}
