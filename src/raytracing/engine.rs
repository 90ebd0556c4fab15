//! 光线追踪引擎
//!
//! 把世界、描述符堆、管线和着色器表组合在一起：
//!
//! 1. `regist_geometry` 注册模型
//! 2. `commit_regist_geometry` 在一帧中构建加速结构并创建其余 GPU 对象（只能调用一次）
//! 3. 每帧在 `begin_frame`/`end_frame` 之间调用 `dispatch`，结果拷贝到帧缓冲

use tracing::debug;

use super::descriptor_heaps::DescriptorHeaps;
use super::pso::Pso;
use super::shader_table::ShaderTable;
use super::world::World;
use crate::component::{Camera, RayGenConstants};
use crate::core::config::RaytracingConfig;
use crate::core::error::{RaytracingError, Result};
use crate::core::math::Matrix4;
use crate::gfx::device::{Device, GpuTexture, RenderContext, ResourceBarrier};
use crate::gfx::pipeline::ShaderLibrary;
use crate::gfx::resource::{BufferDesc, ResourceState, TextureDesc};
use crate::model::Model;

/// 提交后才存在的 GPU 对象
struct CommittedResources<D: Device> {
    output: D::Texture,
    camera_constants: D::Buffer,
    heaps: DescriptorHeaps<D>,
    pso: Pso<D>,
    shader_table: ShaderTable<D>,
}

pub struct Engine<D: Device> {
    world: World<D>,
    width: u32,
    height: u32,
    shader_library: ShaderLibrary,
    resources: Option<CommittedResources<D>>,
    /// 实例变换被修改过，下次派发前需要更新 TLAS
    transforms_dirty: bool,
}

impl<D: Device> Engine<D> {
    /// # 参数
    ///
    /// * `config` - 光线追踪配置（实例上限、坐标轴修正）
    /// * `shader_library` - 编译好的 DXIL 库
    /// * `width`, `height` - 输出分辨率，必须与帧缓冲一致
    pub fn new(config: &RaytracingConfig, shader_library: ShaderLibrary, width: u32, height: u32) -> Self {
        Self {
            world: World::new(config.max_instances, config.axis_correction.matrix()),
            width,
            height,
            shader_library,
            resources: None,
            transforms_dirty: false,
        }
    }

    /// 注册模型的全部网格/材质对
    pub fn regist_geometry(&mut self, model: &Model<D>) -> Result<()> {
        self.world.regist_geometry(model)?;
        debug!(model = %model.name, instances = self.world.instance_count(), "Registered model");
        Ok(())
    }

    /// 构建加速结构，然后创建输出纹理、描述符堆、管线和着色器表
    ///
    /// 全部工作在内部的一帧中完成，帧提交后等待 GPU 完成。
    /// 任何一步失败时丢弃这一帧，引擎不可再用。
    pub fn commit_regist_geometry(&mut self, device: &mut D, rc: &mut D::Context) -> Result<()> {
        if self.world.is_committed() {
            return Err(RaytracingError::AlreadyCommitted.into());
        }
        if self.world.instance_count() == 0 {
            return Err(RaytracingError::EmptyWorld.into());
        }

        device.begin_frame(rc)?;
        let resources = match self.create_resources(device, rc) {
            Ok(resources) => resources,
            Err(e) => {
                if let Err(discard) = device.discard_frame(rc) {
                    crate::engine_warn!(error = %discard, "Failed to discard the commit frame");
                }
                return Err(e);
            }
        };
        device.end_frame(rc)?;

        crate::engine_info!(
            backend = device.backend_name(),
            instances = self.world.instance_count(),
            descriptors = resources.heaps.descriptor_count(),
            shader_table_size = resources.shader_table.size(),
            width = self.width,
            height = self.height,
            "Raytracing engine committed"
        );

        self.resources = Some(resources);
        Ok(())
    }

    /// 在已开始的帧中录制加速结构构建，并创建其余 GPU 对象
    fn create_resources(&mut self, device: &mut D, rc: &mut D::Context) -> Result<CommittedResources<D>> {
        self.world.commit_regist_geometry(device, rc)?;

        let tlas = self.world.tlas().ok_or(RaytracingError::NotCommitted)?;
        let num_instances = tlas.num_instances();

        let output = device.create_texture(&TextureDesc::raytracing_output(self.width, self.height), None)?;
        let camera_constants = device.create_buffer(
            &BufferDesc::constant(std::mem::size_of::<RayGenConstants>() as u64).with_name("Camera Constants"),
        )?;
        let heaps = DescriptorHeaps::init(device, self.world.instances(), tlas, &output, &camera_constants)?;
        let pso = Pso::init(device, &self.shader_library)?;
        let shader_table = ShaderTable::init(device, &pso, &heaps, num_instances)?;

        Ok(CommittedResources {
            output,
            camera_constants,
            heaps,
            pso,
            shader_table,
        })
    }

    /// 修改实例的世界矩阵，下一次 `dispatch` 时更新 TLAS
    pub fn set_instance_transform(&mut self, index: usize, world_matrix: Matrix4) -> Result<()> {
        self.world.set_instance_transform(index, world_matrix)?;
        self.transforms_dirty = true;
        Ok(())
    }

    /// 录制一帧光线追踪，并把结果拷贝到帧缓冲
    ///
    /// 调用者负责 `begin_frame`/`end_frame`。帧缓冲必须处于渲染目标状态，
    /// 返回时也恢复到该状态。
    pub fn dispatch(
        &mut self,
        device: &mut D,
        rc: &mut D::Context,
        camera: &Camera,
        frame_buffer: &D::Texture,
    ) -> Result<()> {
        if self.resources.is_none() {
            return Err(RaytracingError::NotCommitted.into());
        }

        if frame_buffer.width() != self.width
            || frame_buffer.height() != self.height
            || self
                .resources
                .as_ref()
                .is_some_and(|r| r.output.format() != frame_buffer.format())
        {
            return Err(RaytracingError::UnsupportedResource(format!(
                "frame buffer {}x{} {:?} does not match raytracing output {}x{}",
                frame_buffer.width(),
                frame_buffer.height(),
                frame_buffer.format(),
                self.width,
                self.height
            ))
            .into());
        }

        if self.transforms_dirty {
            self.world.update_tlas(device, rc)?;
            self.transforms_dirty = false;
        }

        let resources = self.resources.as_ref().ok_or(RaytracingError::NotCommitted)?;

        let constants = camera.ray_gen_constants();
        device.write_buffer(&resources.camera_constants, 0, bytemuck::bytes_of(&constants))?;

        rc.resource_barrier(ResourceBarrier::Transition {
            texture: &resources.output,
            before: ResourceState::CopySource,
            after: ResourceState::UnorderedAccess,
        });

        rc.set_descriptor_heaps(&[resources.heaps.srv_uav_cbv_heap(), resources.heaps.sampler_heap()]);
        rc.set_compute_root_signature(resources.pso.global_root_signature());
        rc.set_pipeline_state(resources.pso.pipeline());
        rc.dispatch_rays(&resources.shader_table.dispatch_rays_desc(self.width, self.height));

        rc.resource_barrier(ResourceBarrier::Transition {
            texture: &resources.output,
            before: ResourceState::UnorderedAccess,
            after: ResourceState::CopySource,
        });
        rc.resource_barrier(ResourceBarrier::Transition {
            texture: frame_buffer,
            before: ResourceState::RenderTarget,
            after: ResourceState::CopyDest,
        });
        rc.copy_texture(frame_buffer, &resources.output);
        rc.resource_barrier(ResourceBarrier::Transition {
            texture: frame_buffer,
            before: ResourceState::CopyDest,
            after: ResourceState::RenderTarget,
        });

        debug!(width = self.width, height = self.height, "Recorded raytracing dispatch");
        Ok(())
    }

    pub fn world(&self) -> &World<D> {
        &self.world
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_committed(&self) -> bool {
        self.resources.is_some()
    }

    pub fn instance_count(&self) -> usize {
        self.world.instance_count()
    }

    /// 着色器表大小（字节），提交前为 0
    pub fn shader_table_size(&self) -> u64 {
        self.resources.as_ref().map_or(0, |r| r.shader_table.size())
    }

    /// CBV/SRV/UAV 堆中的描述符数量，提交前为 0
    pub fn descriptor_count(&self) -> u32 {
        self.resources.as_ref().map_or(0, |r| r.heaps.descriptor_count())
    }

    pub fn output_texture(&self) -> Option<&D::Texture> {
        self.resources.as_ref().map(|r| &r.output)
    }

    pub fn camera_constants_buffer(&self) -> Option<&D::Buffer> {
        self.resources.as_ref().map(|r| &r.camera_constants)
    }

    pub fn shader_table(&self) -> Option<&ShaderTable<D>> {
        self.resources.as_ref().map(|r| &r.shader_table)
    }

    pub fn pso(&self) -> Option<&Pso<D>> {
        self.resources.as_ref().map(|r| &r.pso)
    }

    pub fn descriptor_heaps(&self) -> Option<&DescriptorHeaps<D>> {
        self.resources.as_ref().map(|r| &r.heaps)
    }

    /// 记录当前状态的统计信息
    pub fn log_stats(&self) {
        if !self.is_committed() {
            crate::engine_warn!("Raytracing engine has not been committed");
            return;
        }
        crate::engine_info!(
            instances = self.instance_count(),
            descriptors = self.descriptor_count(),
            shader_table_size = self.shader_table_size(),
            "Raytracing engine stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use crate::core::math::translation;
    use crate::geometry::{MaterialData, MeshData, ModelData, Subset};
    use crate::gfx::accel::RaytracingInstanceDesc;
    use crate::gfx::device::GpuDescriptorHeap;
    use crate::gfx::headless::{Command, HeadlessContext, HeadlessDevice, HeadlessTexture};
    use crate::gfx::resource::Format;

    const WIDTH: u32 = 64;
    const HEIGHT: u32 = 32;

    fn engine() -> Engine<HeadlessDevice> {
        Engine::new(&RaytracingConfig::default(), ShaderLibrary::empty_container(), WIDTH, HEIGHT)
    }

    /// 一个网格两个部件，对应两个实例
    fn model(device: &mut HeadlessDevice) -> Model<HeadlessDevice> {
        let mut mesh = MeshData::quad("Floor", 2.0, 0);
        mesh.subsets.push(Subset {
            material: 1,
            indices: vec![0, 2, 1],
        });
        let data = ModelData {
            name: "Scene".to_string(),
            meshes: vec![mesh],
            materials: vec![MaterialData::default(), MaterialData::solid("Blue", [0, 0, 255, 255])],
        };
        Model::upload(device, &data, Matrix4::identity()).unwrap()
    }

    fn committed(device: &mut HeadlessDevice, ctx: &mut HeadlessContext) -> Engine<HeadlessDevice> {
        let model = model(device);
        let mut engine = engine();
        engine.regist_geometry(&model).unwrap();
        engine.commit_regist_geometry(device, ctx).unwrap();
        engine
    }

    fn frame_buffer(device: &mut HeadlessDevice) -> HeadlessTexture {
        device.create_texture(&TextureDesc::frame_buffer(WIDTH, HEIGHT), None).unwrap()
    }

    fn raytracing_error(err: EngineError) -> RaytracingError {
        match err {
            EngineError::Raytracing(e) => e,
            other => panic!("expected a raytracing error, got {}", other),
        }
    }

    #[test]
    fn test_commit_stats() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let engine = committed(&mut device, &mut ctx);

        assert!(engine.is_committed());
        assert_eq!(engine.instance_count(), 2);
        assert_eq!(engine.descriptor_count(), 2 + 8 * 2);
        assert_eq!(engine.shader_table_size(), 64 * (1 + 2 + 2 * 2));

        // 2 个 BLAS 构建 + 2 个屏障 + TLAS 构建 + 屏障
        assert_eq!(ctx.submitted_frames().len(), 1);
        assert_eq!(ctx.submitted_frames()[0].len(), 6);

        let output = engine.output_texture().unwrap();
        assert_eq!((output.width(), output.height()), (WIDTH, HEIGHT));
        assert_eq!(output.format(), Format::Rgba8Unorm);
        assert_eq!(ctx.texture_state(output), ResourceState::CopySource);
    }

    #[test]
    fn test_dispatch_command_sequence() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let mut engine = committed(&mut device, &mut ctx);
        let fb = frame_buffer(&mut device);

        let mut camera = Camera::new(WIDTH as f32 / HEIGHT as f32);
        camera.set_position(crate::core::math::Vector3::new(0.0, 1.0, -5.0));

        device.begin_frame(&mut ctx).unwrap();
        engine.dispatch(&mut device, &mut ctx, &camera, &fb).unwrap();
        device.end_frame(&mut ctx).unwrap();

        let output = engine.output_texture().unwrap();
        let heaps = engine.descriptor_heaps().unwrap();
        let pso = engine.pso().unwrap();
        let table = engine.shader_table().unwrap();

        let expected = vec![
            Command::Transition {
                texture: output.id(),
                before: ResourceState::CopySource,
                after: ResourceState::UnorderedAccess,
            },
            Command::SetDescriptorHeaps {
                heaps: vec![heaps.srv_uav_cbv_heap().id(), heaps.sampler_heap().id()],
            },
            Command::SetComputeRootSignature {
                root_signature: pso.global_root_signature().id(),
            },
            Command::SetPipelineState { pipeline: pso.pipeline().id() },
            Command::DispatchRays(table.dispatch_rays_desc(WIDTH, HEIGHT)),
            Command::Transition {
                texture: output.id(),
                before: ResourceState::UnorderedAccess,
                after: ResourceState::CopySource,
            },
            Command::Transition {
                texture: fb.id(),
                before: ResourceState::RenderTarget,
                after: ResourceState::CopyDest,
            },
            Command::CopyTexture { dst: fb.id(), src: output.id() },
            Command::Transition {
                texture: fb.id(),
                before: ResourceState::CopyDest,
                after: ResourceState::RenderTarget,
            },
        ];
        assert_eq!(ctx.submitted_frames()[1], expected);
        assert_eq!(ctx.texture_state(&fb), ResourceState::RenderTarget);

        let cb = engine.camera_constants_buffer().unwrap();
        let contents = device.buffer_contents(cb).unwrap();
        assert_eq!(&contents[..96], bytemuck::bytes_of(&camera.ray_gen_constants()));
        assert_eq!(heaps.srv_uav_cbv_heap().num_descriptors(), engine.descriptor_count());
    }

    #[test]
    fn test_dispatch_before_commit() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let mut engine = engine();
        let fb = frame_buffer(&mut device);

        device.begin_frame(&mut ctx).unwrap();
        let err = engine
            .dispatch(&mut device, &mut ctx, &Camera::default(), &fb)
            .unwrap_err();
        assert!(matches!(raytracing_error(err), RaytracingError::NotCommitted));
        assert!(ctx.pending_commands().is_empty());
    }

    #[test]
    fn test_empty_commit_records_nothing() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let mut engine = engine();

        let err = engine.commit_regist_geometry(&mut device, &mut ctx).unwrap_err();
        assert!(matches!(raytracing_error(err), RaytracingError::EmptyWorld));
        assert!(ctx.submitted_frames().is_empty());
        assert_eq!(device.frames_submitted(), 0);
    }

    #[test]
    fn test_double_commit() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let mut engine = committed(&mut device, &mut ctx);

        let err = engine.commit_regist_geometry(&mut device, &mut ctx).unwrap_err();
        assert!(matches!(raytracing_error(err), RaytracingError::AlreadyCommitted));
        assert_eq!(ctx.submitted_frames().len(), 1);
    }

    #[test]
    fn test_failed_commit_discards_frame() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let model = model(&mut device);
        // 零尺寸的输出纹理在加速结构录制之后才创建失败
        let mut engine: Engine<HeadlessDevice> =
            Engine::new(&RaytracingConfig::default(), ShaderLibrary::empty_container(), 0, 0);
        engine.regist_geometry(&model).unwrap();

        assert!(engine.commit_regist_geometry(&mut device, &mut ctx).is_err());
        assert!(!engine.is_committed());
        assert!(ctx.pending_commands().is_empty());
        assert!(ctx.submitted_frames().is_empty());
        assert_eq!(device.frames_submitted(), 0);

        // 上下文不再处于录制状态
        device.begin_frame(&mut ctx).unwrap();
        device.end_frame(&mut ctx).unwrap();
    }

    #[test]
    fn test_frame_buffer_mismatch() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let mut engine = committed(&mut device, &mut ctx);
        let small = device.create_texture(&TextureDesc::frame_buffer(WIDTH / 2, HEIGHT), None).unwrap();

        device.begin_frame(&mut ctx).unwrap();
        let err = engine
            .dispatch(&mut device, &mut ctx, &Camera::default(), &small)
            .unwrap_err();
        assert!(matches!(raytracing_error(err), RaytracingError::UnsupportedResource(_)));
        assert!(ctx.pending_commands().is_empty());
    }

    #[test]
    fn test_transform_change_updates_tlas() {
        let mut device = HeadlessDevice::new();
        let mut ctx = HeadlessContext::new();
        let mut engine = committed(&mut device, &mut ctx);
        let fb = frame_buffer(&mut device);
        let camera = Camera::default();

        engine.set_instance_transform(0, translation(3.0, 0.0, 0.0)).unwrap();

        device.begin_frame(&mut ctx).unwrap();
        engine.dispatch(&mut device, &mut ctx, &camera, &fb).unwrap();
        device.end_frame(&mut ctx).unwrap();

        let frame = &ctx.submitted_frames()[1];
        assert!(matches!(
            frame[0],
            Command::BuildAccelerationStructure { top_level: true, perform_update: true, .. }
        ));
        assert!(matches!(frame[1], Command::UavBarrier { .. }));

        let desc: RaytracingInstanceDesc = {
            let tlas = engine.world().tlas().unwrap();
            let bytes = device.buffer_contents(tlas.instance_desc_buffer().unwrap()).unwrap();
            bytemuck::pod_read_unaligned(&bytes[..RaytracingInstanceDesc::SIZE])
        };
        assert_eq!(desc.transform[3], 3.0);

        // 没有新的修改时不再更新
        device.begin_frame(&mut ctx).unwrap();
        engine.dispatch(&mut device, &mut ctx, &camera, &fb).unwrap();
        device.end_frame(&mut ctx).unwrap();
        assert!(!ctx.submitted_frames()[2]
            .iter()
            .any(|c| matches!(c, Command::BuildAccelerationStructure { .. })));
    }
}
