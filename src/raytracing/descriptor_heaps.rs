//! 光线追踪使用的描述符堆
//!
//! CBV/SRV/UAV 堆的布局由 `layout::DescriptorLayout` 决定：
//!
//! ```text
//! [0] 输出 UAV  [1] 相机 CBV  [2..10) 实例 0 的 SRV 块  [10..18) 实例 1 ...
//! ```
//!
//! 采样器堆只有一个线性/重复采样器。

use tracing::{debug, trace};

use super::instance::Instance;
use super::layout::{DescriptorLayout, HeaderSlot, InstanceSrv, INSTANCE_SRVS};
use super::tlas::TlasBuffer;
use crate::core::error::{RaytracingError, Result};
use crate::gfx::descriptor::{DescriptorHeapDescriptor, DescriptorHeapType, GpuDescriptorHandle, SamplerDesc, ViewDesc};
use crate::gfx::device::{Device, GpuBuffer, GpuDescriptorHeap};

pub struct DescriptorHeaps<D: Device> {
    srv_uav_cbv: D::DescriptorHeap,
    sampler: D::DescriptorHeap,
    layout: DescriptorLayout,
    srv_uav_cbv_increment: u32,
}

impl<D: Device> DescriptorHeaps<D> {
    /// 创建两个着色器可见的描述符堆并写入全部描述符
    pub fn init(
        device: &mut D,
        instances: &[Instance<D>],
        tlas: &TlasBuffer<D>,
        output: &D::Texture,
        ray_gen_constants: &D::Buffer,
    ) -> Result<Self> {
        if tlas.num_instances() as usize != instances.len() {
            return Err(RaytracingError::LayoutMismatch(format!(
                "TLAS has {} instances, descriptor heap was given {}",
                tlas.num_instances(),
                instances.len()
            ))
            .into());
        }

        let layout = DescriptorLayout::new(instances.len() as u32);
        let srv_uav_cbv = device.create_descriptor_heap(
            &DescriptorHeapDescriptor::cbv_srv_uav(layout.total_descriptors()).with_name("Raytracing SRV/UAV/CBV Heap"),
        )?;
        let sampler = device
            .create_descriptor_heap(&DescriptorHeapDescriptor::sampler(1).with_name("Raytracing Sampler Heap"))?;

        device.write_view(
            &srv_uav_cbv,
            DescriptorLayout::header_slot(HeaderSlot::OutputUav),
            &ViewDesc::Texture2DUav(output),
        )?;
        let cbv_size = u32::try_from(ray_gen_constants.size()).map_err(|_| {
            RaytracingError::UnsupportedResource(format!(
                "constant buffer of {} bytes",
                ray_gen_constants.size()
            ))
        })?;
        device.write_view(
            &srv_uav_cbv,
            DescriptorLayout::header_slot(HeaderSlot::RayGenCbv),
            &ViewDesc::ConstantBuffer {
                address: ray_gen_constants.gpu_address(),
                size: cbv_size,
            },
        )?;

        for (i, instance) in instances.iter().enumerate() {
            let material = instance.material();
            for srv in INSTANCE_SRVS {
                let view = match srv {
                    InstanceSrv::Tlas => tlas.acceleration_structure_srv(),
                    InstanceSrv::AlbedoMap => ViewDesc::Texture2DSrv(&material.albedo),
                    InstanceSrv::NormalMap => ViewDesc::Texture2DSrv(&material.normal),
                    InstanceSrv::SpecularMap => ViewDesc::Texture2DSrv(&material.specular),
                    InstanceSrv::ReflectionMap => ViewDesc::Texture2DSrv(&material.reflection),
                    InstanceSrv::RefractionMap => ViewDesc::Texture2DSrv(&material.refraction),
                    InstanceSrv::VertexBuffer => instance.vertex_view().srv(),
                    InstanceSrv::IndexBuffer => instance.index_view().srv(),
                };
                let slot = DescriptorLayout::instance_srv_slot(i as u32, srv);
                trace!(instance = i, ?srv, slot, "Writing instance SRV");
                device.write_view(&srv_uav_cbv, slot, &view)?;
            }
        }

        device.write_sampler(&sampler, 0, &SamplerDesc::linear_wrap())?;

        debug!(
            descriptors = layout.total_descriptors(),
            instances = layout.num_instances(),
            "Initialized raytracing descriptor heaps"
        );

        let srv_uav_cbv_increment = device.descriptor_increment_size(DescriptorHeapType::CbvSrvUav);
        Ok(Self {
            srv_uav_cbv,
            sampler,
            layout,
            srv_uav_cbv_increment,
        })
    }

    pub fn srv_uav_cbv_heap(&self) -> &D::DescriptorHeap {
        &self.srv_uav_cbv
    }

    pub fn sampler_heap(&self) -> &D::DescriptorHeap {
        &self.sampler
    }

    pub fn layout(&self) -> &DescriptorLayout {
        &self.layout
    }

    pub fn descriptor_count(&self) -> u32 {
        self.layout.total_descriptors()
    }

    /// 光线生成着色器的描述符表起点（堆起点）
    pub fn ray_gen_table(&self) -> GpuDescriptorHandle {
        self.srv_uav_cbv.gpu_start()
    }

    /// 实例 `i` 的 SRV 块的 GPU 句柄
    pub fn instance_srv_table(&self, instance: u32) -> GpuDescriptorHandle {
        self.srv_uav_cbv.gpu_start().offset(
            DescriptorLayout::instance_block_start(instance),
            self.srv_uav_cbv_increment,
        )
    }

    pub fn sampler_table(&self) -> GpuDescriptorHandle {
        self.sampler.gpu_start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Matrix4;
    use crate::geometry::{MaterialData, MeshData, ModelData};
    use crate::gfx::descriptor::BufferElements;
    use crate::gfx::headless::{DescriptorRecord, HeadlessContext, HeadlessDevice};
    use crate::gfx::resource::{BufferDesc, TextureDesc};
    use crate::model::Model;
    use crate::raytracing::layout::INSTANCE_SRV_COUNT;
    use crate::raytracing::world::World;

    fn committed_world(device: &mut HeadlessDevice, n: usize) -> World<HeadlessDevice> {
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
        world
    }

    #[test]
    fn test_heap_layout() {
        let mut device = HeadlessDevice::new();
        let world = committed_world(&mut device, 3);
        let output = device.create_texture(&TextureDesc::raytracing_output(8, 8), None).unwrap();
        let cb = device.create_buffer(&BufferDesc::constant(96)).unwrap();
        let tlas = world.tlas().unwrap();

        let heaps = DescriptorHeaps::init(&mut device, world.instances(), tlas, &output, &cb).unwrap();
        assert_eq!(heaps.descriptor_count(), 2 + 8 * 3);
        assert_eq!(heaps.srv_uav_cbv_heap().num_descriptors(), 26);

        let heap = heaps.srv_uav_cbv_heap();
        assert_eq!(
            device.descriptor(heap, 0),
            Some(&DescriptorRecord::Texture2DUav { texture: output.id() })
        );
        assert_eq!(
            device.descriptor(heap, 1),
            Some(&DescriptorRecord::ConstantBuffer { address: cb.gpu_address(), size: 256 })
        );

        for i in 0..3u32 {
            let start = DescriptorLayout::instance_block_start(i);
            assert_eq!(
                device.descriptor(heap, start),
                Some(&DescriptorRecord::AccelerationStructureSrv(tlas.gpu_address()))
            );
            let instance = &world.instances()[i as usize];
            assert_eq!(
                device.descriptor(heap, start + 1),
                Some(&DescriptorRecord::Texture2DSrv { texture: instance.material().albedo.id() })
            );
            assert_eq!(
                device.descriptor(heap, start + 6),
                Some(&DescriptorRecord::BufferSrv {
                    address: instance.vertex_view().buffer().gpu_address(),
                    num_elements: 4,
                    elements: BufferElements::Structured { stride: 44 },
                })
            );
            assert_eq!(
                device.descriptor(heap, start + 7),
                Some(&DescriptorRecord::BufferSrv {
                    address: instance.index_view().buffer().gpu_address(),
                    num_elements: 6,
                    elements: BufferElements::Structured { stride: 4 },
                })
            );
        }

        assert!(matches!(
            device.descriptor(heaps.sampler_heap(), 0),
            Some(DescriptorRecord::Sampler(_))
        ));
    }

    #[test]
    fn test_instance_table_stride() {
        let mut device = HeadlessDevice::new();
        let world = committed_world(&mut device, 4);
        let output = device.create_texture(&TextureDesc::raytracing_output(8, 8), None).unwrap();
        let cb = device.create_buffer(&BufferDesc::constant(96)).unwrap();

        let heaps = DescriptorHeaps::init(&mut device, world.instances(), world.tlas().unwrap(), &output, &cb).unwrap();
        let increment = device.descriptor_increment_size(DescriptorHeapType::CbvSrvUav) as u64;
        for i in 1..4 {
            let delta = heaps.instance_srv_table(i).ptr - heaps.instance_srv_table(i - 1).ptr;
            assert_eq!(delta, INSTANCE_SRV_COUNT as u64 * increment);
        }
        assert_eq!(heaps.instance_srv_table(0).ptr - heaps.ray_gen_table().ptr, 2 * increment);
    }
}
