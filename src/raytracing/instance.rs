//! 光线追踪实例
//!
//! 每个网格/材质对对应一个实例，实例的顺序决定了它在 TLAS、描述符堆和着色器表中的位置。

use std::sync::Arc;

use crate::core::math::Matrix4;
use crate::geometry::Vertex;
use crate::gfx::accel::TrianglesGeometryDesc;
use crate::gfx::descriptor::{BufferElements, ViewDesc};
use crate::gfx::device::{Device, GpuBuffer};
use crate::gfx::resource::Format;
use crate::model::{Material, Mesh, MeshPart};

/// 命中着色器读取的结构化缓冲区视图
///
/// 缓冲区与网格共享，视图本身归实例所有。
pub struct StructuredBufferView<D: Device> {
    buffer: Arc<D::Buffer>,
    num_elements: u32,
    stride: u32,
}

impl<D: Device> StructuredBufferView<D> {
    pub fn new(buffer: Arc<D::Buffer>, num_elements: u32, stride: u32) -> Self {
        Self {
            buffer,
            num_elements,
            stride,
        }
    }

    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub fn num_elements(&self) -> u32 {
        self.num_elements
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// SRV 描述
    pub fn srv(&self) -> ViewDesc<'_, D> {
        ViewDesc::BufferSrv {
            buffer: self.buffer.as_ref(),
            num_elements: self.num_elements,
            elements: BufferElements::Structured { stride: self.stride },
        }
    }
}

pub struct Instance<D: Device> {
    geometry: TrianglesGeometryDesc,
    vertex_view: StructuredBufferView<D>,
    index_view: StructuredBufferView<D>,
    material: Arc<Material<D>>,
    world_matrix: Matrix4,
}

impl<D: Device> Instance<D> {
    /// 由网格的一个部件创建实例
    pub fn new(mesh: &Mesh<D>, part: &MeshPart<D>, world_matrix: Matrix4) -> Self {
        let vertex_buffer = &mesh.vertex_buffer;
        let index_buffer = &part.index_buffer;

        let geometry = TrianglesGeometryDesc {
            vertex_buffer: vertex_buffer.buffer.gpu_address(),
            vertex_stride: vertex_buffer.stride as u64,
            vertex_count: vertex_buffer.count,
            vertex_format: Format::Rgb32Float,
            index_buffer: index_buffer.buffer.gpu_address(),
            index_count: index_buffer.count,
            index_format: index_buffer.format,
            opaque: true,
        };

        Self {
            geometry,
            vertex_view: StructuredBufferView::new(
                Arc::clone(&vertex_buffer.buffer),
                vertex_buffer.count,
                Vertex::STRIDE,
            ),
            index_view: StructuredBufferView::new(
                Arc::clone(&index_buffer.buffer),
                index_buffer.count,
                index_buffer.format.size_in_bytes(),
            ),
            material: Arc::clone(&part.material),
            world_matrix,
        }
    }

    pub fn geometry(&self) -> &TrianglesGeometryDesc {
        &self.geometry
    }

    pub fn vertex_view(&self) -> &StructuredBufferView<D> {
        &self.vertex_view
    }

    pub fn index_view(&self) -> &StructuredBufferView<D> {
        &self.index_view
    }

    pub fn material(&self) -> &Material<D> {
        &self.material
    }

    pub fn world_matrix(&self) -> &Matrix4 {
        &self.world_matrix
    }

    pub fn set_world_matrix(&mut self, world_matrix: Matrix4) {
        self.world_matrix = world_matrix;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{MaterialData, MeshData, ModelData};
    use crate::gfx::headless::HeadlessDevice;
    use crate::model::Model;

    #[test]
    fn test_instance_references_mesh_buffers() {
        let data = ModelData {
            name: "Quad".to_string(),
            meshes: vec![MeshData::quad("A", 1.0, 0)],
            materials: vec![MaterialData::default()],
        };
        let mut device = HeadlessDevice::new();
        let model = Model::upload(&mut device, &data, Matrix4::identity()).unwrap();

        let mesh = &model.meshes[0];
        let instance = Instance::new(mesh, &mesh.parts[0], model.world_matrix);

        let geometry = instance.geometry();
        assert_eq!(geometry.vertex_buffer, mesh.vertex_buffer.buffer.gpu_address());
        assert_eq!(geometry.index_buffer, mesh.parts[0].index_buffer.buffer.gpu_address());
        assert_eq!(geometry.vertex_stride, 44);
        assert_eq!(geometry.triangle_count(), 2);
        assert!(geometry.opaque);

        assert_eq!(instance.vertex_view().num_elements(), 4);
        assert_eq!(instance.index_view().stride(), 4);
        assert_eq!(Arc::strong_count(&mesh.vertex_buffer.buffer), 2);
    }
}
