//! 设备上的模型资源
//!
//! `Model` 由网格组成，每个网格有一个顶点缓冲区和若干个部件；
//! 每个部件有自己的索引缓冲区并引用一个材质。
//! 光线追踪实例会共享这里的缓冲区和材质（`Arc`）。

use std::sync::Arc;

use tracing::debug;

use crate::core::error::{MeshLoadError, Result};
use crate::core::math::Matrix4;
use crate::geometry::{MaterialData, ModelData, TextureData, Vertex};
use crate::gfx::device::Device;
use crate::gfx::resource::{BufferDesc, Format, TextureDesc};

/// 材质的五张贴图
pub struct Material<D: Device> {
    pub name: String,
    pub albedo: D::Texture,
    pub normal: D::Texture,
    pub specular: D::Texture,
    pub reflection: D::Texture,
    pub refraction: D::Texture,
}

impl<D: Device> Material<D> {
    pub fn upload(device: &mut D, data: &MaterialData) -> Result<Self> {
        let mut texture = |slot: &str, texture: &TextureData| -> Result<D::Texture> {
            if texture.pixels.len() as u64 != texture.width as u64 * texture.height as u64 * 4 {
                return Err(MeshLoadError::TextureDecode(format!(
                    "{} map of material '{}' has {} bytes for {}x{}",
                    slot,
                    data.name,
                    texture.pixels.len(),
                    texture.width,
                    texture.height
                ))
                .into());
            }
            let desc = TextureDesc::shader_resource(texture.width, texture.height, Format::Rgba8Unorm)
                .with_name(format!("{} {}", data.name, slot));
            device.create_texture(&desc, Some(&texture.pixels))
        };

        Ok(Self {
            name: data.name.clone(),
            albedo: texture("albedo", &data.albedo)?,
            normal: texture("normal", &data.normal)?,
            specular: texture("specular", &data.specular)?,
            reflection: texture("reflection", &data.reflection)?,
            refraction: texture("refraction", &data.refraction)?,
        })
    }
}

/// 顶点缓冲区（`Vertex` 数组，位置位于偏移 0）
pub struct VertexBuffer<D: Device> {
    pub buffer: Arc<D::Buffer>,
    pub stride: u32,
    pub count: u32,
}

/// 索引缓冲区（32 位索引）
pub struct IndexBuffer<D: Device> {
    pub buffer: Arc<D::Buffer>,
    pub format: Format,
    pub count: u32,
}

/// 使用同一个材质的一组三角形
pub struct MeshPart<D: Device> {
    pub index_buffer: IndexBuffer<D>,
    pub material: Arc<Material<D>>,
}

pub struct Mesh<D: Device> {
    pub name: String,
    pub vertex_buffer: VertexBuffer<D>,
    pub parts: Vec<MeshPart<D>>,
}

/// 上传到设备的模型
pub struct Model<D: Device> {
    pub name: String,
    pub meshes: Vec<Mesh<D>>,
    /// 模型的世界变换（列向量约定）
    pub world_matrix: Matrix4,
}

impl<D: Device> Model<D> {
    /// 把 CPU 侧的模型数据上传到设备
    ///
    /// 顶点和索引缓冲区放在上传堆中，加速结构构建和命中着色器都直接读取它们。
    pub fn upload(device: &mut D, data: &ModelData, world_matrix: Matrix4) -> Result<Self> {
        data.validate().map_err(MeshLoadError::InvalidGeometry)?;

        let materials = data
            .materials
            .iter()
            .map(|m| Material::upload(device, m).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let mut meshes = Vec::with_capacity(data.meshes.len());
        for mesh in &data.meshes {
            let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
            let vertex_buffer = device.create_buffer(
                &BufferDesc::upload(vertex_bytes.len() as u64).with_name(format!("{} Vertices", mesh.name)),
            )?;
            device.write_buffer(&vertex_buffer, 0, vertex_bytes)?;

            let mut parts = Vec::with_capacity(mesh.subsets.len());
            for (i, subset) in mesh.subsets.iter().enumerate() {
                let index_bytes: &[u8] = bytemuck::cast_slice(&subset.indices);
                let index_buffer = device.create_buffer(
                    &BufferDesc::upload(index_bytes.len() as u64).with_name(format!("{} Indices {}", mesh.name, i)),
                )?;
                device.write_buffer(&index_buffer, 0, index_bytes)?;

                parts.push(MeshPart {
                    index_buffer: IndexBuffer {
                        buffer: Arc::new(index_buffer),
                        format: Format::R32Uint,
                        count: subset.indices.len() as u32,
                    },
                    material: Arc::clone(&materials[subset.material]),
                });
            }

            debug!(mesh = %mesh.name, vertices = mesh.vertices.len(), parts = parts.len(), "Uploaded mesh");
            meshes.push(Mesh {
                name: mesh.name.clone(),
                vertex_buffer: VertexBuffer {
                    buffer: Arc::new(vertex_buffer),
                    stride: Vertex::STRIDE,
                    count: mesh.vertices.len() as u32,
                },
                parts,
            });
        }

        Ok(Self {
            name: data.name.clone(),
            meshes,
            world_matrix,
        })
    }

    /// 网格/材质对的数量
    pub fn part_count(&self) -> usize {
        self.meshes.iter().map(|m| m.parts.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MeshData;
    use crate::gfx::device::GpuBuffer;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_upload_shares_materials() {
        let data = ModelData {
            name: "Pair".to_string(),
            meshes: vec![MeshData::quad("A", 1.0, 0), MeshData::quad("B", 2.0, 0)],
            materials: vec![MaterialData::default()],
        };

        let mut device = HeadlessDevice::new();
        let model = Model::upload(&mut device, &data, Matrix4::identity()).unwrap();

        assert_eq!(model.part_count(), 2);
        let a = &model.meshes[0].parts[0].material;
        let b = &model.meshes[1].parts[0].material;
        assert!(Arc::ptr_eq(a, b));

        let vb = &model.meshes[0].vertex_buffer;
        assert_eq!(vb.count, 4);
        assert_eq!(vb.buffer.size(), 4 * 44);
        let contents = device.buffer_contents(&vb.buffer).unwrap();
        assert_eq!(&contents[12..24], bytemuck::cast_slice::<f32, u8>(&[0.0, 1.0, 0.0]));

        let ib = &model.meshes[0].parts[0].index_buffer;
        assert_eq!(ib.count, 6);
        assert_eq!(ib.format, Format::R32Uint);
    }

    #[test]
    fn test_upload_rejects_bad_texture() {
        let mut material = MaterialData::default();
        material.albedo.width = 2;
        let data = ModelData {
            name: "Bad".to_string(),
            meshes: vec![MeshData::quad("A", 1.0, 0)],
            materials: vec![material],
        };

        let mut device = HeadlessDevice::new();
        assert!(Model::upload(&mut device, &data, Matrix4::identity()).is_err());
    }
}
