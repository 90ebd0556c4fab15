/// CPU 侧的模型数据
///
/// 加载器只产出这里的数据结构，不涉及 GPU 资源；
/// `model` 模块负责把它们上传到设备。

use bytemuck::{Pod, Zeroable};

/// 命中着色器读取的顶点结构（`StructuredBuffer<Vertex>`）
///
/// # 内存布局
///
/// - position: 12 bytes
/// - normal: 12 bytes
/// - tangent: 12 bytes
/// - texcoord: 8 bytes
/// - **总计**: 44 bytes
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub texcoord: [f32; 2],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub fn new(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tangent: [0.0; 3],
            texcoord,
        }
    }
}

/// RGBA8 像素数据
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// 1x1 纯色纹理
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }

    /// 默认法线（切线空间 +Z）
    pub fn flat_normal() -> Self {
        Self::solid([128, 128, 255, 255])
    }
}

/// 材质数据
///
/// 每个贴图在缺失时都有一个 1x1 的默认值，所以命中着色器总能拿到 5 张贴图。
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    pub name: String,
    pub albedo: TextureData,
    pub normal: TextureData,
    pub specular: TextureData,
    pub reflection: TextureData,
    pub refraction: TextureData,
}

impl MaterialData {
    /// 只有反照率颜色的材质
    pub fn solid(name: impl Into<String>, albedo: [u8; 4]) -> Self {
        Self {
            name: name.into(),
            albedo: TextureData::solid(albedo),
            normal: TextureData::flat_normal(),
            specular: TextureData::solid([0, 0, 0, 255]),
            reflection: TextureData::solid([0, 0, 0, 255]),
            refraction: TextureData::solid([0, 0, 0, 255]),
        }
    }
}

impl Default for MaterialData {
    fn default() -> Self {
        Self::solid("Default", [255, 255, 255, 255])
    }
}

/// 使用同一材质的一组三角形
#[derive(Debug, Clone, PartialEq)]
pub struct Subset {
    /// `ModelData::materials` 中的下标
    pub material: usize,
    pub indices: Vec<u32>,
}

impl Subset {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// 共享一个顶点缓冲区的网格
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub subsets: Vec<Subset>,
}

impl MeshData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertices: Vec::new(),
            subsets: Vec::new(),
        }
    }

    /// XZ 平面上的正方形（两个三角形，法线 +Y）
    pub fn quad(name: impl Into<String>, half_size: f32, material: usize) -> Self {
        let s = half_size;
        let mut mesh = Self::new(name);
        mesh.vertices = vec![
            Vertex::new([-s, 0.0, -s], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex::new([s, 0.0, -s], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex::new([s, 0.0, s], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex::new([-s, 0.0, s], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];
        mesh.subsets.push(Subset {
            material,
            indices: vec![0, 2, 1, 0, 3, 2],
        });
        mesh.compute_tangents();
        mesh
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.subsets.iter().map(Subset::triangle_count).sum()
    }

    /// 按三角形累加切线（基于 UV 梯度），再做 Gram-Schmidt 正交化
    pub fn compute_tangents(&mut self) {
        let mut tangents = vec![[0.0f32; 3]; self.vertices.len()];

        for subset in &self.subsets {
            for tri in subset.indices.chunks_exact(3) {
                let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
                let (v0, v1, v2) = (&self.vertices[i0], &self.vertices[i1], &self.vertices[i2]);

                let e1 = sub(v1.position, v0.position);
                let e2 = sub(v2.position, v0.position);
                let du1 = v1.texcoord[0] - v0.texcoord[0];
                let dv1 = v1.texcoord[1] - v0.texcoord[1];
                let du2 = v2.texcoord[0] - v0.texcoord[0];
                let dv2 = v2.texcoord[1] - v0.texcoord[1];

                let det = du1 * dv2 - du2 * dv1;
                if det.abs() < 1e-8 {
                    continue;
                }
                let r = 1.0 / det;
                let t = [
                    (e1[0] * dv2 - e2[0] * dv1) * r,
                    (e1[1] * dv2 - e2[1] * dv1) * r,
                    (e1[2] * dv2 - e2[2] * dv1) * r,
                ];

                for &i in &[i0, i1, i2] {
                    for k in 0..3 {
                        tangents[i][k] += t[k];
                    }
                }
            }
        }

        for (vertex, t) in self.vertices.iter_mut().zip(tangents) {
            let n = vertex.normal;
            let d = dot(n, t);
            let ortho = [t[0] - n[0] * d, t[1] - n[1] * d, t[2] - n[2] * d];
            let len = dot(ortho, ortho).sqrt();
            vertex.tangent = if len > 1e-8 {
                [ortho[0] / len, ortho[1] / len, ortho[2] / len]
            } else {
                [1.0, 0.0, 0.0]
            };
        }
    }

    /// 索引越界或不是三角形列表时返回错误描述
    pub fn validate(&self) -> Result<(), String> {
        if self.vertices.is_empty() {
            return Err(format!("mesh '{}' has no vertices", self.name));
        }
        for subset in &self.subsets {
            if subset.indices.is_empty() || subset.indices.len() % 3 != 0 {
                return Err(format!(
                    "mesh '{}' has a subset with {} indices",
                    self.name,
                    subset.indices.len()
                ));
            }
            if let Some(&bad) = subset.indices.iter().find(|&&i| i as usize >= self.vertices.len()) {
                return Err(format!(
                    "mesh '{}' index {} out of range ({} vertices)",
                    self.name,
                    bad,
                    self.vertices.len()
                ));
            }
        }
        Ok(())
    }
}

/// 一个模型文件的全部内容
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelData {
    pub name: String,
    pub meshes: Vec<MeshData>,
    pub materials: Vec<MaterialData>,
}

impl ModelData {
    /// 网格/材质对的数量，即注册后产生的实例数量
    pub fn part_count(&self) -> usize {
        self.meshes.iter().map(|m| m.subsets.len()).sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        for mesh in &self.meshes {
            mesh.validate()?;
            if let Some(subset) = mesh.subsets.iter().find(|s| s.material >= self.materials.len()) {
                return Err(format!(
                    "mesh '{}' references material {} of {}",
                    mesh.name,
                    subset.material,
                    self.materials.len()
                ));
            }
        }
        Ok(())
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
