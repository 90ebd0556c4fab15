/// OBJ 文件加载器
///
/// 使用 tobj crate 加载 Wavefront OBJ 模型及其 MTL 材质，贴图通过 image crate 解码为 RGBA8。
use super::ModelLoader;
use crate::core::error::{MeshLoadError, Result};
use crate::geometry::mesh::{MaterialData, MeshData, ModelData, Subset, TextureData, Vertex};
use std::path::Path;
use tracing::{debug, info, warn};

/// OBJ 格式加载器
///
/// # 特性
///
/// - 自动三角化，使用单一索引
/// - UV 坐标翻转（V轴：1.0 - v）
/// - 缺失法线时按面法线重建
/// - `.obj` 中的每个对象成为一个网格，每个对象只引用一个材质
/// - 贴图：`map_Kd` 反照率、`norm`/`map_Bump` 法线、`map_Ks` 高光、
///   `refl` 反射、`map_d` 折射；缺失时使用 1x1 默认贴图
pub struct ObjLoader;

impl ModelLoader for ObjLoader {
    fn load_from_file(path: &Path) -> Result<ModelData> {
        if !path.exists() {
            return Err(MeshLoadError::FileNotFound(path.to_path_buf()).into());
        }

        let load_options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };

        let (models, materials) = tobj::load_obj(path, &load_options)
            .map_err(|e| MeshLoadError::ParseError(format!("{}: {}", path.display(), e)))?;

        if models.is_empty() {
            return Err(MeshLoadError::InvalidGeometry(format!("{} contains no objects", path.display())).into());
        }

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut model_data = ModelData {
            name: path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Unnamed")
                .to_string(),
            ..Default::default()
        };

        match materials {
            Ok(materials) => {
                for material in &materials {
                    model_data.materials.push(convert_material(material, base_dir));
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to load MTL file, using default material"),
        }

        // 没有材质的对象统一引用末尾的默认材质
        let default_material = model_data.materials.len();
        let mut needs_default = false;

        for model in &models {
            let mesh = &model.mesh;
            let material = match mesh.material_id {
                Some(id) if id < default_material => id,
                _ => {
                    needs_default = true;
                    default_material
                }
            };

            let mesh_data = convert_mesh(&model.name, mesh, material)?;
            debug!(
                name = %mesh_data.name,
                vertices = mesh_data.vertex_count(),
                triangles = mesh_data.triangle_count(),
                material,
                "Loaded OBJ object"
            );
            model_data.meshes.push(mesh_data);
        }

        if needs_default {
            model_data.materials.push(MaterialData::default());
        }

        model_data
            .validate()
            .map_err(MeshLoadError::InvalidGeometry)?;

        info!(
            path = %path.display(),
            meshes = model_data.meshes.len(),
            materials = model_data.materials.len(),
            "Loaded OBJ model"
        );

        Ok(model_data)
    }

    fn supported_extensions() -> &'static [&'static str] {
        &["obj"]
    }
}

fn convert_mesh(name: &str, mesh: &tobj::Mesh, material: usize) -> Result<MeshData> {
    let positions = &mesh.positions;
    let normals = &mesh.normals;
    let texcoords = &mesh.texcoords;

    if positions.len() % 3 != 0 {
        return Err(MeshLoadError::InvalidGeometry(format!(
            "object '{}' has {} position floats",
            name,
            positions.len()
        ))
        .into());
    }

    let vertex_count = positions.len() / 3;
    let has_normals = normals.len() >= vertex_count * 3;
    let has_texcoords = texcoords.len() >= vertex_count * 2;

    let mut mesh_data = MeshData::new(if name.is_empty() { "Unnamed" } else { name });
    mesh_data.vertices = (0..vertex_count)
        .map(|i| {
            let position = [positions[i * 3], positions[i * 3 + 1], positions[i * 3 + 2]];
            let normal = if has_normals {
                [normals[i * 3], normals[i * 3 + 1], normals[i * 3 + 2]]
            } else {
                [0.0; 3]
            };
            let texcoord = if has_texcoords {
                [texcoords[i * 2], 1.0 - texcoords[i * 2 + 1]]
            } else {
                [0.0; 2]
            };
            Vertex::new(position, normal, texcoord)
        })
        .collect();

    mesh_data.subsets.push(Subset {
        material,
        indices: mesh.indices.clone(),
    });

    if !has_normals {
        reconstruct_normals(&mut mesh_data);
    }
    if has_texcoords {
        mesh_data.compute_tangents();
    }

    Ok(mesh_data)
}

/// 按面法线累加得到顶点法线
fn reconstruct_normals(mesh: &mut MeshData) {
    let mut accum = vec![[0.0f32; 3]; mesh.vertices.len()];

    for subset in &mesh.subsets {
        for tri in subset.indices.chunks_exact(3) {
            let p: Vec<[f32; 3]> = tri
                .iter()
                .filter_map(|&i| mesh.vertices.get(i as usize).map(|v| v.position))
                .collect();
            if p.len() != 3 {
                continue;
            }
            let e1 = [p[1][0] - p[0][0], p[1][1] - p[0][1], p[1][2] - p[0][2]];
            let e2 = [p[2][0] - p[0][0], p[2][1] - p[0][1], p[2][2] - p[0][2]];
            let n = [
                e1[1] * e2[2] - e1[2] * e2[1],
                e1[2] * e2[0] - e1[0] * e2[2],
                e1[0] * e2[1] - e1[1] * e2[0],
            ];
            for &i in tri {
                for k in 0..3 {
                    accum[i as usize][k] += n[k];
                }
            }
        }
    }

    for (vertex, n) in mesh.vertices.iter_mut().zip(accum) {
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        vertex.normal = if len > 1e-8 {
            [n[0] / len, n[1] / len, n[2] / len]
        } else {
            [0.0, 1.0, 0.0]
        };
    }
}

fn convert_material(material: &tobj::Material, base_dir: &Path) -> MaterialData {
    let diffuse = material.diffuse.unwrap_or([1.0, 1.0, 1.0]);
    let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut data = MaterialData::solid(
        material.name.clone(),
        [to_byte(diffuse[0]), to_byte(diffuse[1]), to_byte(diffuse[2]), 255],
    );

    let load = |slot: &str, texture: Option<&str>, fallback: &TextureData| -> TextureData {
        match texture {
            Some(file) => load_texture(&base_dir.join(file)).unwrap_or_else(|e| {
                warn!(material = %material.name, slot, error = %e, "Texture failed to load, using default");
                fallback.clone()
            }),
            None => fallback.clone(),
        }
    };

    data.albedo = load("albedo", material.diffuse_texture.as_deref(), &data.albedo);
    data.normal = load(
        "normal",
        material
            .normal_texture
            .as_deref()
            .or_else(|| material.unknown_param.get("map_Bump").map(String::as_str)),
        &data.normal,
    );
    data.specular = load("specular", material.specular_texture.as_deref(), &data.specular);
    data.reflection = load(
        "reflection",
        material.unknown_param.get("refl").map(String::as_str),
        &data.reflection,
    );
    data.refraction = load("refraction", material.dissolve_texture.as_deref(), &data.refraction);
    data
}

/// 解码贴图为 RGBA8
pub fn load_texture(path: &Path) -> Result<TextureData> {
    let image = image::open(path)
        .map_err(|e| MeshLoadError::TextureDecode(format!("{}: {}", path.display(), e)))?
        .to_rgba8();

    Ok(TextureData {
        width: image.width(),
        height: image.height(),
        pixels: image.into_raw(),
    })
}
