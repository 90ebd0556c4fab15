/// 几何体加载模块
///
/// # 架构设计
///
/// ```text
/// 文件 (OBJ + MTL + 贴图)
///     ↓
/// Loader (ObjLoader)
///     ↓
/// ModelData (CPU侧数据)
///     ↓
/// model::Model (上传到设备)
/// ```

pub mod loaders;
pub mod mesh;

pub use mesh::{MaterialData, MeshData, ModelData, Subset, TextureData, Vertex};
