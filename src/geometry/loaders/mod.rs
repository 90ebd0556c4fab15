/// 模型加载器模块
///
/// 提供统一的模型加载接口和各种格式的具体实现。
///
/// # 支持的格式
///
/// - **OBJ**: Wavefront OBJ 格式（使用 tobj crate）
use crate::core::error::{MeshLoadError, Result};
use crate::geometry::mesh::ModelData;
use std::path::Path;

pub mod obj_loader;

pub use obj_loader::ObjLoader;

/// 模型加载器 trait
///
/// 加载器是无状态的，只返回 CPU 侧的 `ModelData`，不涉及 GPU 资源。
pub trait ModelLoader {
    /// 从文件路径加载模型
    ///
    /// # 错误
    ///
    /// - 文件不存在或无法读取
    /// - 文件格式错误或损坏
    /// - 数据验证失败
    fn load_from_file(path: &Path) -> Result<ModelData>;

    /// 支持的文件扩展名（小写，不含点号）
    fn supported_extensions() -> &'static [&'static str];
}

/// 根据文件扩展名选择合适的加载器
pub fn load_model(path: &Path) -> Result<ModelData> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| MeshLoadError::ParseError(format!("{} has no file extension", path.display())))?;

    if ObjLoader::supported_extensions().contains(&extension.as_str()) {
        ObjLoader::load_from_file(path)
    } else {
        Err(MeshLoadError::ParseError(format!("unsupported model format: .{}", extension)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_extension() {
        assert!(load_model(Path::new("model.tkm")).is_err());
        assert!(load_model(Path::new("model")).is_err());
    }
}
