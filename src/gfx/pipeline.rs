//! 根签名与光线追踪管线描述
//!
//! 光线追踪管线（状态对象）由若干子对象组成：DXIL 库、命中组、
//! 局部根签名及其导出关联、着色器配置、管线配置和全局根签名。
//! 这里只描述这些子对象，具体创建由后端完成。

use std::path::Path;

use super::device::Device;
use crate::core::error::{GraphicsError, Result};

/// 着色器标识符大小（字节）
pub const SHADER_IDENTIFIER_SIZE: usize = 32;

/// 着色器记录对齐要求（字节）
pub const SHADER_RECORD_ALIGNMENT: u64 = 32;

/// 着色器表起始地址对齐要求（字节）
pub const SHADER_TABLE_ALIGNMENT: u64 = 64;

/// 光线递归深度的硬件上限
pub const MAX_DECLARABLE_TRACE_RECURSION_DEPTH: u32 = 31;

/// 描述符范围类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    Srv,
    Uav,
    Cbv,
    Sampler,
}

/// 描述符表中的一段范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRange {
    pub range_type: DescriptorRangeType,
    pub num_descriptors: u32,
    pub base_shader_register: u32,
    pub register_space: u32,
    /// 距离表起始位置的描述符偏移
    pub offset_in_descriptors: u32,
}

impl DescriptorRange {
    pub fn new(range_type: DescriptorRangeType, num_descriptors: u32, base_shader_register: u32, offset_in_descriptors: u32) -> Self {
        Self {
            range_type,
            num_descriptors,
            base_shader_register,
            register_space: 0,
            offset_in_descriptors,
        }
    }
}

/// 根参数（目前只使用描述符表）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootParameter {
    DescriptorTable(Vec<DescriptorRange>),
}

/// 根签名描述
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    /// 是否为局部根签名
    pub local: bool,
    pub name: Option<String>,
}

impl RootSignatureDesc {
    /// 空的全局根签名
    pub fn empty_global() -> Self {
        Self {
            parameters: Vec::new(),
            local: false,
            name: Some("Global Root Signature".to_string()),
        }
    }

    /// 局部根签名
    pub fn local(parameters: Vec<RootParameter>) -> Self {
        Self {
            parameters,
            local: true,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 描述符表参数数量（每个参数在着色器记录中占 8 字节）
    pub fn table_count(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| matches!(p, RootParameter::DescriptorTable(_)))
            .count()
    }
}

/// 命中组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroupDesc {
    pub export: String,
    pub closest_hit: Option<String>,
    pub any_hit: Option<String>,
}

/// 局部根签名及其关联的导出名
pub struct LocalRootSignatureAssociation<'a, D: Device + ?Sized> {
    pub root_signature: &'a D::RootSignature,
    pub exports: Vec<String>,
}

/// 光线追踪管线描述
pub struct RaytracingPipelineDesc<'a, D: Device + ?Sized> {
    pub library: &'a ShaderLibrary,
    /// 从 DXIL 库导出的入口点
    pub exports: Vec<String>,
    pub hit_groups: Vec<HitGroupDesc>,
    pub local_root_signatures: Vec<LocalRootSignatureAssociation<'a, D>>,
    pub global_root_signature: &'a D::RootSignature,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_trace_recursion_depth: u32,
}

impl<D: Device + ?Sized> RaytracingPipelineDesc<'_, D> {
    /// 基本一致性检查：关联的导出名必须存在，命中组引用的入口点必须从库中导出
    pub fn validate(&self) -> Result<()> {
        let is_library_export = |name: &str| self.exports.iter().any(|e| e == name);
        let is_hit_group = |name: &str| self.hit_groups.iter().any(|g| g.export == name);

        for group in &self.hit_groups {
            for shader in group.closest_hit.iter().chain(group.any_hit.iter()) {
                if !is_library_export(shader) {
                    return Err(GraphicsError::PipelineCreation(format!(
                        "hit group '{}' imports unknown shader '{}'",
                        group.export, shader
                    ))
                    .into());
                }
            }
        }

        for association in &self.local_root_signatures {
            for export in &association.exports {
                if !is_library_export(export) && !is_hit_group(export) {
                    return Err(GraphicsError::PipelineCreation(format!(
                        "local root signature associated with unknown export '{}'",
                        export
                    ))
                    .into());
                }
            }
        }

        if self.max_trace_recursion_depth > MAX_DECLARABLE_TRACE_RECURSION_DEPTH {
            return Err(GraphicsError::PipelineCreation(format!(
                "trace recursion depth {} exceeds {}",
                self.max_trace_recursion_depth, MAX_DECLARABLE_TRACE_RECURSION_DEPTH
            ))
            .into());
        }

        Ok(())
    }

    /// 可以查询着色器标识符的导出：光线生成/未命中入口点和命中组
    ///
    /// 被命中组引用的入口点本身没有标识符。
    pub fn identifiable_exports(&self) -> Vec<String> {
        let imported = |name: &str| {
            self.hit_groups.iter().any(|g| {
                g.closest_hit.as_deref() == Some(name) || g.any_hit.as_deref() == Some(name)
            })
        };

        self.exports
            .iter()
            .filter(|e| !imported(e))
            .cloned()
            .chain(self.hit_groups.iter().map(|g| g.export.clone()))
            .collect()
    }
}

/// 着色器标识符（32 字节，不透明）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderIdentifier(pub [u8; SHADER_IDENTIFIER_SIZE]);

impl ShaderIdentifier {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// 编译好的 DXIL 着色器库
///
/// 着色器由 dxc 离线编译为 DXIL 容器（`lib_6_3` 目标），运行时只做容器头校验。
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    bytecode: Vec<u8>,
}

/// DXIL/DXBC 容器魔数
const CONTAINER_MAGIC: &[u8; 4] = b"DXBC";
/// 容器头大小：魔数 + 16 字节哈希 + 版本 + 总大小 + 块数量
const CONTAINER_HEADER_SIZE: usize = 32;

impl ShaderLibrary {
    /// 从文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytecode = std::fs::read(path).map_err(|e| {
            GraphicsError::ShaderCompilation(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::from_bytes(bytecode)
    }

    /// 从内存中的字节码创建
    pub fn from_bytes(bytecode: Vec<u8>) -> Result<Self> {
        if bytecode.len() < CONTAINER_HEADER_SIZE || &bytecode[0..4] != CONTAINER_MAGIC {
            return Err(GraphicsError::ShaderCompilation(
                "shader library is not a DXIL container".to_string(),
            )
            .into());
        }

        let mut size_bytes = [0u8; 4];
        size_bytes.copy_from_slice(&bytecode[24..28]);
        let declared_size = u32::from_le_bytes(size_bytes) as usize;
        if declared_size != bytecode.len() {
            return Err(GraphicsError::ShaderCompilation(format!(
                "DXIL container declares {} bytes but holds {}",
                declared_size,
                bytecode.len()
            ))
            .into());
        }

        Ok(Self { bytecode })
    }

    /// 不含任何块的空容器，供无 GPU 后端使用
    pub fn empty_container() -> Self {
        let mut bytecode = vec![0u8; CONTAINER_HEADER_SIZE];
        bytecode[0..4].copy_from_slice(CONTAINER_MAGIC);
        bytecode[20..24].copy_from_slice(&1u32.to_le_bytes());
        bytecode[24..28].copy_from_slice(&(CONTAINER_HEADER_SIZE as u32).to_le_bytes());
        Self { bytecode }
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_container_is_valid() {
        let library = ShaderLibrary::empty_container();
        let reparsed = ShaderLibrary::from_bytes(library.bytecode().to_vec()).unwrap();
        assert_eq!(reparsed.bytecode().len(), 32);
    }

    #[test]
    fn test_rejects_non_container() {
        assert!(ShaderLibrary::from_bytes(b"not a shader".to_vec()).is_err());

        let mut truncated = ShaderLibrary::empty_container().bytecode().to_vec();
        truncated.extend_from_slice(&[0u8; 8]);
        assert!(ShaderLibrary::from_bytes(truncated).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(ShaderLibrary::from_file("does/not/exist.dxil").is_err());
    }

    #[test]
    fn test_table_count() {
        let desc = RootSignatureDesc::local(vec![
            RootParameter::DescriptorTable(vec![DescriptorRange::new(DescriptorRangeType::Srv, 8, 0, 0)]),
            RootParameter::DescriptorTable(vec![DescriptorRange::new(DescriptorRangeType::Sampler, 1, 0, 0)]),
        ]);
        assert_eq!(desc.table_count(), 2);
        assert!(desc.local);
        assert_eq!(RootSignatureDesc::empty_global().table_count(), 0);
    }
}
