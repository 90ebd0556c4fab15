//! 加速结构与光线派发描述

use bytemuck::{Pod, Zeroable};

use super::resource::{Format, GpuAddress};

/// 实例 ID / 命中组贡献值的位宽
pub const INSTANCE_FIELD_BITS: u32 = 24;

/// 24 位字段可以表示的值的数量
pub const INSTANCE_FIELD_LIMIT: usize = 1 << INSTANCE_FIELD_BITS;

const INSTANCE_FIELD_MASK: u32 = (1 << INSTANCE_FIELD_BITS) - 1;

/// 三角形几何描述（BLAS 输入）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrianglesGeometryDesc {
    pub vertex_buffer: GpuAddress,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub vertex_format: Format,
    pub index_buffer: GpuAddress,
    pub index_count: u32,
    pub index_format: Format,
    pub opaque: bool,
}

impl TrianglesGeometryDesc {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// 构建标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildFlags {
    pub allow_update: bool,
    pub prefer_fast_trace: bool,
    pub perform_update: bool,
}

impl BuildFlags {
    pub fn fast_trace() -> Self {
        Self { prefer_fast_trace: true, ..Default::default() }
    }
}

/// 加速结构构建输入
#[derive(Debug, Clone, Copy)]
pub enum AccelerationStructureInputs<'a> {
    BottomLevel {
        geometries: &'a [TrianglesGeometryDesc],
        flags: BuildFlags,
    },
    TopLevel {
        instance_descs: GpuAddress,
        num_instances: u32,
        flags: BuildFlags,
    },
}

impl AccelerationStructureInputs<'_> {
    pub fn flags(&self) -> BuildFlags {
        match self {
            AccelerationStructureInputs::BottomLevel { flags, .. } => *flags,
            AccelerationStructureInputs::TopLevel { flags, .. } => *flags,
        }
    }

    pub fn is_top_level(&self) -> bool {
        matches!(self, AccelerationStructureInputs::TopLevel { .. })
    }
}

/// 预构建信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrebuildInfo {
    pub result_data_max_size: u64,
    pub scratch_data_size: u64,
    pub update_scratch_data_size: u64,
}

/// 加速结构构建命令
#[derive(Debug, Clone, Copy)]
pub struct BuildAccelerationStructureDesc<'a> {
    pub inputs: AccelerationStructureInputs<'a>,
    pub dest: GpuAddress,
    /// 增量更新时的源加速结构
    pub source: Option<GpuAddress>,
    pub scratch: GpuAddress,
}

/// GPU 实例描述符（与 `D3D12_RAYTRACING_INSTANCE_DESC` 布局一致，64 字节）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RaytracingInstanceDesc {
    /// 3x4 行主序变换
    pub transform: [f32; 12],
    /// 低 24 位：InstanceID，高 8 位：InstanceMask
    pub id_and_mask: u32,
    /// 低 24 位：命中组贡献值，高 8 位：实例标志
    pub contribution_and_flags: u32,
    pub acceleration_structure: u64,
}

impl RaytracingInstanceDesc {
    pub const SIZE: usize = std::mem::size_of::<RaytracingInstanceDesc>();

    pub fn new(
        transform: [f32; 12],
        instance_id: u32,
        mask: u8,
        hit_group_contribution: u32,
        flags: u8,
        acceleration_structure: GpuAddress,
    ) -> Self {
        Self {
            transform,
            id_and_mask: (instance_id & INSTANCE_FIELD_MASK) | ((mask as u32) << INSTANCE_FIELD_BITS),
            contribution_and_flags: (hit_group_contribution & INSTANCE_FIELD_MASK)
                | ((flags as u32) << INSTANCE_FIELD_BITS),
            acceleration_structure: acceleration_structure.0,
        }
    }

    pub fn instance_id(&self) -> u32 {
        self.id_and_mask & INSTANCE_FIELD_MASK
    }

    pub fn instance_mask(&self) -> u8 {
        (self.id_and_mask >> INSTANCE_FIELD_BITS) as u8
    }

    pub fn hit_group_contribution(&self) -> u32 {
        self.contribution_and_flags & INSTANCE_FIELD_MASK
    }

    pub fn flags(&self) -> u8 {
        (self.contribution_and_flags >> INSTANCE_FIELD_BITS) as u8
    }
}

/// 着色器表中的一段区域
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShaderTableRegion {
    pub start: GpuAddress,
    pub size: u64,
    pub stride: u64,
}

/// 光线派发参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchRaysDesc {
    /// 光线生成记录（只使用 start 与 size）
    pub ray_generation: ShaderTableRegion,
    pub miss: ShaderTableRegion,
    pub hit_group: ShaderTableRegion,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_desc_layout() {
        assert_eq!(RaytracingInstanceDesc::SIZE, 64);
    }

    #[test]
    fn test_instance_desc_bitfields() {
        let desc = RaytracingInstanceDesc::new([0.0; 12], 5, 0xFF, 10, 0, GpuAddress(0x2000));
        assert_eq!(desc.instance_id(), 5);
        assert_eq!(desc.instance_mask(), 0xFF);
        assert_eq!(desc.hit_group_contribution(), 10);
        assert_eq!(desc.flags(), 0);
        assert_eq!(desc.acceleration_structure, 0x2000);

        let bytes = bytemuck::bytes_of(&desc);
        assert_eq!(&bytes[48..52], &(5u32 | 0xFF00_0000).to_le_bytes());
    }

    #[test]
    fn test_triangle_count() {
        let geometry = TrianglesGeometryDesc {
            vertex_buffer: GpuAddress(0x100),
            vertex_stride: 12,
            vertex_count: 4,
            vertex_format: Format::Rgb32Float,
            index_buffer: GpuAddress(0x200),
            index_count: 6,
            index_format: Format::R32Uint,
            opaque: true,
        };
        assert_eq!(geometry.triangle_count(), 2);
    }
}
