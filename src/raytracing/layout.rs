//! 着色器与描述符布局
//!
//! PSO、着色器表和描述符堆必须对以下内容达成一致：
//!
//! - 每个入口点使用哪种局部根签名
//! - 命中组的数量和顺序
//! - 每个实例的 SRV 块的顺序和数量
//!
//! 这些内容只在本模块声明一次，其余模块都从这里读取。

use bytemuck::{Pod, Zeroable};

/// 局部根签名种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalRootSignatureKind {
    /// 光线生成：一个描述符表（UAV + CBV + SRV）
    RayGen,
    /// PBR 材质命中：SRV 表 + 采样器表
    PbrMaterialHit,
    /// 无参数
    Empty,
}

impl LocalRootSignatureKind {
    pub const ALL: [LocalRootSignatureKind; 3] = [
        LocalRootSignatureKind::RayGen,
        LocalRootSignatureKind::PbrMaterialHit,
        LocalRootSignatureKind::Empty,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LocalRootSignatureKind::RayGen => "RayGen Local Root Signature",
            LocalRootSignatureKind::PbrMaterialHit => "PBR Material Hit Local Root Signature",
            LocalRootSignatureKind::Empty => "Empty Local Root Signature",
        }
    }

    /// 描述符表数量，也就是着色器记录中 GPU 描述符句柄的数量
    pub const fn table_count(&self) -> usize {
        match self {
            LocalRootSignatureKind::RayGen => 1,
            LocalRootSignatureKind::PbrMaterialHit => 2,
            LocalRootSignatureKind::Empty => 0,
        }
    }
}

/// 着色器类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderCategory {
    RayGenerator,
    Miss,
    ClosestHit,
}

/// 命中组
///
/// 枚举值就是命中组在每个实例的命中组记录中的下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitGroupKind {
    /// 相机光线
    PbrCameraRay = 0,
    /// 阴影光线
    PbrShadowRay = 1,
}

impl HitGroupKind {
    pub const COUNT: usize = 2;

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// 着色器入口点的静态信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderEntry {
    pub entry_point: &'static str,
    pub local_root_signature: LocalRootSignatureKind,
    pub category: ShaderCategory,
    /// 最近命中着色器所属的命中组
    pub hit_group: Option<HitGroupKind>,
}

/// 命中组的静态信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitGroupEntry {
    pub kind: HitGroupKind,
    pub export: &'static str,
    pub closest_hit: &'static str,
    pub any_hit: Option<&'static str>,
}

/// 着色器库导出的全部入口点
///
/// 名字必须和 `assets/shaders/raytracing.hlsl` 中的入口点一致。
pub const SHADER_ENTRIES: [ShaderEntry; 5] = [
    ShaderEntry {
        entry_point: "rayGen",
        local_root_signature: LocalRootSignatureKind::RayGen,
        category: ShaderCategory::RayGenerator,
        hit_group: None,
    },
    ShaderEntry {
        entry_point: "miss",
        local_root_signature: LocalRootSignatureKind::Empty,
        category: ShaderCategory::Miss,
        hit_group: None,
    },
    ShaderEntry {
        entry_point: "shadowMiss",
        local_root_signature: LocalRootSignatureKind::Empty,
        category: ShaderCategory::Miss,
        hit_group: None,
    },
    ShaderEntry {
        entry_point: "chs",
        local_root_signature: LocalRootSignatureKind::PbrMaterialHit,
        category: ShaderCategory::ClosestHit,
        hit_group: Some(HitGroupKind::PbrCameraRay),
    },
    ShaderEntry {
        entry_point: "shadowChs",
        local_root_signature: LocalRootSignatureKind::PbrMaterialHit,
        category: ShaderCategory::ClosestHit,
        hit_group: Some(HitGroupKind::PbrShadowRay),
    },
];

/// 命中组表，顺序与 `HitGroupKind` 一致
pub const HIT_GROUPS: [HitGroupEntry; HitGroupKind::COUNT] = [
    HitGroupEntry {
        kind: HitGroupKind::PbrCameraRay,
        export: "HitGroup",
        closest_hit: "chs",
        any_hit: None,
    },
    HitGroupEntry {
        kind: HitGroupKind::PbrShadowRay,
        export: "ShadowHitGroup",
        closest_hit: "shadowChs",
        any_hit: None,
    },
];

/// 指定类别的入口点数量
pub const fn category_count(category: ShaderCategory) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < SHADER_ENTRIES.len() {
        if SHADER_ENTRIES[i].category as u8 == category as u8 {
            count += 1;
        }
        i += 1;
    }
    count
}

/// 着色器记录中需要预留的最多描述符句柄数
pub const fn max_table_count() -> usize {
    let mut max = 0;
    let mut i = 0;
    while i < SHADER_ENTRIES.len() {
        let count = SHADER_ENTRIES[i].local_root_signature.table_count();
        if count > max {
            max = count;
        }
        i += 1;
    }
    max
}

const _: () = assert!(category_count(ShaderCategory::ClosestHit) == HitGroupKind::COUNT);
const _: () = assert!(category_count(ShaderCategory::RayGenerator) == 1);

/// 指定类别的入口点名
pub fn entry_points(category: ShaderCategory) -> impl Iterator<Item = &'static str> {
    SHADER_ENTRIES
        .iter()
        .filter(move |e| e.category == category)
        .map(|e| e.entry_point)
}

/// 使用指定局部根签名的入口点名
pub fn exports_using(kind: LocalRootSignatureKind) -> impl Iterator<Item = &'static str> {
    SHADER_ENTRIES
        .iter()
        .filter(move |e| e.local_root_signature == kind)
        .map(|e| e.entry_point)
}

/// 每个实例的 SRV 块中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceSrv {
    Tlas,
    AlbedoMap,
    NormalMap,
    SpecularMap,
    ReflectionMap,
    RefractionMap,
    VertexBuffer,
    IndexBuffer,
}

/// 每个实例的 SRV 块，下标即命中着色器中的寄存器号（t0..t7）
pub const INSTANCE_SRVS: [InstanceSrv; 8] = [
    InstanceSrv::Tlas,
    InstanceSrv::AlbedoMap,
    InstanceSrv::NormalMap,
    InstanceSrv::SpecularMap,
    InstanceSrv::ReflectionMap,
    InstanceSrv::RefractionMap,
    InstanceSrv::VertexBuffer,
    InstanceSrv::IndexBuffer,
];

pub const INSTANCE_SRV_COUNT: u32 = INSTANCE_SRVS.len() as u32;

impl InstanceSrv {
    /// 在实例块中的偏移
    pub fn offset(self) -> u32 {
        INSTANCE_SRVS.iter().position(|s| *s == self).unwrap_or(0) as u32
    }
}

/// 堆头部的固定槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderSlot {
    /// 光线追踪输出（u0）
    OutputUav,
    /// 相机常量（b0）
    RayGenCbv,
}

pub const HEADER_SLOTS: [HeaderSlot; 2] = [HeaderSlot::OutputUav, HeaderSlot::RayGenCbv];

/// 光线生成着色器可见的 SRV 数量（从第一个实例块的 TLAS 开始）
pub const RAY_GEN_SRV_COUNT: u32 = 1;

/// 最大光线递归深度
///
/// 着色器中反射次数 `MAX_DEPTH` 加上主光线和阴影光线不能超过该值。
pub const MAX_TRACE_RECURSION_DEPTH: u32 = 4;

/// 光线载荷（与 HLSL 中的 `RayPayload` 一致）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct RayPayload {
    pub color: [f32; 4],
    pub reflection_color: [f32; 4],
    pub hit_depth: i32,
}

/// 三角形重心坐标
pub const ATTRIBUTE_SIZE: u32 = 2 * std::mem::size_of::<f32>() as u32;

const _: () = assert!(std::mem::size_of::<RayPayload>() == 36);

/// CBV/SRV/UAV 堆的槽位计算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorLayout {
    num_instances: u32,
}

impl DescriptorLayout {
    pub fn new(num_instances: u32) -> Self {
        Self { num_instances }
    }

    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }

    pub const fn header_len() -> u32 {
        HEADER_SLOTS.len() as u32
    }

    pub fn header_slot(slot: HeaderSlot) -> u32 {
        HEADER_SLOTS.iter().position(|s| *s == slot).unwrap_or(0) as u32
    }

    /// 实例 `i` 的 SRV 块起始槽位
    pub const fn instance_block_start(instance: u32) -> u32 {
        Self::header_len() + instance * INSTANCE_SRV_COUNT
    }

    pub fn instance_srv_slot(instance: u32, srv: InstanceSrv) -> u32 {
        Self::instance_block_start(instance) + srv.offset()
    }

    /// 堆中描述符总数
    pub fn total_descriptors(&self) -> u32 {
        Self::header_len() + self.num_instances * INSTANCE_SRV_COUNT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_counts() {
        assert_eq!(category_count(ShaderCategory::RayGenerator), 1);
        assert_eq!(category_count(ShaderCategory::Miss), 2);
        assert_eq!(category_count(ShaderCategory::ClosestHit), 2);
        assert_eq!(max_table_count(), 2);
    }

    #[test]
    fn test_hit_groups_match_entries() {
        for group in HIT_GROUPS.iter() {
            let entry = SHADER_ENTRIES
                .iter()
                .find(|e| e.entry_point == group.closest_hit)
                .unwrap();
            assert_eq!(entry.category, ShaderCategory::ClosestHit);
            assert_eq!(entry.hit_group, Some(group.kind));
            assert_eq!(HIT_GROUPS[group.kind.index()].kind, group.kind);
        }
    }

    #[test]
    fn test_exports_using() {
        let hit: Vec<_> = exports_using(LocalRootSignatureKind::PbrMaterialHit).collect();
        assert_eq!(hit, vec!["chs", "shadowChs"]);

        let empty: Vec<_> = exports_using(LocalRootSignatureKind::Empty).collect();
        assert_eq!(empty, vec!["miss", "shadowMiss"]);

        let total: usize = LocalRootSignatureKind::ALL
            .iter()
            .map(|k| exports_using(*k).count())
            .sum();
        assert_eq!(total, SHADER_ENTRIES.len());
    }

    #[test]
    fn test_descriptor_slots() {
        assert_eq!(DescriptorLayout::header_slot(HeaderSlot::OutputUav), 0);
        assert_eq!(DescriptorLayout::header_slot(HeaderSlot::RayGenCbv), 1);
        assert_eq!(DescriptorLayout::instance_block_start(0), 2);
        assert_eq!(DescriptorLayout::instance_block_start(3), 26);
        assert_eq!(DescriptorLayout::instance_srv_slot(1, InstanceSrv::IndexBuffer), 17);
    }

    #[test]
    fn test_total_descriptors_linear_in_instances() {
        for n in 0..16 {
            let layout = DescriptorLayout::new(n);
            assert_eq!(layout.total_descriptors(), 2 + 8 * n);
        }
    }

    #[test]
    fn test_payload_size() {
        assert_eq!(std::mem::size_of::<RayPayload>(), 36);
        assert_eq!(ATTRIBUTE_SIZE, 8);
    }

    /// 读取 HLSL 源码中的 `static const uint <name> = <value>;`
    fn hlsl_uint_constant(source: &str, name: &str) -> Option<u32> {
        let prefix = format!("static const uint {} =", name);
        source
            .lines()
            .find_map(|line| line.trim().strip_prefix(prefix.as_str()))
            .and_then(|rest| rest.trim().trim_end_matches(';').trim().parse().ok())
    }

    #[test]
    fn test_shader_reflection_depth_fits_pipeline() {
        let source = include_str!("../../assets/shaders/raytracing.hlsl");
        let max_depth = hlsl_uint_constant(source, "MAX_DEPTH").unwrap();

        // 主光线在第 1 层，每次反射加一层，最深的命中着色器还要发射一条阴影光线
        let deepest_trace = 1 + max_depth + 1;
        assert!(
            deepest_trace <= MAX_TRACE_RECURSION_DEPTH,
            "shader traces {} levels, pipeline allows {}",
            deepest_trace,
            MAX_TRACE_RECURSION_DEPTH
        );
    }
}
