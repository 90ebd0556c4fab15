//! 光线追踪管线状态对象
//!
//! 管线由以下子对象组成：
//!
//! - DXIL 库：导出 `SHADER_ENTRIES` 中的全部入口点
//! - 命中组：`HIT_GROUPS`，每种光线类型一个
//! - 每种 `LocalRootSignatureKind` 一个局部根签名，并关联到使用它的入口点
//! - 着色器配置（载荷/属性大小）、管线配置（递归深度）和空的全局根签名

use tracing::{debug, info};

use super::layout::{
    exports_using, DescriptorLayout, HeaderSlot, LocalRootSignatureKind, RayPayload, ATTRIBUTE_SIZE, HIT_GROUPS,
    INSTANCE_SRV_COUNT, MAX_TRACE_RECURSION_DEPTH, RAY_GEN_SRV_COUNT, SHADER_ENTRIES,
};
use crate::core::error::{RaytracingError, Result};
use crate::gfx::device::Device;
use crate::gfx::pipeline::{
    DescriptorRange, DescriptorRangeType, HitGroupDesc, LocalRootSignatureAssociation, RaytracingPipelineDesc,
    RootParameter, RootSignatureDesc, ShaderLibrary,
};

/// 局部根签名的描述
///
/// 描述符表中的偏移与 `DescriptorLayout` 一致：光线生成的表从堆起点开始，
/// 命中组的 SRV 表从实例块起点开始。
pub fn local_root_signature_desc(kind: LocalRootSignatureKind) -> RootSignatureDesc {
    let parameters = match kind {
        LocalRootSignatureKind::RayGen => vec![RootParameter::DescriptorTable(vec![
            DescriptorRange::new(
                DescriptorRangeType::Uav,
                1,
                0,
                DescriptorLayout::header_slot(HeaderSlot::OutputUav),
            ),
            DescriptorRange::new(
                DescriptorRangeType::Cbv,
                1,
                0,
                DescriptorLayout::header_slot(HeaderSlot::RayGenCbv),
            ),
            DescriptorRange::new(
                DescriptorRangeType::Srv,
                RAY_GEN_SRV_COUNT,
                0,
                DescriptorLayout::instance_block_start(0),
            ),
        ])],
        LocalRootSignatureKind::PbrMaterialHit => vec![
            RootParameter::DescriptorTable(vec![DescriptorRange::new(
                DescriptorRangeType::Srv,
                INSTANCE_SRV_COUNT,
                0,
                0,
            )]),
            RootParameter::DescriptorTable(vec![DescriptorRange::new(DescriptorRangeType::Sampler, 1, 0, 0)]),
        ],
        LocalRootSignatureKind::Empty => Vec::new(),
    };

    let desc = RootSignatureDesc::local(parameters).with_name(kind.name());
    debug_assert_eq!(desc.table_count(), kind.table_count());
    desc
}

/// 关联到指定局部根签名的导出名
pub fn export_association(kind: LocalRootSignatureKind) -> Vec<String> {
    exports_using(kind).map(str::to_string).collect()
}

fn hit_group_descs() -> Vec<HitGroupDesc> {
    HIT_GROUPS
        .iter()
        .map(|g| HitGroupDesc {
            export: g.export.to_string(),
            closest_hit: Some(g.closest_hit.to_string()),
            any_hit: g.any_hit.map(str::to_string),
        })
        .collect()
}

pub struct Pso<D: Device> {
    pipeline: D::Pipeline,
    global_root_signature: D::RootSignature,
    local_root_signatures: Vec<(LocalRootSignatureKind, D::RootSignature)>,
}

impl<D: Device> Pso<D> {
    /// 创建根签名并编译光线追踪管线
    pub fn init(device: &mut D, library: &ShaderLibrary) -> Result<Self> {
        let global_root_signature = device.create_root_signature(&RootSignatureDesc::empty_global())?;

        let mut local_root_signatures = Vec::with_capacity(LocalRootSignatureKind::ALL.len());
        for kind in LocalRootSignatureKind::ALL {
            let root_signature = device.create_root_signature(&local_root_signature_desc(kind))?;
            local_root_signatures.push((kind, root_signature));
        }

        let associations: Vec<_> = local_root_signatures
            .iter()
            .map(|(kind, root_signature)| LocalRootSignatureAssociation {
                root_signature,
                exports: export_association(*kind),
            })
            .filter(|a| !a.exports.is_empty())
            .collect();

        let desc = RaytracingPipelineDesc {
            library,
            exports: SHADER_ENTRIES.iter().map(|e| e.entry_point.to_string()).collect(),
            hit_groups: hit_group_descs(),
            local_root_signatures: associations,
            global_root_signature: &global_root_signature,
            max_payload_size: std::mem::size_of::<RayPayload>() as u32,
            max_attribute_size: ATTRIBUTE_SIZE,
            max_trace_recursion_depth: MAX_TRACE_RECURSION_DEPTH,
        };
        debug!(
            exports = desc.exports.len(),
            hit_groups = desc.hit_groups.len(),
            payload = desc.max_payload_size,
            "Creating raytracing pipeline"
        );

        let pipeline = device.create_raytracing_pipeline(&desc)?;
        info!(
            recursion_depth = MAX_TRACE_RECURSION_DEPTH,
            local_root_signatures = local_root_signatures.len(),
            "Raytracing pipeline created"
        );

        Ok(Self {
            pipeline,
            global_root_signature,
            local_root_signatures,
        })
    }

    pub fn pipeline(&self) -> &D::Pipeline {
        &self.pipeline
    }

    pub fn global_root_signature(&self) -> &D::RootSignature {
        &self.global_root_signature
    }

    pub fn local_root_signature(&self, kind: LocalRootSignatureKind) -> Result<&D::RootSignature> {
        self.local_root_signatures
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, rs)| rs)
            .ok_or_else(|| RaytracingError::LayoutMismatch(format!("missing {}", kind.name())).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::device::RaytracingPipeline;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_local_root_signature_tables() {
        for kind in LocalRootSignatureKind::ALL {
            let desc = local_root_signature_desc(kind);
            assert!(desc.local);
            assert_eq!(desc.table_count(), kind.table_count());
        }

        let ray_gen = local_root_signature_desc(LocalRootSignatureKind::RayGen);
        let RootParameter::DescriptorTable(ranges) = &ray_gen.parameters[0];
        assert_eq!(ranges[0].range_type, DescriptorRangeType::Uav);
        assert_eq!(ranges[0].offset_in_descriptors, 0);
        assert_eq!(ranges[1].range_type, DescriptorRangeType::Cbv);
        assert_eq!(ranges[1].offset_in_descriptors, 1);
        assert_eq!(ranges[2].offset_in_descriptors, 2);

        let hit = local_root_signature_desc(LocalRootSignatureKind::PbrMaterialHit);
        let RootParameter::DescriptorTable(srvs) = &hit.parameters[0];
        assert_eq!(srvs[0].num_descriptors, 8);
    }

    #[test]
    fn test_export_associations() {
        let mut device = HeadlessDevice::new();
        let pso = Pso::init(&mut device, &ShaderLibrary::empty_container()).unwrap();
        let pipeline = pso.pipeline();

        let ray_gen = pso.local_root_signature(LocalRootSignatureKind::RayGen).unwrap().id();
        let hit = pso.local_root_signature(LocalRootSignatureKind::PbrMaterialHit).unwrap().id();
        let empty = pso.local_root_signature(LocalRootSignatureKind::Empty).unwrap().id();

        assert_eq!(pipeline.root_signature_for("rayGen"), Some(ray_gen));
        assert_eq!(pipeline.root_signature_for("chs"), Some(hit));
        assert_eq!(pipeline.root_signature_for("shadowChs"), Some(hit));
        assert_eq!(pipeline.root_signature_for("miss"), Some(empty));
        assert_eq!(pipeline.root_signature_for("shadowMiss"), Some(empty));

        // 每个入口点恰好关联一个局部根签名
        let total: usize = pipeline.associations().iter().map(|(_, e)| e.len()).sum();
        assert_eq!(total, SHADER_ENTRIES.len());
        assert_eq!(pipeline.global_root_signature(), pso.global_root_signature().id());
    }

    #[test]
    fn test_pipeline_config() {
        let mut device = HeadlessDevice::new();
        let pso = Pso::init(&mut device, &ShaderLibrary::empty_container()).unwrap();
        let pipeline = pso.pipeline();

        assert_eq!(pipeline.max_payload_size(), 36);
        assert_eq!(pipeline.max_attribute_size(), 8);
        assert_eq!(pipeline.max_trace_recursion_depth(), MAX_TRACE_RECURSION_DEPTH);
        assert_eq!(pipeline.hit_groups().len(), 2);

        for export in ["rayGen", "miss", "shadowMiss", "HitGroup", "ShadowHitGroup"] {
            assert!(pipeline.shader_identifier(export).is_ok(), "{}", export);
        }
        assert!(pipeline.shader_identifier("chs").is_err());
    }
}
