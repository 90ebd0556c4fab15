//! DirectX 12 根签名与光线追踪状态对象

use std::ffi::c_void;

use tracing::debug;
use windows::core::{Interface, HSTRING, PCWSTR};
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;

use super::borrowed;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::RaytracingPipeline;
use crate::gfx::pipeline::{
    DescriptorRangeType, RaytracingPipelineDesc, RootParameter, RootSignatureDesc, ShaderIdentifier,
    SHADER_IDENTIFIER_SIZE,
};

use super::Dx12Device;

/// DX12 根签名
pub struct Dx12RootSignature {
    root_signature: ID3D12RootSignature,
}

impl Dx12RootSignature {
    pub fn root_signature(&self) -> &ID3D12RootSignature {
        &self.root_signature
    }
}

fn map_range_type(range_type: DescriptorRangeType) -> D3D12_DESCRIPTOR_RANGE_TYPE {
    match range_type {
        DescriptorRangeType::Srv => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        DescriptorRangeType::Uav => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        DescriptorRangeType::Cbv => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
        DescriptorRangeType::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
    }
}

fn blob_to_string(blob: &ID3DBlob) -> String {
    unsafe {
        let bytes = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
        String::from_utf8_lossy(bytes).into_owned()
    }
}

pub(super) fn create_root_signature(device: &ID3D12Device5, desc: &RootSignatureDesc) -> Result<Dx12RootSignature> {
    let ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = desc
        .parameters
        .iter()
        .map(|RootParameter::DescriptorTable(ranges)| {
            ranges
                .iter()
                .map(|r| D3D12_DESCRIPTOR_RANGE {
                    RangeType: map_range_type(r.range_type),
                    NumDescriptors: r.num_descriptors,
                    BaseShaderRegister: r.base_shader_register,
                    RegisterSpace: r.register_space,
                    OffsetInDescriptorsFromTableStart: r.offset_in_descriptors,
                })
                .collect()
        })
        .collect();

    let parameters: Vec<D3D12_ROOT_PARAMETER> = ranges
        .iter()
        .map(|table| D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: table.len() as u32,
                    pDescriptorRanges: table.as_ptr(),
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        })
        .collect();

    let root_desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: if parameters.is_empty() { std::ptr::null() } else { parameters.as_ptr() },
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: if desc.local {
            D3D12_ROOT_SIGNATURE_FLAG_LOCAL_ROOT_SIGNATURE
        } else {
            D3D12_ROOT_SIGNATURE_FLAG_NONE
        },
    };

    unsafe {
        let mut signature: Option<ID3DBlob> = None;
        let mut error: Option<ID3DBlob> = None;
        let serialized =
            D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut error));

        if let Err(e) = serialized {
            let message = error.as_ref().map(blob_to_string).unwrap_or_else(|| format!("{:?}", e));
            return Err(GraphicsError::PipelineCreation(format!("Failed to serialize root signature: {}", message)).into());
        }

        let signature = signature.ok_or_else(|| {
            GraphicsError::PipelineCreation("Root signature serialization returned no blob".to_string())
        })?;

        let root_signature: ID3D12RootSignature = device
            .CreateRootSignature(
                0,
                std::slice::from_raw_parts(signature.GetBufferPointer() as *const u8, signature.GetBufferSize()),
            )
            .map_err(|e| GraphicsError::PipelineCreation(format!("Failed to create root signature: {:?}", e)))?;

        if let (Some(name), Ok(object)) = (&desc.name, root_signature.cast::<ID3D12Object>()) {
            super::set_debug_name(&object, name);
        }

        Ok(Dx12RootSignature { root_signature })
    }
}

/// DX12 光线追踪管线
pub struct Dx12Pipeline {
    state_object: ID3D12StateObject,
    properties: ID3D12StateObjectProperties,
}

impl Dx12Pipeline {
    pub fn state_object(&self) -> &ID3D12StateObject {
        &self.state_object
    }
}

impl RaytracingPipeline for Dx12Pipeline {
    fn shader_identifier(&self, export: &str) -> Result<ShaderIdentifier> {
        let name = HSTRING::from(export);
        unsafe {
            let identifier = self.properties.GetShaderIdentifier(&name);
            if identifier.is_null() {
                return Err(GraphicsError::PipelineCreation(format!(
                    "no shader identifier for export '{}'",
                    export
                ))
                .into());
            }

            let mut bytes = [0u8; SHADER_IDENTIFIER_SIZE];
            std::ptr::copy_nonoverlapping(identifier as *const u8, bytes.as_mut_ptr(), SHADER_IDENTIFIER_SIZE);
            Ok(ShaderIdentifier(bytes))
        }
    }
}

fn subobject<T>(kind: D3D12_STATE_SUBOBJECT_TYPE, desc: &T) -> D3D12_STATE_SUBOBJECT {
    D3D12_STATE_SUBOBJECT {
        Type: kind,
        pDesc: desc as *const T as *const c_void,
    }
}

/// 创建光线追踪状态对象
///
/// 子对象顺序：DXIL 库、命中组、(局部根签名, 导出关联) 对、着色器配置、管线配置、全局根签名。
pub(super) fn create_raytracing_pipeline(
    device: &ID3D12Device5,
    desc: &RaytracingPipelineDesc<'_, Dx12Device>,
) -> Result<Dx12Pipeline> {
    desc.validate()?;

    // 所有字符串先全部分配，后面只保存指针
    let export_names: Vec<HSTRING> = desc.exports.iter().map(HSTRING::from).collect();
    let group_names: Vec<(HSTRING, Option<HSTRING>, Option<HSTRING>)> = desc
        .hit_groups
        .iter()
        .map(|g| {
            (
                HSTRING::from(&g.export),
                g.closest_hit.as_ref().map(HSTRING::from),
                g.any_hit.as_ref().map(HSTRING::from),
            )
        })
        .collect();
    let association_names: Vec<Vec<HSTRING>> = desc
        .local_root_signatures
        .iter()
        .map(|a| a.exports.iter().map(HSTRING::from).collect())
        .collect();
    let association_ptrs: Vec<Vec<PCWSTR>> = association_names
        .iter()
        .map(|names| names.iter().map(|n| PCWSTR(n.as_ptr())).collect())
        .collect();

    let mut export_descs: Vec<D3D12_EXPORT_DESC> = export_names
        .iter()
        .map(|name| D3D12_EXPORT_DESC {
            Name: PCWSTR(name.as_ptr()),
            ExportToRename: PCWSTR::null(),
            Flags: D3D12_EXPORT_FLAG_NONE,
        })
        .collect();

    let library = D3D12_DXIL_LIBRARY_DESC {
        DXILLibrary: D3D12_SHADER_BYTECODE {
            pShaderBytecode: desc.library.bytecode().as_ptr() as *const c_void,
            BytecodeLength: desc.library.bytecode().len(),
        },
        NumExports: export_descs.len() as u32,
        pExports: export_descs.as_mut_ptr(),
    };

    let pcwstr = |name: &Option<HSTRING>| name.as_ref().map_or(PCWSTR::null(), |n| PCWSTR(n.as_ptr()));
    let hit_groups: Vec<D3D12_HIT_GROUP_DESC> = group_names
        .iter()
        .map(|(export, closest_hit, any_hit)| D3D12_HIT_GROUP_DESC {
            HitGroupExport: PCWSTR(export.as_ptr()),
            Type: D3D12_HIT_GROUP_TYPE_TRIANGLES,
            AnyHitShaderImport: pcwstr(any_hit),
            ClosestHitShaderImport: pcwstr(closest_hit),
            IntersectionShaderImport: PCWSTR::null(),
        })
        .collect();

    let local_root_signatures: Vec<D3D12_LOCAL_ROOT_SIGNATURE> = desc
        .local_root_signatures
        .iter()
        .map(|a| D3D12_LOCAL_ROOT_SIGNATURE {
            pLocalRootSignature: borrowed(&a.root_signature.root_signature),
        })
        .collect();

    let shader_config = D3D12_RAYTRACING_SHADER_CONFIG {
        MaxPayloadSizeInBytes: desc.max_payload_size,
        MaxAttributeSizeInBytes: desc.max_attribute_size,
    };
    let pipeline_config = D3D12_RAYTRACING_PIPELINE_CONFIG {
        MaxTraceRecursionDepth: desc.max_trace_recursion_depth,
    };
    let global_root_signature = D3D12_GLOBAL_ROOT_SIGNATURE {
        pGlobalRootSignature: borrowed(&desc.global_root_signature.root_signature),
    };

    let subobject_count = 1 + hit_groups.len() + 2 * local_root_signatures.len() + 3;
    let mut subobjects: Vec<D3D12_STATE_SUBOBJECT> = Vec::with_capacity(subobject_count);
    let mut associations: Vec<D3D12_SUBOBJECT_TO_EXPORTS_ASSOCIATION> =
        Vec::with_capacity(local_root_signatures.len());

    subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_DXIL_LIBRARY, &library));
    for group in &hit_groups {
        subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_HIT_GROUP, group));
    }

    for (local, exports) in local_root_signatures.iter().zip(&association_ptrs) {
        subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_LOCAL_ROOT_SIGNATURE, local));
        // 容量已预留，元素地址在整个构建过程中保持不变
        let local_subobject = subobjects.as_ptr().wrapping_add(subobjects.len() - 1);
        associations.push(D3D12_SUBOBJECT_TO_EXPORTS_ASSOCIATION {
            pSubobjectToAssociate: local_subobject,
            NumExports: exports.len() as u32,
            pExports: exports.as_ptr() as *mut PCWSTR,
        });
        let association = &associations[associations.len() - 1];
        subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_SUBOBJECT_TO_EXPORTS_ASSOCIATION, association));
    }

    subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_SHADER_CONFIG, &shader_config));
    subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_PIPELINE_CONFIG, &pipeline_config));
    subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_GLOBAL_ROOT_SIGNATURE, &global_root_signature));
    debug_assert_eq!(subobjects.len(), subobject_count);

    let state_object_desc = D3D12_STATE_OBJECT_DESC {
        Type: D3D12_STATE_OBJECT_TYPE_RAYTRACING_PIPELINE,
        NumSubobjects: subobjects.len() as u32,
        pSubobjects: subobjects.as_ptr(),
    };

    let state_object: ID3D12StateObject = unsafe { device.CreateStateObject(&state_object_desc) }
        .map_err(|e| GraphicsError::PipelineCreation(format!("Failed to create state object: {:?}", e)))?;
    let properties: ID3D12StateObjectProperties = state_object
        .cast()
        .map_err(|e| GraphicsError::PipelineCreation(format!("Failed to query state object properties: {:?}", e)))?;

    debug!(subobjects = subobject_count, "Raytracing state object created");

    Ok(Dx12Pipeline {
        state_object,
        properties,
    })
}
