//! 加速结构构建输入到 D3D12 结构体的转换

use windows::Win32::Graphics::Direct3D12::*;

use super::map_format;
use crate::gfx::accel::{AccelerationStructureInputs, BuildFlags};

/// D3D12 构建输入
///
/// 几何描述数组必须和 `desc` 一起存活，`desc` 里保存的是指向它的指针。
pub(super) struct BuildInputs {
    pub desc: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS,
    _geometry_descs: Vec<D3D12_RAYTRACING_GEOMETRY_DESC>,
}

fn map_build_flags(flags: BuildFlags) -> D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS {
    let mut result = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_NONE;
    if flags.allow_update {
        result |= D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_ALLOW_UPDATE;
    }
    if flags.prefer_fast_trace {
        result |= D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PREFER_FAST_TRACE;
    }
    if flags.perform_update {
        result |= D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PERFORM_UPDATE;
    }
    result
}

impl BuildInputs {
    pub fn new(inputs: &AccelerationStructureInputs<'_>) -> Self {
        let mut desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
            Flags: map_build_flags(inputs.flags()),
            DescsLayout: D3D12_ELEMENTS_LAYOUT_ARRAY,
            ..Default::default()
        };

        let geometry_descs: Vec<D3D12_RAYTRACING_GEOMETRY_DESC> = match inputs {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => geometries
                .iter()
                .map(|g| D3D12_RAYTRACING_GEOMETRY_DESC {
                    Type: D3D12_RAYTRACING_GEOMETRY_TYPE_TRIANGLES,
                    Flags: if g.opaque {
                        D3D12_RAYTRACING_GEOMETRY_FLAG_OPAQUE
                    } else {
                        D3D12_RAYTRACING_GEOMETRY_FLAG_NONE
                    },
                    Anonymous: D3D12_RAYTRACING_GEOMETRY_DESC_0 {
                        Triangles: D3D12_RAYTRACING_GEOMETRY_TRIANGLES_DESC {
                            Transform3x4: 0,
                            IndexFormat: map_format(g.index_format),
                            VertexFormat: map_format(g.vertex_format),
                            IndexCount: g.index_count,
                            VertexCount: g.vertex_count,
                            IndexBuffer: g.index_buffer.0,
                            VertexBuffer: D3D12_GPU_VIRTUAL_ADDRESS_AND_STRIDE {
                                StartAddress: g.vertex_buffer.0,
                                StrideInBytes: g.vertex_stride,
                            },
                        },
                    },
                })
                .collect(),
            AccelerationStructureInputs::TopLevel { .. } => Vec::new(),
        };

        match inputs {
            AccelerationStructureInputs::BottomLevel { .. } => {
                desc.Type = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL;
                desc.NumDescs = geometry_descs.len() as u32;
                desc.Anonymous = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                    pGeometryDescs: geometry_descs.as_ptr(),
                };
            }
            AccelerationStructureInputs::TopLevel { instance_descs, num_instances, .. } => {
                desc.Type = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_TOP_LEVEL;
                desc.NumDescs = *num_instances;
                desc.Anonymous = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                    InstanceDescs: instance_descs.0,
                };
            }
        }

        Self {
            desc,
            _geometry_descs: geometry_descs,
        }
    }
}
