//! 光线追踪子系统
//!
//! - `layout`：入口点、命中组和描述符槽位的静态布局
//! - `instance`：网格/材质对的实例
//! - `world`：实例集合与两级加速结构（`blas` / `tlas`）
//! - `descriptor_heaps`：着色器可见的描述符堆
//! - `pso`：局部/全局根签名与光线追踪管线
//! - `shader_table`：着色器表
//! - `engine`：把以上部分组合起来的入口

pub mod blas;
pub mod descriptor_heaps;
pub mod engine;
pub mod instance;
pub mod layout;
pub mod pso;
pub mod shader_table;
pub mod tlas;
pub mod world;

pub use blas::{AccelerationStructureBuffers, BlasBuffer};
pub use descriptor_heaps::DescriptorHeaps;
pub use engine::Engine;
pub use instance::{Instance, StructuredBufferView};
pub use layout::{DescriptorLayout, HitGroupKind, LocalRootSignatureKind};
pub use pso::Pso;
pub use shader_table::{ShaderTable, ShaderTableLayout};
pub use tlas::TlasBuffer;
pub use world::World;
