//! MiniEngine 光线追踪子系统
//!
//! 在 DirectX 12 (DXR) 之上实现的光线追踪部分：把模型注册为实例，
//! 构建两级加速结构，创建描述符堆、光线追踪管线和着色器表，
//! 每帧派发光线并把结果拷贝到帧缓冲。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（数学、日志、配置、错误处理）
//! - `component`: 相机
//! - `geometry`: CPU 端几何/材质数据与 OBJ 加载器
//! - `model`: 上传到 GPU 的模型
//! - `gfx`: 图形后端抽象层（DirectX 12 与 Headless）
//! - `raytracing`: 光线追踪子系统
//!
//! # 使用示例
//!
//! ```no_run
//! use mini_engine_rt::component::Camera;
//! use mini_engine_rt::core::{math::Matrix4, Config};
//! use mini_engine_rt::geometry::{MaterialData, MeshData, ModelData};
//! use mini_engine_rt::gfx::headless::{HeadlessContext, HeadlessDevice};
//! use mini_engine_rt::gfx::pipeline::ShaderLibrary;
//! use mini_engine_rt::gfx::resource::TextureDesc;
//! use mini_engine_rt::gfx::Device;
//! use mini_engine_rt::model::Model;
//! use mini_engine_rt::raytracing::Engine;
//!
//! # fn main() -> mini_engine_rt::core::Result<()> {
//! let config = Config::default();
//! let mut device = HeadlessDevice::new();
//! let mut ctx = HeadlessContext::new();
//!
//! let data = ModelData {
//!     name: "Floor".to_string(),
//!     meshes: vec![MeshData::quad("Floor", 10.0, 0)],
//!     materials: vec![MaterialData::default()],
//! };
//! let model = Model::upload(&mut device, &data, Matrix4::identity())?;
//!
//! let mut engine = Engine::new(&config.raytracing, ShaderLibrary::empty_container(), 1280, 720);
//! engine.regist_geometry(&model)?;
//! engine.commit_regist_geometry(&mut device, &mut ctx)?;
//!
//! let frame_buffer = device.create_texture(&TextureDesc::frame_buffer(1280, 720), None)?;
//! device.begin_frame(&mut ctx)?;
//! engine.dispatch(&mut device, &mut ctx, &Camera::default(), &frame_buffer)?;
//! device.end_frame(&mut ctx)?;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod core;
pub mod geometry;
pub mod gfx;
pub mod model;
pub mod raytracing;
