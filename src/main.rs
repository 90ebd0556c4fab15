//! MiniEngine 光线追踪演示程序
//!
//! 加载模型，提交光线追踪世界，然后渲染一帧到离屏帧缓冲。
//! 可以通过配置文件或命令行参数选择图形后端。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 使用无 GPU 的记录型后端
//! cargo run -- --headless --model assets/models/sample.obj
//! ```
//!
//! # 流程
//!
//! ```text
//! config.toml ─► Device ─► Model::upload ─► Engine::regist_geometry
//!                                              │
//!                          Engine::commit_regist_geometry (BLAS/TLAS/PSO/着色器表)
//!                                              │
//!                          begin_frame ─► Engine::dispatch ─► end_frame
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use mini_engine_rt::component::Camera;
use mini_engine_rt::core::config::GraphicsBackend;
use mini_engine_rt::core::math::{Matrix4, Vector3};
use mini_engine_rt::core::{log, Config};
use mini_engine_rt::geometry::loaders::load_model;
use mini_engine_rt::geometry::{MaterialData, MeshData, ModelData};
use mini_engine_rt::gfx::headless::{HeadlessContext, HeadlessDevice};
use mini_engine_rt::gfx::pipeline::ShaderLibrary;
use mini_engine_rt::gfx::resource::TextureDesc;
use mini_engine_rt::gfx::Device;
use mini_engine_rt::model::Model;
use mini_engine_rt::raytracing::Engine;
use tracing::{info, warn};

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载引擎配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 初始化日志系统
/// 4. 创建设备并运行一帧
fn main() {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args());

    // 3. 验证配置
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // 4. 初始化日志系统
    log::init_logger(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "MiniEngine raytracing starting...");

    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        "Graphics configuration"
    );

    let result = match config.graphics.backend {
        GraphicsBackend::Headless => run(&config, HeadlessDevice::new(), HeadlessContext::new()),
        #[cfg(target_os = "windows")]
        GraphicsBackend::Dx12 => mini_engine_rt::gfx::Dx12Device::new()
            .context("Failed to create DirectX 12 device")
            .and_then(|d| {
                let ctx = d.create_context().context("Failed to create command context")?;
                run(&config, d, ctx)
            }),
        #[cfg(not(target_os = "windows"))]
        GraphicsBackend::Dx12 => Err(anyhow::anyhow!("DX12 backend is only available on Windows")),
    };

    if let Err(e) = result {
        mini_engine_rt::engine_error!("Raytracing demo failed: {:#}", e);
        eprintln!("Raytracing demo failed: {:#}", e);
        std::process::exit(1);
    }
}

/// 加载模型；文件不存在时使用一个地面四边形
fn load_scene(path: &Path) -> Result<ModelData> {
    if path.exists() {
        return load_model(path).with_context(|| format!("Failed to load model {}", path.display()));
    }

    warn!(path = %path.display(), "Model not found, using a procedural floor");
    Ok(ModelData {
        name: "Floor".to_string(),
        meshes: vec![MeshData::quad("Floor", 10.0, 0)],
        materials: vec![MaterialData::solid("Floor", [200, 200, 200, 255])],
    })
}

/// 着色器库；无 GPU 后端在文件缺失时使用空容器
fn load_shader_library(path: &str, headless: bool) -> Result<ShaderLibrary> {
    match ShaderLibrary::from_file(path) {
        Ok(library) => Ok(library),
        Err(e) if headless => {
            warn!(path, error = %e, "Shader library unavailable, using an empty container");
            Ok(ShaderLibrary::empty_container())
        }
        Err(e) => Err(e).context("Failed to load the DXIL shader library"),
    }
}

fn run<D: Device>(config: &Config, mut device: D, mut ctx: D::Context) -> Result<()> {
    let width = config.window.width;
    let height = config.window.height;
    info!(backend = device.backend_name(), "Device created");

    let model_data = load_scene(Path::new(&config.raytracing.model_path))?;
    let model = Model::upload(&mut device, &model_data, Matrix4::identity())?;
    info!(model = %model.name, meshes = model.meshes.len(), parts = model.part_count(), "Model uploaded");

    let headless = config.graphics.backend == GraphicsBackend::Headless;
    let library = load_shader_library(&config.raytracing.shader_library, headless)?;

    let mut engine = Engine::new(&config.raytracing, library, width, height);
    engine.regist_geometry(&model)?;
    engine.commit_regist_geometry(&mut device, &mut ctx)?;

    let frame_buffer = device.create_texture(&TextureDesc::frame_buffer(width, height), None)?;

    let mut camera = Camera::new(width as f32 / height as f32);
    camera.look_at(
        Vector3::new(0.0, 5.0, -15.0),
        Vector3::zeros(),
        Vector3::new(0.0, 1.0, 0.0),
    );

    device.begin_frame(&mut ctx)?;
    engine.dispatch(&mut device, &mut ctx, &camera, &frame_buffer)?;
    device.end_frame(&mut ctx)?;

    engine.log_stats();
    info!("Frame rendered");
    Ok(())
}
