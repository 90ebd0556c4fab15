//! 组件模块
//!
//! 目前只包含光线追踪使用的相机组件。

mod camera;

pub use camera::{Camera, RayGenConstants};
