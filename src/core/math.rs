//! 数学库模块
//!
//! 基于 `nalgebra`，提供引擎使用的向量/矩阵类型别名，
//! 以及光线追踪子系统需要的少量辅助函数（GPU 布局转换、对齐计算）。

pub use nalgebra::{Matrix4 as Mat4, Vector3 as Vec3, Vector4 as Vec4};

// 类型别名，使用更简洁的名称
pub type Vector3 = Vec3<f32>;
pub type Vector4 = Vec4<f32>;
pub type Matrix4 = Mat4<f32>;

/// 数学常量
pub mod constants {
    /// π
    pub const PI: f32 = std::f32::consts::PI;
}

/// 创建平移矩阵
pub fn translation(x: f32, y: f32, z: f32) -> Matrix4 {
    Matrix4::new_translation(&Vector3::new(x, y, z))
}

/// 创建绕 X 轴旋转的矩阵
pub fn rotation_x(angle: f32) -> Matrix4 {
    Matrix4::from_axis_angle(&Vector3::x_axis(), angle)
}

/// 将 4x4 仿射矩阵转换为 GPU 使用的 3x4 行主序布局
///
/// nalgebra 使用列向量约定（平移位于第 4 列），
/// 因此矩阵的前三行正好是 D3D12 实例描述符需要的 3x4 变换。
pub fn to_row_major_3x4(m: &Matrix4) -> [f32; 12] {
    let mut out = [0.0f32; 12];
    for row in 0..3 {
        for col in 0..4 {
            out[row * 4 + col] = m[(row, col)];
        }
    }
    out
}

/// 将 4x4 矩阵转换为行主序数组（常量缓冲区布局）
pub fn to_row_major_4x4(m: &Matrix4) -> [[f32; 4]; 4] {
    let mut out = [[0.0f32; 4]; 4];
    for (row, out_row) in out.iter_mut().enumerate() {
        for (col, value) in out_row.iter_mut().enumerate() {
            *value = m[(row, col)];
        }
    }
    out
}

/// 向上对齐到 `alignment` 的整数倍（`alignment` 必须是 2 的幂）
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}
