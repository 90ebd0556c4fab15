//! Camera 组件
//!
//! 管理相机的位置、朝向和视锥体参数，并生成光线生成着色器使用的常量缓冲区数据。

use bytemuck::{Pod, Zeroable};

use crate::core::math::{constants::PI, to_row_major_4x4, Matrix4, Vector3};

/// 光线生成着色器的相机常量（与 `raytracing.hlsl` 中的 `Camera` cbuffer 一致）
///
/// HLSL 侧声明为 `row_major float4x4 mRot`，用 `mul(mRot, dir)` 把相机空间的方向变换到世界空间。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RayGenConstants {
    /// 相机空间到世界空间的旋转
    pub rot: [[f32; 4]; 4],
    pub pos: [f32; 3],
    pub aspect: f32,
    pub far: f32,
    pub near: f32,
    /// tan(fov_y / 2)
    pub tan_half_fov_y: f32,
    pub _pad: f32,
}

const _: () = assert!(std::mem::size_of::<RayGenConstants>() == 96);

/// Camera 组件
pub struct Camera {
    position: Vector3,

    /// 相机坐标系：右向量
    right: Vector3,

    /// 相机坐标系：上向量
    up: Vector3,

    /// 相机坐标系：前向量（Look）
    look: Vector3,

    near_z: f32,
    far_z: f32,
    aspect: f32,

    /// 垂直视场角（弧度）
    fov_y: f32,
}

impl Camera {
    /// 创建新的 Camera
    ///
    /// 默认透视参数：FOV=45度，near=1.0，far=1000.0
    pub fn new(aspect: f32) -> Self {
        let mut camera = Self {
            position: Vector3::zeros(),
            right: Vector3::new(1.0, 0.0, 0.0),
            up: Vector3::new(0.0, 1.0, 0.0),
            look: Vector3::new(0.0, 0.0, 1.0),
            near_z: 0.0,
            far_z: 0.0,
            aspect: 0.0,
            fov_y: 0.0,
        };

        camera.set_lens(0.25 * PI, aspect, 1.0, 1000.0);
        camera
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
    }

    pub fn right(&self) -> Vector3 {
        self.right
    }

    pub fn up(&self) -> Vector3 {
        self.up
    }

    pub fn look(&self) -> Vector3 {
        self.look
    }

    pub fn near_z(&self) -> f32 {
        self.near_z
    }

    pub fn far_z(&self) -> f32 {
        self.far_z
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    /// 设置透视参数
    ///
    /// # 参数
    /// - `fov_y`: 垂直视场角（弧度）
    /// - `aspect`: 宽高比
    /// - `near_z`: 近裁剪面距离
    /// - `far_z`: 远裁剪面距离
    pub fn set_lens(&mut self, fov_y: f32, aspect: f32, near_z: f32, far_z: f32) {
        self.fov_y = fov_y;
        self.aspect = aspect;
        self.near_z = near_z;
        self.far_z = far_z;
    }

    /// 设置相机朝向目标点
    ///
    /// # 参数
    /// - `position`: 相机位置
    /// - `target`: 目标位置
    /// - `world_up`: 世界上向量（通常是 (0, 1, 0)）
    pub fn look_at(&mut self, position: Vector3, target: Vector3, world_up: Vector3) {
        let look = (target - position).normalize();
        let right = world_up.cross(&look).normalize();
        let up = look.cross(&right);

        self.position = position;
        self.look = look;
        self.right = right;
        self.up = up;
    }

    /// 相机空间到世界空间的旋转矩阵（三列分别是 right、up、look）
    pub fn rotation_matrix(&self) -> Matrix4 {
        #[rustfmt::skip]
        let rot = Matrix4::new(
            self.right.x, self.up.x, self.look.x, 0.0,
            self.right.y, self.up.y, self.look.y, 0.0,
            self.right.z, self.up.z, self.look.z, 0.0,
            0.0,          0.0,       0.0,         1.0,
        );
        rot
    }

    /// 生成光线生成着色器的常量数据
    pub fn ray_gen_constants(&self) -> RayGenConstants {
        RayGenConstants {
            rot: to_row_major_4x4(&self.rotation_matrix()),
            pos: [self.position.x, self.position.y, self.position.z],
            aspect: self.aspect,
            far: self.far_z,
            near: self.near_z,
            tan_half_fov_y: (0.5 * self.fov_y).tan(),
            _pad: 0.0,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(16.0 / 9.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_at_builds_orthonormal_basis() {
        let mut camera = Camera::new(1.0);
        camera.look_at(
            Vector3::new(0.0, 0.0, -10.0),
            Vector3::zeros(),
            Vector3::new(0.0, 1.0, 0.0),
        );

        assert!((camera.look() - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-6);
        assert!(camera.right().dot(&camera.up()).abs() < 1e-6);
        assert!(camera.right().dot(&camera.look()).abs() < 1e-6);
    }

    #[test]
    fn test_rotation_maps_forward_to_look() {
        let mut camera = Camera::new(1.0);
        camera.look_at(
            Vector3::zeros(),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        );

        let forward = camera.rotation_matrix().transform_vector(&Vector3::new(0.0, 0.0, 1.0));
        assert!((forward - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn test_ray_gen_constants() {
        let mut camera = Camera::new(2.0);
        camera.set_position(Vector3::new(1.0, 2.0, 3.0));

        let constants = camera.ray_gen_constants();
        assert_eq!(constants.pos, [1.0, 2.0, 3.0]);
        assert_eq!(constants.aspect, 2.0);
        assert_eq!(constants.near, 1.0);
        assert_eq!(constants.far, 1000.0);
        assert_eq!(constants.rot[3], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(bytemuck::bytes_of(&constants).len(), 96);
    }
}
