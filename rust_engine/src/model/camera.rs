//! 相机定义

use glam::Mat4;

/// 场景中的相机
#[derive(Clone, Debug, PartialEq)]
pub enum Camera {
    Perspective {
        name: Option<String>,
        aspect_ratio: Option<f32>,
        /// 垂直视角（弧度）
        yfov: f32,
        zfar: Option<f32>,
        znear: f32,
    },
    Orthographic {
        name: Option<String>,
        xmag: f32,
        ymag: f32,
        zfar: f32,
        znear: f32,
    },
    /// MMD 相机：由目标点、距离、欧拉角与视角描述，参数全部由 VMD 相机动画驱动
    Mmd { name: Option<String> },
}

/// MMD 相机的缺省视角（度）
pub const MMD_DEFAULT_FOV_DEGREES: f32 = 30.0;

impl Camera {
    pub fn name(&self) -> Option<&str> {
        match self {
            Camera::Perspective { name, .. } | Camera::Orthographic { name, .. } | Camera::Mmd { name } => {
                name.as_deref()
            }
        }
    }

    /// 投影矩阵（右手坐标系，OpenGL 深度范围）
    pub fn projection(&self, aspect_ratio: f32, far_plane: f32) -> Mat4 {
        match self {
            Camera::Perspective { yfov, zfar, znear, .. } => {
                Mat4::perspective_rh_gl(*yfov, aspect_ratio, *znear, zfar.unwrap_or(far_plane))
            }
            Camera::Orthographic { ymag, zfar, znear, .. } => {
                let xmag = ymag * aspect_ratio;
                Mat4::orthographic_rh_gl(-xmag, xmag, -ymag, *ymag, *znear, *zfar)
            }
            Camera::Mmd { .. } => Mat4::perspective_rh_gl(
                MMD_DEFAULT_FOV_DEGREES.to_radians(),
                aspect_ratio,
                0.1,
                far_plane,
            ),
        }
    }
}
