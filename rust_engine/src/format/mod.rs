//! 文件格式解析
//!
//! 每个子模块实现一种格式的 ModelFileLoader。PMX 与 PMD 共用 mmd 中的场景构建。

pub mod gltf;
mod mmd;
pub mod pmd;
pub mod pmx;
pub mod vmd;

/// MMD 模型内置相机的名称，VMD 相机通道按此名绑定
pub const MMD_CAMERA_NAME: &str = "MMD Camera";
