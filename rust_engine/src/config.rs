//! 加载器配置
//!
//! 所有参数扁平化，运行时可通过 set_config 覆盖。

use once_cell::sync::Lazy;
use std::sync::RwLock;

const MIB: u64 = 1024 * 1024;

/// 加载器配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    // ========== 读取上限 ==========
    /// 无法内存映射时 PMX/PMD/VMD 的缓冲读取上限，默认 32M
    pub model_read_limit: u64,
    /// GLB JSON 块的读取上限，默认 4M
    pub glb_json_read_limit: u64,
    /// GLB 二进制块的读取上限，默认 256M
    pub glb_binary_read_limit: u64,
    /// 外部纹理/缓冲文件的读取上限，默认 256M
    pub texture_read_limit: u64,

    // ========== MMD 参数 ==========
    /// VMD 每帧对应的秒数，默认 1/24
    pub vmd_frame_time: f32,
    /// MMD 单位到场景单位的缩放，默认 0.1
    pub mmd_scale: f32,

    // ========== 资源 ==========
    /// 是否读取 PMX/PMD 引用的纹理文件，默认 true
    pub load_textures: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            model_read_limit: 32 * MIB,
            glb_json_read_limit: 4 * MIB,
            glb_binary_read_limit: 256 * MIB,
            texture_read_limit: 256 * MIB,

            vmd_frame_time: 1.0 / 24.0,
            mmd_scale: 0.1,

            load_textures: true,
        }
    }
}

/// 全局配置实例
static LOADER_CONFIG: Lazy<RwLock<LoaderConfig>> = Lazy::new(|| RwLock::new(LoaderConfig::default()));

/// 获取当前配置（只读）
pub fn get_config() -> LoaderConfig {
    match LOADER_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// 手动设置配置
pub fn set_config(config: LoaderConfig) {
    match LOADER_CONFIG.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(LoaderConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = LoaderConfig::default();
        assert_eq!(config.model_read_limit, 32 * 1024 * 1024);
        assert_eq!(config.glb_json_read_limit, 4 * 1024 * 1024);
        assert!((config.vmd_frame_time - 1.0 / 24.0).abs() < 1e-9);
    }
}
