//! 材质与纹理定义

use std::sync::Arc;

use glam::{Vec3, Vec4};

use super::BufferView;

/// 纹理图片格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureType {
    Png,
    Jpeg,
}

const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];

impl TextureType {
    pub fn mime_type(self) -> &'static str {
        match self {
            TextureType::Png => "image/png",
            TextureType::Jpeg => "image/jpeg",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "image/png" => Some(TextureType::Png),
            "image/jpeg" => Some(TextureType::Jpeg),
            _ => None,
        }
    }

    /// 根据文件头识别
    pub fn from_magic(data: &[u8]) -> Option<Self> {
        if data.starts_with(PNG_MAGIC) {
            Some(TextureType::Png)
        } else if data.starts_with(JPEG_MAGIC) {
            Some(TextureType::Jpeg)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MagFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MinFilter {
    #[default]
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

/// 纹理采样参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Sampler {
    pub mag_filter: MagFilter,
    pub min_filter: MinFilter,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
}

/// 纹理：未解码的图片字节 + 采样参数
#[derive(Debug)]
pub struct Texture {
    pub name: Option<String>,
    pub buffer_view: Option<Arc<BufferView>>,
    pub texture_type: Option<TextureType>,
    pub sampler: Sampler,
}

/// 材质引用的纹理及其 UV 通道
#[derive(Clone, Debug)]
pub struct TextureInfo {
    pub texture: Arc<Texture>,
    pub texcoord: usize,
}

impl TextureInfo {
    pub fn new(texture: Arc<Texture>) -> Self {
        Self { texture, texcoord: 0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

/// PBR 金属度/粗糙度材质
#[derive(Clone, Debug)]
pub struct PbrMaterial {
    pub name: Option<String>,
    pub base_color: Vec4,
    pub base_color_texture: Option<TextureInfo>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub metallic_roughness_texture: Option<TextureInfo>,
    pub normal_texture: Option<TextureInfo>,
    pub occlusion_texture: Option<TextureInfo>,
    pub emissive_texture: Option<TextureInfo>,
    pub emissive_factor: Vec3,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl Default for PbrMaterial {
    fn default() -> Self {
        Self {
            name: None,
            base_color: Vec4::ONE,
            base_color_texture: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
            normal_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
            emissive_factor: Vec3::ONE,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
        }
    }
}

/// 无光照材质（MMD 模型和 KHR_materials_unlit）
#[derive(Clone, Debug)]
pub struct UnlitMaterial {
    pub name: Option<String>,
    pub base_color: Vec4,
    pub base_color_texture: Option<TextureInfo>,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl Default for UnlitMaterial {
    fn default() -> Self {
        Self {
            name: None,
            base_color: Vec4::ONE,
            base_color_texture: None,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Material {
    Pbr(PbrMaterial),
    Unlit(UnlitMaterial),
}

impl Material {
    pub fn name(&self) -> Option<&str> {
        match self {
            Material::Pbr(m) => m.name.as_deref(),
            Material::Unlit(m) => m.name.as_deref(),
        }
    }

    pub fn base_color(&self) -> Vec4 {
        match self {
            Material::Pbr(m) => m.base_color,
            Material::Unlit(m) => m.base_color,
        }
    }

    pub fn base_color_texture(&self) -> Option<&TextureInfo> {
        match self {
            Material::Pbr(m) => m.base_color_texture.as_ref(),
            Material::Unlit(m) => m.base_color_texture.as_ref(),
        }
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        match self {
            Material::Pbr(m) => m.alpha_mode,
            Material::Unlit(m) => m.alpha_mode,
        }
    }

    pub fn alpha_cutoff(&self) -> f32 {
        match self {
            Material::Pbr(m) => m.alpha_cutoff,
            Material::Unlit(m) => m.alpha_cutoff,
        }
    }

    pub fn is_double_sided(&self) -> bool {
        match self {
            Material::Pbr(m) => m.double_sided,
            Material::Unlit(m) => m.double_sided,
        }
    }
}

impl Default for Material {
    /// glTF 规定的缺省材质
    fn default() -> Self {
        Material::Pbr(PbrMaterial::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_magic() {
        assert_eq!(
            TextureType::from_magic(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(TextureType::Png)
        );
        assert_eq!(TextureType::from_magic(&[0xFF, 0xD8, 0xFF]), Some(TextureType::Jpeg));
        assert_eq!(TextureType::from_magic(b"BM"), None);
        assert_eq!(TextureType::Jpeg.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_default_material() {
        let material = Material::default();
        assert!(matches!(material, Material::Pbr(_)));
        assert_eq!(material.base_color(), Vec4::ONE);
        assert_eq!(material.alpha_mode(), AlphaMode::Opaque);
        assert!((material.alpha_cutoff() - 0.5).abs() < f32::EPSILON);
        assert!(!material.is_double_sided());
    }
}
