//! glTF 2.0 JSON 结构
//!
//! 只声明加载需要的字段，未知字段由 serde 忽略。
//! 枚举类字段保留原始数值 / 字符串，合法性在构建阶段检查，以便给出带下标的错误信息。

use std::collections::BTreeMap;

use serde::Deserialize;

use super::vrm::{Vrm0Extension, Vrm1Extension};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Gltf {
    pub asset: GltfAsset,
    #[serde(default)]
    pub extensions_required: Vec<String>,
    #[serde(default)]
    pub accessors: Vec<GltfAccessor>,
    #[serde(default)]
    pub animations: Vec<GltfAnimation>,
    #[serde(default)]
    pub buffers: Vec<GltfBuffer>,
    #[serde(default)]
    pub buffer_views: Vec<GltfBufferView>,
    #[serde(default)]
    pub cameras: Vec<GltfCamera>,
    #[serde(default)]
    pub images: Vec<GltfImage>,
    #[serde(default)]
    pub materials: Vec<GltfMaterial>,
    #[serde(default)]
    pub meshes: Vec<GltfMesh>,
    #[serde(default)]
    pub nodes: Vec<GltfNode>,
    #[serde(default)]
    pub samplers: Vec<GltfSampler>,
    pub scene: Option<usize>,
    #[serde(default)]
    pub scenes: Vec<GltfScene>,
    #[serde(default)]
    pub skins: Vec<GltfSkin>,
    #[serde(default)]
    pub textures: Vec<GltfTexture>,
    #[serde(default)]
    pub extensions: GltfExtensions,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GltfExtensions {
    #[serde(rename = "VRM")]
    pub vrm0: Option<Vrm0Extension>,
    #[serde(rename = "VRMC_vrm")]
    pub vrm1: Option<Vrm1Extension>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfAsset {
    pub version: String,
    pub min_version: Option<String>,
    pub generator: Option<String>,
    pub copyright: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfBuffer {
    pub byte_length: usize,
    pub uri: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfBufferView {
    pub buffer: usize,
    pub byte_length: usize,
    #[serde(default)]
    pub byte_offset: usize,
    pub byte_stride: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfAccessor {
    pub buffer_view: Option<usize>,
    #[serde(default)]
    pub byte_offset: usize,
    pub component_type: u32,
    #[serde(default)]
    pub normalized: bool,
    pub count: usize,
    #[serde(rename = "type")]
    pub accessor_type: String,
    pub max: Option<Vec<f32>>,
    pub min: Option<Vec<f32>>,
    pub sparse: Option<GltfSparse>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfSparse {
    pub count: usize,
    pub indices: GltfSparseIndices,
    pub values: GltfSparseValues,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfSparseIndices {
    pub buffer_view: usize,
    #[serde(default)]
    pub byte_offset: usize,
    pub component_type: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfSparseValues {
    pub buffer_view: usize,
    #[serde(default)]
    pub byte_offset: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfAnimation {
    pub name: Option<String>,
    pub channels: Vec<GltfAnimationChannel>,
    pub samplers: Vec<GltfAnimationSampler>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfAnimationChannel {
    pub sampler: usize,
    pub target: GltfAnimationTarget,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfAnimationTarget {
    pub node: Option<usize>,
    pub path: String,
}

fn default_interpolation() -> String {
    "LINEAR".to_string()
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfAnimationSampler {
    pub input: usize,
    pub output: usize,
    #[serde(default = "default_interpolation")]
    pub interpolation: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfCamera {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub camera_type: String,
    pub perspective: Option<GltfPerspective>,
    pub orthographic: Option<GltfOrthographic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfPerspective {
    pub aspect_ratio: Option<f32>,
    pub yfov: f32,
    pub zfar: Option<f32>,
    pub znear: f32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfOrthographic {
    pub xmag: f32,
    pub ymag: f32,
    pub zfar: f32,
    pub znear: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfImage {
    pub name: Option<String>,
    pub uri: Option<String>,
    pub mime_type: Option<String>,
    pub buffer_view: Option<usize>,
}

fn default_alpha_mode() -> String {
    "OPAQUE".to_string()
}

fn default_alpha_cutoff() -> f32 {
    0.5
}

fn default_one() -> f32 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfMaterial {
    pub name: Option<String>,
    #[serde(default)]
    pub pbr_metallic_roughness: GltfPbrMetallicRoughness,
    pub normal_texture: Option<GltfTextureInfo>,
    pub occlusion_texture: Option<GltfTextureInfo>,
    pub emissive_texture: Option<GltfTextureInfo>,
    #[serde(default)]
    pub emissive_factor: [f32; 3],
    #[serde(default = "default_alpha_mode")]
    pub alpha_mode: String,
    #[serde(default = "default_alpha_cutoff")]
    pub alpha_cutoff: f32,
    #[serde(default)]
    pub double_sided: bool,
    #[serde(default)]
    pub extensions: GltfMaterialExtensions,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GltfMaterialExtensions {
    /// 内容为空对象，只看是否存在
    #[serde(rename = "KHR_materials_unlit")]
    pub unlit: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfPbrMetallicRoughness {
    #[serde(default = "GltfPbrMetallicRoughness::default_base_color")]
    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<GltfTextureInfo>,
    #[serde(default = "default_one")]
    pub metallic_factor: f32,
    #[serde(default = "default_one")]
    pub roughness_factor: f32,
    pub metallic_roughness_texture: Option<GltfTextureInfo>,
}

impl GltfPbrMetallicRoughness {
    fn default_base_color() -> [f32; 4] {
        [1.0; 4]
    }
}

impl Default for GltfPbrMetallicRoughness {
    fn default() -> Self {
        Self {
            base_color_factor: Self::default_base_color(),
            base_color_texture: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
        }
    }
}

/// normalTexture 的 scale 与 occlusionTexture 的 strength 不参与加载
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfTextureInfo {
    pub index: usize,
    #[serde(default)]
    pub tex_coord: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfSampler {
    pub mag_filter: Option<u32>,
    pub min_filter: Option<u32>,
    pub wrap_s: Option<u32>,
    pub wrap_t: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfTexture {
    pub name: Option<String>,
    pub sampler: Option<usize>,
    pub source: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GltfSkin {
    pub name: Option<String>,
    pub inverse_bind_matrices: Option<usize>,
    pub joints: Vec<usize>,
}

fn default_mode() -> u32 {
    4
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfPrimitive {
    pub attributes: BTreeMap<String, usize>,
    pub indices: Option<usize>,
    pub material: Option<usize>,
    #[serde(default = "default_mode")]
    pub mode: u32,
    #[serde(default)]
    pub targets: Vec<BTreeMap<String, usize>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfMesh {
    pub primitives: Vec<GltfPrimitive>,
    pub weights: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfNode {
    pub name: Option<String>,
    pub camera: Option<usize>,
    #[serde(default)]
    pub children: Vec<usize>,
    pub skin: Option<usize>,
    pub mesh: Option<usize>,
    /// 列主序
    pub matrix: Option<[f32; 16]>,
    /// xyzw
    pub rotation: Option<[f32; 4]>,
    pub scale: Option<[f32; 3]>,
    pub translation: Option<[f32; 3]>,
    pub weights: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GltfScene {
    #[serde(default)]
    pub nodes: Vec<usize>,
}

/// 顶点属性名
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AttributeName {
    Position,
    Normal,
    Tangent,
    Texcoord(usize),
    Color(usize),
    Joints(usize),
    Weights(usize),
}

impl AttributeName {
    /// 自定义属性（以 _ 开头）和无法识别的名字返回 None
    pub fn parse(name: &str) -> Option<Self> {
        fn indexed(name: &str, prefix: &str) -> Option<usize> {
            name.strip_prefix(prefix)?.parse().ok()
        }
        match name {
            "POSITION" => Some(AttributeName::Position),
            "NORMAL" => Some(AttributeName::Normal),
            "TANGENT" => Some(AttributeName::Tangent),
            _ => indexed(name, "TEXCOORD_")
                .map(AttributeName::Texcoord)
                .or_else(|| indexed(name, "COLOR_").map(AttributeName::Color))
                .or_else(|| indexed(name, "JOINTS_").map(AttributeName::Joints))
                .or_else(|| indexed(name, "WEIGHTS_").map(AttributeName::Weights)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_names() {
        assert_eq!(AttributeName::parse("POSITION"), Some(AttributeName::Position));
        assert_eq!(AttributeName::parse("TEXCOORD_1"), Some(AttributeName::Texcoord(1)));
        assert_eq!(AttributeName::parse("JOINTS_0"), Some(AttributeName::Joints(0)));
        assert_eq!(AttributeName::parse("TEXCOORD_-1"), None);
        assert_eq!(AttributeName::parse("_CUSTOM"), None);
    }

    #[test]
    fn test_defaults() {
        let gltf: Gltf = serde_json::from_str(
            r#"{
                "asset": {"version": "2.0", "generator": "test"},
                "materials": [{"name": "skin"}],
                "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
                "animations": [{"channels": [], "samplers": [{"input": 0, "output": 1}]}],
                "unknownTopLevel": 1
            }"#,
        )
        .unwrap();
        assert_eq!(gltf.asset.version, "2.0");
        assert!(gltf.buffers.is_empty());

        let material = &gltf.materials[0];
        assert_eq!(material.pbr_metallic_roughness.base_color_factor, [1.0; 4]);
        assert_eq!(material.alpha_mode, "OPAQUE");
        assert_eq!(material.alpha_cutoff, 0.5);
        assert!(material.extensions.unlit.is_none());

        assert_eq!(gltf.meshes[0].primitives[0].mode, 4);
        assert_eq!(gltf.animations[0].samplers[0].interpolation, "LINEAR");
    }

    #[test]
    fn test_unlit_extension() {
        let material: GltfMaterial =
            serde_json::from_str(r#"{"extensions": {"KHR_materials_unlit": {}}, "alphaMode": "MASK"}"#).unwrap();
        assert!(material.extensions.unlit.is_some());
        assert_eq!(material.alpha_mode, "MASK");
    }
}
