//! glTF 2.0 / GLB / VRM 加载
//!
//! - `.glb` / `.vrm`：二进制容器，JSON 块 + 可选 BIN 块，按文件头 `glTF` 识别
//! - `.gltf`：纯 JSON，没有可靠的文件头，只能按扩展名识别
//!
//! 外部资源（缓冲、图片）支持 base64 `data:` URI 与相对于模型目录的文件路径。

mod builder;
mod glb;
mod schema;
mod vrm;

pub use glb::GLB_MAGIC;

use std::fs::File;
use std::path::Path;

use self::glb::{find_thumbnail, GlbLayout};
use self::schema::Gltf;
use crate::config::get_config;
use crate::loader::{Ability, LoadResult, ModelFileLoader, ThumbnailResult};
use crate::util::{map_or_buffer_region, read_file};
use crate::Result;

const GLB_EXTENSIONS: &[(&str, Ability)] = &[
    ("glb", Ability::MODEL.union(Ability::EMBED_ANIMATION)),
    (
        "vrm",
        Ability::MODEL.union(Ability::EMBED_ANIMATION).union(Ability::EMBED_THUMBNAIL),
    ),
];

const GLTF_EXTENSIONS: &[(&str, Ability)] = &[("gltf", Ability::MODEL.union(Ability::EMBED_ANIMATION))];

/// 打开 GLB 并定位各块
fn open_glb(path: &Path) -> Result<(File, GlbLayout)> {
    let mut file = File::open(path)?;
    let length = file.metadata()?.len();
    let layout = GlbLayout::parse(&mut file, length)?;
    Ok((file, layout))
}

/// 二进制 glTF（含 VRM）
pub struct GlbLoader;

impl ModelFileLoader for GlbLoader {
    fn name(&self) -> &'static str {
        "glb"
    }

    fn extensions(&self) -> &'static [(&'static str, Ability)] {
        GLB_EXTENSIONS
    }

    fn probe_length(&self) -> Option<usize> {
        Some(GLB_MAGIC.len())
    }

    fn probe(&self, buffer: &[u8]) -> bool {
        buffer.starts_with(GLB_MAGIC)
    }

    fn load(&self, path: &Path, base_path: &Path) -> Result<LoadResult> {
        let config = get_config();
        let (mut file, layout) = open_glb(path)?;
        let json = layout.read_json(&mut file, config.glb_json_read_limit)?;
        let binary = layout
            .binary
            .map(|range| map_or_buffer_region(&file, range.offset, range.length, config.glb_binary_read_limit))
            .transpose()?;
        log::debug!(
            "GLB {}: JSON {} 字节, BIN {} 字节",
            path.display(),
            layout.json.length,
            layout.binary.map_or(0, |range| range.length)
        );
        builder::load(&json, binary, base_path, &config)
    }

    /// 只解析 JSON，返回缩略图在文件中的字节区间
    fn get_thumbnail(&self, path: &Path, _base_path: &Path) -> Result<ThumbnailResult> {
        let config = get_config();
        let (mut file, layout) = open_glb(path)?;
        let json = layout.read_json(&mut file, config.glb_json_read_limit)?;
        let gltf: Gltf = serde_json::from_slice(&json)?;
        find_thumbnail(&gltf, layout.binary)
    }
}

/// 文本 glTF
pub struct GltfTextLoader;

impl ModelFileLoader for GltfTextLoader {
    fn name(&self) -> &'static str {
        "gltf"
    }

    fn extensions(&self) -> &'static [(&'static str, Ability)] {
        GLTF_EXTENSIONS
    }

    fn probe_length(&self) -> Option<usize> {
        None
    }

    fn probe(&self, _buffer: &[u8]) -> bool {
        false
    }

    fn load(&self, path: &Path, base_path: &Path) -> Result<LoadResult> {
        let config = get_config();
        let json = read_file(path, config.model_read_limit)?;
        builder::load(&json, None, base_path, &config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimationChannel, FindResult};
    use crate::model::{Binding, Expression, ExpressionTag, HumanoidTag, Material, NodeTransform, SceneIndex, TextureType};
    use crate::ModelError;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use byteorder::{LittleEndian, WriteBytesExt};
    use glam::{Mat4, Quat, Vec3};
    use std::fs;
    use tempfile::TempDir;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    /// 一个蒙皮三角形：3 个顶点、1 个形变目标、2 个关节、平移和权重动画、PNG 缩略图
    fn triangle_binary() -> Vec<u8> {
        let mut data = Vec::new();
        let floats = |data: &mut Vec<u8>, values: &[f32]| {
            for value in values {
                data.write_f32::<LittleEndian>(*value).unwrap();
            }
        };
        // 0..36 positions
        floats(&mut data, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        // 36..42 indices + 2 字节填充
        for index in [0u16, 1, 2, 0] {
            data.write_u16::<LittleEndian>(index).unwrap();
        }
        // 44..80 morph position deltas
        floats(&mut data, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        // 80..92 joints
        data.extend_from_slice(&[0, 1, 0, 0, 0, 1, 0, 0, 1, 0, 0, 0]);
        // 92..140 weights
        floats(&mut data, &[0.5, 0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        // 140..268 inverse bind matrices
        floats(&mut data, &Mat4::IDENTITY.to_cols_array());
        floats(&mut data, &Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)).to_cols_array());
        // 268..276 times
        floats(&mut data, &[0.0, 1.0]);
        // 276..300 translations
        floats(&mut data, &[0.0, 1.0, 0.0, 0.0, 2.0, 0.0]);
        // 300..308 morph weights
        floats(&mut data, &[0.0, 1.0]);
        // 308..316 thumbnail
        data.extend_from_slice(&PNG_HEADER);
        assert_eq!(data.len(), 316);
        data
    }

    fn triangle_json(buffer: &str) -> String {
        format!(
            r#"{{
            "asset": {{"version": "2.0", "generator": "unit test"}},
            "buffers": [{buffer}],
            "bufferViews": [
                {{"buffer": 0, "byteOffset": 0, "byteLength": 36}},
                {{"buffer": 0, "byteOffset": 36, "byteLength": 6}},
                {{"buffer": 0, "byteOffset": 44, "byteLength": 36}},
                {{"buffer": 0, "byteOffset": 80, "byteLength": 12}},
                {{"buffer": 0, "byteOffset": 92, "byteLength": 48}},
                {{"buffer": 0, "byteOffset": 140, "byteLength": 128}},
                {{"buffer": 0, "byteOffset": 268, "byteLength": 8}},
                {{"buffer": 0, "byteOffset": 276, "byteLength": 24}},
                {{"buffer": 0, "byteOffset": 300, "byteLength": 8}},
                {{"buffer": 0, "byteOffset": 308, "byteLength": 8}}
            ],
            "accessors": [
                {{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0, 0, 0], "max": [1, 1, 0]}},
                {{"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}},
                {{"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC3"}},
                {{"bufferView": 3, "componentType": 5121, "count": 3, "type": "VEC4"}},
                {{"bufferView": 4, "componentType": 5126, "count": 3, "type": "VEC4"}},
                {{"bufferView": 5, "componentType": 5126, "count": 2, "type": "MAT4"}},
                {{"bufferView": 6, "componentType": 5126, "count": 2, "type": "SCALAR"}},
                {{"bufferView": 7, "componentType": 5126, "count": 2, "type": "VEC3"}},
                {{"bufferView": 8, "componentType": 5126, "count": 2, "type": "SCALAR"}}
            ],
            "images": [{{"bufferView": 9, "mimeType": "image/png"}}],
            "samplers": [{{"magFilter": 9728, "minFilter": 9729, "wrapS": 33071}}],
            "textures": [{{"source": 0, "sampler": 0}}],
            "materials": [
                {{"name": "body", "pbrMetallicRoughness": {{"baseColorTexture": {{"index": 0}}}},
                  "extensions": {{"KHR_materials_unlit": {{}}}}}}
            ],
            "meshes": [{{
                "primitives": [{{
                    "attributes": {{"POSITION": 0, "JOINTS_0": 3, "WEIGHTS_0": 4, "_BATCHID": 2}},
                    "indices": 1,
                    "material": 0,
                    "targets": [{{"POSITION": 2}}]
                }}],
                "weights": [0.25]
            }}],
            "skins": [{{"joints": [1, 3], "inverseBindMatrices": 5}}],
            "nodes": [
                {{"name": "root", "children": [1, 2]}},
                {{"name": "J_Bip_C_Hips", "translation": [0, 1, 0], "children": [3]}},
                {{"name": "body", "mesh": 0, "skin": 0}},
                {{"name": "J_Bip_C_Spine"}}
            ],
            "scenes": [{{"nodes": [0]}}],
            "scene": 0,
            "animations": [{{
                "name": "wave",
                "channels": [
                    {{"sampler": 0, "target": {{"node": 1, "path": "translation"}}}},
                    {{"sampler": 1, "target": {{"node": 2, "path": "weights"}}}},
                    {{"sampler": 0, "target": {{"path": "translation"}}}}
                ],
                "samplers": [{{"input": 6, "output": 7}}, {{"input": 6, "output": 8, "interpolation": "STEP"}}]
            }}],
            "extensions": {{"VRM": {{
                "exporterVersion": "UniVRM-0.99",
                "meta": {{"title": "Triangle", "author": "tester", "texture": 0}},
                "humanoid": {{"humanBones": [{{"bone": "hips", "node": 1}}, {{"bone": "spine", "node": 3}}]}},
                "blendShapeMaster": {{"blendShapeGroups": [
                    {{"name": "A", "presetName": "a", "binds": [{{"mesh": 0, "index": 0, "weight": 100}}]}}
                ]}}
            }}}}
        }}"#,
            buffer = buffer
        )
    }

    fn write_vrm(dir: &TempDir) -> std::path::PathBuf {
        let json = triangle_json(r#"{"byteLength": 316}"#);
        let data = glb::tests::build_glb(&json, Some(&triangle_binary()));
        let path = dir.path().join("triangle.vrm");
        fs::write(&path, data).unwrap();
        path
    }

    fn check_triangle(result: &LoadResult) {
        let model = result.model.as_ref().unwrap();
        let scene = model.default_scene().unwrap();
        let index = SceneIndex::build(model, scene);
        assert_eq!(index.node_count(), 4);
        let hips = index.find_node_by_humanoid_tag(HumanoidTag::Hips).unwrap();
        assert_eq!(index.find_node_by_name("J_Bip_C_Hips"), Some(hips));
        assert!(index.find_node_by_humanoid_tag(HumanoidTag::Spine).is_some());

        let root = &scene.nodes[0];
        let hips_node = &root.children[0];
        assert_eq!(
            hips_node.transform,
            Some(NodeTransform::from_translation(Vec3::new(0.0, 1.0, 0.0)))
        );
        let body = &root.children[1];
        let mesh = body.mesh().unwrap();
        assert_eq!(mesh.weights, Some(vec![0.25]));
        let primitive = &mesh.primitives[0];
        assert_eq!(primitive.attributes.vertex_count(), 3);
        assert_eq!(primitive.attributes.joints.len(), 1);
        assert_eq!(primitive.indices.as_ref().unwrap().to_u32_vec(), vec![0, 1, 2]);
        assert_eq!(primitive.targets.len(), 1);
        assert_eq!(primitive.target_groups[0].weight, 0.25);
        match primitive.material.as_deref() {
            Some(Material::Unlit(material)) => {
                let texture = &material.base_color_texture.as_ref().unwrap().texture;
                assert_eq!(texture.texture_type, Some(TextureType::Png));
                assert_eq!(texture.sampler.wrap_s, crate::model::WrapMode::ClampToEdge);
            }
            other => panic!("unexpected material {:?}", other),
        }

        let skin = body.skin().unwrap();
        assert_eq!(skin.joint_humanoid_tags, vec![Some(HumanoidTag::Hips), Some(HumanoidTag::Spine)]);
        let matrices = skin.inverse_bind_matrices.as_ref().unwrap();
        assert_eq!(matrices[1], Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)));

        assert_eq!(model.expressions.len(), 1);
        match &model.expressions[0] {
            Expression::Target { tag, bindings, .. } => {
                assert_eq!(*tag, Some(ExpressionTag::Aa));
                assert!(matches!(bindings[0], Binding::MeshMorphTarget { index: 0, weight, .. } if weight == 1.0));
            }
            other => panic!("unexpected expression {:?}", other),
        }

        let metadata = result.metadata.as_ref().unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Triangle"));
        assert_eq!(metadata.allowed_user, None);
        assert!(metadata.thumbnail.is_some());

        let animation = &result.animations[0];
        assert_eq!(animation.name.as_deref(), Some("wave"));
        // 没有目标节点的通道被跳过
        assert_eq!(animation.channels.len(), 2);
        match &animation.channels[0] {
            AnimationChannel::Translation {
                target,
                sampler,
                relative: false,
            } => {
                assert_eq!(target.humanoid_tag, Some(HumanoidTag::Hips));
                let mut cursor = FindResult::default();
                let mut value = Vec3::ZERO;
                sampler.sample(0.5, &mut cursor, &mut value);
                assert!((value - Vec3::new(0.0, 1.5, 0.0)).length() < 1e-5);
            }
            other => panic!("unexpected channel {:?}", other),
        }
        match &animation.channels[1] {
            AnimationChannel::MorphWeight {
                target,
                morph_index,
                sampler,
            } => {
                assert_eq!(target.node_name.as_deref(), Some("body"));
                assert_eq!(*morph_index, 0);
                let mut cursor = FindResult::default();
                let mut value = -1.0;
                sampler.sample(0.5, &mut cursor, &mut value);
                assert_eq!(value, 0.0);
            }
            other => panic!("unexpected channel {:?}", other),
        }
    }

    #[test]
    fn test_load_vrm() {
        let dir = TempDir::new().unwrap();
        let path = write_vrm(&dir);
        let result = GlbLoader.load(&path, dir.path()).unwrap();
        check_triangle(&result);
    }

    #[test]
    fn test_vrm_thumbnail() {
        let dir = TempDir::new().unwrap();
        let path = write_vrm(&dir);
        let data = fs::read(&path).unwrap();
        match GlbLoader.get_thumbnail(&path, dir.path()).unwrap() {
            ThumbnailResult::Embed {
                offset,
                length,
                texture_type,
            } => {
                assert_eq!(length, 8);
                assert_eq!(texture_type, Some(TextureType::Png));
                assert_eq!(&data[offset as usize..(offset + length) as usize], &PNG_HEADER);
            }
            other => panic!("unexpected thumbnail {:?}", other),
        }
    }

    #[test]
    fn test_text_gltf_with_data_uri() {
        let dir = TempDir::new().unwrap();
        let uri = format!("data:application/octet-stream;base64,{}", STANDARD.encode(triangle_binary()));
        let json = triangle_json(&format!(r#"{{"byteLength": 316, "uri": "{}"}}"#, uri));
        let path = dir.path().join("triangle.gltf");
        fs::write(&path, json).unwrap();
        let result = GltfTextLoader.load(&path, dir.path()).unwrap();
        check_triangle(&result);
    }

    #[test]
    fn test_text_gltf_with_external_buffer() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("Data")).unwrap();
        fs::write(dir.path().join("Data").join("Triangle Mesh.BIN"), triangle_binary()).unwrap();
        let json = triangle_json(r#"{"byteLength": 316, "uri": "data/triangle%20mesh.bin"}"#);
        let path = dir.path().join("triangle.gltf");
        fs::write(&path, json).unwrap();
        let result = GltfTextLoader.load(&path, dir.path()).unwrap();
        check_triangle(&result);
    }

    #[test]
    fn test_missing_external_buffer() {
        let dir = TempDir::new().unwrap();
        let json = triangle_json(r#"{"byteLength": 316, "uri": "missing.bin"}"#);
        let path = dir.path().join("triangle.gltf");
        fs::write(&path, json).unwrap();
        assert!(GltfTextLoader.load(&path, dir.path()).is_err());
    }

    fn load_json(json: &str) -> Result<LoadResult> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.gltf");
        fs::write(&path, json).unwrap();
        GltfTextLoader.load(&path, dir.path())
    }

    #[test]
    fn test_bad_references() {
        let result = load_json(
            r#"{"asset": {"version": "2.0"}, "nodes": [{"mesh": 3}], "scenes": [{"nodes": [0]}]}"#,
        );
        assert!(matches!(result, Err(ModelError::UnresolvedReference(_))));

        let result = load_json(r#"{"asset": {"version": "2.0"}, "scenes": [{"nodes": [7]}]}"#);
        assert!(matches!(result, Err(ModelError::UnresolvedReference(_))));

        let result = load_json(r#"{"asset": {"version": "2.0"}, "scenes": [], "scene": 0}"#);
        assert!(matches!(result, Err(ModelError::UnresolvedReference(_))));
    }

    #[test]
    fn test_node_cycle() {
        let result = load_json(
            r#"{"asset": {"version": "2.0"},
                "nodes": [{"children": [1]}, {"children": [0]}],
                "scenes": [{"nodes": [0]}]}"#,
        );
        assert!(matches!(result, Err(ModelError::SchemaViolation(_))));
    }

    #[test]
    fn test_deep_node_chain() {
        const DEPTH: usize = 50_000;
        let nodes: Vec<String> = (0..DEPTH)
            .map(|index| match index + 1 {
                next if next < DEPTH => format!(r#"{{"name": "n{}", "children": [{}]}}"#, index, next),
                _ => format!(r#"{{"name": "n{}", "translation": [0, 1, 0]}}"#, index),
            })
            .collect();
        let json = format!(
            r#"{{"asset": {{"version": "2.0"}}, "nodes": [{}], "scenes": [{{"nodes": [0]}}]}}"#,
            nodes.join(",")
        );
        let model = load_json(&json).unwrap().model.unwrap();
        let index = SceneIndex::build(&model, &model.scenes[0]);
        assert_eq!(index.node_count(), DEPTH);
        let last = index.find_node_by_name(&format!("n{}", DEPTH - 1)).unwrap();
        assert_eq!(last, DEPTH - 1);
        assert_eq!(index.rest_pose(last), Some((Vec3::Y, Quat::IDENTITY)));
    }

    #[test]
    fn test_unsupported_version() {
        let result = load_json(r#"{"asset": {"version": "1.0"}}"#);
        assert!(matches!(result, Err(ModelError::SchemaViolation(_))));
        assert!(matches!(load_json("{"), Err(ModelError::Json(_))));
    }

    #[test]
    fn test_default_scene_from_roots() {
        let result = load_json(
            r#"{"asset": {"version": "2.0"},
                "nodes": [{"name": "a", "children": [2]}, {"name": "b"}, {"name": "c"}]}"#,
        )
        .unwrap();
        let model = result.model.unwrap();
        assert_eq!(model.scenes.len(), 1);
        let names: Vec<_> = model.scenes[0].nodes.iter().map(|node| node.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(result.metadata.is_none());
    }

    /// 两个形变目标的权重动画拆成两条通道，稀疏访问器展开
    #[test]
    fn test_weights_and_sparse() {
        let mut data = Vec::new();
        // 0..8 times
        for value in [0.0f32, 1.0] {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        // 8..24 weights [frame][target]
        for value in [0.0f32, 1.0, 0.5, 0.25] {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        // 24..60 positions
        for value in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        // 60..61 sparse index + 3 字节填充
        data.extend_from_slice(&[2, 0, 0, 0]);
        // 64..76 sparse value
        for value in [0.0f32, 0.0, 5.0] {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        let uri = format!("data:application/octet-stream;base64,{}", STANDARD.encode(&data));
        let json = format!(
            r#"{{
                "asset": {{"version": "2.0"}},
                "buffers": [{{"byteLength": {len}, "uri": "{uri}"}}],
                "bufferViews": [
                    {{"buffer": 0, "byteOffset": 0, "byteLength": 8}},
                    {{"buffer": 0, "byteOffset": 8, "byteLength": 16}},
                    {{"buffer": 0, "byteOffset": 24, "byteLength": 36}},
                    {{"buffer": 0, "byteOffset": 60, "byteLength": 1}},
                    {{"buffer": 0, "byteOffset": 64, "byteLength": 12}}
                ],
                "accessors": [
                    {{"bufferView": 0, "componentType": 5126, "count": 2, "type": "SCALAR"}},
                    {{"bufferView": 1, "componentType": 5126, "count": 4, "type": "SCALAR"}},
                    {{"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC3"}},
                    {{"componentType": 5126, "count": 3, "type": "VEC3", "sparse": {{
                        "count": 1,
                        "indices": {{"bufferView": 3, "componentType": 5121}},
                        "values": {{"bufferView": 4}}
                    }}}}
                ],
                "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 2}},
                    "targets": [{{"POSITION": 3}}, {{"POSITION": 3}}]}}]}}],
                "nodes": [{{"mesh": 0}}],
                "scenes": [{{"nodes": [0]}}],
                "animations": [{{
                    "channels": [{{"sampler": 0, "target": {{"node": 0, "path": "weights"}}}}],
                    "samplers": [{{"input": 0, "output": 1}}]
                }}]
            }}"#,
            len = data.len(),
            uri = uri
        );
        let result = load_json(&json).unwrap();
        let model = result.model.unwrap();
        let mesh = model.scenes[0].nodes[0].mesh().unwrap();
        let target = mesh.primitives[0].targets[0].position.as_ref().unwrap();
        assert_eq!(target.to_f32_vec(), vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 5.0]);

        let channels = &result.animations[0].channels;
        assert_eq!(channels.len(), 2);
        let expected = [(0usize, 0.25f32), (1, 0.625)];
        for (channel, (index, value)) in channels.iter().zip(expected) {
            match channel {
                AnimationChannel::MorphWeight {
                    morph_index, sampler, ..
                } => {
                    assert_eq!(*morph_index, index);
                    let mut cursor = FindResult::default();
                    let mut sampled = 0.0;
                    sampler.sample(0.5, &mut cursor, &mut sampled);
                    assert!((sampled - value).abs() < 1e-6);
                }
                other => panic!("unexpected channel {:?}", other),
            }
        }
    }

    #[test]
    fn test_probe() {
        assert!(GlbLoader.probe(b"glTF\x02\x00\x00\x00"));
        assert!(!GlbLoader.probe(b"PMX "));
        assert!(!GltfTextLoader.probe(b"  {\"asset\""));
        assert_eq!(GltfTextLoader.probe_length(), None);
    }
}
