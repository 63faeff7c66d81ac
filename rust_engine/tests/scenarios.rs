//! 跨模块场景：文件探测 → 加载 → 绑定 → 求值

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use avatar_engine::animation::AnimationClip;
use avatar_engine::format::pmx::{PmxBone, PmxBoneDesc, PmxBoneFlags, PmxInheritParent};
use avatar_engine::model::{HumanoidTag, Model, ModelId, Node, NodeId, NodeTransform, Scene, SceneIndex};
use avatar_engine::{AnimationTarget, ModelError, ModelFileLoaders};
use byteorder::{LittleEndian, WriteBytesExt};
use encoding_rs::SHIFT_JIS;
use glam::{Quat, Vec3};
use tempfile::TempDir;

#[derive(Default)]
struct Recorder {
    translations: Vec<(usize, Vec3)>,
    rotations: Vec<(usize, Quat)>,
}

impl AnimationTarget for Recorder {
    fn set_translation(&mut self, transform_index: usize, translation: Vec3) {
        self.translations.push((transform_index, translation));
    }
    fn set_rotation(&mut self, transform_index: usize, rotation: Quat) {
        self.rotations.push((transform_index, rotation));
    }
    fn set_scale(&mut self, _: usize, _: Vec3) {}
    fn set_morph_weight(&mut self, _: usize, _: usize, _: f32) {}
    fn set_expression_weight(&mut self, _: usize, _: f32) {}
    fn set_expression_group_weight(&mut self, _: usize, _: f32) {}
}

fn write_name(data: &mut Vec<u8>, name: &str) {
    let (encoded, _, _) = SHIFT_JIS.encode(name);
    let mut field = encoded.into_owned();
    field.resize(15, 0);
    data.extend_from_slice(&field);
}

/// 新格式 VMD，骨骼关键帧使用对角线（线性）曲线
fn vmd(bones: &[(&str, u32, [f32; 3])]) -> Vec<u8> {
    let mut data = b"Vocaloid Motion Data 0002".to_vec();
    data.resize(30 + 20, 0);
    data.write_i32::<LittleEndian>(bones.len() as i32).unwrap();
    for (name, frame, translation) in bones {
        write_name(&mut data, name);
        data.write_u32::<LittleEndian>(*frame).unwrap();
        for value in translation {
            data.write_f32::<LittleEndian>(*value).unwrap();
        }
        for value in [0.0, 0.0, 0.0, 1.0] {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        let mut curves = [0u8; 64];
        curves[..8].fill(20);
        curves[8..16].fill(107);
        data.extend_from_slice(&curves);
    }
    data.write_i32::<LittleEndian>(0).unwrap();
    data.write_i32::<LittleEndian>(0).unwrap();
    data
}

fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, data).unwrap();
    path
}

/// 只有一个节点的场景
fn single_node_model(name: &str, tag: Option<HumanoidTag>) -> Model {
    posed_node_model(name, tag, None)
}

fn posed_node_model(name: &str, tag: Option<HumanoidTag>, rest: Option<NodeTransform>) -> Model {
    let id = ModelId::next();
    let node = Node::new(NodeId::new(id, 0), Some(name.to_string()), rest, Vec::new(), Vec::new())
        .unwrap()
        .with_humanoid_tag(tag);
    let scene = Scene {
        nodes: vec![node],
        initial_transform: None,
    };
    Model::new(id, vec![scene], None, Vec::new(), Vec::new()).unwrap()
}

fn load_motion(path: &Path) -> Arc<avatar_engine::Animation> {
    let mut result = ModelFileLoaders::global().probe_and_load(path, None).unwrap();
    assert!(result.model.is_none());
    assert_eq!(result.animations.len(), 1);
    Arc::new(result.animations.remove(0))
}

#[test]
fn vmd_motion_plays_on_named_bone() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "dance.vmd",
        &vmd(&[("センター", 0, [0.0; 3]), ("センター", 24, [0.0, 1.0, 0.0])]),
    );
    let animation = load_motion(&path);
    assert_eq!(animation.name.as_deref(), Some("dance"));

    let model = single_node_model("センター", None);
    let index = SceneIndex::build(&model, &model.scenes[0]);
    let mut clip = AnimationClip::bind(animation, &index);
    assert_eq!(clip.bound_channel_count(), 2);
    assert!((clip.duration() - 1.0).abs() < 1e-6);

    let mut recorder = Recorder::default();
    clip.apply(0.5, &mut recorder);
    let (node, translation) = recorder.translations[0];
    assert_eq!(node, 0);
    assert!(translation.abs_diff_eq(Vec3::new(0.0, 0.5, 0.0), 1e-4));
    // 坐标系转换会翻转 w，q 与 -q 表示同一旋转
    assert!(recorder.rotations[0].1.angle_between(Quat::IDENTITY) < 1e-3);
}

#[test]
fn vmd_motion_is_offset_from_rest_pose() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "idle.vmd",
        &vmd(&[("センター", 0, [0.0; 3]), ("センター", 24, [1.0, 0.0, 0.0])]),
    );
    let animation = load_motion(&path);

    let rest = NodeTransform::from_translation(Vec3::new(0.0, 8.0, 0.0));
    let model = posed_node_model("センター", Some(HumanoidTag::Hips), Some(rest));
    let index = SceneIndex::build(&model, &model.scenes[0]);
    let mut clip = AnimationClip::bind(animation, &index);

    let mut recorder = Recorder::default();
    clip.apply(0.0, &mut recorder);
    // 零偏移的关键帧保持静止姿态
    assert_eq!(recorder.translations[0].0, 0);
    assert!(recorder.translations[0].1.abs_diff_eq(Vec3::new(0.0, 8.0, 0.0), 1e-5));
    assert!(recorder.rotations[0].1.angle_between(Quat::IDENTITY) < 1e-3);

    clip.apply(0.5, &mut recorder);
    assert!(recorder.translations[1].1.abs_diff_eq(Vec3::new(0.5, 8.0, 0.0), 1e-4));
}

#[test]
fn vmd_motion_falls_back_to_humanoid_tag() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "walk.VMD",
        &vmd(&[("センター", 0, [0.0; 3]), ("センター", 48, [0.0, 0.0, 2.0])]),
    );
    let animation = load_motion(&path);

    let model = single_node_model("J_Bip_C_Hips", Some(HumanoidTag::Hips));
    let index = SceneIndex::build(&model, &model.scenes[0]);
    let mut clip = AnimationClip::bind(animation, &index);
    assert_eq!(clip.bound_channel_count(), 2);

    let mut recorder = Recorder::default();
    clip.apply(1.0, &mut recorder);
    // 1 秒 = 24 帧，z 轴翻转
    assert!(recorder.translations[0].1.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-4));
}

#[test]
fn missing_target_is_dropped_from_duration() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "toes.vmd",
        &vmd(&[
            ("センター", 0, [0.0; 3]),
            ("センター", 24, [0.0, 1.0, 0.0]),
            ("左つま先", 0, [0.0; 3]),
            ("左つま先", 120, [0.0; 3]),
        ]),
    );
    let animation = load_motion(&path);
    assert!((animation.duration() - 5.0).abs() < 1e-6);

    let model = single_node_model("センター", Some(HumanoidTag::Hips));
    let index = SceneIndex::build(&model, &model.scenes[0]);
    assert_eq!(index.find_node_by_humanoid_tag(HumanoidTag::LeftToes), None);
    let clip = AnimationClip::bind(animation, &index);
    assert_eq!(clip.bound_channel_count(), 2);
    assert!((clip.duration() - 1.0).abs() < 1e-6);
}

#[test]
fn probing_is_content_first() {
    let dir = TempDir::new().unwrap();
    let loaders = ModelFileLoaders::global();
    let name = |path: &Path| loaders.probe(path).unwrap().map(|loader| loader.name());

    // 文件头优先于扩展名
    let glb = write(&dir, "model.pmx", b"glTF\xFF\xFF\xFF\xFFgarbage");
    assert_eq!(name(&glb), Some("glb"));

    let mut motion = b"Vocaloid Motion Data 0002\0\0\0\0\0".to_vec();
    motion.extend_from_slice(b"\x01\x02\x03garbage");
    let motion = write(&dir, "motion.bin", &motion);
    assert_eq!(name(&motion), Some("vmd"));

    let pmd = write(&dir, "model.dat", b"Pmd\x00\x00\x80\x3Frest");
    assert_eq!(name(&pmd), Some("pmd"));

    let text = write(&dir, "scene.GLTF", b"  {\"asset\": {\"version\": \"2.0\"}}");
    assert_eq!(name(&text), Some("gltf"));

    let short = write(&dir, "tiny.txt", b"gl");
    assert_eq!(name(&short), None);
    assert!(matches!(
        loaders.probe_and_load(&short, None),
        Err(ModelError::UnsupportedFormat(_))
    ));
}

#[test]
fn thumbnails_only_from_capable_loaders() {
    let dir = TempDir::new().unwrap();
    let loaders = ModelFileLoaders::global();
    let motion = write(&dir, "motion.vmd", &vmd(&[]));
    assert_eq!(loaders.get_embed_thumbnail(&motion, None).unwrap(), None);
}

#[test]
fn inheriting_bone_requires_parent_field() {
    let desc = PmxBoneDesc {
        name_local: "左腕捩".to_string(),
        flags: PmxBoneFlags::INHERIT_ROTATION,
        ..Default::default()
    };
    assert!(matches!(
        PmxBone::new(desc.clone()),
        Err(ModelError::SchemaViolation(_))
    ));

    // 索引为 -1 的付与亲表示没有来源
    let orphan = PmxBone::new(PmxBoneDesc {
        inherit_parent: Some(PmxInheritParent {
            index: None,
            influence: 0.5,
        }),
        ..desc.clone()
    })
    .unwrap();
    assert!(orphan.inherits());

    let bone = PmxBone::new(PmxBoneDesc {
        inherit_parent: Some(PmxInheritParent {
            index: Some(3),
            influence: 0.5,
        }),
        ..desc
    })
    .unwrap();
    assert!(bone.inherits());
}
