//! PMX 模型加载
//!
//! reader 解析出文件坐标系下的 PmxModel，这里把它翻转到右手坐标系（z 取反、三角形绕序反转），
//! 再交给 MMD 共用的场景构建。

mod reader;
mod types;

pub use reader::{parse, PMX_SIGNATURE};
pub use types::*;

use std::path::Path;

use glam::Vec3;

use super::mmd::{
    self, non_empty, MmdBone, MmdIk, MmdIkLink, MmdInherit, MmdMaterial, MmdMorph, MmdMorphKind, MmdScene, MmdVertex,
};
use crate::config::{get_config, LoaderConfig};
use crate::loader::{Ability, LoadResult, ModelFileLoader};
use crate::util::read_file;
use crate::Result;

const EXTENSIONS: &[(&str, Ability)] = &[("pmx", Ability::MODEL)];

fn invert_z(vector: Vec3) -> Vec3 {
    Vec3::new(vector.x, vector.y, -vector.z)
}

fn convert_vertex(vertex: &PmxVertex) -> MmdVertex {
    let mut joints = [0u32; 4];
    let mut weights = [0f32; 4];
    for (slot, (bone, weight)) in vertex.weight.influences().into_iter().enumerate() {
        if let Some(bone) = bone {
            joints[slot] = bone as u32;
            weights[slot] = weight;
        }
    }
    MmdVertex {
        position: invert_z(vertex.position),
        normal: invert_z(vertex.normal),
        uv: vertex.uv,
        joints,
        weights,
    }
}

fn convert_bone(index: usize, bone: &PmxBone) -> MmdBone {
    let inherit = match bone.inherit_parent {
        Some(PmxInheritParent {
            index: Some(source),
            influence,
        }) if bone.inherits() => Some(MmdInherit {
            source,
            influence,
            rotation: bone.flags.contains(PmxBoneFlags::INHERIT_ROTATION),
            translation: bone.flags.contains(PmxBoneFlags::INHERIT_TRANSLATION),
            local: bone.flags.contains(PmxBoneFlags::INHERIT_LOCAL),
        }),
        _ => None,
    };
    MmdBone {
        name: bone.name_local.clone(),
        english_name: non_empty(bone.name_universal.clone()),
        position: invert_z(bone.position),
        parent: bone.parent_index.filter(|&parent| parent != index),
        ik: bone.ik.as_ref().map(|ik| MmdIk {
            target: ik.target_index,
            loop_count: ik.loop_count,
            limit_radian: ik.limit_radian,
            links: ik
                .links
                .iter()
                .map(|link| MmdIkLink {
                    bone: link.bone_index,
                    limits: link.limits.map(|limits| (limits.min, limits.max)),
                })
                .collect(),
        }),
        inherit,
    }
}

fn convert_morph(morph: &PmxMorph) -> MmdMorph {
    let kind = match &morph.kind {
        PmxMorphKind::Vertex(offsets) => MmdMorphKind::Vertex(
            offsets
                .iter()
                .map(|offset| (offset.vertex_index, invert_z(offset.offset)))
                .collect(),
        ),
        PmxMorphKind::Group(items) => {
            MmdMorphKind::Group(items.iter().map(|item| (item.morph_index, item.influence)).collect())
        }
        PmxMorphKind::Skipped { .. } => MmdMorphKind::Unsupported,
    };
    MmdMorph {
        name: morph.name_local.clone(),
        english_name: non_empty(morph.name_universal.clone()),
        kind,
    }
}

impl PmxModel {
    /// 转换为右手坐标系的 MMD 场景，纹理相对 base_path 解析
    pub(crate) fn into_mmd_scene(self, base_path: &Path, config: &LoaderConfig) -> MmdScene {
        let skipped: Vec<(PmxMorphType, usize)> = self
            .morphs
            .iter()
            .filter_map(|morph| match morph.kind {
                PmxMorphKind::Skipped { morph_type, count } => Some((morph_type, count)),
                _ => None,
            })
            .collect();
        if !skipped.is_empty() {
            log::warn!("PMX 中有 {} 个形变未导出（骨骼/UV/材质/翻转/冲量）: {:?}", skipped.len(), skipped);
        }

        let indices = self
            .indices
            .chunks_exact(3)
            .flat_map(|face| [face[0], face[2], face[1]])
            .collect();
        let materials = self
            .materials
            .iter()
            .map(|material| MmdMaterial {
                name: material.name_local.clone(),
                diffuse: material.diffuse_color,
                texture: material.texture_index,
                double_sided: material.flags.contains(PmxMaterialFlags::NO_CULL),
                index_count: material.surface_count,
            })
            .collect();

        MmdScene {
            name: non_empty(self.header.model_name_local),
            english_name: non_empty(self.header.model_name_universal),
            comment: non_empty(self.header.comment_local),
            english_comment: non_empty(self.header.comment_universal),
            vertices: self.vertices.iter().map(convert_vertex).collect(),
            indices,
            textures: mmd::load_textures(base_path, &self.textures, config),
            materials,
            bones: self
                .bones
                .iter()
                .enumerate()
                .map(|(index, bone)| convert_bone(index, bone))
                .collect(),
            morphs: self.morphs.iter().map(convert_morph).collect(),
        }
    }
}

/// PMX 2.0 / 2.1 模型
pub struct PmxLoader;

impl ModelFileLoader for PmxLoader {
    fn name(&self) -> &'static str {
        "pmx"
    }

    fn extensions(&self) -> &'static [(&'static str, Ability)] {
        EXTENSIONS
    }

    fn probe_length(&self) -> Option<usize> {
        Some(PMX_SIGNATURE.len())
    }

    fn probe(&self, buffer: &[u8]) -> bool {
        buffer.starts_with(PMX_SIGNATURE)
    }

    fn load(&self, path: &Path, base_path: &Path) -> Result<LoadResult> {
        let config = get_config();
        let data = read_file(path, config.model_read_limit)?;
        let pmx = parse(&data)?;
        log::debug!(
            "PMX {} 解析完成: {} 个顶点, {} 个材质, {} 根骨骼, {} 个形变, {} 个刚体, {} 个关节",
            pmx.header.version,
            pmx.vertices.len(),
            pmx.materials.len(),
            pmx.bones.len(),
            pmx.morphs.len(),
            pmx.rigid_bodies.len(),
            pmx.joints.len()
        );
        mmd::build(pmx.into_mmd_scene(base_path, &config), &config, "PMX skin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Expression, ExpressionTag, GroupItem, HumanoidTag, IkLimits, NodeComponent, NodeId, NodeTransform,
        SceneIndex,
    };
    use crate::ModelError;
    use byteorder::{LittleEndian, WriteBytesExt};

    struct Writer(Vec<u8>);

    impl Writer {
        fn text(&mut self, text: &str) {
            self.0.write_i32::<LittleEndian>(text.len() as i32).unwrap();
            self.0.extend_from_slice(text.as_bytes());
        }

        fn i32(&mut self, value: i32) {
            self.0.write_i32::<LittleEndian>(value).unwrap();
        }

        fn index(&mut self, value: i8) {
            self.0.write_i8(value).unwrap();
        }

        fn u8(&mut self, value: u8) {
            self.0.write_u8(value).unwrap();
        }

        fn floats(&mut self, values: &[f32]) {
            for value in values {
                self.0.write_f32::<LittleEndian>(*value).unwrap();
            }
        }
    }

    fn fixture() -> Vec<u8> {
        fixture_with_inherit(0)
    }

    /// UTF-8，所有下标 1 字节；上半身付与 inherit 号骨骼
    fn fixture_with_inherit(inherit: i8) -> Vec<u8> {
        let mut w = Writer(PMX_SIGNATURE.to_vec());
        w.floats(&[2.0]);
        w.u8(8);
        w.0.extend_from_slice(&[1, 0, 1, 1, 1, 1, 1, 1]);
        w.text("テスト");
        w.text("test");
        w.text("");
        w.text("");

        // 顶点
        w.i32(3);
        for (x, weight) in [(0.0, 0u8), (1.0, 0), (2.0, 1)] {
            w.floats(&[x, 0.0, 1.0, 0.0, 0.0, -1.0, 0.5, 0.5]);
            w.u8(weight);
            match (x as i32, weight) {
                (1, _) => w.index(-1),
                (_, 0) => w.index(0),
                _ => {
                    w.index(0);
                    w.index(1);
                    w.floats(&[0.25]);
                }
            }
            w.floats(&[1.0]);
        }

        // 面
        w.i32(3);
        w.0.extend_from_slice(&[0, 1, 2]);

        // 纹理
        w.i32(1);
        w.text("tex\\a.png");

        // 材质
        w.i32(1);
        w.text("mat");
        w.text("");
        w.floats(&[1.0, 0.5, 0.5, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        w.u8(0x01);
        w.floats(&[0.0, 0.0, 0.0, 1.0, 1.0]);
        w.index(0);
        w.index(-1);
        w.u8(0);
        w.u8(1);
        w.u8(3);
        w.text("");
        w.i32(3);

        // 骨骼
        w.i32(3);
        w.text("センター");
        w.text("center");
        w.floats(&[0.0, 1.0, 0.0]);
        w.index(-1);
        w.i32(0);
        w.0.write_u16::<LittleEndian>(0x001E).unwrap();
        w.floats(&[0.0, 1.0, 0.0]);

        w.text("上半身");
        w.text("");
        w.floats(&[0.0, 2.0, 1.0]);
        w.index(0);
        w.i32(0);
        w.0.write_u16::<LittleEndian>(0x001F | 0x0100).unwrap();
        w.index(-1);
        w.index(inherit);
        w.floats(&[0.5]);

        w.text("左足ＩＫ");
        w.text("");
        w.floats(&[1.0, 0.0, 0.0]);
        w.index(-1);
        w.i32(0);
        w.0.write_u16::<LittleEndian>(0x001E | 0x0020).unwrap();
        w.floats(&[0.0, 0.0, 1.0]);
        w.index(1);
        w.i32(40);
        w.floats(&[2.0]);
        w.i32(1);
        w.index(0);
        w.u8(1);
        w.floats(&[-1.0, 0.0, 0.0, 0.0, 0.0, 0.5]);

        // 形变
        w.i32(3);
        w.text("あ");
        w.text("a");
        w.u8(3);
        w.u8(1);
        w.i32(1);
        w.u8(1);
        w.floats(&[0.0, 0.0, 1.0]);

        w.text("bone");
        w.text("");
        w.u8(4);
        w.u8(2);
        w.i32(1);
        w.0.extend_from_slice(&[0u8; 29]);

        w.text("grp");
        w.text("");
        w.u8(4);
        w.u8(0);
        w.i32(2);
        w.index(0);
        w.floats(&[0.5]);
        w.index(1);
        w.floats(&[1.0]);

        // 显示枠
        w.i32(1);
        w.text("Root");
        w.text("Root");
        w.u8(1);
        w.i32(1);
        w.u8(0);
        w.index(0);

        // 刚体
        w.i32(1);
        w.text("rb");
        w.text("");
        w.index(0);
        w.u8(1);
        w.0.write_u16::<LittleEndian>(0xFFFF).unwrap();
        w.u8(1);
        w.floats(&[1.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.5, 0.5, 0.0, 0.5]);
        w.u8(1);

        // 关节
        w.i32(0);
        w.0
    }

    #[test]
    fn test_parse_records() {
        let pmx = parse(&fixture()).unwrap();
        assert_eq!(pmx.header.model_name_local, "テスト");
        assert_eq!(pmx.header.globals.text_encoding, PmxTextEncoding::Utf8);
        assert_eq!(pmx.vertices[1].weight, PmxWeight::Bdef1 { bone: None });
        assert_eq!(
            pmx.vertices[2].weight,
            PmxWeight::Bdef2 {
                bones: [Some(0), Some(1)],
                weight: 0.25
            }
        );
        assert_eq!(pmx.materials[0].toon_reference, PmxToonReference::Internal(3));
        assert_eq!(pmx.materials[0].environment_index, None);

        assert_eq!(pmx.bones[0].tail, PmxBoneTail::Offset(Vec3::Y));
        assert_eq!(pmx.bones[1].tail, PmxBoneTail::Index(None));
        assert_eq!(pmx.bones[1].inherit_parent.unwrap().index, Some(0));
        let ik = pmx.bones[2].ik.as_ref().unwrap();
        assert_eq!((ik.target_index, ik.loop_count, ik.links.len()), (1, 40, 1));

        assert_eq!(
            pmx.morphs[1].kind,
            PmxMorphKind::Skipped {
                morph_type: PmxMorphType::Bone,
                count: 1
            }
        );
        assert_eq!(pmx.display_frames[0].elements, vec![PmxDisplayElement::Bone(Some(0))]);
        assert_eq!(pmx.rigid_bodies[0].mode, PmxRigidBodyMode::Dynamic);
        assert_eq!(pmx.rigid_bodies[0].shape, PmxRigidBodyShape::Box);
        assert!(pmx.joints.is_empty());
    }

    #[test]
    fn test_build_model() {
        let config = LoaderConfig {
            load_textures: false,
            ..Default::default()
        };
        let scene = parse(&fixture()).unwrap().into_mmd_scene(Path::new("."), &config);
        assert_eq!(scene.indices, vec![0, 2, 1]);
        assert_eq!(scene.vertices[0].position, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(scene.vertices[2].joints, [0, 1, 0, 0]);
        assert_eq!(scene.vertices[2].weights, [0.25, 0.75, 0.0, 0.0]);

        let result = mmd::build(scene, &config, "PMX skin").unwrap();
        assert_eq!(result.metadata.as_ref().unwrap().title_universal.as_deref(), Some("test"));
        let model = result.model.unwrap();
        let root = model.default_scene().unwrap();
        // センター、左足ＩＫ、材质节点、相机
        assert_eq!(root.nodes.len(), 4);

        let spine = &root.nodes[0].children[0];
        assert_eq!(spine.transform, Some(NodeTransform::from_translation(Vec3::new(0.0, 1.0, -1.0))));
        let ik = spine
            .components
            .iter()
            .find_map(|component| match component {
                NodeComponent::IkTarget(ik) => Some(ik),
                _ => None,
            })
            .unwrap();
        assert_eq!(ik.effector, NodeId::new(model.id, 2));
        assert_eq!(
            ik.joints[0].limit,
            Some(IkLimits {
                min: Vec3::new(0.0, 0.0, -0.5),
                max: Vec3::new(1.0, 0.0, 0.0)
            })
        );
        assert!(root.nodes[0]
            .components
            .iter()
            .any(|component| matches!(component, NodeComponent::InfluenceSource(influence) if influence.influence == 0.5)));

        let index = SceneIndex::build(&model, root);
        assert_eq!(index.find_node_by_humanoid_tag(HumanoidTag::Hips), Some(0));
        assert_eq!(index.find_expression_by_tag(ExpressionTag::Aa), Some(0));
        // 组里指向骨骼形变的项被丢弃
        assert_eq!(
            model.expressions[1],
            Expression::Group {
                name: Some("grp".to_string()),
                tag: None,
                targets: vec![GroupItem { target: 0, influence: 0.5 }],
            }
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut data = fixture();
        data[0] = b'X';
        assert!(matches!(parse(&data), Err(ModelError::MalformedSignature(_))));

        let mut data = fixture();
        data[4..8].copy_from_slice(&1.0f32.to_le_bytes());
        assert!(matches!(parse(&data), Err(ModelError::SchemaViolation(_))));

        let data = fixture();
        assert!(matches!(parse(&data[..60]), Err(ModelError::UnexpectedEof(_))));
    }

    #[test]
    fn test_truncated_trailing_sections() {
        let data = fixture();
        // 截断在刚体记录内部
        assert!(matches!(
            parse(&data[..data.len() - 20]),
            Err(ModelError::UnexpectedEof(_))
        ));
        // 截断在显示枠记录内部
        let display_end = data.len() - 4 - 76;
        assert!(matches!(
            parse(&data[..display_end - 1]),
            Err(ModelError::UnexpectedEof(_))
        ));

        // 恰好在段边界结束时缺失的段为空
        let pmx = parse(&data[..data.len() - 4]).unwrap();
        assert_eq!(pmx.rigid_bodies.len(), 1);
        assert!(pmx.joints.is_empty());
        let pmx = parse(&data[..display_end]).unwrap();
        assert_eq!(pmx.display_frames.len(), 1);
        assert!(pmx.rigid_bodies.is_empty());
    }

    #[test]
    fn test_inherit_without_source() {
        let config = LoaderConfig {
            load_textures: false,
            ..Default::default()
        };
        let pmx = parse(&fixture_with_inherit(-1)).unwrap();
        assert!(pmx.bones[1].inherits());
        assert_eq!(pmx.bones[1].inherit_parent.unwrap().index, None);

        let model = mmd::build(pmx.into_mmd_scene(Path::new("."), &config), &config, "PMX skin")
            .unwrap()
            .model
            .unwrap();
        let mut influences = 0;
        model.default_scene().unwrap().for_each_node(|node| {
            influences += node
                .components
                .iter()
                .filter(|component| matches!(component, NodeComponent::InfluenceSource(_)))
                .count();
        });
        assert_eq!(influences, 0);

        // 越界的付与来源仍然是错误
        let scene = parse(&fixture_with_inherit(9)).unwrap().into_mmd_scene(Path::new("."), &config);
        assert!(matches!(
            mmd::build(scene, &config, "PMX skin"),
            Err(ModelError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_probe() {
        assert!(PmxLoader.probe(b"PMX \x00\x00\x00\x40"));
        assert!(!PmxLoader.probe(b"PMD "));
    }
}
