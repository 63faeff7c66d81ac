//! PMX / PMD 共用的场景构建
//!
//! 两种格式的解析结果先整理为 MmdScene，再统一转换为模型：
//! - 骨骼按父子关系组成节点树，节点 id 即骨骼下标
//! - 所有材质共享一份交错顶点缓冲（位置、法线、UV、关节、权重），各自引用索引缓冲的一段
//! - 每个材质一个网格节点，挂同一个蒙皮
//! - 顶点形变成为所有材质网格共有的形变目标，并导出为表情；组形变导出为表情组
//! - 末尾附加一个 MMD 相机节点

use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use super::MMD_CAMERA_NAME;
use crate::config::LoaderConfig;
use crate::loader::LoadResult;
use crate::model::{
    Accessor, AccessorType, Binding, Buffer, BufferView, Camera, ComponentType, Expression, ExpressionTag, GroupItem,
    HumanoidTag, IkJoint, IkLimits, IkTarget, Influence, Material, Mesh, MeshId, Metadata, Mode, Model, ModelId,
    MorphTarget, Node, NodeComponent, NodeId, NodeTransform, Primitive, Sampler, Scene, Skin, Texture, TextureInfo,
    TextureType, UnlitMaterial, VertexAttributes,
};
use crate::util::{map_or_buffer_region, open_case_insensitive};
use crate::{ModelError, Result};

/// 交错顶点布局：position(12) normal(12) uv(8) joints(16) weights(16)
const VERTEX_STRIDE: usize = 64;
const NORMAL_OFFSET: usize = 12;
const TEXCOORD_OFFSET: usize = 24;
const JOINTS_OFFSET: usize = 32;
const WEIGHTS_OFFSET: usize = 48;

/// 已转换到右手坐标系的顶点
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct MmdVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

#[derive(Clone, Debug)]
pub(crate) struct MmdMaterial {
    pub name: String,
    pub diffuse: Vec4,
    pub texture: Option<usize>,
    pub double_sided: bool,
    /// 该材质使用的索引数，按材质顺序在索引缓冲中连续排列
    pub index_count: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct MmdIkLink {
    pub bone: usize,
    /// (min, max)，文件坐标系下的欧拉角
    pub limits: Option<(Vec3, Vec3)>,
}

#[derive(Clone, Debug)]
pub(crate) struct MmdIk {
    /// 被 IK 拉动的末端骨骼
    pub target: usize,
    pub loop_count: i32,
    pub limit_radian: f32,
    pub links: Vec<MmdIkLink>,
}

/// 付与：本骨骼按比例继承 source 的旋转/平移
#[derive(Clone, Copy, Debug)]
pub(crate) struct MmdInherit {
    pub source: usize,
    pub influence: f32,
    pub rotation: bool,
    pub translation: bool,
    pub local: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct MmdBone {
    pub name: String,
    pub english_name: Option<String>,
    /// 模型空间位置
    pub position: Vec3,
    pub parent: Option<usize>,
    pub ik: Option<MmdIk>,
    pub inherit: Option<MmdInherit>,
}

#[derive(Clone, Debug)]
pub(crate) enum MmdMorphKind {
    /// (顶点下标, 位移)
    Vertex(Vec<(u32, Vec3)>),
    /// (形变下标, 系数)
    Group(Vec<(usize, f32)>),
    /// 不导出的形变（骨骼、UV、材质等）
    Unsupported,
}

#[derive(Clone, Debug)]
pub(crate) struct MmdMorph {
    pub name: String,
    pub english_name: Option<String>,
    pub kind: MmdMorphKind,
}

/// 格式无关的 MMD 模型
#[derive(Debug, Default)]
pub(crate) struct MmdScene {
    pub name: Option<String>,
    pub english_name: Option<String>,
    pub comment: Option<String>,
    pub english_comment: Option<String>,
    pub vertices: Vec<MmdVertex>,
    /// 已调整为逆时针的三角形索引
    pub indices: Vec<u32>,
    pub textures: Vec<Option<Arc<Texture>>>,
    pub materials: Vec<MmdMaterial>,
    pub bones: Vec<MmdBone>,
    pub morphs: Vec<MmdMorph>,
}

/// 空字符串视为缺失
pub(crate) fn non_empty(text: String) -> Option<String> {
    Some(text).filter(|text| !text.is_empty())
}

/// 把模型里的相对路径（可能用 \ 分隔）解析到 base_path 下
fn texture_path(base_path: &Path, reference: &str) -> PathBuf {
    reference
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .fold(base_path.to_path_buf(), |path, part| path.join(part))
}

fn load_texture(base_path: &Path, reference: &str, size_limit: u64) -> Result<Texture> {
    let file = open_case_insensitive(&texture_path(base_path, reference))?;
    let length = file.metadata()?.len();
    let data = map_or_buffer_region(&file, 0, length, size_limit)?;
    let texture_type = TextureType::from_magic(&data);
    let length = data.len();
    let buffer = Arc::new(Buffer::new(Some(format!("Texture {}", reference)), Arc::new(data)));
    Ok(Texture {
        name: Some(reference.to_string()),
        buffer_view: Some(Arc::new(BufferView::new(buffer, 0, length, 0)?)),
        texture_type,
        sampler: Sampler::default(),
    })
}

/// 读取纹理文件，读不到的纹理记为 None 并警告
pub(crate) fn load_textures(base_path: &Path, references: &[String], config: &LoaderConfig) -> Vec<Option<Arc<Texture>>> {
    if !config.load_textures {
        return vec![None; references.len()];
    }
    references
        .iter()
        .map(|reference| {
            if reference.is_empty() {
                return None;
            }
            match load_texture(base_path, reference, config.texture_read_limit) {
                Ok(texture) => Some(Arc::new(texture)),
                Err(err) => {
                    log::warn!("无法加载纹理 {}: {}", reference, err);
                    None
                }
            }
        })
        .collect()
}

fn vertex_buffer(vertices: &[MmdVertex]) -> Vec<u8> {
    let mut data = vec![0u8; vertices.len() * VERTEX_STRIDE];
    for (vertex, chunk) in vertices.iter().zip(data.chunks_exact_mut(VERTEX_STRIDE)) {
        LittleEndian::write_f32_into(&vertex.position.to_array(), &mut chunk[..NORMAL_OFFSET]);
        LittleEndian::write_f32_into(&vertex.normal.to_array(), &mut chunk[NORMAL_OFFSET..TEXCOORD_OFFSET]);
        LittleEndian::write_f32_into(&vertex.uv.to_array(), &mut chunk[TEXCOORD_OFFSET..JOINTS_OFFSET]);
        LittleEndian::write_u32_into(&vertex.joints, &mut chunk[JOINTS_OFFSET..WEIGHTS_OFFSET]);
        LittleEndian::write_f32_into(&vertex.weights, &mut chunk[WEIGHTS_OFFSET..]);
    }
    data
}

/// 顶点数不超过 u16 时用 16 位索引
fn index_buffer(indices: &[u32], vertex_count: usize) -> (Vec<u8>, ComponentType) {
    if vertex_count <= u16::MAX as usize + 1 {
        let mut data = vec![0u8; indices.len() * 2];
        for (index, chunk) in indices.iter().zip(data.chunks_exact_mut(2)) {
            LittleEndian::write_u16(chunk, *index as u16);
        }
        (data, ComponentType::UnsignedShort)
    } else {
        let mut data = vec![0u8; indices.len() * 4];
        LittleEndian::write_u32_into(indices, &mut data);
        (data, ComponentType::UnsignedInt)
    }
}

struct Builder<'a> {
    scene: &'a MmdScene,
    model_id: ModelId,
    children: HashMap<usize, Vec<usize>>,
    /// 以 IK 末端骨骼为键
    ik_targets: HashMap<usize, Vec<usize>>,
    /// 以付与来源骨骼为键
    influence_sources: HashMap<usize, Vec<usize>>,
    built: usize,
}

impl<'a> Builder<'a> {
    fn new(scene: &'a MmdScene, model_id: ModelId) -> Result<(Self, Vec<usize>)> {
        let bone_count = scene.bones.len();
        let check = |index: usize, what: &str| {
            if index < bone_count {
                Ok(index)
            } else {
                Err(ModelError::UnresolvedReference(format!(
                    "{} {} out of {} bones",
                    what, index, bone_count
                )))
            }
        };

        let mut roots = Vec::new();
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut ik_targets: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut influence_sources: HashMap<usize, Vec<usize>> = HashMap::new();
        for (index, bone) in scene.bones.iter().enumerate() {
            match bone.parent {
                Some(parent) if parent != index => children.entry(check(parent, "parent bone")?).or_default().push(index),
                _ => roots.push(index),
            }
            if let Some(ik) = &bone.ik {
                ik_targets.entry(check(ik.target, "IK target bone")?).or_default().push(index);
                for link in &ik.links {
                    check(link.bone, "IK link bone")?;
                }
            }
            if let Some(inherit) = &bone.inherit {
                influence_sources
                    .entry(check(inherit.source, "inherit source bone")?)
                    .or_default()
                    .push(index);
            }
        }

        Ok((
            Self {
                scene,
                model_id,
                children,
                ik_targets,
                influence_sources,
                built: 0,
            },
            roots,
        ))
    }

    fn node_id(&self, index: usize) -> NodeId {
        NodeId::new(self.model_id, index)
    }

    fn components(&self, index: usize) -> Vec<NodeComponent> {
        let bones = &self.scene.bones;
        let mut components = Vec::new();
        for &ik_bone in self.ik_targets.get(&index).into_iter().flatten() {
            let Some(ik) = &bones[ik_bone].ik else { continue };
            components.push(NodeComponent::IkTarget(IkTarget {
                limit_radian: ik.limit_radian,
                loop_count: ik.loop_count,
                joints: ik
                    .links
                    .iter()
                    .map(|link| IkJoint {
                        node: self.node_id(link.bone),
                        // 镜像 z 轴后角度限制反号
                        limit: link.limits.map(|(min, max)| IkLimits { min: -max, max: -min }),
                    })
                    .collect(),
                effector: self.node_id(ik_bone),
            }));
        }
        for &target in self.influence_sources.get(&index).into_iter().flatten() {
            let Some(inherit) = bones[target].inherit else { continue };
            components.push(NodeComponent::InfluenceSource(Influence {
                target: self.node_id(target),
                influence: inherit.influence,
                rotation: inherit.rotation,
                translation: inherit.translation,
                append_local: inherit.local,
            }));
        }
        components
    }

    fn enter_bone(&mut self, index: usize, parent_position: Vec3) -> BoneFrame {
        self.built += 1;
        BoneFrame {
            index,
            parent_position,
            pending: self.children.get(&index).cloned().unwrap_or_default().into_iter(),
            children: Vec::new(),
        }
    }

    fn finish_bone(&self, frame: BoneFrame) -> Result<Node> {
        let bone = &self.scene.bones[frame.index];
        Ok(Node::new(
            self.node_id(frame.index),
            Some(bone.name.clone()),
            Some(NodeTransform::from_translation(bone.position - frame.parent_position)),
            frame.children,
            self.components(frame.index),
        )?
        .with_humanoid_tag(bone_humanoid_tag(bone)))
    }

    /// 后序构建骨骼树；骨骼链可以很深，用显式栈代替递归
    fn bone_nodes(&mut self, roots: &[usize]) -> Result<Vec<Node>> {
        let scene = self.scene;
        let mut nodes = Vec::with_capacity(roots.len());
        for &root in roots {
            let mut stack = vec![self.enter_bone(root, Vec3::ZERO)];
            while let Some(mut frame) = stack.pop() {
                if let Some(child) = frame.pending.next() {
                    let position = scene.bones[frame.index].position;
                    stack.push(frame);
                    stack.push(self.enter_bone(child, position));
                    continue;
                }
                let node = self.finish_bone(frame)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => nodes.push(node),
                }
            }
        }
        Ok(nodes)
    }
}

/// 构建中的骨骼：尚未处理的子骨骼与已完成的子树
struct BoneFrame {
    index: usize,
    parent_position: Vec3,
    pending: std::vec::IntoIter<usize>,
    children: Vec<Node>,
}

fn bone_humanoid_tag(bone: &MmdBone) -> Option<HumanoidTag> {
    HumanoidTag::from_pmx_japanese(&bone.name)
        .or_else(|| bone.english_name.as_deref().and_then(HumanoidTag::from_pmx_english))
}

/// 关节下标越界且权重为 0 的槽位归零，权重非 0 时报错
fn sanitize_joints(vertices: &mut [MmdVertex], bone_count: usize) -> Result<()> {
    for (vertex_index, vertex) in vertices.iter_mut().enumerate() {
        for (joint, weight) in vertex.joints.iter_mut().zip(vertex.weights) {
            if (*joint as usize) < bone_count {
                continue;
            }
            if weight != 0.0 {
                return Err(ModelError::UnresolvedReference(format!(
                    "vertex {} references bone {} out of {} bones",
                    vertex_index, joint, bone_count
                )));
            }
            *joint = 0;
        }
    }
    Ok(())
}

/// 顶点形变展开为整份顶点数的位置增量
fn morph_targets(scene: &MmdScene, buffer_name: &str) -> Result<(Vec<MorphTarget>, Vec<usize>)> {
    let vertex_count = scene.vertices.len();
    let vertex_morphs: Vec<(usize, &Vec<(u32, Vec3)>)> = scene
        .morphs
        .iter()
        .enumerate()
        .filter_map(|(index, morph)| match &morph.kind {
            MmdMorphKind::Vertex(offsets) => Some((index, offsets)),
            _ => None,
        })
        .collect();
    if vertex_morphs.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let target_length = vertex_count * 12;
    let mut data = vec![0u8; target_length * vertex_morphs.len()];
    for (target, (morph_index, offsets)) in vertex_morphs.iter().enumerate() {
        let target_data = &mut data[target * target_length..(target + 1) * target_length];
        for &(vertex, offset) in offsets.iter() {
            let vertex = vertex as usize;
            if vertex >= vertex_count {
                return Err(ModelError::UnresolvedReference(format!(
                    "morph {} moves vertex {} out of {} vertices",
                    morph_index, vertex, vertex_count
                )));
            }
            LittleEndian::write_f32_into(&offset.to_array(), &mut target_data[vertex * 12..vertex * 12 + 12]);
        }
    }

    let buffer = Arc::new(Buffer::from_vec(Some(buffer_name.to_string()), data));
    let targets = (0..vertex_morphs.len())
        .map(|target| {
            let view = Arc::new(BufferView::new(buffer.clone(), target * target_length, target_length, 0)?);
            let accessor = Accessor::new(Some(view), 0, ComponentType::Float, false, vertex_count, AccessorType::Vec3)?;
            Ok(MorphTarget {
                position: Some(Arc::new(accessor)),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((targets, vertex_morphs.iter().map(|(index, _)| *index).collect()))
}

fn vertex_attributes(scene: &MmdScene) -> Result<VertexAttributes> {
    let vertex_count = scene.vertices.len();
    let buffer = Arc::new(Buffer::from_vec(Some("Vertex Buffer".to_string()), vertex_buffer(&scene.vertices)));
    let view = Arc::new(BufferView::new(buffer, 0, vertex_count * VERTEX_STRIDE, VERTEX_STRIDE)?);
    let accessor = |offset: usize, component_type: ComponentType, accessor_type: AccessorType| -> Result<Arc<Accessor>> {
        Ok(Arc::new(Accessor::new(
            Some(view.clone()),
            offset,
            component_type,
            false,
            vertex_count,
            accessor_type,
        )?))
    };

    let mut attributes = VertexAttributes::new(accessor(0, ComponentType::Float, AccessorType::Vec3)?);
    attributes.normal = Some(accessor(NORMAL_OFFSET, ComponentType::Float, AccessorType::Vec3)?);
    attributes.texcoords.push(accessor(TEXCOORD_OFFSET, ComponentType::Float, AccessorType::Vec2)?);
    attributes.joints.push(accessor(JOINTS_OFFSET, ComponentType::UnsignedInt, AccessorType::Vec4)?);
    attributes.weights.push(accessor(WEIGHTS_OFFSET, ComponentType::Float, AccessorType::Vec4)?);
    Ok(attributes)
}

fn expressions(scene: &MmdScene, target_morphs: &[usize], mesh_ids: &[MeshId]) -> Vec<Expression> {
    let mut expressions = Vec::new();
    let mut morph_to_expression = HashMap::new();

    if !mesh_ids.is_empty() {
        for (target_index, &morph_index) in target_morphs.iter().enumerate() {
            let morph = &scene.morphs[morph_index];
            morph_to_expression.insert(morph_index, expressions.len());
            expressions.push(Expression::Target {
                name: non_empty(morph.name.clone()).or_else(|| morph.english_name.clone()),
                tag: ExpressionTag::from_pmx_japanese(&morph.name),
                is_binary: false,
                bindings: mesh_ids
                    .iter()
                    .map(|&mesh| Binding::MeshMorphTarget {
                        mesh,
                        index: target_index,
                        weight: 0.0,
                    })
                    .collect(),
            });
        }
    }

    for morph in &scene.morphs {
        let MmdMorphKind::Group(items) = &morph.kind else {
            continue;
        };
        expressions.push(Expression::Group {
            name: non_empty(morph.name.clone()).or_else(|| morph.english_name.clone()),
            tag: ExpressionTag::from_pmx_japanese(&morph.name),
            targets: items
                .iter()
                .filter_map(|&(morph_index, influence)| {
                    morph_to_expression.get(&morph_index).map(|&target| GroupItem { target, influence })
                })
                .collect(),
        });
    }
    expressions
}

/// 构建模型与元数据
pub(crate) fn build(mut scene: MmdScene, config: &LoaderConfig, skin_name: &str) -> Result<LoadResult> {
    if scene.vertices.is_empty() {
        return Err(ModelError::SchemaViolation("model has no vertices".to_string()));
    }
    let index_total: usize = scene.materials.iter().map(|material| material.index_count).sum();
    if index_total > scene.indices.len() {
        return Err(ModelError::UnresolvedReference(format!(
            "materials use {} indices, but only {} present",
            index_total,
            scene.indices.len()
        )));
    }
    if let Some(index) = scene.indices.iter().find(|&&index| index as usize >= scene.vertices.len()) {
        return Err(ModelError::UnresolvedReference(format!(
            "index {} out of {} vertices",
            index,
            scene.vertices.len()
        )));
    }
    sanitize_joints(&mut scene.vertices, scene.bones.len())?;

    let scene = &scene;
    let model_id = ModelId::next();
    let bone_count = scene.bones.len();

    let (mut builder, roots) = Builder::new(scene, model_id)?;
    let mut nodes = builder.bone_nodes(&roots)?;
    if builder.built != bone_count {
        return Err(ModelError::SchemaViolation(format!(
            "bone hierarchy has a cycle: only {} of {} bones reachable",
            builder.built, bone_count
        )));
    }

    let skin = if bone_count > 0 {
        Some(Arc::new(Skin::new(
            Some(skin_name.to_string()),
            (0..bone_count).map(|index| NodeId::new(model_id, index)).collect(),
            Some(
                scene
                    .bones
                    .iter()
                    .map(|bone| Mat4::from_translation(-bone.position))
                    .collect(),
            ),
            scene.bones.iter().map(bone_humanoid_tag).collect(),
        )?))
    } else {
        None
    };

    let attributes = vertex_attributes(scene)?;
    let (targets, target_morphs) = morph_targets(scene, "Morph Buffer")?;
    let (index_data, index_type) = index_buffer(&scene.indices, scene.vertices.len());
    let index_length = index_data.len();
    let index_view = Arc::new(BufferView::new(
        Arc::new(Buffer::from_vec(Some("Index Buffer".to_string()), index_data)),
        0,
        index_length,
        0,
    )?);

    let mut mesh_ids = Vec::new();
    let mut index_offset = 0;
    for (material_index, mmd_material) in scene.materials.iter().enumerate() {
        let node_index = bone_count + material_index;
        let offset = index_offset;
        index_offset += mmd_material.index_count;
        if mmd_material.index_count == 0 {
            log::debug!("跳过没有面的材质 {}", mmd_material.name);
            continue;
        }

        let material = Material::Unlit(UnlitMaterial {
            name: non_empty(mmd_material.name.clone()),
            base_color: mmd_material.diffuse,
            base_color_texture: mmd_material
                .texture
                .and_then(|index| scene.textures.get(index).cloned().flatten())
                .map(TextureInfo::new),
            double_sided: mmd_material.double_sided,
            ..Default::default()
        });
        let indices = Accessor::new(
            Some(index_view.clone()),
            offset * index_type.byte_length(),
            index_type,
            false,
            mmd_material.index_count,
            AccessorType::Scalar,
        )?;
        let primitive = Primitive::with_targets(
            Mode::Triangles,
            Some(Arc::new(material)),
            attributes.clone(),
            Some(Arc::new(indices)),
            targets.clone(),
            None,
        )?;
        let mesh_id = MeshId::new(model_id, node_index);
        mesh_ids.push(mesh_id);

        let mut components = vec![NodeComponent::Mesh(Arc::new(Mesh {
            id: mesh_id,
            primitives: vec![primitive],
            weights: None,
        }))];
        if let Some(skin) = &skin {
            components.push(NodeComponent::Skin(skin.clone()));
        }
        nodes.push(Node::new(
            NodeId::new(model_id, node_index),
            Some(format!("Node for material {}", mmd_material.name)),
            None,
            vec![],
            components,
        )?);
    }

    nodes.push(Node::new(
        NodeId::new(model_id, bone_count + scene.materials.len()),
        Some(MMD_CAMERA_NAME.to_string()),
        None,
        vec![],
        vec![NodeComponent::Camera(Camera::Mmd {
            name: Some(MMD_CAMERA_NAME.to_string()),
        })],
    )?);

    let expressions = expressions(scene, &target_morphs, &mesh_ids);
    let expression_count = expressions.len();
    let model_scene = Scene {
        nodes,
        initial_transform: Some(NodeTransform::Decomposed {
            translation: Vec3::ZERO,
            rotation: Quat::from_rotation_y(PI),
            scale: Vec3::splat(config.mmd_scale),
        }),
    };
    let model = Model::new(
        model_id,
        vec![model_scene],
        Some(0),
        skin.into_iter().collect(),
        expressions,
    )?;

    log::debug!(
        "MMD 模型构建完成: {} 个顶点, {} 根骨骼, {} 个材质, {} 个形变目标, {} 个表情",
        scene.vertices.len(),
        bone_count,
        scene.materials.len(),
        targets.len(),
        expression_count
    );

    Ok(LoadResult {
        metadata: Some(Metadata {
            title: scene.name.clone(),
            title_universal: scene.english_name.clone(),
            comment: scene.comment.clone(),
            comment_universal: scene.english_comment.clone(),
            ..Default::default()
        }),
        model: Some(model),
        animations: Vec::new(),
    })
}
