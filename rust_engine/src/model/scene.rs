//! 场景、模型与场景索引
//!
//! SceneIndex 把节点树按先序展平为变换下标，
//! 并建立 id / 名称 / 人形标签 / 表情 / 相机到下标的查找表，供动画绑定使用。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::{Quat, Vec3};

use super::{Expression, ExpressionTag, HumanoidTag, ModelId, Node, NodeId, NodeTransform, Skin};
use crate::{ModelError, Result};

/// 场景：若干根节点 + 可选的整体初始变换
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub nodes: Vec<Node>,
    pub initial_transform: Option<NodeTransform>,
}

impl Scene {
    pub fn for_each_node<'a>(&'a self, mut f: impl FnMut(&'a Node)) {
        for node in &self.nodes {
            node.for_each(&mut f);
        }
    }
}

/// 统一的模型数据，构造后不可变
#[derive(Clone, Debug)]
pub struct Model {
    pub id: ModelId,
    pub scenes: Vec<Scene>,
    pub default_scene: Option<usize>,
    pub skins: Vec<Arc<Skin>>,
    pub expressions: Vec<Expression>,
}

impl Model {
    pub fn new(
        id: ModelId,
        scenes: Vec<Scene>,
        default_scene: Option<usize>,
        skins: Vec<Arc<Skin>>,
        expressions: Vec<Expression>,
    ) -> Result<Self> {
        if let Some(index) = default_scene {
            if index >= scenes.len() {
                return Err(ModelError::UnresolvedReference(format!(
                    "default scene {} out of {} scenes",
                    index,
                    scenes.len()
                )));
            }
        }
        for expression in &expressions {
            if let Expression::Group { targets, .. } = expression {
                for item in targets {
                    match expressions.get(item.target) {
                        Some(Expression::Target { .. }) => {}
                        _ => {
                            return Err(ModelError::UnresolvedReference(format!(
                                "expression group item {} is not an expression target",
                                item.target
                            )))
                        }
                    }
                }
            }
        }
        Ok(Self {
            id,
            scenes,
            default_scene,
            skins,
            expressions,
        })
    }

    /// 缺省场景，未指定时取第一个
    pub fn default_scene(&self) -> Option<&Scene> {
        match self.default_scene {
            Some(index) => self.scenes.get(index),
            None => self.scenes.first(),
        }
    }
}

/// 场景查找表
#[derive(Debug, Default)]
pub struct SceneIndex {
    nodes: Vec<NodeId>,
    /// 静止姿态的平移与旋转，无变换的节点记为单位变换
    rest_poses: Vec<(Vec3, Quat)>,
    node_ids: HashMap<NodeId, usize>,
    node_names: HashMap<String, usize>,
    humanoid_tags: HashMap<HumanoidTag, usize>,

    /// 模型表情列表中 Target 的下标
    expressions: Vec<usize>,
    expression_names: HashMap<String, usize>,
    expression_tags: HashMap<ExpressionTag, usize>,
    /// 模型表情列表中 Group 的下标
    expression_groups: Vec<usize>,
    group_names: HashMap<String, usize>,
    group_tags: HashMap<ExpressionTag, usize>,

    camera_names: HashMap<String, usize>,
    camera_count: usize,

    transform_nodes: Vec<usize>,
    morph_target_nodes: Vec<usize>,
    joint_nodes: Vec<usize>,
}

impl SceneIndex {
    /// 同名/同标签时先出现的优先
    pub fn build(model: &Model, scene: &Scene) -> Self {
        let mut index = SceneIndex::default();
        let mut joints = HashSet::new();
        let mut camera_index = 0;

        scene.for_each_node(|node| {
            let transform_index = index.nodes.len();
            index.nodes.push(node.id);
            let (translation, rotation, _) = node.transform.unwrap_or_default().to_decomposed();
            index.rest_poses.push((translation, rotation));
            index.node_ids.entry(node.id).or_insert(transform_index);
            if let Some(name) = &node.name {
                index.node_names.entry(name.clone()).or_insert(transform_index);
            }
            if let Some(tag) = node.humanoid_tag {
                index.humanoid_tags.entry(tag).or_insert(transform_index);
            }
            if node.transform.is_some() {
                index.transform_nodes.push(transform_index);
            }
            if node.mesh().map_or(false, |mesh| mesh.is_morphable()) {
                index.morph_target_nodes.push(transform_index);
            }
            if let Some(skin) = node.skin() {
                joints.extend(skin.joints.iter().copied());
            }
            for camera in node.cameras() {
                if let Some(name) = camera.name() {
                    index.camera_names.entry(name.to_string()).or_insert(camera_index);
                }
                camera_index += 1;
            }
        });
        index.camera_count = camera_index;

        index.joint_nodes = index
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, id)| joints.contains(*id))
            .map(|(i, _)| i)
            .collect();

        // 蒙皮上的人形标签补充节点自身没有的标签
        for skin in &model.skins {
            for (joint, tag) in skin.joints.iter().zip(&skin.joint_humanoid_tags) {
                if let (Some(tag), Some(&transform_index)) = (tag, index.node_ids.get(joint)) {
                    index.humanoid_tags.entry(*tag).or_insert(transform_index);
                }
            }
        }

        for (model_index, expression) in model.expressions.iter().enumerate() {
            let (list, names, tags) = if expression.is_group() {
                (&mut index.expression_groups, &mut index.group_names, &mut index.group_tags)
            } else {
                (&mut index.expressions, &mut index.expression_names, &mut index.expression_tags)
            };
            let slot = list.len();
            list.push(model_index);
            if let Some(name) = expression.name() {
                names.entry(name.to_string()).or_insert(slot);
            }
            if let Some(tag) = expression.tag() {
                tags.entry(tag).or_insert(slot);
            }
        }

        index
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_id(&self, transform_index: usize) -> Option<NodeId> {
        self.nodes.get(transform_index).copied()
    }

    /// 节点的静止平移与旋转，相对动画在此基础上叠加
    pub fn rest_pose(&self, transform_index: usize) -> Option<(Vec3, Quat)> {
        self.rest_poses.get(transform_index).copied()
    }

    pub fn find_node_by_id(&self, id: NodeId) -> Option<usize> {
        self.node_ids.get(&id).copied()
    }

    pub fn find_node_by_name(&self, name: &str) -> Option<usize> {
        self.node_names.get(name).copied()
    }

    pub fn find_node_by_humanoid_tag(&self, tag: HumanoidTag) -> Option<usize> {
        self.humanoid_tags.get(&tag).copied()
    }

    pub fn expression_count(&self) -> usize {
        self.expressions.len()
    }

    pub fn expression_group_count(&self) -> usize {
        self.expression_groups.len()
    }

    /// 表情槽位对应模型表情列表中的下标
    pub fn expression_model_index(&self, slot: usize) -> Option<usize> {
        self.expressions.get(slot).copied()
    }

    pub fn expression_group_model_index(&self, slot: usize) -> Option<usize> {
        self.expression_groups.get(slot).copied()
    }

    pub fn find_expression_by_name(&self, name: &str) -> Option<usize> {
        self.expression_names.get(name).copied()
    }

    pub fn find_expression_by_tag(&self, tag: ExpressionTag) -> Option<usize> {
        self.expression_tags.get(&tag).copied()
    }

    pub fn find_expression_group_by_name(&self, name: &str) -> Option<usize> {
        self.group_names.get(name).copied()
    }

    pub fn find_expression_group_by_tag(&self, tag: ExpressionTag) -> Option<usize> {
        self.group_tags.get(&tag).copied()
    }

    pub fn camera_count(&self) -> usize {
        self.camera_count
    }

    pub fn find_camera_by_name(&self, name: &str) -> Option<usize> {
        self.camera_names.get(name).copied()
    }

    /// 带有变换的节点
    pub fn transform_nodes(&self) -> &[usize] {
        &self.transform_nodes
    }

    /// 挂有可形变网格的节点
    pub fn morph_target_nodes(&self) -> &[usize] {
        &self.morph_target_nodes
    }

    /// 作为蒙皮关节的节点
    pub fn joint_nodes(&self) -> &[usize] {
        &self.joint_nodes
    }
}
