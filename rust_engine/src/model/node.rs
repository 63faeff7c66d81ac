//! 节点、变换与节点组件

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};

use super::{Camera, HumanoidTag, Mesh, NodeId};
use crate::{ModelError, Result};

/// 相对父节点的变换
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeTransform {
    Matrix(Mat4),
    Decomposed { translation: Vec3, rotation: Quat, scale: Vec3 },
}

impl NodeTransform {
    pub const IDENTITY: NodeTransform = NodeTransform::Decomposed {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        NodeTransform::Decomposed {
            translation,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        match *self {
            NodeTransform::Matrix(matrix) => matrix,
            NodeTransform::Decomposed { translation, rotation, scale } => {
                Mat4::from_scale_rotation_translation(scale, rotation, translation)
            }
        }
    }

    /// 拆分为 (平移, 旋转, 缩放)
    pub fn to_decomposed(&self) -> (Vec3, Quat, Vec3) {
        match *self {
            NodeTransform::Matrix(matrix) => {
                let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
                (translation, rotation, scale)
            }
            NodeTransform::Decomposed { translation, rotation, scale } => (translation, rotation, scale),
        }
    }
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 蒙皮：关节节点列表与逆绑定矩阵
#[derive(Clone, Debug)]
pub struct Skin {
    pub name: Option<String>,
    pub joints: Vec<NodeId>,
    pub inverse_bind_matrices: Option<Vec<Mat4>>,
    pub joint_humanoid_tags: Vec<Option<HumanoidTag>>,
}

impl Skin {
    pub fn new(
        name: Option<String>,
        joints: Vec<NodeId>,
        inverse_bind_matrices: Option<Vec<Mat4>>,
        joint_humanoid_tags: Vec<Option<HumanoidTag>>,
    ) -> Result<Self> {
        if let Some(matrices) = &inverse_bind_matrices {
            if matrices.len() != joints.len() {
                return Err(ModelError::SchemaViolation(format!(
                    "skin has {} joints but {} inverse bind matrices",
                    joints.len(),
                    matrices.len()
                )));
            }
        }
        let joint_humanoid_tags = if joint_humanoid_tags.is_empty() {
            vec![None; joints.len()]
        } else if joint_humanoid_tags.len() == joints.len() {
            joint_humanoid_tags
        } else {
            return Err(ModelError::SchemaViolation(format!(
                "skin has {} joints but {} humanoid tags",
                joints.len(),
                joint_humanoid_tags.len()
            )));
        };
        Ok(Self {
            name,
            joints,
            inverse_bind_matrices,
            joint_humanoid_tags,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// IK 关节的欧拉角限制（弧度）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkLimits {
    pub min: Vec3,
    pub max: Vec3,
}

impl IkLimits {
    /// 只有一个轴可动时返回该轴（例如膝盖）
    pub fn single_axis(&self) -> Option<Axis> {
        let x = self.min.x == 0.0 && self.max.x == 0.0;
        let y = self.min.y == 0.0 && self.max.y == 0.0;
        let z = self.min.z == 0.0 && self.max.z == 0.0;
        match (x, y, z) {
            (true, true, false) => Some(Axis::Z),
            (true, false, true) => Some(Axis::Y),
            (false, true, true) => Some(Axis::X),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkJoint {
    pub node: NodeId,
    pub limit: Option<IkLimits>,
}

/// IK 约束：只保存数据，不在本库求解
#[derive(Clone, Debug, PartialEq)]
pub struct IkTarget {
    pub limit_radian: f32,
    pub loop_count: i32,
    pub joints: Vec<IkJoint>,
    pub effector: NodeId,
}

/// 付与（继承）：目标节点按比例继承本节点的旋转/平移
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Influence {
    pub target: NodeId,
    pub influence: f32,
    pub rotation: bool,
    pub translation: bool,
    pub append_local: bool,
}

#[derive(Clone, Debug)]
pub enum NodeComponent {
    Mesh(Arc<Mesh>),
    Skin(Arc<Skin>),
    Camera(Camera),
    IkTarget(IkTarget),
    InfluenceSource(Influence),
}

/// 场景树中的节点，子节点由父节点独占
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,
    pub transform: Option<NodeTransform>,
    pub children: Vec<Node>,
    pub components: Vec<NodeComponent>,
    pub humanoid_tag: Option<HumanoidTag>,
}

impl Node {
    /// 每个节点最多一个网格、一个蒙皮，蒙皮必须配网格
    pub fn new(
        id: NodeId,
        name: Option<String>,
        transform: Option<NodeTransform>,
        children: Vec<Node>,
        components: Vec<NodeComponent>,
    ) -> Result<Self> {
        let meshes = components.iter().filter(|c| matches!(c, NodeComponent::Mesh(_))).count();
        let skins = components.iter().filter(|c| matches!(c, NodeComponent::Skin(_))).count();
        if meshes > 1 || skins > 1 {
            return Err(ModelError::SchemaViolation(format!(
                "node {} has {} meshes and {} skins",
                id.index, meshes, skins
            )));
        }
        if skins > 0 && meshes == 0 {
            return Err(ModelError::SchemaViolation(format!(
                "node {} has a skin but no mesh",
                id.index
            )));
        }
        Ok(Self {
            id,
            name,
            transform,
            children,
            components,
            humanoid_tag: None,
        })
    }

    pub fn with_humanoid_tag(mut self, tag: Option<HumanoidTag>) -> Self {
        self.humanoid_tag = tag;
        self
    }

    pub fn mesh(&self) -> Option<&Arc<Mesh>> {
        self.components.iter().find_map(|c| match c {
            NodeComponent::Mesh(mesh) => Some(mesh),
            _ => None,
        })
    }

    pub fn skin(&self) -> Option<&Arc<Skin>> {
        self.components.iter().find_map(|c| match c {
            NodeComponent::Skin(skin) => Some(skin),
            _ => None,
        })
    }

    pub fn cameras(&self) -> impl Iterator<Item = &Camera> {
        self.components.iter().filter_map(|c| match c {
            NodeComponent::Camera(camera) => Some(camera),
            _ => None,
        })
    }

    /// 先序遍历自身与全部后代
    pub fn for_each<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            f(node);
            stack.extend(node.children.iter().rev());
        }
    }
}

// 深层节点链逐层释放，避免递归析构耗尽栈
impl Drop for Node {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MeshId, ModelId};

    #[test]
    fn test_skin_requires_mesh() {
        let model = ModelId::next();
        let skin = Arc::new(Skin::new(None, vec![NodeId::new(model, 0)], None, vec![]).unwrap());
        let result = Node::new(
            NodeId::new(model, 1),
            None,
            None,
            vec![],
            vec![NodeComponent::Skin(skin.clone())],
        );
        assert!(matches!(result, Err(ModelError::SchemaViolation(_))));

        let mesh = Arc::new(Mesh {
            id: MeshId::new(model, 0),
            primitives: vec![],
            weights: None,
        });
        let node = Node::new(
            NodeId::new(model, 1),
            None,
            None,
            vec![],
            vec![NodeComponent::Skin(skin), NodeComponent::Mesh(mesh)],
        )
        .unwrap();
        assert!(node.mesh().is_some());
        assert_eq!(node.skin().map(|s| s.joint_humanoid_tags.len()), Some(1));
    }

    #[test]
    fn test_decomposed_matrix() {
        let transform = NodeTransform::Decomposed {
            translation: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(2.0),
        };
        let point = transform.to_matrix().transform_point3(Vec3::ONE);
        assert!(point.abs_diff_eq(Vec3::new(3.0, 4.0, 5.0), 1e-6));
    }

    #[test]
    fn test_single_axis_limit() {
        let knee = IkLimits {
            min: Vec3::new(-3.0, 0.0, 0.0),
            max: Vec3::new(-0.01, 0.0, 0.0),
        };
        assert_eq!(knee.single_axis(), Some(Axis::X));
        let free = IkLimits {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        };
        assert_eq!(free.single_axis(), None);
    }
}
