//! 网格与图元
//!
//! 图元构造时检查顶点属性的分量类型与数量，
//! 形变目标 targets 与 target_groups 必须同时存在或同时为空。

use std::sync::Arc;

use super::{Accessor, AccessorType, ComponentType, Material, MeshId};
use crate::{ModelError, Result};

/// 图元绘制模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Mode {
    pub fn from_gl(code: u32) -> Option<Self> {
        match code {
            0 => Some(Mode::Points),
            1 => Some(Mode::Lines),
            2 => Some(Mode::LineLoop),
            3 => Some(Mode::LineStrip),
            4 => Some(Mode::Triangles),
            5 => Some(Mode::TriangleStrip),
            6 => Some(Mode::TriangleFan),
            _ => None,
        }
    }
}

/// 顶点属性语义
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeKey {
    Position,
    Normal,
    Tangent,
    Texcoord,
    Color,
    Joints,
    Weights,
}

impl AttributeKey {
    fn allows(self, accessor: &Accessor) -> bool {
        use ComponentType::*;
        let component = (accessor.component_type, accessor.normalized);
        let component_ok = match self {
            AttributeKey::Position | AttributeKey::Normal | AttributeKey::Tangent => component == (Float, false),
            AttributeKey::Texcoord | AttributeKey::Color | AttributeKey::Weights => matches!(
                component,
                (Float, false) | (UnsignedByte, true) | (UnsignedShort, true)
            ),
            AttributeKey::Joints => matches!(
                component,
                (UnsignedByte, false) | (UnsignedShort, false) | (UnsignedInt, false) | (Byte, false) | (Short, false)
            ),
        };
        let type_ok = match self {
            AttributeKey::Position | AttributeKey::Normal => accessor.accessor_type == AccessorType::Vec3,
            AttributeKey::Tangent | AttributeKey::Joints | AttributeKey::Weights => {
                accessor.accessor_type == AccessorType::Vec4
            }
            AttributeKey::Texcoord => accessor.accessor_type == AccessorType::Vec2,
            AttributeKey::Color => matches!(accessor.accessor_type, AccessorType::Vec3 | AccessorType::Vec4),
        };
        component_ok && type_ok
    }

    fn check(self, accessor: &Accessor, count: Option<usize>) -> Result<()> {
        if !self.allows(accessor) {
            return Err(ModelError::SchemaViolation(format!(
                "bad accessor for {:?}: {:?}{} {:?}",
                self,
                accessor.component_type,
                if accessor.normalized { " (normalized)" } else { "" },
                accessor.accessor_type
            )));
        }
        if let Some(count) = count {
            if accessor.count != count {
                return Err(ModelError::SchemaViolation(format!(
                    "bad vertex attribute count for {:?}: {}, should be {}",
                    self, accessor.count, count
                )));
            }
        }
        Ok(())
    }
}

/// 图元的顶点属性
#[derive(Clone, Debug)]
pub struct VertexAttributes {
    pub position: Arc<Accessor>,
    pub normal: Option<Arc<Accessor>>,
    pub tangent: Option<Arc<Accessor>>,
    pub texcoords: Vec<Arc<Accessor>>,
    pub colors: Vec<Arc<Accessor>>,
    pub joints: Vec<Arc<Accessor>>,
    pub weights: Vec<Arc<Accessor>>,
}

impl VertexAttributes {
    pub fn new(position: Arc<Accessor>) -> Self {
        Self {
            position,
            normal: None,
            tangent: None,
            texcoords: Vec::new(),
            colors: Vec::new(),
            joints: Vec::new(),
            weights: Vec::new(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.position.count
    }
}

/// 单个形变目标（顶点增量）
#[derive(Clone, Debug, Default)]
pub struct MorphTarget {
    pub position: Option<Arc<Accessor>>,
    pub normal: Option<Arc<Accessor>>,
    pub tangent: Option<Arc<Accessor>>,
    pub texcoords: Vec<Arc<Accessor>>,
    pub colors: Vec<Arc<Accessor>>,
}

/// 形变目标在各数据通道中的下标及默认权重
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MorphTargetGroup {
    pub position: Option<usize>,
    pub color: Option<usize>,
    pub texcoord: Option<usize>,
    pub weight: f32,
}

impl MorphTargetGroup {
    /// 为目标列表生成分组，每种数据按出现顺序紧密编号
    pub fn for_targets(targets: &[MorphTarget], weights: Option<&[f32]>) -> Vec<MorphTargetGroup> {
        let mut position_index = 0;
        let mut color_index = 0;
        let mut texcoord_index = 0;
        fn next(present: bool, counter: &mut usize) -> Option<usize> {
            present.then(|| {
                let index = *counter;
                *counter += 1;
                index
            })
        }
        targets
            .iter()
            .enumerate()
            .map(|(index, target)| MorphTargetGroup {
                position: next(target.position.is_some(), &mut position_index),
                color: next(!target.colors.is_empty(), &mut color_index),
                texcoord: next(!target.texcoords.is_empty(), &mut texcoord_index),
                weight: weights.and_then(|w| w.get(index).copied()).unwrap_or(0.0),
            })
            .collect()
    }
}

/// 一次绘制批次
#[derive(Clone, Debug)]
pub struct Primitive {
    pub mode: Mode,
    pub material: Option<Arc<Material>>,
    pub attributes: VertexAttributes,
    pub indices: Option<Arc<Accessor>>,
    pub targets: Vec<MorphTarget>,
    pub target_groups: Vec<MorphTargetGroup>,
}

impl Primitive {
    pub fn new(
        mode: Mode,
        material: Option<Arc<Material>>,
        attributes: VertexAttributes,
        indices: Option<Arc<Accessor>>,
        targets: Vec<MorphTarget>,
        target_groups: Vec<MorphTargetGroup>,
    ) -> Result<Self> {
        if targets.is_empty() != target_groups.is_empty() {
            return Err(ModelError::SchemaViolation(format!(
                "morph targets ({}) and target groups ({}) must be declared together",
                targets.len(),
                target_groups.len()
            )));
        }
        if targets.len() != target_groups.len() {
            return Err(ModelError::SchemaViolation(format!(
                "{} morph targets but {} target groups",
                targets.len(),
                target_groups.len()
            )));
        }

        let count = Some(attributes.vertex_count());
        AttributeKey::Position.check(&attributes.position, None)?;
        if let Some(normal) = &attributes.normal {
            AttributeKey::Normal.check(normal, count)?;
        }
        if let Some(tangent) = &attributes.tangent {
            AttributeKey::Tangent.check(tangent, count)?;
        }
        for texcoord in &attributes.texcoords {
            AttributeKey::Texcoord.check(texcoord, count)?;
        }
        for color in &attributes.colors {
            AttributeKey::Color.check(color, count)?;
        }
        for joint in &attributes.joints {
            AttributeKey::Joints.check(joint, count)?;
        }
        for weight in &attributes.weights {
            AttributeKey::Weights.check(weight, count)?;
        }
        for target in &targets {
            if let Some(position) = &target.position {
                AttributeKey::Position.check(position, count)?;
            }
            if let Some(normal) = &target.normal {
                AttributeKey::Normal.check(normal, count)?;
            }
            if let Some(tangent) = &target.tangent {
                // glTF 形变目标的切线增量只有 xyz
                if tangent.count != attributes.vertex_count() {
                    return Err(ModelError::SchemaViolation("bad morph tangent count".to_string()));
                }
            }
            for texcoord in &target.texcoords {
                AttributeKey::Texcoord.check(texcoord, count)?;
            }
            for color in &target.colors {
                AttributeKey::Color.check(color, count)?;
            }
        }

        Ok(Self {
            mode,
            material,
            attributes,
            indices,
            targets,
            target_groups,
        })
    }

    /// 目标与分组一并生成
    pub fn with_targets(
        mode: Mode,
        material: Option<Arc<Material>>,
        attributes: VertexAttributes,
        indices: Option<Arc<Accessor>>,
        targets: Vec<MorphTarget>,
        weights: Option<&[f32]>,
    ) -> Result<Self> {
        let groups = MorphTargetGroup::for_targets(&targets, weights);
        Self::new(mode, material, attributes, indices, targets, groups)
    }

    pub fn is_morphable(&self) -> bool {
        !self.targets.is_empty()
    }
}

/// 网格
#[derive(Clone, Debug)]
pub struct Mesh {
    pub id: MeshId,
    pub primitives: Vec<Primitive>,
    /// 形变目标默认权重
    pub weights: Option<Vec<f32>>,
}

impl Mesh {
    pub fn is_morphable(&self) -> bool {
        self.primitives.iter().any(Primitive::is_morphable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3_accessor(count: usize) -> Arc<Accessor> {
        Arc::new(Accessor::zero_filled(ComponentType::Float, count, AccessorType::Vec3).unwrap())
    }

    #[test]
    fn test_targets_require_groups() {
        let attributes = VertexAttributes::new(vec3_accessor(3));
        let target = MorphTarget {
            position: Some(vec3_accessor(3)),
            ..Default::default()
        };

        let result = Primitive::new(Mode::Triangles, None, attributes.clone(), None, vec![target.clone()], vec![]);
        assert!(matches!(result, Err(ModelError::SchemaViolation(_))));

        let group = MorphTargetGroup {
            position: Some(0),
            color: None,
            texcoord: None,
            weight: 0.0,
        };
        let result = Primitive::new(Mode::Triangles, None, attributes.clone(), None, vec![], vec![group]);
        assert!(matches!(result, Err(ModelError::SchemaViolation(_))));

        let primitive = Primitive::with_targets(Mode::Triangles, None, attributes, None, vec![target], None).unwrap();
        assert!(primitive.is_morphable());
        assert_eq!(primitive.target_groups[0].position, Some(0));
    }

    #[test]
    fn test_attribute_count_mismatch() {
        let mut attributes = VertexAttributes::new(vec3_accessor(3));
        attributes.normal = Some(vec3_accessor(4));
        assert!(Primitive::new(Mode::Triangles, None, attributes, None, vec![], vec![]).is_err());
    }

    #[test]
    fn test_group_indices_are_dense() {
        let targets = vec![
            MorphTarget {
                position: Some(vec3_accessor(1)),
                ..Default::default()
            },
            MorphTarget::default(),
            MorphTarget {
                position: Some(vec3_accessor(1)),
                ..Default::default()
            },
        ];
        let groups = MorphTargetGroup::for_targets(&targets, Some(&[0.5]));
        assert_eq!(groups[0].position, Some(0));
        assert_eq!(groups[1].position, None);
        assert_eq!(groups[2].position, Some(1));
        assert_eq!(groups[0].weight, 0.5);
        assert_eq!(groups[2].weight, 0.0);
    }
}
