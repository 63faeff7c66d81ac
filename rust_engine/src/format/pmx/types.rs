//! PMX 记录类型
//!
//! 保存文件中的原始数据（左手坐标系、顺时针绕序），坐标转换在构建场景时进行。
//! 下标字段中的 -1 读为 None。

use std::ops::Deref;

use bitflags::bitflags;
use encoding_rs::{Encoding, UTF_16LE, UTF_8};
use glam::{Vec2, Vec3, Vec4};

use crate::{ModelError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmxTextEncoding {
    Utf16Le,
    Utf8,
}

impl PmxTextEncoding {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PmxTextEncoding::Utf16Le),
            1 => Some(PmxTextEncoding::Utf8),
            _ => None,
        }
    }

    pub fn encoding(self) -> &'static Encoding {
        match self {
            PmxTextEncoding::Utf16Le => UTF_16LE,
            PmxTextEncoding::Utf8 => UTF_8,
        }
    }
}

/// 头部 globals 块：文本编码与各类下标宽度
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PmxGlobals {
    pub text_encoding: PmxTextEncoding,
    pub additional_vec4_count: u8,
    pub vertex_index_size: u8,
    pub texture_index_size: u8,
    pub material_index_size: u8,
    pub bone_index_size: u8,
    pub morph_index_size: u8,
    pub rigid_body_index_size: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmxHeader {
    pub version: f32,
    pub globals: PmxGlobals,
    pub model_name_local: String,
    pub model_name_universal: String,
    pub comment_local: String,
    pub comment_universal: String,
}

/// 顶点蒙皮方式
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PmxWeight {
    Bdef1 {
        bone: Option<usize>,
    },
    Bdef2 {
        bones: [Option<usize>; 2],
        /// 第一根骨骼的权重，第二根为 1 - weight
        weight: f32,
    },
    Bdef4 {
        bones: [Option<usize>; 4],
        weights: [f32; 4],
    },
    Sdef {
        bones: [Option<usize>; 2],
        weight: f32,
        c: Vec3,
        r0: Vec3,
        r1: Vec3,
    },
    Qdef {
        bones: [Option<usize>; 4],
        weights: [f32; 4],
    },
}

impl PmxWeight {
    /// 展开为四组（骨骼, 权重）；SDEF 按 BDEF2 处理，QDEF 按 BDEF4 处理
    pub fn influences(&self) -> [(Option<usize>, f32); 4] {
        match *self {
            PmxWeight::Bdef1 { bone } => [(bone, 1.0), (None, 0.0), (None, 0.0), (None, 0.0)],
            PmxWeight::Bdef2 { bones, weight } | PmxWeight::Sdef { bones, weight, .. } => {
                [(bones[0], weight), (bones[1], 1.0 - weight), (None, 0.0), (None, 0.0)]
            }
            PmxWeight::Bdef4 { bones, weights } | PmxWeight::Qdef { bones, weights } => [
                (bones[0], weights[0]),
                (bones[1], weights[1]),
                (bones[2], weights[2]),
                (bones[3], weights[3]),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmxVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub weight: PmxWeight,
    pub edge_scale: f32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PmxMaterialFlags: u8 {
        const NO_CULL = 1 << 0;
        const GROUND_SHADOW = 1 << 1;
        const DRAW_SHADOW = 1 << 2;
        const RECEIVE_SHADOW = 1 << 3;
        const HAS_EDGE = 1 << 4;
        const VERTEX_COLOR = 1 << 5;
        const POINT_DRAWING = 1 << 6;
        const LINE_DRAWING = 1 << 7;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmxEnvironmentBlendMode {
    Disabled,
    Multiply,
    Additive,
    AdditionalVec4,
}

impl PmxEnvironmentBlendMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PmxEnvironmentBlendMode::Disabled),
            1 => Some(PmxEnvironmentBlendMode::Multiply),
            2 => Some(PmxEnvironmentBlendMode::Additive),
            3 => Some(PmxEnvironmentBlendMode::AdditionalVec4),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmxToonReference {
    Texture(Option<usize>),
    /// 内置 toon01..toon10
    Internal(u8),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmxMaterial {
    pub name_local: String,
    pub name_universal: String,
    pub diffuse_color: Vec4,
    pub specular_color: Vec3,
    pub specular_strength: f32,
    pub ambient_color: Vec3,
    pub flags: PmxMaterialFlags,
    pub edge_color: Vec4,
    pub edge_scale: f32,
    pub texture_index: Option<usize>,
    pub environment_index: Option<usize>,
    pub environment_blend_mode: PmxEnvironmentBlendMode,
    pub toon_reference: PmxToonReference,
    pub memo: String,
    /// 索引数，总是 3 的倍数
    pub surface_count: usize,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PmxBoneFlags: u16 {
        const INDEXED_TAIL = 1 << 0;
        const ROTATABLE = 1 << 1;
        const TRANSLATABLE = 1 << 2;
        const VISIBLE = 1 << 3;
        const ENABLED = 1 << 4;
        const IK = 1 << 5;
        const INHERIT_LOCAL = 1 << 7;
        const INHERIT_ROTATION = 1 << 8;
        const INHERIT_TRANSLATION = 1 << 9;
        const FIXED_AXIS = 1 << 10;
        const LOCAL_COORDINATE = 1 << 11;
        const PHYSICS_AFTER_DEFORM = 1 << 12;
        const EXTERNAL_PARENT = 1 << 13;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PmxBoneTail {
    Index(Option<usize>),
    Offset(Vec3),
}

impl Default for PmxBoneTail {
    fn default() -> Self {
        PmxBoneTail::Index(None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmxIkLimits {
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmxIkLink {
    pub bone_index: usize,
    pub limits: Option<PmxIkLimits>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmxIk {
    pub target_index: usize,
    pub loop_count: i32,
    pub limit_radian: f32,
    pub links: Vec<PmxIkLink>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmxLocalCoordinate {
    pub x: Vec3,
    pub z: Vec3,
}

/// 付与亲；index 为 None 表示文件中写的是 -1，即没有付与来源
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmxInheritParent {
    pub index: Option<usize>,
    pub influence: f32,
}

/// 骨骼字段，经 PmxBone::new 检查后才能成为骨骼
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PmxBoneDesc {
    pub name_local: String,
    pub name_universal: String,
    pub position: Vec3,
    pub parent_index: Option<usize>,
    pub layer: i32,
    pub flags: PmxBoneFlags,
    pub tail: PmxBoneTail,
    pub inherit_parent: Option<PmxInheritParent>,
    pub fixed_axis: Option<Vec3>,
    pub local_coordinate: Option<PmxLocalCoordinate>,
    pub external_parent_index: Option<i32>,
    pub ik: Option<PmxIk>,
}

/// 标志位与可选字段一致的骨骼
#[derive(Clone, Debug, PartialEq)]
pub struct PmxBone(PmxBoneDesc);

impl PmxBone {
    /// 标志位声明的字段必须存在
    pub fn new(desc: PmxBoneDesc) -> Result<Self> {
        let flags = desc.flags;
        let missing = |what: &str| {
            Err(ModelError::SchemaViolation(format!(
                "bone {}: {} flagged but absent",
                desc.name_local, what
            )))
        };
        if flags.intersects(PmxBoneFlags::INHERIT_ROTATION | PmxBoneFlags::INHERIT_TRANSLATION)
            && desc.inherit_parent.is_none()
        {
            return missing("inherit parent");
        }
        if flags.contains(PmxBoneFlags::IK) && desc.ik.is_none() {
            return missing("IK data");
        }
        if flags.contains(PmxBoneFlags::FIXED_AXIS) && desc.fixed_axis.is_none() {
            return missing("fixed axis");
        }
        if flags.contains(PmxBoneFlags::LOCAL_COORDINATE) && desc.local_coordinate.is_none() {
            return missing("local coordinate");
        }
        if flags.contains(PmxBoneFlags::EXTERNAL_PARENT) && desc.external_parent_index.is_none() {
            return missing("external parent");
        }
        Ok(Self(desc))
    }

    pub fn inherits(&self) -> bool {
        self.flags
            .intersects(PmxBoneFlags::INHERIT_ROTATION | PmxBoneFlags::INHERIT_TRANSLATION)
    }

    pub fn into_desc(self) -> PmxBoneDesc {
        self.0
    }
}

impl Deref for PmxBone {
    type Target = PmxBoneDesc;

    fn deref(&self) -> &PmxBoneDesc {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmxMorphPanel {
    Hidden,
    Eyebrows,
    Eyes,
    Mouth,
    Other,
}

impl PmxMorphPanel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PmxMorphPanel::Hidden),
            1 => Some(PmxMorphPanel::Eyebrows),
            2 => Some(PmxMorphPanel::Eyes),
            3 => Some(PmxMorphPanel::Mouth),
            4 => Some(PmxMorphPanel::Other),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmxMorphType {
    Group,
    Vertex,
    Bone,
    Uv,
    /// 附加 UV 1..4
    UvExt(u8),
    Material,
    Flip,
    Impulse,
}

impl PmxMorphType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PmxMorphType::Group),
            1 => Some(PmxMorphType::Vertex),
            2 => Some(PmxMorphType::Bone),
            3 => Some(PmxMorphType::Uv),
            4..=7 => Some(PmxMorphType::UvExt(value - 3)),
            8 => Some(PmxMorphType::Material),
            9 => Some(PmxMorphType::Flip),
            10 => Some(PmxMorphType::Impulse),
            _ => None,
        }
    }

    /// 不展开的形变类型每项的字节数
    pub(crate) fn skipped_item_size(self, globals: &PmxGlobals) -> Option<usize> {
        match self {
            PmxMorphType::Group | PmxMorphType::Vertex => None,
            PmxMorphType::Uv | PmxMorphType::UvExt(_) => Some(globals.vertex_index_size as usize + 16),
            PmxMorphType::Bone => Some(globals.bone_index_size as usize + 28),
            PmxMorphType::Material => Some(globals.material_index_size as usize + 113),
            PmxMorphType::Flip => Some(globals.morph_index_size as usize + 4),
            PmxMorphType::Impulse => Some(globals.rigid_body_index_size as usize + 25),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmxVertexOffset {
    pub vertex_index: u32,
    pub offset: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmxGroupItem {
    pub morph_index: usize,
    pub influence: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PmxMorphKind {
    Group(Vec<PmxGroupItem>),
    Vertex(Vec<PmxVertexOffset>),
    /// 只记录类型与项数
    Skipped { morph_type: PmxMorphType, count: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmxMorph {
    pub name_local: String,
    pub name_universal: String,
    pub panel: PmxMorphPanel,
    pub kind: PmxMorphKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmxDisplayElement {
    Bone(Option<usize>),
    Morph(Option<usize>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmxDisplayFrame {
    pub name_local: String,
    pub name_universal: String,
    /// Root 与表情两个特殊枠
    pub is_special: bool,
    pub elements: Vec<PmxDisplayElement>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmxRigidBodyShape {
    Sphere,
    Box,
    Capsule,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmxRigidBodyMode {
    /// 跟随骨骼
    Static,
    Dynamic,
    /// 物理计算旋转，位置跟随骨骼
    DynamicWithBonePosition,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmxRigidBody {
    pub name_local: String,
    pub name_universal: String,
    pub bone_index: Option<usize>,
    pub group: u8,
    pub non_collision_mask: u16,
    pub shape: PmxRigidBodyShape,
    pub size: Vec3,
    pub position: Vec3,
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: PmxRigidBodyMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmxJoint {
    pub name_local: String,
    pub name_universal: String,
    /// 0 为 6DOF 弹簧，2.1 版本有更多类型
    pub joint_type: u8,
    pub rigid_body_a: Option<usize>,
    pub rigid_body_b: Option<usize>,
    pub position: Vec3,
    pub rotation: Vec3,
    pub position_min: Vec3,
    pub position_max: Vec3,
    pub rotation_min: Vec3,
    pub rotation_max: Vec3,
    pub position_spring: Vec3,
    pub rotation_spring: Vec3,
}

/// 完整的 PMX 文件
#[derive(Clone, Debug, PartialEq)]
pub struct PmxModel {
    pub header: PmxHeader,
    pub vertices: Vec<PmxVertex>,
    /// 顺时针三角形索引
    pub indices: Vec<u32>,
    pub textures: Vec<String>,
    pub materials: Vec<PmxMaterial>,
    pub bones: Vec<PmxBone>,
    pub morphs: Vec<PmxMorph>,
    pub display_frames: Vec<PmxDisplayFrame>,
    pub rigid_bodies: Vec<PmxRigidBody>,
    pub joints: Vec<PmxJoint>,
}
