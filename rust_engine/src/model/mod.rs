//! 统一场景数据模型
//!
//! 各格式解析结果最终都转换为这里的类型：节点树、网格、蒙皮、材质、表情、相机与元数据。

mod accessor;
mod camera;
mod expression;
mod humanoid;
mod id;
mod material;
mod metadata;
mod node;
mod primitive;
mod scene;
mod shared;

pub use accessor::{Accessor, AccessorType, Buffer, BufferView, ComponentType};
pub use camera::{Camera, MMD_DEFAULT_FOV_DEGREES};
pub use expression::{Binding, Expression, ExpressionTag, GroupItem};
pub use humanoid::HumanoidTag;
pub use id::{MeshId, ModelId, NodeId};
pub use material::{
    AlphaMode, MagFilter, Material, MinFilter, PbrMaterial, Sampler, Texture, TextureInfo, TextureType,
    UnlitMaterial, WrapMode,
};
pub use metadata::{AllowedUser, CommercialUsage, CreditNotation, Metadata, ModificationPermission};
pub use node::{Axis, IkJoint, IkLimits, IkTarget, Influence, Node, NodeComponent, NodeTransform, Skin};
pub use primitive::{AttributeKey, Mesh, MorphTarget, MorphTargetGroup, Mode, Primitive, VertexAttributes};
pub use scene::{Model, Scene, SceneIndex};
pub use shared::SharedModel;
