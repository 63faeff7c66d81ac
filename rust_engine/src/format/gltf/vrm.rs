//! VRM 扩展（0.x 的 `VRM` 与 1.x 的 `VRMC_vrm`）
//!
//! 两个版本的结构互不兼容，这里分别声明，再统一转换为人形骨骼映射、表情与元数据。
//! 枚举值按字符串读取，无法识别的值视为未声明，不让整个模型加载失败。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;

use crate::model::{
    AllowedUser, Binding, CommercialUsage, CreditNotation, Expression, ExpressionTag, HumanoidTag, MeshId, Metadata,
    ModelId, ModificationPermission, NodeId, Texture,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm0Extension {
    pub exporter_version: Option<String>,
    pub meta: Option<Vrm0Meta>,
    pub humanoid: Option<Vrm0Humanoid>,
    pub blend_shape_master: Option<Vrm0BlendShapeMaster>,
}

/// 0.x 的许可字段拼写沿用文件中的 "Ussage"
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm0Meta {
    pub title: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub contact_information: Option<String>,
    pub reference: Option<String>,
    /// textures 下标
    pub texture: Option<usize>,
    pub allowed_user_name: Option<String>,
    pub violent_ussage_name: Option<String>,
    pub sexual_ussage_name: Option<String>,
    pub commercial_ussage_name: Option<String>,
    pub other_permission_url: Option<String>,
    pub license_name: Option<String>,
    pub other_license_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm0Humanoid {
    #[serde(default)]
    pub human_bones: Vec<Vrm0HumanBone>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Vrm0HumanBone {
    pub bone: String,
    pub node: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm0BlendShapeMaster {
    #[serde(default)]
    pub blend_shape_groups: Vec<Vrm0BlendShapeGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm0BlendShapeGroup {
    pub name: Option<String>,
    pub preset_name: Option<String>,
    #[serde(default)]
    pub binds: Vec<Vrm0Bind>,
    #[serde(default)]
    pub is_binary: bool,
}

/// weight 取值 0 ~ 100
#[derive(Debug, Deserialize)]
pub(crate) struct Vrm0Bind {
    pub mesh: usize,
    pub index: usize,
    pub weight: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm1Extension {
    pub spec_version: Option<String>,
    pub meta: Option<Vrm1Meta>,
    pub humanoid: Option<Vrm1Humanoid>,
    pub expressions: Option<Vrm1Expressions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm1Meta {
    pub name: Option<String>,
    pub version: Option<String>,
    pub authors: Option<Vec<String>>,
    pub copyright_information: Option<String>,
    pub contact_information: Option<String>,
    pub references: Option<Vec<String>>,
    pub third_party_licenses: Option<String>,
    /// images 下标
    pub thumbnail_image: Option<usize>,
    pub license_url: Option<String>,
    pub avatar_permission: Option<String>,
    pub allow_excessively_violent_usage: Option<bool>,
    pub allow_excessively_sexual_usage: Option<bool>,
    pub commercial_usage: Option<String>,
    pub allow_political_or_religious_usage: Option<bool>,
    pub allow_antisocial_or_hate_usage: Option<bool>,
    pub credit_notation: Option<String>,
    pub allow_redistribution: Option<bool>,
    pub modification: Option<String>,
    pub other_license_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm1Humanoid {
    #[serde(default)]
    pub human_bones: BTreeMap<String, Vrm1HumanBone>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Vrm1HumanBone {
    pub node: usize,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Vrm1Expressions {
    #[serde(default)]
    pub preset: BTreeMap<String, Vrm1Expression>,
    #[serde(default)]
    pub custom: BTreeMap<String, Vrm1Expression>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Vrm1Expression {
    #[serde(default)]
    pub is_binary: bool,
    #[serde(default)]
    pub morph_target_binds: Vec<Vrm1MorphTargetBind>,
}

/// weight 取值 0 ~ 1
#[derive(Debug, Deserialize)]
pub(crate) struct Vrm1MorphTargetBind {
    pub node: usize,
    pub index: usize,
    pub weight: Option<f32>,
}

fn allowed_user(name: &str) -> Option<AllowedUser> {
    match name {
        "OnlyAuthor" | "onlyAuthor" => Some(AllowedUser::OnlyAuthor),
        "ExplicitlyLicensedPerson" | "onlySeparatelyLicensedPerson" => Some(AllowedUser::ExplicitlyLicensedPerson),
        "Everyone" | "everyone" => Some(AllowedUser::Everyone),
        _ => None,
    }
}

fn vrm0_usage(name: &str) -> Option<bool> {
    match name {
        "Allow" => Some(true),
        "Disallow" => Some(false),
        _ => None,
    }
}

fn non_empty(text: &Option<String>) -> Option<String> {
    text.clone().filter(|text| !text.is_empty())
}

impl Vrm0Meta {
    pub fn to_metadata(&self, thumbnail: Option<Arc<Texture>>) -> Metadata {
        Metadata {
            title: non_empty(&self.title),
            version: non_empty(&self.version),
            authors: non_empty(&self.author).map(|author| vec![author]),
            contact_information: non_empty(&self.contact_information),
            references: non_empty(&self.reference).map(|reference| vec![reference]),
            thumbnail,
            license_type: non_empty(&self.license_name),
            license_url: non_empty(&self.other_license_url),
            allowed_user: self.allowed_user_name.as_deref().and_then(allowed_user),
            allow_violent_usage: self.violent_ussage_name.as_deref().and_then(vrm0_usage),
            allow_sexual_usage: self.sexual_ussage_name.as_deref().and_then(vrm0_usage),
            commercial_usage: self.commercial_ussage_name.as_deref().and_then(vrm0_usage).map(|allow| {
                if allow {
                    CommercialUsage::Allow
                } else {
                    CommercialUsage::Disallow
                }
            }),
            permission_url: non_empty(&self.other_permission_url),
            ..Default::default()
        }
    }
}

impl Vrm1Meta {
    pub fn to_metadata(&self, thumbnail: Option<Arc<Texture>>) -> Metadata {
        Metadata {
            title: non_empty(&self.name),
            version: non_empty(&self.version),
            authors: self.authors.clone(),
            copyright_information: non_empty(&self.copyright_information),
            contact_information: non_empty(&self.contact_information),
            references: self.references.clone(),
            third_party_licenses: non_empty(&self.third_party_licenses),
            thumbnail,
            license_url: non_empty(&self.other_license_url),
            spec_license_url: non_empty(&self.license_url),
            allowed_user: self.avatar_permission.as_deref().and_then(allowed_user),
            allow_violent_usage: self.allow_excessively_violent_usage,
            allow_sexual_usage: self.allow_excessively_sexual_usage,
            commercial_usage: self.commercial_usage.as_deref().and_then(|usage| match usage {
                "personalNonProfit" => Some(CommercialUsage::PersonalNonProfit),
                "personalProfit" => Some(CommercialUsage::PersonalProfit),
                "corporation" => Some(CommercialUsage::Corporation),
                _ => None,
            }),
            allow_political_or_religious_usage: self.allow_political_or_religious_usage,
            allow_antisocial_or_hate_usage: self.allow_antisocial_or_hate_usage,
            credit_notation: self.credit_notation.as_deref().and_then(|notation| match notation {
                "required" => Some(CreditNotation::Required),
                "unnecessary" => Some(CreditNotation::Unnecessary),
                _ => None,
            }),
            allow_redistribution: self.allow_redistribution,
            modification_permission: self.modification.as_deref().and_then(|modification| match modification {
                "prohibited" => Some(ModificationPermission::Prohibited),
                "allowModification" => Some(ModificationPermission::AllowModification),
                "allowModificationRedistribution" => Some(ModificationPermission::AllowModificationRedistribution),
                _ => None,
            }),
            ..Default::default()
        }
    }
}

/// 节点下标到人形骨骼的映射；同时存在两个版本时以 0.x 为准
pub(crate) fn humanoid_mapping(vrm0: Option<&Vrm0Extension>, vrm1: Option<&Vrm1Extension>) -> HashMap<usize, HumanoidTag> {
    if let Some(humanoid) = vrm0.and_then(|vrm| vrm.humanoid.as_ref()) {
        return humanoid
            .human_bones
            .iter()
            .filter_map(|bone| HumanoidTag::from_vrm_name(&bone.bone).map(|tag| (bone.node, tag)))
            .collect();
    }
    if let Some(humanoid) = vrm1.and_then(|vrm| vrm.humanoid.as_ref()) {
        return humanoid
            .human_bones
            .iter()
            .filter_map(|(name, bone)| HumanoidTag::from_vrm_name(name).map(|tag| (bone.node, tag)))
            .collect();
    }
    HashMap::new()
}

impl Vrm0BlendShapeMaster {
    /// 指向不存在网格的绑定被丢弃
    pub fn to_expressions(&self, model_id: ModelId, mesh_count: usize) -> Vec<Expression> {
        self.blend_shape_groups
            .iter()
            .map(|group| {
                // "unknown" 是 0.x 中自定义表情的预设名
                let tag = group.preset_name.as_deref().and_then(ExpressionTag::from_vrm0_name);
                let bindings = group
                    .binds
                    .iter()
                    .filter(|bind| {
                        let valid = bind.mesh < mesh_count;
                        if !valid {
                            log::warn!("表情 {:?} 引用了不存在的网格 {}", group.name, bind.mesh);
                        }
                        valid
                    })
                    .map(|bind| Binding::MeshMorphTarget {
                        mesh: MeshId::new(model_id, bind.mesh),
                        index: bind.index,
                        weight: bind.weight.map_or(1.0, |weight| weight / 100.0),
                    })
                    .collect();
                Expression::Target {
                    name: group.name.clone(),
                    tag,
                    is_binary: group.is_binary,
                    bindings,
                }
            })
            .collect()
    }
}

impl Vrm1Expressions {
    /// 预设表情在前，自定义表情在后；各自按名称排序
    pub fn to_expressions(&self, model_id: ModelId, node_count: usize) -> Vec<Expression> {
        let preset = self
            .preset
            .iter()
            .map(|(name, expression)| (name, ExpressionTag::from_vrm1_name(name), expression));
        let custom = self.custom.iter().map(|(name, expression)| (name, None, expression));
        preset
            .chain(custom)
            .map(|(name, tag, expression)| {
                let bindings = expression
                    .morph_target_binds
                    .iter()
                    .filter(|bind| {
                        let valid = bind.node < node_count;
                        if !valid {
                            log::warn!("表情 {} 引用了不存在的节点 {}", name, bind.node);
                        }
                        valid
                    })
                    .map(|bind| Binding::NodeMorphTarget {
                        node: NodeId::new(model_id, bind.node),
                        index: bind.index,
                        weight: bind.weight.unwrap_or(1.0),
                    })
                    .collect();
                Expression::Target {
                    name: Some(name.clone()),
                    tag,
                    is_binary: expression.is_binary,
                    bindings,
                }
            })
            .collect()
    }
}
