//! 表情
//!
//! 表情是一组形变目标权重绑定，可带预设标签（喜怒哀乐、口型、眨眼、视线）。
//! 表情组把多个表情按影响系数组合在一起。

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::{MeshId, NodeId};

macro_rules! expression_tags {
    ($($tag:ident => ($vrm0:expr, $vrm1:expr, $japanese:expr)),* $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum ExpressionTag {
            $($tag,)*
        }

        impl ExpressionTag {
            pub const ALL: &'static [ExpressionTag] = &[$(ExpressionTag::$tag,)*];

            pub fn vrm0_name(self) -> Option<&'static str> {
                match self {
                    $(ExpressionTag::$tag => $vrm0,)*
                }
            }

            pub fn vrm1_name(self) -> &'static str {
                match self {
                    $(ExpressionTag::$tag => $vrm1,)*
                }
            }

            pub fn pmx_japanese(self) -> Option<&'static str> {
                match self {
                    $(ExpressionTag::$tag => $japanese,)*
                }
            }
        }
    };
}

expression_tags! {
    Neutral => (Some("neutral"), "neutral", None),
    Happy => (Some("Joy"), "happy", Some("にこり")),
    Angry => (Some("Angry"), "angry", Some("怒り")),
    Sad => (Some("Sorrow"), "sad", Some("困る")),
    Relaxed => (Some("Fun"), "relaxed", None),
    Surprised => (None, "surprised", None),
    Aa => (Some("A"), "aa", Some("あ")),
    Ee => (Some("E"), "ee", Some("え")),
    Ih => (Some("I"), "ih", Some("い")),
    Oh => (Some("O"), "oh", Some("お")),
    Ou => (Some("U"), "ou", Some("う")),
    Blink => (Some("Blink"), "blink", Some("まばたき")),
    BlinkLeft => (Some("Blink_L"), "blinkLeft", None),
    BlinkRight => (Some("Blink_R"), "blinkRight", None),
    LookUp => (Some("LookUp"), "lookUp", None),
    LookDown => (Some("LookDown"), "lookDown", None),
    LookLeft => (Some("LookLeft"), "lookLeft", None),
    LookRight => (Some("LookRight"), "lookRight", None),
}

fn lowercase_map(name: fn(ExpressionTag) -> Option<&'static str>) -> HashMap<String, ExpressionTag> {
    ExpressionTag::ALL
        .iter()
        .filter_map(|&tag| name(tag).map(|n| (n.to_lowercase(), tag)))
        .collect()
}

static VRM0_NAMES: Lazy<HashMap<String, ExpressionTag>> = Lazy::new(|| lowercase_map(ExpressionTag::vrm0_name));
static VRM1_NAMES: Lazy<HashMap<String, ExpressionTag>> =
    Lazy::new(|| lowercase_map(|tag| Some(tag.vrm1_name())));
static PMX_JAPANESE_NAMES: Lazy<HashMap<String, ExpressionTag>> =
    Lazy::new(|| lowercase_map(ExpressionTag::pmx_japanese));

impl ExpressionTag {
    /// 以下查找均不区分大小写
    pub fn from_vrm0_name(name: &str) -> Option<Self> {
        VRM0_NAMES.get(&name.to_lowercase()).copied()
    }

    pub fn from_vrm1_name(name: &str) -> Option<Self> {
        VRM1_NAMES.get(&name.to_lowercase()).copied()
    }

    pub fn from_pmx_japanese(name: &str) -> Option<Self> {
        PMX_JAPANESE_NAMES.get(&name.to_lowercase()).copied()
    }
}

/// 单个形变目标权重绑定
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Binding {
    /// 节点上网格的第 index 个形变目标
    NodeMorphTarget { node: NodeId, index: usize, weight: f32 },
    /// 指定网格的第 index 个形变目标
    MeshMorphTarget { mesh: MeshId, index: usize, weight: f32 },
}

/// 表情组中的一项
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupItem {
    /// 在模型表情列表中的下标，必须指向 Target
    pub target: usize,
    pub influence: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Target {
        name: Option<String>,
        tag: Option<ExpressionTag>,
        /// 只取 0/1，不做连续混合
        is_binary: bool,
        bindings: Vec<Binding>,
    },
    Group {
        name: Option<String>,
        tag: Option<ExpressionTag>,
        targets: Vec<GroupItem>,
    },
}

impl Expression {
    pub fn name(&self) -> Option<&str> {
        match self {
            Expression::Target { name, .. } | Expression::Group { name, .. } => name.as_deref(),
        }
    }

    pub fn tag(&self) -> Option<ExpressionTag> {
        match self {
            Expression::Target { tag, .. } | Expression::Group { tag, .. } => *tag,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Expression::Group { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        assert_eq!(ExpressionTag::from_vrm0_name("joy"), Some(ExpressionTag::Happy));
        assert_eq!(ExpressionTag::from_vrm0_name("BLINK_L"), Some(ExpressionTag::BlinkLeft));
        assert_eq!(ExpressionTag::from_vrm1_name("BlinkLeft"), Some(ExpressionTag::BlinkLeft));
        assert_eq!(ExpressionTag::from_pmx_japanese("まばたき"), Some(ExpressionTag::Blink));
        assert_eq!(ExpressionTag::from_vrm0_name("surprised"), None);
        assert_eq!(ExpressionTag::from_vrm1_name("unknown"), None);
    }
}
