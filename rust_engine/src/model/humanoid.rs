//! 人形骨骼标签
//!
//! 覆盖 VRM 1.0 的全部人形骨骼，并附带 PMX 英文/日文骨骼名，
//! 用于把针对一种命名约定制作的动作重定向到其他模型。

use std::collections::HashMap;

use once_cell::sync::Lazy;

macro_rules! humanoid_tags {
    ($($tag:ident => ($vrm:expr, $english:expr, $japanese:expr)),* $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum HumanoidTag {
            $($tag,)*
        }

        impl HumanoidTag {
            pub const ALL: &'static [HumanoidTag] = &[$(HumanoidTag::$tag,)*];

            pub fn vrm_name(self) -> &'static str {
                match self {
                    $(HumanoidTag::$tag => $vrm,)*
                }
            }

            pub fn pmx_english(self) -> Option<&'static str> {
                match self {
                    $(HumanoidTag::$tag => $english,)*
                }
            }

            pub fn pmx_japanese(self) -> Option<&'static str> {
                match self {
                    $(HumanoidTag::$tag => $japanese,)*
                }
            }
        }
    };
}

humanoid_tags! {
    // 躯干
    Hips => ("hips", Some("Center"), Some("センター")),
    Spine => ("spine", Some("Torso"), Some("上半身")),
    Chest => ("chest", Some("Torso2"), Some("上半身2")),
    UpperChest => ("upperChest", None, None),
    Neck => ("neck", Some("Neck"), Some("首")),

    // 头部
    Head => ("head", Some("Head"), Some("頭")),
    LeftEye => ("leftEye", Some("LeftEye"), Some("左目")),
    RightEye => ("rightEye", Some("RightEye"), Some("右目")),
    Jaw => ("jaw", None, None),

    // 腿
    LeftUpperLeg => ("leftUpperLeg", Some("LeftLeg"), Some("左足")),
    LeftLowerLeg => ("leftLowerLeg", Some("LeftKnee"), Some("左ひざ")),
    LeftFoot => ("leftFoot", Some("LeftAnkle"), Some("左足首")),
    LeftToes => ("leftToes", Some("LeftToe"), Some("左つま先")),
    RightUpperLeg => ("rightUpperLeg", Some("RightLeg"), Some("右足")),
    RightLowerLeg => ("rightLowerLeg", Some("RightKnee"), Some("右ひざ")),
    RightFoot => ("rightFoot", Some("RightAnkle"), Some("右足首")),
    RightToes => ("rightToes", Some("RightToe"), Some("右つま先")),

    // 手臂
    LeftShoulder => ("leftShoulder", Some("LeftShoulder"), Some("左肩")),
    LeftUpperArm => ("leftUpperArm", Some("LeftArm"), Some("左腕")),
    LeftLowerArm => ("leftLowerArm", Some("LeftElbow"), Some("左ひじ")),
    LeftHand => ("leftHand", Some("LeftWrist"), Some("左手首")),
    RightShoulder => ("rightShoulder", Some("RightShoulder"), Some("右肩")),
    RightUpperArm => ("rightUpperArm", Some("RightArm"), Some("右腕")),
    RightLowerArm => ("rightLowerArm", Some("RightElbow"), Some("右ひじ")),
    RightHand => ("rightHand", Some("RightWrist"), Some("右手首")),

    // 手指（PMX 名称使用全角数字）
    LeftThumbMetacarpal => ("leftThumbMetacarpal", Some("LeftThumb1"), Some("左親指１")),
    LeftThumbProximal => ("leftThumbProximal", Some("LeftThumb2"), Some("左親指２")),
    LeftThumbDistal => ("leftThumbDistal", Some("LeftThumb3"), Some("左親指３")),
    LeftIndexProximal => ("leftIndexProximal", Some("LeftIndexFinger1"), Some("左人指１")),
    LeftIndexIntermediate => ("leftIndexIntermediate", Some("LeftIndexFinger2"), Some("左人指２")),
    LeftIndexDistal => ("leftIndexDistal", Some("LeftIndexFinger3"), Some("左人指３")),
    LeftMiddleProximal => ("leftMiddleProximal", Some("LeftMiddleFinger1"), Some("左中指１")),
    LeftMiddleIntermediate => ("leftMiddleIntermediate", Some("LeftMiddleFinger2"), Some("左中指２")),
    LeftMiddleDistal => ("leftMiddleDistal", Some("LeftMiddleFinger3"), Some("左中指３")),
    LeftRingProximal => ("leftRingProximal", Some("LeftRingFinger1"), Some("左薬指１")),
    LeftRingIntermediate => ("leftRingIntermediate", Some("LeftRingFinger2"), Some("左薬指２")),
    LeftRingDistal => ("leftRingDistal", Some("LeftRingFinger3"), Some("左薬指３")),
    LeftLittleProximal => ("leftLittleProximal", Some("LeftPinky1"), Some("左小指１")),
    LeftLittleIntermediate => ("leftLittleIntermediate", Some("LeftPinky2"), Some("左小指２")),
    LeftLittleDistal => ("leftLittleDistal", Some("LeftPinky3"), Some("左小指３")),
    RightThumbMetacarpal => ("rightThumbMetacarpal", Some("RightThumb1"), Some("右親指１")),
    RightThumbProximal => ("rightThumbProximal", Some("RightThumb2"), Some("右親指２")),
    RightThumbDistal => ("rightThumbDistal", Some("RightThumb3"), Some("右親指３")),
    RightIndexProximal => ("rightIndexProximal", Some("RightIndexFinger1"), Some("右人指１")),
    RightIndexIntermediate => ("rightIndexIntermediate", Some("RightIndexFinger2"), Some("右人指２")),
    RightIndexDistal => ("rightIndexDistal", Some("RightIndexFinger3"), Some("右人指３")),
    RightMiddleProximal => ("rightMiddleProximal", Some("RightMiddleFinger1"), Some("右中指１")),
    RightMiddleIntermediate => ("rightMiddleIntermediate", Some("RightMiddleFinger2"), Some("右中指２")),
    RightMiddleDistal => ("rightMiddleDistal", Some("RightMiddleFinger3"), Some("右中指３")),
    RightRingProximal => ("rightRingProximal", Some("RightRingFinger1"), Some("右薬指１")),
    RightRingIntermediate => ("rightRingIntermediate", Some("RightRingFinger2"), Some("右薬指２")),
    RightRingDistal => ("rightRingDistal", Some("RightRingFinger3"), Some("右薬指３")),
    RightLittleProximal => ("rightLittleProximal", Some("RightPinky1"), Some("右小指１")),
    RightLittleIntermediate => ("rightLittleIntermediate", Some("RightPinky2"), Some("右小指２")),
    RightLittleDistal => ("rightLittleDistal", Some("RightPinky3"), Some("右小指３")),
}

static VRM_NAMES: Lazy<HashMap<&'static str, HumanoidTag>> =
    Lazy::new(|| HumanoidTag::ALL.iter().map(|&tag| (tag.vrm_name(), tag)).collect());

static PMX_ENGLISH_NAMES: Lazy<HashMap<&'static str, HumanoidTag>> = Lazy::new(|| {
    HumanoidTag::ALL
        .iter()
        .filter_map(|&tag| tag.pmx_english().map(|name| (name, tag)))
        .collect()
});

static PMX_JAPANESE_NAMES: Lazy<HashMap<&'static str, HumanoidTag>> = Lazy::new(|| {
    HumanoidTag::ALL
        .iter()
        .filter_map(|&tag| tag.pmx_japanese().map(|name| (name, tag)))
        .collect()
});

impl HumanoidTag {
    pub fn from_vrm_name(name: &str) -> Option<Self> {
        VRM_NAMES.get(name).copied()
    }

    pub fn from_pmx_english(name: &str) -> Option<Self> {
        PMX_ENGLISH_NAMES.get(name).copied()
    }

    pub fn from_pmx_japanese(name: &str) -> Option<Self> {
        PMX_JAPANESE_NAMES.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups() {
        assert_eq!(HumanoidTag::from_pmx_japanese("センター"), Some(HumanoidTag::Hips));
        assert_eq!(HumanoidTag::from_pmx_japanese("左親指１"), Some(HumanoidTag::LeftThumbMetacarpal));
        assert_eq!(HumanoidTag::from_pmx_english("LeftToe"), Some(HumanoidTag::LeftToes));
        assert_eq!(HumanoidTag::from_vrm_name("upperChest"), Some(HumanoidTag::UpperChest));
        assert_eq!(HumanoidTag::from_vrm_name("UpperChest"), None);
        assert_eq!(HumanoidTag::UpperChest.pmx_japanese(), None);
    }

    #[test]
    fn test_vrm_names_are_unique() {
        assert_eq!(VRM_NAMES.len(), HumanoidTag::ALL.len());
    }
}
