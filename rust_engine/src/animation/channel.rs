//! 动画通道
//!
//! 通道只描述"对什么目标、在什么时间取什么值"，目标用 id / 名称 / 人形标签等
//! 抽象描述，直到绑定到具体场景时才解析为下标。通道构造后不可变，可跨线程共享。

use glam::{Quat, Vec3};

use super::{FindResult, Interpolation, KeyframeData, KeyframeIndexer, KeyframeValue};
use crate::model::{ExpressionTag, HumanoidTag, NodeId};
use crate::{ModelError, Result};

/// 时间表 + 关键帧数据 + 插值方式
#[derive(Clone, Debug)]
pub struct Sampler<T> {
    indexer: KeyframeIndexer,
    data: KeyframeData<T>,
    interpolation: Interpolation,
}

impl<T: KeyframeValue> Sampler<T> {
    pub fn new(indexer: KeyframeIndexer, data: KeyframeData<T>, interpolation: Interpolation) -> Result<Self> {
        if interpolation.elements() != data.elements() {
            return Err(ModelError::SchemaViolation(format!(
                "keyframe data has {} elements per frame, but the interpolation needs {}",
                data.elements(),
                interpolation.elements()
            )));
        }
        if data.frame_count() != indexer.len() {
            return Err(ModelError::SchemaViolation(format!(
                "{} keyframe times but {} keyframe values",
                indexer.len(),
                data.frame_count()
            )));
        }
        if let Interpolation::VmdBezier(curves) = &interpolation {
            if curves.frames() != indexer.len() {
                return Err(ModelError::SchemaViolation(format!(
                    "{} keyframe times but {} bezier curve frames",
                    indexer.len(),
                    curves.frames()
                )));
            }
        }
        Ok(Self {
            indexer,
            data,
            interpolation,
        })
    }

    /// 最后一个关键帧的时间
    pub fn duration(&self) -> f32 {
        self.indexer.last_time()
    }

    pub fn keyframe_count(&self) -> usize {
        self.indexer.len()
    }

    pub fn interpolation(&self) -> &Interpolation {
        &self.interpolation
    }

    /// 在 time 处采样写入 out；cursor 保存上一次的查找结果
    pub fn sample(&self, time: f32, cursor: &mut FindResult, out: &mut T) {
        if self.indexer.is_empty() {
            return;
        }
        self.indexer.find(time, cursor);
        let value_element = self.interpolation.value_element();
        if cursor.is_single_frame() || cursor.start_time > time || cursor.end_time < time {
            *out = self.data.get(cursor.start_frame, value_element);
            return;
        }
        let delta = (time - cursor.start_time) / (cursor.end_time - cursor.start_time);
        *out = self.interpolation.interpolate(&self.data, cursor, delta);
    }
}

/// 节点目标：按 id、名称、人形标签依次尝试
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeTarget {
    pub node: Option<NodeId>,
    pub node_name: Option<String>,
    pub humanoid_tag: Option<HumanoidTag>,
}

impl NodeTarget {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            node_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn by_humanoid_tag(tag: HumanoidTag) -> Self {
        Self {
            humanoid_tag: Some(tag),
            ..Default::default()
        }
    }
}

/// 表情目标：名称或预设标签任一匹配即可
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpressionTarget {
    pub name: Option<String>,
    pub tag: Option<ExpressionTag>,
}

#[derive(Clone, Debug)]
pub enum AnimationChannel {
    /// relative 为真时采样值是相对静止姿态的偏移
    Translation {
        target: NodeTarget,
        sampler: Sampler<Vec3>,
        relative: bool,
    },
    Rotation {
        target: NodeTarget,
        sampler: Sampler<Quat>,
        relative: bool,
    },
    Scale {
        target: NodeTarget,
        sampler: Sampler<Vec3>,
    },
    /// 节点网格上第 morph_index 个形变目标的权重
    MorphWeight {
        target: NodeTarget,
        morph_index: usize,
        sampler: Sampler<f32>,
    },
    Expression {
        target: ExpressionTarget,
        sampler: Sampler<f32>,
    },
    /// 垂直视角（弧度）
    CameraFov {
        camera: String,
        sampler: Sampler<f32>,
    },
    MmdCameraDistance {
        camera: String,
        sampler: Sampler<f32>,
    },
    MmdCameraTarget {
        camera: String,
        sampler: Sampler<Vec3>,
    },
    /// 欧拉角（弧度）
    MmdCameraRotation {
        camera: String,
        sampler: Sampler<Vec3>,
    },
}

impl AnimationChannel {
    pub fn duration(&self) -> f32 {
        match self {
            AnimationChannel::Translation { sampler, .. }
            | AnimationChannel::Scale { sampler, .. }
            | AnimationChannel::MmdCameraTarget { sampler, .. }
            | AnimationChannel::MmdCameraRotation { sampler, .. } => sampler.duration(),
            AnimationChannel::Rotation { sampler, .. } => sampler.duration(),
            AnimationChannel::MorphWeight { sampler, .. }
            | AnimationChannel::Expression { sampler, .. }
            | AnimationChannel::CameraFov { sampler, .. }
            | AnimationChannel::MmdCameraDistance { sampler, .. } => sampler.duration(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnimationChannel::Translation { .. } => "translation",
            AnimationChannel::Rotation { .. } => "rotation",
            AnimationChannel::Scale { .. } => "scale",
            AnimationChannel::MorphWeight { .. } => "morph weight",
            AnimationChannel::Expression { .. } => "expression",
            AnimationChannel::CameraFov { .. } => "camera fov",
            AnimationChannel::MmdCameraDistance { .. } => "mmd camera distance",
            AnimationChannel::MmdCameraTarget { .. } => "mmd camera target",
            AnimationChannel::MmdCameraRotation { .. } => "mmd camera rotation",
        }
    }

    /// 节点类通道的目标
    pub fn node_target(&self) -> Option<&NodeTarget> {
        match self {
            AnimationChannel::Translation { target, .. }
            | AnimationChannel::Rotation { target, .. }
            | AnimationChannel::Scale { target, .. }
            | AnimationChannel::MorphWeight { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// 一段动画：一组互不相关的通道
#[derive(Clone, Debug, Default)]
pub struct Animation {
    pub name: Option<String>,
    pub channels: Vec<AnimationChannel>,
}

impl Animation {
    pub fn new(name: Option<String>, channels: Vec<AnimationChannel>) -> Self {
        Self { name, channels }
    }

    /// 所有通道中最长的时长
    pub fn duration(&self) -> f32 {
        self.channels.iter().map(AnimationChannel::duration).fold(0.0, f32::max)
    }
}
