//! 动画绑定
//!
//! 把 Animation 的抽象目标解析为某个场景里的具体下标。解析不到的通道直接丢弃：
//! 为别的骨架制作的动作文件本来就可能有对不上的骨骼。

use std::sync::Arc;

use glam::{Quat, Vec3};

use super::{Animation, AnimationChannel, ExpressionTarget, FindResult, NodeTarget};
use crate::model::SceneIndex;

/// 接收动画求值结果的实例层
///
/// 下标均为 SceneIndex 中的下标：变换下标、表情槽位、表情组槽位、相机下标。
pub trait AnimationTarget {
    fn set_translation(&mut self, transform_index: usize, translation: Vec3);
    fn set_rotation(&mut self, transform_index: usize, rotation: Quat);
    fn set_scale(&mut self, transform_index: usize, scale: Vec3);
    fn set_morph_weight(&mut self, transform_index: usize, morph_index: usize, weight: f32);
    fn set_expression_weight(&mut self, expression: usize, weight: f32);
    fn set_expression_group_weight(&mut self, group: usize, weight: f32);

    fn set_camera_fov(&mut self, _camera: usize, _fov: f32) {}
    fn set_mmd_camera_distance(&mut self, _camera: usize, _distance: f32) {}
    fn set_mmd_camera_target(&mut self, _camera: usize, _target: Vec3) {}
    fn set_mmd_camera_rotation(&mut self, _camera: usize, _rotation: Vec3) {}
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BoundTarget {
    Node(usize),
    /// 相对通道，携带绑定时节点的静止平移与旋转
    RelativeNode { node: usize, rest_translation: Vec3, rest_rotation: Quat },
    Morph { node: usize, morph_index: usize },
    Expression(usize),
    ExpressionGroup(usize),
    Camera(usize),
}

#[derive(Clone, Debug)]
struct BoundChannel {
    channel: usize,
    target: BoundTarget,
    cursor: FindResult,
}

/// 绑定到某个场景的可播放动画
///
/// 通道数据通过 Arc 共享；每个剪辑只保存自己的查找游标。
#[derive(Clone, Debug)]
pub struct AnimationClip {
    animation: Arc<Animation>,
    channels: Vec<BoundChannel>,
    duration: f32,
}

fn resolve_node(index: &SceneIndex, target: &NodeTarget) -> Option<usize> {
    target
        .node
        .and_then(|id| index.find_node_by_id(id))
        .or_else(|| target.node_name.as_deref().and_then(|name| index.find_node_by_name(name)))
        .or_else(|| target.humanoid_tag.and_then(|tag| index.find_node_by_humanoid_tag(tag)))
}

fn resolve_expression(index: &SceneIndex, target: &ExpressionTarget) -> Option<BoundTarget> {
    let by_name = |find: fn(&SceneIndex, &str) -> Option<usize>| target.name.as_deref().and_then(|name| find(index, name));
    by_name(SceneIndex::find_expression_by_name)
        .or_else(|| target.tag.and_then(|tag| index.find_expression_by_tag(tag)))
        .map(BoundTarget::Expression)
        .or_else(|| {
            by_name(SceneIndex::find_expression_group_by_name)
                .or_else(|| target.tag.and_then(|tag| index.find_expression_group_by_tag(tag)))
                .map(BoundTarget::ExpressionGroup)
        })
}

fn resolve(index: &SceneIndex, channel: &AnimationChannel) -> Option<BoundTarget> {
    match channel {
        AnimationChannel::Translation {
            target, relative: true, ..
        }
        | AnimationChannel::Rotation {
            target, relative: true, ..
        } => {
            let node = resolve_node(index, target)?;
            let (rest_translation, rest_rotation) = index.rest_pose(node)?;
            Some(BoundTarget::RelativeNode {
                node,
                rest_translation,
                rest_rotation,
            })
        }
        AnimationChannel::Translation { target, .. }
        | AnimationChannel::Rotation { target, .. }
        | AnimationChannel::Scale { target, .. } => resolve_node(index, target).map(BoundTarget::Node),
        AnimationChannel::MorphWeight {
            target, morph_index, ..
        } => resolve_node(index, target).map(|node| BoundTarget::Morph {
            node,
            morph_index: *morph_index,
        }),
        AnimationChannel::Expression { target, .. } => resolve_expression(index, target),
        AnimationChannel::CameraFov { camera, .. }
        | AnimationChannel::MmdCameraDistance { camera, .. }
        | AnimationChannel::MmdCameraTarget { camera, .. }
        | AnimationChannel::MmdCameraRotation { camera, .. } => {
            index.find_camera_by_name(camera).map(BoundTarget::Camera)
        }
    }
}

impl AnimationClip {
    pub fn bind(animation: Arc<Animation>, index: &SceneIndex) -> Self {
        let mut channels = Vec::with_capacity(animation.channels.len());
        let mut duration = 0.0f32;
        for (channel_index, channel) in animation.channels.iter().enumerate() {
            match resolve(index, channel) {
                Some(target) => {
                    duration = duration.max(channel.duration());
                    channels.push(BoundChannel {
                        channel: channel_index,
                        target,
                        cursor: FindResult::default(),
                    });
                }
                None => log::debug!("丢弃无法绑定的{}通道: {:?}", channel.kind(), channel.node_target()),
            }
        }
        log::debug!(
            "动画绑定完成: {}/{} 个通道, 时长 {:.3}s",
            channels.len(),
            animation.channels.len(),
            duration
        );
        Self {
            animation,
            channels,
            duration,
        }
    }

    pub fn animation(&self) -> &Arc<Animation> {
        &self.animation
    }

    pub fn name(&self) -> Option<&str> {
        self.animation.name.as_deref()
    }

    /// 成功绑定的通道中最长的时长，没有通道时为 0
    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn bound_channel_count(&self) -> usize {
        self.channels.len()
    }

    /// 在 time 处求值所有通道，时间钳制到 [0, duration]
    pub fn apply(&mut self, time: f32, target: &mut impl AnimationTarget) {
        let time = time.clamp(0.0, self.duration);
        for bound in &mut self.channels {
            let channel = &self.animation.channels[bound.channel];
            let cursor = &mut bound.cursor;
            match (channel, bound.target) {
                (AnimationChannel::Translation { sampler, .. }, BoundTarget::Node(node)) => {
                    let mut value = Vec3::ZERO;
                    sampler.sample(time, cursor, &mut value);
                    target.set_translation(node, value);
                }
                (AnimationChannel::Rotation { sampler, .. }, BoundTarget::Node(node)) => {
                    let mut value = Quat::IDENTITY;
                    sampler.sample(time, cursor, &mut value);
                    target.set_rotation(node, value.normalize());
                }
                (
                    AnimationChannel::Translation { sampler, .. },
                    BoundTarget::RelativeNode {
                        node,
                        rest_translation,
                        rest_rotation,
                    },
                ) => {
                    let mut value = Vec3::ZERO;
                    sampler.sample(time, cursor, &mut value);
                    target.set_translation(node, rest_translation + rest_rotation * value);
                }
                (
                    AnimationChannel::Rotation { sampler, .. },
                    BoundTarget::RelativeNode { node, rest_rotation, .. },
                ) => {
                    let mut value = Quat::IDENTITY;
                    sampler.sample(time, cursor, &mut value);
                    target.set_rotation(node, (rest_rotation * value.normalize()).normalize());
                }
                (AnimationChannel::Scale { sampler, .. }, BoundTarget::Node(node)) => {
                    let mut value = Vec3::ONE;
                    sampler.sample(time, cursor, &mut value);
                    target.set_scale(node, value);
                }
                (AnimationChannel::MorphWeight { sampler, .. }, BoundTarget::Morph { node, morph_index }) => {
                    let mut value = 0.0;
                    sampler.sample(time, cursor, &mut value);
                    target.set_morph_weight(node, morph_index, value);
                }
                (AnimationChannel::Expression { sampler, .. }, BoundTarget::Expression(slot)) => {
                    let mut value = 0.0;
                    sampler.sample(time, cursor, &mut value);
                    target.set_expression_weight(slot, value);
                }
                (AnimationChannel::Expression { sampler, .. }, BoundTarget::ExpressionGroup(slot)) => {
                    let mut value = 0.0;
                    sampler.sample(time, cursor, &mut value);
                    target.set_expression_group_weight(slot, value);
                }
                (AnimationChannel::CameraFov { sampler, .. }, BoundTarget::Camera(camera)) => {
                    let mut value = 0.0;
                    sampler.sample(time, cursor, &mut value);
                    target.set_camera_fov(camera, value);
                }
                (AnimationChannel::MmdCameraDistance { sampler, .. }, BoundTarget::Camera(camera)) => {
                    let mut value = 0.0;
                    sampler.sample(time, cursor, &mut value);
                    target.set_mmd_camera_distance(camera, value);
                }
                (AnimationChannel::MmdCameraTarget { sampler, .. }, BoundTarget::Camera(camera)) => {
                    let mut value = Vec3::ZERO;
                    sampler.sample(time, cursor, &mut value);
                    target.set_mmd_camera_target(camera, value);
                }
                (AnimationChannel::MmdCameraRotation { sampler, .. }, BoundTarget::Camera(camera)) => {
                    let mut value = Vec3::ZERO;
                    sampler.sample(time, cursor, &mut value);
                    target.set_mmd_camera_rotation(camera, value);
                }
                // resolve() 只会产生与通道种类匹配的目标
                _ => {}
            }
        }
    }
}
