//! 动画系统
//!
//! 关键帧索引、插值（线性 / 阶跃 / 三次样条 / VMD 贝塞尔）、
//! 动画通道以及通道到场景的绑定。

mod bezier;
mod channel;
mod clip;
mod indexer;
mod interpolation;
mod keyframe;
mod timeline;

pub use bezier::BezierCurve;
pub use channel::{Animation, AnimationChannel, ExpressionTarget, NodeTarget, Sampler};
pub use clip::{AnimationClip, AnimationTarget};
pub use indexer::{FindResult, KeyframeIndexer};
pub use interpolation::{Interpolation, KeyframeValue, VmdCurves};
pub use keyframe::KeyframeData;
pub use timeline::{PlaybackState, Timeline};
