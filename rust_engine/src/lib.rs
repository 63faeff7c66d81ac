//! Avatar Engine - 多格式模型与动画加载核心
//!
//! 提供与渲染后端无关的模型/动画数据管线：
//! - glTF / GLB / VRM 0.x / VRM 1.x 模型加载
//! - PMX / PMD 模型加载
//! - VMD 动作解析（骨骼、表情、相机）
//! - 统一的场景图数据模型（节点、网格、蒙皮、表情、相机）
//! - 关键帧索引、插值与 VMD 贝塞尔缓动
//! - 动画通道到场景的绑定与求值

pub mod animation;
pub mod config;
pub mod format;
pub mod loader;
pub mod model;
pub mod util;

pub use animation::{Animation, AnimationChannel, AnimationClip, AnimationTarget, Timeline};
pub use config::{get_config, reset_config, set_config, LoaderConfig};
pub use loader::{Ability, LoadResult, ModelFileLoader, ModelFileLoaders, ThumbnailResult};
pub use model::{Model, Node, NodeId, Scene, SceneIndex, SharedModel};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Unexpected end of data: {0}")]
    UnexpectedEof(String),

    #[error("Read of {length} bytes exceeds the limit of {limit} bytes")]
    SizeLimitExceeded { length: u64, limit: u64 },

    #[error("Invalid text encoding: {0}")]
    InvalidEncoding(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No loader accepts {0}")]
    UnsupportedFormat(PathBuf),

    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

impl ModelError {
    /// 把 byteorder 读取失败转换为带上下文的错误
    pub(crate) fn read_failure(err: std::io::Error, context: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ModelError::UnexpectedEof(context.to_string())
        } else {
            ModelError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
