//! 模型、节点、网格标识

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的模型标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

impl ModelId {
    /// 分配一个新的标识
    pub fn next() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// 节点标识：所属模型 + 模型内序号
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub model: ModelId,
    pub index: usize,
}

impl NodeId {
    pub fn new(model: ModelId, index: usize) -> Self {
        Self { model, index }
    }
}

/// 网格标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId {
    pub model: ModelId,
    pub index: usize,
}

impl MeshId {
    pub fn new(model: ModelId, index: usize) -> Self {
        Self { model, index }
    }
}
