//! 共享模型
//!
//! 一个解析结果可以被多个运行时实例共同持有。
//! 最后一个持有者释放时执行一次释放回调（例如关闭映射的文件缓冲）。

use std::ops::Deref;
use std::sync::Arc;

use super::Model;
use crate::util::RefCount;

/// 模型 + 显式引用计数
#[derive(Debug)]
pub struct SharedModel {
    model: Arc<Model>,
    ref_count: RefCount,
}

impl SharedModel {
    pub fn new(model: Model) -> Self {
        Self {
            model: Arc::new(model),
            ref_count: RefCount::new(),
        }
    }

    /// 计数归零时执行 release
    pub fn with_release<F>(model: Model, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            model: Arc::new(model),
            ref_count: RefCount::with_release(release),
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn increase_reference_count(&self) {
        self.ref_count.increase();
    }

    /// 已释放后再次调用会 panic
    pub fn decrease_reference_count(&self) {
        self.ref_count.decrease();
    }

    pub fn reference_count(&self) -> i32 {
        self.ref_count.count()
    }

    pub fn is_released(&self) -> bool {
        self.ref_count.is_closed()
    }
}

impl Deref for SharedModel {
    type Target = Model;

    fn deref(&self) -> &Model {
        &self.model
    }
}
