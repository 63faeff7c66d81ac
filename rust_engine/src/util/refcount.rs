//! 原子引用计数
//!
//! 计数从 0 开始，减到 0 时标记关闭并执行一次释放回调。
//! 关闭后再次操作或计数变为负数属于调用方的错误，直接 panic。

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

type ReleaseFn = Box<dyn FnOnce() + Send>;

pub struct RefCount {
    count: AtomicI32,
    closed: AtomicBool,
    on_closed: Mutex<Option<ReleaseFn>>,
}

impl RefCount {
    pub fn new() -> Self {
        Self {
            count: AtomicI32::new(0),
            closed: AtomicBool::new(false),
            on_closed: Mutex::new(None),
        }
    }

    /// 带释放回调
    pub fn with_release<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            count: AtomicI32::new(0),
            closed: AtomicBool::new(false),
            on_closed: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    fn require_not_closed(&self) {
        if self.is_closed() {
            panic!("object is already closed");
        }
    }

    pub fn increase(&self) {
        self.require_not_closed();
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        if previous < 0 {
            panic!("bad reference count {}", previous + 1);
        }
    }

    pub fn decrease(&self) {
        self.require_not_closed();
        let current = self.count.fetch_sub(1, Ordering::AcqRel) - 1;
        if current < 0 {
            panic!("bad reference count {}", current);
        }
        if current == 0 {
            self.close();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            panic!("object is already closed");
        }
        let release = match self.on_closed.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
    }

    /// 在持有一次引用的期间执行
    pub fn hold<R>(&self, f: impl FnOnce() -> R) -> R {
        self.increase();
        let result = f();
        self.decrease();
        result
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RefCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefCount")
            .field("count", &self.count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
