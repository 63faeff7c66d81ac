//! 模型文件加载器接口
//!
//! 每种格式实现 ModelFileLoader；ModelFileLoaders 负责按文件头或扩展名选出加载器。

mod registry;

pub use registry::ModelFileLoaders;

use std::path::Path;

use bitflags::bitflags;

use crate::animation::Animation;
use crate::model::{Metadata, Model, TextureType};
use crate::Result;

bitflags! {
    /// 加载器能力
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Ability: u8 {
        /// 能产出模型
        const MODEL = 1 << 0;
        /// 模型文件内嵌动画
        const EMBED_ANIMATION = 1 << 1;
        /// 独立的动作文件
        const EXTERNAL_ANIMATION = 1 << 2;
        /// 内嵌缩略图
        const EMBED_THUMBNAIL = 1 << 3;
    }
}

/// 一次加载的结果
#[derive(Debug, Default)]
pub struct LoadResult {
    pub metadata: Option<Metadata>,
    /// 纯动作文件（VMD）没有模型
    pub model: Option<Model>,
    pub animations: Vec<Animation>,
}

/// 缩略图查询结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThumbnailResult {
    /// 格式不支持缩略图
    Unsupported,
    /// 支持但文件里没有
    None,
    /// 文件内 [offset, offset + length) 处的图片字节
    Embed {
        offset: u64,
        length: u64,
        texture_type: Option<TextureType>,
    },
}

pub trait ModelFileLoader: Send + Sync {
    fn name(&self) -> &'static str;

    /// 扩展名（小写，不带点）及其能力
    fn extensions(&self) -> &'static [(&'static str, Ability)];

    fn abilities(&self) -> Ability {
        self.extensions()
            .iter()
            .fold(Ability::empty(), |all, (_, ability)| all | *ability)
    }

    /// 文件头探测需要的字节数；None 表示只能按扩展名识别
    fn probe_length(&self) -> Option<usize>;

    /// buffer 至少有 probe_length 个字节
    fn probe(&self, buffer: &[u8]) -> bool;

    /// base_path 用于解析同目录下的外部资源
    fn load(&self, path: &Path, base_path: &Path) -> Result<LoadResult>;

    fn get_thumbnail(&self, _path: &Path, _base_path: &Path) -> Result<ThumbnailResult> {
        Ok(ThumbnailResult::Unsupported)
    }
}
