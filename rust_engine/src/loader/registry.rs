//! 加载器注册表与格式探测
//!
//! 探测分两步：先读一次所有加载器中最长的探测窗口，依次用文件头匹配；
//! 都不匹配时，再用小写扩展名在没有文件头探测的加载器中查找（纯 JSON 的 glTF）。

use std::fs::File;
use std::path::Path;

use once_cell::sync::Lazy;

use super::{Ability, LoadResult, ModelFileLoader, ThumbnailResult};
use crate::format::gltf::{GlbLoader, GltfTextLoader};
use crate::format::pmd::PmdLoader;
use crate::format::pmx::PmxLoader;
use crate::format::vmd::VmdLoader;
use crate::util::read_available;
use crate::{ModelError, Result};

static BUILTIN_LOADERS: Lazy<ModelFileLoaders> = Lazy::new(ModelFileLoaders::builtin);

pub struct ModelFileLoaders {
    loaders: Vec<Box<dyn ModelFileLoader>>,
    /// 最长的探测窗口，注册时计算一次
    probe_bytes: Option<usize>,
    /// 支持内嵌缩略图的加载器下标
    thumbnail_loaders: Vec<usize>,
}

impl ModelFileLoaders {
    pub fn new(loaders: Vec<Box<dyn ModelFileLoader>>) -> Self {
        let probe_bytes = loaders.iter().filter_map(|loader| loader.probe_length()).max();
        let thumbnail_loaders = loaders
            .iter()
            .enumerate()
            .filter(|(_, loader)| loader.abilities().contains(Ability::EMBED_THUMBNAIL))
            .map(|(index, _)| index)
            .collect();
        Self {
            loaders,
            probe_bytes,
            thumbnail_loaders,
        }
    }

    /// 内置加载器，顺序即探测优先级
    pub fn builtin() -> Self {
        Self::new(vec![
            Box::new(GlbLoader),
            Box::new(PmxLoader),
            Box::new(PmdLoader),
            Box::new(VmdLoader),
            Box::new(GltfTextLoader),
        ])
    }

    /// 全局共享的内置注册表
    pub fn global() -> &'static ModelFileLoaders {
        &BUILTIN_LOADERS
    }

    pub fn loaders(&self) -> impl Iterator<Item = &dyn ModelFileLoader> {
        self.loaders.iter().map(|loader| loader.as_ref())
    }

    pub fn probe_bytes(&self) -> Option<usize> {
        self.probe_bytes
    }

    /// 所有具备 ability 的扩展名
    pub fn extensions_with(&self, ability: Ability) -> Vec<&'static str> {
        self.loaders
            .iter()
            .flat_map(|loader| loader.extensions().iter())
            .filter(|(_, abilities)| abilities.contains(ability))
            .map(|(extension, _)| *extension)
            .collect()
    }

    /// 对已读出的文件头做探测
    pub fn probe_buffer(&self, buffer: &[u8], extension: Option<&str>) -> Option<&dyn ModelFileLoader> {
        let candidates: Vec<usize> = (0..self.loaders.len()).collect();
        self.probe_candidates(&candidates, buffer, extension)
    }

    fn probe_candidates(
        &self,
        candidates: &[usize],
        buffer: &[u8],
        extension: Option<&str>,
    ) -> Option<&dyn ModelFileLoader> {
        let loaders = candidates.iter().map(|&index| self.loaders[index].as_ref());

        let by_content = loaders.clone().find(|loader| match loader.probe_length() {
            Some(length) => buffer.len() >= length && loader.probe(buffer),
            None => false,
        });
        if by_content.is_some() {
            return by_content;
        }

        let extension = extension?.to_lowercase();
        loaders.filter(|loader| loader.probe_length().is_none()).find(|loader| {
            loader
                .extensions()
                .iter()
                .any(|(candidate, _)| *candidate == extension)
        })
    }

    fn probe_path(&self, candidates: &[usize], path: &Path) -> Result<Option<&dyn ModelFileLoader>> {
        let buffer = match self.probe_bytes {
            Some(length) => {
                let mut file = File::open(path)?;
                let mut buffer = vec![0u8; length];
                let read = read_available(&mut file, &mut buffer)?;
                buffer.truncate(read);
                buffer
            }
            None => Vec::new(),
        };
        let extension = path.extension().and_then(|extension| extension.to_str());
        Ok(self.probe_candidates(candidates, &buffer, extension))
    }

    /// 探测文件格式，没有匹配的加载器时返回 None
    pub fn probe(&self, path: &Path) -> Result<Option<&dyn ModelFileLoader>> {
        let candidates: Vec<usize> = (0..self.loaders.len()).collect();
        self.probe_path(&candidates, path)
    }

    /// 探测并加载；base_path 缺省为文件所在目录
    pub fn probe_and_load(&self, path: &Path, base_path: Option<&Path>) -> Result<LoadResult> {
        let loader = self
            .probe(path)?
            .ok_or_else(|| ModelError::UnsupportedFormat(path.to_path_buf()))?;
        let base_path = base_path.or_else(|| path.parent()).unwrap_or_else(|| Path::new("."));
        log::debug!("使用 {} 加载器加载 {}", loader.name(), path.display());
        loader.load(path, base_path)
    }

    /// 只在支持内嵌缩略图的加载器中探测；都不匹配时返回 None
    pub fn get_embed_thumbnail(&self, path: &Path, base_path: Option<&Path>) -> Result<Option<ThumbnailResult>> {
        let Some(loader) = self.probe_path(&self.thumbnail_loaders, path)? else {
            return Ok(None);
        };
        let base_path = base_path.or_else(|| path.parent()).unwrap_or_else(|| Path::new("."));
        loader.get_thumbnail(path, base_path).map(Some)
    }
}

impl Default for ModelFileLoaders {
    fn default() -> Self {
        Self::builtin()
    }
}
