//! 大小写不敏感的路径解析
//!
//! 模型里引用的纹理路径经常与磁盘上的大小写不一致（Windows 制作、Linux 使用），
//! 原样路径不存在时逐级匹配目录项。

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use crate::{ModelError, Result};

/// 解析路径，原样存在时直接返回，否则逐级大小写不敏感匹配
pub fn resolve_case_insensitive(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let mut base = if path.is_absolute() {
        PathBuf::new()
    } else {
        PathBuf::from(".")
    };

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => base.push(prefix.as_os_str()),
            Component::RootDir => base.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !base.is_dir() {
                    return None;
                }
                base.push("..");
            }
            Component::Normal(name) => {
                base = find_entry(&base, &name.to_string_lossy())?;
            }
        }
    }

    if base.exists() {
        Some(base)
    } else {
        None
    }
}

/// 在目录中查找名称匹配的项，优先精确匹配
fn find_entry(dir: &Path, name: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    let exact = dir.join(name);
    if exact.exists() {
        return Some(exact);
    }

    let wanted = name.to_lowercase();
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_name().to_string_lossy().to_lowercase() == wanted)
        .map(|entry| entry.path())
}

/// 打开文件，找不到时返回 NotFound
pub fn open_case_insensitive(path: &Path) -> Result<File> {
    let resolved = resolve_case_insensitive(path).ok_or_else(|| ModelError::NotFound(path.to_path_buf()))?;
    if !resolved.is_file() {
        return Err(ModelError::NotFound(path.to_path_buf()));
    }
    Ok(File::open(resolved)?)
}
