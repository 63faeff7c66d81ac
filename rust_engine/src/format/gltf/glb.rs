//! GLB 容器：12 字节文件头 + 若干 (长度, 类型, 数据) 块
//!
//! 第一个块必须是 JSON，随后可选一个 BIN 块；其余未知块跳过。

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use super::schema::Gltf;
use crate::loader::ThumbnailResult;
use crate::model::TextureType;
use crate::util::read_exact;
use crate::{ModelError, Result};

pub const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;
const HEADER_LENGTH: u64 = 12;
const CHUNK_HEADER_LENGTH: u64 = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// 文件内的字节区间
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChunkRange {
    pub offset: u64,
    pub length: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GlbLayout {
    pub json: ChunkRange,
    pub binary: Option<ChunkRange>,
}

impl GlbLayout {
    /// 只读取文件头和块头，不读取块内容
    pub fn parse<R: Read + Seek>(reader: &mut R, file_length: u64) -> Result<Self> {
        let mut header = [0u8; HEADER_LENGTH as usize];
        read_exact(reader, &mut header)?;
        if &header[0..4] != GLB_MAGIC {
            return Err(ModelError::MalformedSignature(format!(
                "bad GLB magic: {:02X?}",
                &header[0..4]
            )));
        }
        let version = LittleEndian::read_u32(&header[4..8]);
        if version != GLB_VERSION {
            return Err(ModelError::SchemaViolation(format!(
                "bad GLB version: want {}, but got {}",
                GLB_VERSION, version
            )));
        }
        let total_length = LittleEndian::read_u32(&header[8..12]) as u64;
        if total_length > file_length {
            return Err(ModelError::UnexpectedEof(format!(
                "GLB total length is {}, but file only has {} bytes",
                total_length, file_length
            )));
        }

        let mut json = None;
        let mut binary = None;
        let mut position = HEADER_LENGTH;
        while position + CHUNK_HEADER_LENGTH <= total_length {
            reader.seek(SeekFrom::Start(position))?;
            let mut chunk_header = [0u8; CHUNK_HEADER_LENGTH as usize];
            read_exact(reader, &mut chunk_header)?;
            let length = LittleEndian::read_u32(&chunk_header[0..4]) as u64;
            let chunk_type = LittleEndian::read_u32(&chunk_header[4..8]);
            let offset = position + CHUNK_HEADER_LENGTH;
            if offset + length > total_length {
                return Err(ModelError::UnexpectedEof(format!(
                    "chunk at {} wants {} bytes, but total length is {}",
                    position, length, total_length
                )));
            }
            let range = ChunkRange { offset, length };
            match (chunk_type, json.is_some()) {
                (CHUNK_JSON, false) => json = Some(range),
                (_, false) => {
                    return Err(ModelError::SchemaViolation(format!(
                        "first GLB chunk must be JSON, but got type {:#010X}",
                        chunk_type
                    )))
                }
                (CHUNK_BIN, true) if binary.is_none() => binary = Some(range),
                _ => log::debug!("跳过 GLB 块 {:#010X}（{} 字节）", chunk_type, length),
            }
            position = offset + length;
        }

        let json = json.ok_or_else(|| ModelError::SchemaViolation("missing JSON chunk in GLB".to_string()))?;
        Ok(Self { json, binary })
    }

    pub fn read_json(&self, file: &mut File, size_limit: u64) -> Result<Vec<u8>> {
        if self.json.length > size_limit {
            return Err(ModelError::SizeLimitExceeded {
                length: self.json.length,
                limit: size_limit,
            });
        }
        file.seek(SeekFrom::Start(self.json.offset))?;
        let mut data = vec![0u8; self.json.length as usize];
        read_exact(file, &mut data)?;
        Ok(data)
    }
}

/// VRM 缩略图在文件中的位置
///
/// 0.x 的 meta.texture 是纹理下标，1.x 的 meta.thumbnailImage 是图片下标。
/// 图片不在 BIN 块里（外部文件或 data URI）时返回 None。
pub(crate) fn find_thumbnail(gltf: &Gltf, binary: Option<ChunkRange>) -> Result<ThumbnailResult> {
    let vrm0_meta = gltf.extensions.vrm0.as_ref().and_then(|vrm| vrm.meta.as_ref());
    let vrm1_meta = gltf.extensions.vrm1.as_ref().and_then(|vrm| vrm.meta.as_ref());
    let image_index = match (vrm0_meta, vrm1_meta) {
        (Some(meta), _) => match meta.texture {
            Some(index) => {
                let texture = gltf
                    .textures
                    .get(index)
                    .ok_or_else(|| ModelError::UnresolvedReference(format!("no thumbnail texture {}", index)))?;
                texture.source
            }
            None => None,
        },
        (None, Some(meta)) => meta.thumbnail_image,
        (None, None) => None,
    };
    let Some(image_index) = image_index else {
        return Ok(ThumbnailResult::None);
    };

    let image = gltf
        .images
        .get(image_index)
        .ok_or_else(|| ModelError::UnresolvedReference(format!("no thumbnail image {}", image_index)))?;
    let (Some(view_index), Some(binary)) = (image.buffer_view, binary) else {
        return Ok(ThumbnailResult::None);
    };
    let view = gltf
        .buffer_views
        .get(view_index)
        .ok_or_else(|| ModelError::UnresolvedReference(format!("no buffer view {}", view_index)))?;
    if view.buffer != 0 || gltf.buffers.first().map_or(true, |buffer| buffer.uri.is_some()) {
        return Ok(ThumbnailResult::None);
    }
    let end = view.byte_offset as u64 + view.byte_length as u64;
    if end > binary.length {
        return Err(ModelError::UnresolvedReference(format!(
            "thumbnail [{}, {}) is out of BIN chunk length {}",
            view.byte_offset, end, binary.length
        )));
    }
    Ok(ThumbnailResult::Embed {
        offset: binary.offset + view.byte_offset as u64,
        length: view.byte_length as u64,
        texture_type: image.mime_type.as_deref().and_then(TextureType::from_mime_type),
    })
}
