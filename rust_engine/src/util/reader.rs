//! 有界二进制读取与文件映射
//!
//! 优先使用内存映射；当底层存储不支持映射（例如压缩包内的文件）时，
//! 退回到受大小上限约束的缓冲读取。

use std::fs::File;
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::ops::Deref;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::Encoding;
use glam::{Vec2, Vec3, Vec4};
use memmap2::{Mmap, MmapOptions};

use crate::{ModelError, Result};

/// 内存映射或堆上的只读字节缓冲
pub enum MappedBuffer {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl MappedBuffer {
    pub fn is_mapped(&self) -> bool {
        matches!(self, MappedBuffer::Mapped(_))
    }
}

impl Deref for MappedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            MappedBuffer::Mapped(map) => &map[..],
            MappedBuffer::Owned(data) => &data[..],
        }
    }
}

impl AsRef<[u8]> for MappedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self[..]
    }
}

impl std::fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("mapped", &self.is_mapped())
            .field("len", &self.len())
            .finish()
    }
}

/// 填满整个缓冲区，数据不足时返回 UnexpectedEof
pub fn read_exact<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let read = read_available(reader, buffer)?;
    if read < buffer.len() {
        return Err(ModelError::UnexpectedEof(format!(
            "wanted {} bytes, but stream ended after {} bytes",
            buffer.len(),
            read
        )));
    }
    Ok(read)
}

/// 尽量填满缓冲区，遇到 EOF 时提前返回已读取的字节数
pub fn read_available<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ModelError::Io(e)),
        }
    }
    Ok(filled)
}

/// 映射文件的 [offset, offset + length) 区域，失败时在上限内退回缓冲读取
pub fn map_or_buffer_region(file: &File, offset: u64, length: u64, size_limit: u64) -> Result<MappedBuffer> {
    let mapped = usize::try_from(length).ok().and_then(|len| {
        // SAFETY: 映射为只读，文件在加载期间不应被外部截断
        unsafe { MmapOptions::new().offset(offset).len(len).map(file) }.ok()
    });
    if let Some(map) = mapped {
        return Ok(MappedBuffer::Mapped(map));
    }

    if length > size_limit {
        return Err(ModelError::SizeLimitExceeded { length, limit: size_limit });
    }

    log::debug!("内存映射失败，退回缓冲读取 {} 字节", length);
    let mut reader = file;
    reader.seek(SeekFrom::Start(offset))?;
    let mut data = vec![0u8; length as usize];
    read_exact(&mut reader, &mut data)?;
    Ok(MappedBuffer::Owned(data))
}

/// 读取整个文件
pub fn read_file(path: &Path, size_limit: u64) -> Result<MappedBuffer> {
    let file = File::open(path)?;
    let length = file.metadata()?.len();
    map_or_buffer_region(&file, 0, length, size_limit)
}

/// 按指定字符集解码，遇到非法字节序列时报错而不是替换
pub fn decode_text(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| ModelError::InvalidEncoding(format!("malformed {} sequence", encoding.name())))
}

/// 小端序有界读取器
pub struct BinaryReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(data) }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn data(&self) -> &'a [u8] {
        *self.cursor.get_ref()
    }

    pub fn remaining(&self) -> usize {
        self.data().len().saturating_sub(self.position())
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        self.cursor.read_u8().map_err(|e| ModelError::read_failure(e, what))
    }

    pub fn read_i8(&mut self, what: &str) -> Result<i8> {
        self.cursor.read_i8().map_err(|e| ModelError::read_failure(e, what))
    }

    pub fn read_u16(&mut self, what: &str) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(|e| ModelError::read_failure(e, what))
    }

    pub fn read_i16(&mut self, what: &str) -> Result<i16> {
        self.cursor.read_i16::<LittleEndian>().map_err(|e| ModelError::read_failure(e, what))
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(|e| ModelError::read_failure(e, what))
    }

    pub fn read_i32(&mut self, what: &str) -> Result<i32> {
        self.cursor.read_i32::<LittleEndian>().map_err(|e| ModelError::read_failure(e, what))
    }

    pub fn read_f32(&mut self, what: &str) -> Result<f32> {
        self.cursor.read_f32::<LittleEndian>().map_err(|e| ModelError::read_failure(e, what))
    }

    pub fn read_vec2(&mut self, what: &str) -> Result<Vec2> {
        Ok(Vec2::new(self.read_f32(what)?, self.read_f32(what)?))
    }

    pub fn read_vec3(&mut self, what: &str) -> Result<Vec3> {
        Ok(Vec3::new(self.read_f32(what)?, self.read_f32(what)?, self.read_f32(what)?))
    }

    pub fn read_vec4(&mut self, what: &str) -> Result<Vec4> {
        Ok(Vec4::new(
            self.read_f32(what)?,
            self.read_f32(what)?,
            self.read_f32(what)?,
            self.read_f32(what)?,
        ))
    }

    /// 非负的 i32 计数
    pub fn read_count(&mut self, what: &str) -> Result<usize> {
        let count = self.read_i32(what)?;
        usize::try_from(count).map_err(|_| ModelError::SchemaViolation(format!("{}: negative count {}", what, count)))
    }

    pub fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ModelError::UnexpectedEof(format!(
                "{}: want {} bytes, but only {} bytes available",
                what,
                len,
                self.remaining()
            )));
        }
        let start = self.position();
        let data = self.data();
        self.cursor.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    pub fn skip(&mut self, len: usize, what: &str) -> Result<()> {
        self.read_bytes(len, what).map(|_| ())
    }

    /// 定长字段，在第一个 0 字节处截断后解码
    pub fn read_fixed_string(&mut self, len: usize, encoding: &'static Encoding, what: &str) -> Result<String> {
        let bytes = self.read_bytes(len, what)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        decode_text(&bytes[..end], encoding)
    }

    /// i32 字节长度前缀 + 文本（PMX）
    pub fn read_prefixed_string(&mut self, encoding: &'static Encoding, what: &str) -> Result<String> {
        let length = self.read_count(what)?;
        let bytes = self.read_bytes(length, what)?;
        decode_text(bytes, encoding)
    }

    /// 变长有符号索引（1/2/4 字节），-1 表示无
    pub fn read_index(&mut self, size: u8, what: &str) -> Result<i32> {
        match size {
            1 => Ok(self.read_i8(what)? as i32),
            2 => Ok(self.read_i16(what)? as i32),
            4 => self.read_i32(what),
            _ => Err(ModelError::SchemaViolation(format!("{}: bad index size {}", what, size))),
        }
    }

    /// 变长无符号索引（顶点索引等）
    pub fn read_unsigned_index(&mut self, size: u8, what: &str) -> Result<u32> {
        match size {
            1 => Ok(self.read_u8(what)? as u32),
            2 => Ok(self.read_u16(what)? as u32),
            4 => Ok(self.read_u32(what)?),
            _ => Err(ModelError::SchemaViolation(format!("{}: bad index size {}", what, size))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::SHIFT_JIS;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_read_exact_eof() {
        let mut source: &[u8] = &[1, 2, 3];
        let mut buffer = [0u8; 4];
        assert!(matches!(read_exact(&mut source, &mut buffer), Err(ModelError::UnexpectedEof(_))));
    }

    #[test]
    fn test_read_available_returns_partial() {
        let mut source: &[u8] = &[1, 2, 3];
        let mut buffer = [0u8; 4];
        assert_eq!(read_available(&mut source, &mut buffer).unwrap(), 3);
        assert_eq!(&buffer[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_map_region() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        drop(file);

        let file = File::open(&path).unwrap();
        let region = map_or_buffer_region(&file, 2, 4, 1024).unwrap();
        assert_eq!(&region[..], &[2, 3, 4, 5]);
    }

    #[test]
    fn test_fixed_string_stops_at_null() {
        // "センター" 的 Shift-JIS 编码，后面跟 0 和垃圾字节
        let mut data = vec![0x83, 0x5A, 0x83, 0x93, 0x83, 0x5E, 0x81, 0x5B, 0x00, 0xFF, 0xFF];
        data.resize(15, 0xFF);
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_fixed_string(15, SHIFT_JIS, "name").unwrap(), "センター");
        assert!(!reader.has_remaining());
    }

    #[test]
    fn test_malformed_text_is_rejected() {
        let data = [0x83u8, 0x00];
        let mut reader = BinaryReader::new(&data);
        // 0x83 是 Shift-JIS 双字节前导，截断后非法
        assert!(matches!(
            reader.read_fixed_string(2, SHIFT_JIS, "name"),
            Err(ModelError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_short_read_is_eof() {
        let data = [1u8, 2];
        let mut reader = BinaryReader::new(&data);
        assert!(matches!(reader.read_u32("count"), Err(ModelError::UnexpectedEof(_))));
    }

    #[test]
    fn test_prefixed_strings() {
        // UTF-16LE "頭" + UTF-8 "ab" + 奇数长度的 UTF-16LE
        let data = [2u8, 0, 0, 0, 0x2D, 0x98, 2, 0, 0, 0, b'a', b'b', 1, 0, 0, 0, 0x41];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_prefixed_string(encoding_rs::UTF_16LE, "name").unwrap(), "頭");
        assert_eq!(reader.read_prefixed_string(encoding_rs::UTF_8, "name").unwrap(), "ab");
        assert!(matches!(
            reader.read_prefixed_string(encoding_rs::UTF_16LE, "name"),
            Err(ModelError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_index_sizes() {
        let data = [0xFFu8, 0xFF, 0xFF, 0x02, 0x00];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_index(1, "bone").unwrap(), -1);
        assert_eq!(reader.read_unsigned_index(2, "vertex").unwrap(), 0xFFFF);
        assert_eq!(reader.read_index(2, "bone").unwrap(), 2);
        assert!(reader.read_index(3, "bone").is_err());
    }
}
