//! 基础工具：有界二进制读取、文件映射、归一化数值转换、大小写不敏感路径、引用计数

mod normalized;
mod path;
mod reader;
mod refcount;

pub use normalized::{
    i16_to_normalized, i8_to_normalized, normalized_to_i16, normalized_to_i8, normalized_to_u16,
    normalized_to_u32, normalized_to_u8, u16_to_normalized, u32_to_normalized, u8_to_normalized,
};
pub use path::{open_case_insensitive, resolve_case_insensitive};
pub use reader::{
    decode_text, map_or_buffer_region, read_available, read_exact, read_file, BinaryReader,
    MappedBuffer,
};
pub use refcount::RefCount;
