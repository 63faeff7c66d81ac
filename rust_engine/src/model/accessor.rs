//! 缓冲区、缓冲视图与访问器
//!
//! 访问器描述如何把一段字节解释为类型化的元素序列。
//! 没有缓冲视图的访问器是“零填充”的，读取结果全部为 0。

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::util::{
    i16_to_normalized, i8_to_normalized, u16_to_normalized, u32_to_normalized, u8_to_normalized,
    MappedBuffer,
};
use crate::{ModelError, Result};

/// 原始字节缓冲
#[derive(Debug)]
pub struct Buffer {
    pub name: Option<String>,
    data: Arc<MappedBuffer>,
}

impl Buffer {
    pub fn new(name: Option<String>, data: Arc<MappedBuffer>) -> Self {
        Self { name, data }
    }

    pub fn from_vec(name: Option<String>, data: Vec<u8>) -> Self {
        Self::new(name, Arc::new(MappedBuffer::Owned(data)))
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 缓冲区中的一段连续区域
#[derive(Debug)]
pub struct BufferView {
    pub buffer: Arc<Buffer>,
    pub byte_offset: usize,
    pub byte_length: usize,
    /// 0 表示紧密排列
    pub byte_stride: usize,
}

impl BufferView {
    pub fn new(buffer: Arc<Buffer>, byte_offset: usize, byte_length: usize, byte_stride: usize) -> Result<Self> {
        let end = byte_offset
            .checked_add(byte_length)
            .ok_or_else(|| ModelError::SchemaViolation("buffer view range overflows".to_string()))?;
        if end > buffer.len() {
            return Err(ModelError::UnresolvedReference(format!(
                "buffer view [{}, {}) is out of buffer range {}",
                byte_offset,
                end,
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            byte_offset,
            byte_length,
            byte_stride,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer.data()[self.byte_offset..self.byte_offset + self.byte_length]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    UnsignedInt,
    Float,
}

impl ComponentType {
    pub fn byte_length(self) -> usize {
        match self {
            ComponentType::Byte | ComponentType::UnsignedByte => 1,
            ComponentType::Short | ComponentType::UnsignedShort => 2,
            ComponentType::UnsignedInt | ComponentType::Float => 4,
        }
    }

    /// glTF 中的 GL 常量
    pub fn from_gl(code: u32) -> Option<Self> {
        match code {
            5120 => Some(ComponentType::Byte),
            5121 => Some(ComponentType::UnsignedByte),
            5122 => Some(ComponentType::Short),
            5123 => Some(ComponentType::UnsignedShort),
            5125 => Some(ComponentType::UnsignedInt),
            5126 => Some(ComponentType::Float),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessorType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl AccessorType {
    pub fn components(self) -> usize {
        match self {
            AccessorType::Scalar => 1,
            AccessorType::Vec2 => 2,
            AccessorType::Vec3 => 3,
            AccessorType::Vec4 | AccessorType::Mat2 => 4,
            AccessorType::Mat3 => 9,
            AccessorType::Mat4 => 16,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCALAR" => Some(AccessorType::Scalar),
            "VEC2" => Some(AccessorType::Vec2),
            "VEC3" => Some(AccessorType::Vec3),
            "VEC4" => Some(AccessorType::Vec4),
            "MAT2" => Some(AccessorType::Mat2),
            "MAT3" => Some(AccessorType::Mat3),
            "MAT4" => Some(AccessorType::Mat4),
            _ => None,
        }
    }
}

/// 类型化的元素视图
#[derive(Debug)]
pub struct Accessor {
    pub name: Option<String>,
    pub buffer_view: Option<Arc<BufferView>>,
    pub byte_offset: usize,
    pub component_type: ComponentType,
    pub normalized: bool,
    pub count: usize,
    pub accessor_type: AccessorType,
    pub min: Option<Vec<f32>>,
    pub max: Option<Vec<f32>>,
}

impl Accessor {
    pub fn new(
        buffer_view: Option<Arc<BufferView>>,
        byte_offset: usize,
        component_type: ComponentType,
        normalized: bool,
        count: usize,
        accessor_type: AccessorType,
    ) -> Result<Self> {
        let accessor = Self {
            name: None,
            buffer_view,
            byte_offset,
            component_type,
            normalized,
            count,
            accessor_type,
            min: None,
            max: None,
        };
        accessor.validate()?;
        Ok(accessor)
    }

    /// 无缓冲视图的零填充访问器
    pub fn zero_filled(component_type: ComponentType, count: usize, accessor_type: AccessorType) -> Result<Self> {
        Self::new(None, 0, component_type, false, count, accessor_type)
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_bounds(mut self, min: Option<Vec<f32>>, max: Option<Vec<f32>>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.count < 1 {
            return Err(ModelError::SchemaViolation(format!("bad accessor count: {}", self.count)));
        }
        if let Some(view) = &self.buffer_view {
            if view.byte_stride > 0 && view.byte_stride % self.component_type.byte_length() != 0 {
                return Err(ModelError::SchemaViolation(format!(
                    "byte stride {} is not a multiple of component size {}",
                    view.byte_stride,
                    self.component_type.byte_length()
                )));
            }
            let available = view.byte_length.saturating_sub(self.byte_offset);
            if self.byte_offset > view.byte_length || self.total_byte_length() > available {
                return Err(ModelError::UnresolvedReference(format!(
                    "accessor needs {} bytes at offset {}, but buffer view only has {}",
                    self.total_byte_length(),
                    self.byte_offset,
                    view.byte_length
                )));
            }
        }
        Ok(())
    }

    /// 单个元素的字节数
    pub fn element_length(&self) -> usize {
        self.component_type.byte_length() * self.accessor_type.components()
    }

    /// 相邻元素起点之间的距离
    pub fn stride(&self) -> usize {
        match &self.buffer_view {
            Some(view) if view.byte_stride > 0 => view.byte_stride,
            _ => self.element_length(),
        }
    }

    pub fn total_byte_length(&self) -> usize {
        match &self.buffer_view {
            Some(view) if view.byte_stride > 0 => (self.count - 1) * view.byte_stride + self.element_length(),
            _ => self.count * self.element_length(),
        }
    }

    pub fn is_zero_filled(&self) -> bool {
        self.buffer_view.is_none()
    }

    pub fn components(&self) -> usize {
        self.accessor_type.components()
    }

    fn component_bytes(&self, element: usize, component: usize) -> Option<&[u8]> {
        let view = self.buffer_view.as_ref()?;
        if element >= self.count || component >= self.components() {
            return None;
        }
        let size = self.component_type.byte_length();
        let start = self.byte_offset + element * self.stride() + component * size;
        view.bytes().get(start..start + size)
    }

    /// 读取一个分量为浮点数，归一化访问器会映射到 [0, 1] 或 [-1, 1]
    pub fn read_f32(&self, element: usize, component: usize) -> f32 {
        let Some(bytes) = self.component_bytes(element, component) else {
            return 0.0;
        };
        match (self.component_type, self.normalized) {
            (ComponentType::Float, _) => LittleEndian::read_f32(bytes),
            (ComponentType::Byte, true) => i8_to_normalized(bytes[0] as i8),
            (ComponentType::UnsignedByte, true) => u8_to_normalized(bytes[0]),
            (ComponentType::Short, true) => i16_to_normalized(LittleEndian::read_i16(bytes)),
            (ComponentType::UnsignedShort, true) => u16_to_normalized(LittleEndian::read_u16(bytes)),
            (ComponentType::UnsignedInt, true) => u32_to_normalized(LittleEndian::read_u32(bytes)),
            (ComponentType::Byte, false) => bytes[0] as i8 as f32,
            (ComponentType::UnsignedByte, false) => bytes[0] as f32,
            (ComponentType::Short, false) => LittleEndian::read_i16(bytes) as f32,
            (ComponentType::UnsignedShort, false) => LittleEndian::read_u16(bytes) as f32,
            (ComponentType::UnsignedInt, false) => LittleEndian::read_u32(bytes) as f32,
        }
    }

    /// 读取一个整数分量（索引、关节号）
    pub fn read_u32(&self, element: usize, component: usize) -> u32 {
        let Some(bytes) = self.component_bytes(element, component) else {
            return 0;
        };
        match self.component_type {
            ComponentType::Byte => bytes[0] as i8 as u32,
            ComponentType::UnsignedByte => bytes[0] as u32,
            ComponentType::Short => LittleEndian::read_i16(bytes) as u32,
            ComponentType::UnsignedShort => LittleEndian::read_u16(bytes) as u32,
            ComponentType::UnsignedInt => LittleEndian::read_u32(bytes),
            ComponentType::Float => LittleEndian::read_f32(bytes) as u32,
        }
    }

    /// 全部元素按分量展开为浮点数组
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let components = self.components();
        let mut values = Vec::with_capacity(self.count * components);
        for element in 0..self.count {
            for component in 0..components {
                values.push(self.read_f32(element, component));
            }
        }
        values
    }

    pub fn to_u32_vec(&self) -> Vec<u32> {
        let components = self.components();
        let mut values = Vec::with_capacity(self.count * components);
        for element in 0..self.count {
            for component in 0..components {
                values.push(self.read_u32(element, component));
            }
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_buffer(values: &[f32]) -> Arc<Buffer> {
        let mut data = vec![0u8; values.len() * 4];
        LittleEndian::write_f32_into(values, &mut data);
        Arc::new(Buffer::from_vec(None, data))
    }

    #[test]
    fn test_read_strided_floats() {
        // 每个元素 vec2，但步长 12 字节（中间夹一个无关的 float）
        let buffer = float_buffer(&[1.0, 2.0, 99.0, 3.0, 4.0, 99.0]);
        let view = Arc::new(BufferView::new(buffer, 0, 24, 12).unwrap());
        let accessor = Accessor::new(Some(view), 0, ComponentType::Float, false, 2, AccessorType::Vec2).unwrap();
        assert_eq!(accessor.total_byte_length(), 20);
        assert_eq!(accessor.to_f32_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_normalized_bytes() {
        let buffer = Arc::new(Buffer::from_vec(None, vec![0, 255, 0x81, 0x7F]));
        let view = Arc::new(BufferView::new(buffer, 0, 4, 0).unwrap());
        let unsigned =
            Accessor::new(Some(view.clone()), 0, ComponentType::UnsignedByte, true, 2, AccessorType::Scalar).unwrap();
        assert_eq!(unsigned.read_f32(1, 0), 1.0);
        let signed = Accessor::new(Some(view), 2, ComponentType::Byte, true, 2, AccessorType::Scalar).unwrap();
        assert_eq!(signed.read_f32(0, 0), -1.0);
        assert_eq!(signed.read_f32(1, 0), 1.0);
    }

    #[test]
    fn test_zero_filled() {
        let accessor = Accessor::zero_filled(ComponentType::Float, 3, AccessorType::Vec3).unwrap();
        assert!(accessor.is_zero_filled());
        assert_eq!(accessor.to_f32_vec(), vec![0.0; 9]);
    }

    #[test]
    fn test_invalid_accessors() {
        assert!(Accessor::zero_filled(ComponentType::Float, 0, AccessorType::Scalar).is_err());

        let buffer = float_buffer(&[1.0, 2.0]);
        let view = Arc::new(BufferView::new(buffer.clone(), 0, 8, 0).unwrap());
        assert!(Accessor::new(Some(view), 0, ComponentType::Float, false, 3, AccessorType::Scalar).is_err());

        let odd_stride = Arc::new(BufferView::new(buffer.clone(), 0, 8, 3).unwrap());
        assert!(Accessor::new(Some(odd_stride), 0, ComponentType::Short, false, 1, AccessorType::Scalar).is_err());

        assert!(BufferView::new(buffer, 4, 8, 0).is_err());
    }
}
