//! 动画关键帧数据

use glam::{Quat, Vec3};

use crate::{ModelError, Result};

/// 每帧若干个值槽的关键帧数据
///
/// 普通插值每帧一个值；三次样条每帧三个：(入切线, 值, 出切线)。
#[derive(Clone, Debug)]
pub struct KeyframeData<T> {
    values: Vec<T>,
    elements: usize,
}

impl<T: Copy> KeyframeData<T> {
    pub fn new(values: Vec<T>, elements: usize) -> Result<Self> {
        if elements == 0 || values.len() % elements != 0 {
            return Err(ModelError::SchemaViolation(format!(
                "{} keyframe values can't be split into frames of {} elements",
                values.len(),
                elements
            )));
        }
        Ok(Self { values, elements })
    }

    /// 每帧一个值
    pub fn single(values: Vec<T>) -> Self {
        Self { values, elements: 1 }
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn frame_count(&self) -> usize {
        self.values.len() / self.elements
    }

    pub fn get(&self, frame: usize, element: usize) -> T {
        self.values[frame * self.elements + element]
    }
}

impl KeyframeData<f32> {
    /// 把扁平的分量数组按 3 个一组组装为向量
    pub fn vec3_from_components(components: &[f32], elements: usize) -> Result<KeyframeData<Vec3>> {
        KeyframeData::new(components.chunks_exact(3).map(Vec3::from_slice).collect(), elements)
    }

    /// 按 xyzw 4 个一组组装为四元数
    pub fn quat_from_components(components: &[f32], elements: usize) -> Result<KeyframeData<Quat>> {
        KeyframeData::new(components.chunks_exact(4).map(Quat::from_slice).collect(), elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements_split() {
        let data = KeyframeData::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], 3).unwrap();
        assert_eq!(data.frame_count(), 2);
        assert_eq!(data.get(1, 1), 5.0);
        assert!(KeyframeData::new(vec![1.0f32, 2.0], 3).is_err());
    }

    #[test]
    fn test_component_grouping() {
        let data = KeyframeData::vec3_from_components(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 1).unwrap();
        assert_eq!(data.get(1, 0), Vec3::new(4.0, 5.0, 6.0));
        let data = KeyframeData::quat_from_components(&[0.0, 0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(data.get(0, 0), Quat::IDENTITY);
    }
}
