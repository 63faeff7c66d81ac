//! 关键帧插值方式

use glam::{Quat, Vec3};

use super::{BezierCurve, FindResult, KeyframeData};
use crate::{ModelError, Result};

/// VMD 的逐帧贝塞尔控制点
///
/// 每帧每个通道 4 个字节 (x1, y1, x2, y2)。骨骼平移有 x/y/z 三个通道，
/// 其余（旋转、表情、相机参数）各一个通道。
#[derive(Clone, Debug)]
pub struct VmdCurves {
    data: Vec<[u8; 4]>,
    channels: usize,
}

impl VmdCurves {
    pub fn new(data: Vec<[u8; 4]>, channels: usize) -> Result<Self> {
        if channels == 0 || data.len() % channels != 0 {
            return Err(ModelError::SchemaViolation(format!(
                "{} bezier curves can't be split into frames of {} channels",
                data.len(),
                channels
            )));
        }
        Ok(Self { data, channels })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.channels
    }

    pub fn curve(&self, frame: usize, channel: usize) -> BezierCurve {
        BezierCurve::from_vmd_data(self.data[frame * self.channels + channel])
    }

    /// 起始帧 frame 上 channel 通道的缓动系数
    pub fn ease(&self, frame: usize, channel: usize, delta: f32) -> f32 {
        self.curve(frame, channel).evaluate(delta)
    }
}

#[derive(Clone, Debug)]
pub enum Interpolation {
    Linear,
    Step,
    /// Hermite 样条，每帧 (入切线, 值, 出切线)
    CubicSpline,
    VmdBezier(VmdCurves),
}

impl Interpolation {
    /// glTF 采样器的插值名
    pub fn from_gltf(name: &str) -> Option<Self> {
        match name {
            "LINEAR" => Some(Interpolation::Linear),
            "STEP" => Some(Interpolation::Step),
            "CUBICSPLINE" => Some(Interpolation::CubicSpline),
            _ => None,
        }
    }

    /// 每帧的值槽数
    pub fn elements(&self) -> usize {
        match self {
            Interpolation::CubicSpline => 3,
            _ => 1,
        }
    }

    /// 值槽中"值"本身所在的位置
    pub fn value_element(&self) -> usize {
        match self {
            Interpolation::CubicSpline => 1,
            _ => 0,
        }
    }

    pub fn interpolate<T: KeyframeValue>(&self, data: &KeyframeData<T>, found: &FindResult, delta: f32) -> T {
        let start = found.start_frame;
        let end = found.end_frame;
        match self {
            Interpolation::Linear => T::lerp(data.get(start, 0), data.get(end, 0), delta),
            Interpolation::Step => data.get(start, 0),
            Interpolation::CubicSpline => {
                let dt = found.end_time - found.start_time;
                T::hermite(
                    data.get(start, 1),
                    data.get(start, 2),
                    data.get(end, 0),
                    data.get(end, 1),
                    delta,
                    dt,
                )
            }
            Interpolation::VmdBezier(curves) => T::ease(data.get(start, 0), data.get(end, 0), curves, start, delta),
        }
    }
}

/// Hermite 基函数 (h1, h2, h3, h4)
fn hermite_basis(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        2.0 * t3 - 3.0 * t2 + 1.0,
        t3 - 2.0 * t2 + t,
        -2.0 * t3 + 3.0 * t2,
        t3 - t2,
    ]
}

/// 可插值的关键帧值
pub trait KeyframeValue: Copy + Default + Send + Sync + 'static {
    fn lerp(start: Self, end: Self, t: f32) -> Self;

    /// 切线按区间时长 dt 缩放
    fn hermite(start: Self, start_out: Self, end_in: Self, end: Self, t: f32, dt: f32) -> Self;

    fn ease(start: Self, end: Self, curves: &VmdCurves, frame: usize, delta: f32) -> Self {
        Self::lerp(start, end, curves.ease(frame, 0, delta))
    }
}

impl KeyframeValue for f32 {
    fn lerp(start: Self, end: Self, t: f32) -> Self {
        start + (end - start) * t
    }

    fn hermite(start: Self, start_out: Self, end_in: Self, end: Self, t: f32, dt: f32) -> Self {
        let [h1, h2, h3, h4] = hermite_basis(t);
        h1 * start + h2 * dt * start_out + h3 * end + h4 * dt * end_in
    }
}

impl KeyframeValue for Vec3 {
    fn lerp(start: Self, end: Self, t: f32) -> Self {
        start.lerp(end, t)
    }

    fn hermite(start: Self, start_out: Self, end_in: Self, end: Self, t: f32, dt: f32) -> Self {
        let [h1, h2, h3, h4] = hermite_basis(t);
        start * h1 + start_out * (h2 * dt) + end * h3 + end_in * (h4 * dt)
    }

    /// 三通道曲线时每个轴独立缓动
    fn ease(start: Self, end: Self, curves: &VmdCurves, frame: usize, delta: f32) -> Self {
        if curves.channels() < 3 {
            return start.lerp(end, curves.ease(frame, 0, delta));
        }
        Vec3::new(
            <f32 as KeyframeValue>::lerp(start.x, end.x, curves.ease(frame, 0, delta)),
            <f32 as KeyframeValue>::lerp(start.y, end.y, curves.ease(frame, 1, delta)),
            <f32 as KeyframeValue>::lerp(start.z, end.z, curves.ease(frame, 2, delta)),
        )
    }
}

impl KeyframeValue for Quat {
    fn lerp(start: Self, end: Self, t: f32) -> Self {
        start.slerp(end, t)
    }

    fn hermite(start: Self, start_out: Self, end_in: Self, end: Self, t: f32, dt: f32) -> Self {
        let [h1, h2, h3, h4] = hermite_basis(t);
        let sum = start * h1 + start_out * (h2 * dt) + end * h3 + end_in * (h4 * dt);
        sum.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(start: usize, end: usize, start_time: f32, end_time: f32) -> FindResult {
        FindResult {
            start_frame: start,
            end_frame: end,
            start_time,
            end_time,
        }
    }

    #[test]
    fn test_linear_and_step() {
        let data = KeyframeData::single(vec![Vec3::ZERO, Vec3::new(2.0, 4.0, 6.0)]);
        let range = found(0, 1, 0.0, 1.0);
        let value = Interpolation::Linear.interpolate(&data, &range, 0.5);
        assert!(value.abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
        assert_eq!(Interpolation::Step.interpolate(&data, &range, 0.9), Vec3::ZERO);
    }

    #[test]
    fn test_cubic_spline_hits_keyframes() {
        // (入切线, 值, 出切线)
        let data = KeyframeData::new(vec![0.0f32, 1.0, 0.0, 0.0, 3.0, 0.0], 3).unwrap();
        let range = found(0, 1, 0.0, 2.0);
        let spline = Interpolation::CubicSpline;
        assert!((spline.interpolate(&data, &range, 0.0) - 1.0).abs() < 1e-6);
        assert!((spline.interpolate(&data, &range, 1.0) - 3.0).abs() < 1e-6);
        assert!((spline.interpolate(&data, &range, 0.5) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cubic_spline_quaternion_is_normalized() {
        let rotation = Quat::from_rotation_y(1.0);
        let zero = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        let data = KeyframeData::new(vec![zero, Quat::IDENTITY, zero, zero, rotation, zero], 3).unwrap();
        let value = Interpolation::CubicSpline.interpolate(&data, &found(0, 1, 0.0, 1.0), 0.3);
        assert!((value.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_vmd_per_axis_curves() {
        let linear = [0, 0, 127, 127];
        let ease_in = [127, 0, 127, 0];
        let curves = VmdCurves::new(vec![ease_in, linear, linear, linear, linear, linear], 3).unwrap();
        assert_eq!(curves.frames(), 2);
        let data = KeyframeData::single(vec![Vec3::ZERO, Vec3::ONE]);
        let value = Interpolation::VmdBezier(curves).interpolate(&data, &found(0, 1, 0.0, 1.0), 0.5);
        assert!(value.x < 0.5);
        assert!((value.y - 0.5).abs() < 1e-4);
        assert!((value.z - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_gltf_names() {
        assert!(matches!(Interpolation::from_gltf("STEP"), Some(Interpolation::Step)));
        assert_eq!(Interpolation::from_gltf("CUBICSPLINE").map(|i| i.elements()), Some(3));
        assert!(Interpolation::from_gltf("BEZIER").is_none());
    }
}
