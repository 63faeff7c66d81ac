//! VMD 贝塞尔缓动
//!
//! VMD 每个通道保存两个控制点 (x1, y1)、(x2, y2)，端点固定为 (0, 0) 和 (1, 1)。
//! 曲线对参数 u 是参数化的，先二分求解 bezier_x(u) = t，再取 bezier_y(u) 作为缓动系数。

/// 最大二分次数
const MAX_ITERATIONS: usize = 100;
/// 提前结束的误差
const EPSILON: f32 = 1e-6;

/// 贝塞尔曲线（用于 VMD 动画插值）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BezierCurve {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BezierCurve {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 对角线，等价于线性插值
    pub fn linear() -> Self {
        Self::from_vmd_data([20, 20, 107, 107])
    }

    /// 从 VMD 插值字节 (x1, y1, x2, y2) 创建，每个字节 0..=127
    pub fn from_vmd_data(data: [u8; 4]) -> Self {
        Self {
            x1: data[0] as f32 / 127.0,
            y1: data[1] as f32 / 127.0,
            x2: data[2] as f32 / 127.0,
            y2: data[3] as f32 / 127.0,
        }
    }

    pub fn bezier_x(&self, u: f32) -> f32 {
        cubic(self.x1, self.x2, u)
    }

    pub fn bezier_y(&self, u: f32) -> f32 {
        cubic(self.y1, self.y2, u)
    }

    /// 二分求解 bezier_x(u) = t，返回曲线参数 u
    pub fn solve_parameter(&self, t: f32) -> f32 {
        let mut low = 0.0f32;
        let mut high = 1.0f32;
        let mut u = 0.0f32;
        for _ in 0..MAX_ITERATIONS {
            u = (low + high) / 2.0;
            let x = self.bezier_x(u);
            if (x - t).abs() < EPSILON {
                break;
            }
            if x < t {
                low = u;
            } else {
                high = u;
            }
        }
        u
    }

    /// 把归一化时间 t ∈ [0, 1] 转换为缓动系数
    pub fn evaluate(&self, t: f32) -> f32 {
        self.bezier_y(self.solve_parameter(t))
    }
}

impl Default for BezierCurve {
    fn default() -> Self {
        Self::linear()
    }
}

/// 端点为 0 和 1 的三次贝塞尔
fn cubic(p1: f32, p2: f32, u: f32) -> f32 {
    let v = 1.0 - u;
    3.0 * v * v * u * p1 + 3.0 * v * u * u * p2 + u * u * u
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bisection_accuracy() {
        let curves = [
            BezierCurve::from_vmd_data([20, 20, 107, 107]),
            BezierCurve::from_vmd_data([127, 0, 0, 127]),
            BezierCurve::from_vmd_data([64, 0, 64, 127]),
            BezierCurve::from_vmd_data([0, 127, 127, 0]),
        ];
        for curve in &curves {
            for step in 0..=20 {
                let t = step as f32 / 20.0;
                let u = curve.solve_parameter(t);
                assert!((curve.bezier_x(u) - t).abs() < 1e-4, "{:?} at {}", curve, t);
            }
        }
    }

    #[test]
    fn test_diagonal_is_linear() {
        let curve = BezierCurve::from_vmd_data([0, 0, 127, 127]);
        for step in 0..=10 {
            let t = step as f32 / 10.0;
            assert!((curve.evaluate(t) - t).abs() < 1e-4);
        }
    }

    #[test]
    fn test_ease_in_lags_behind() {
        let ease_in = BezierCurve::from_vmd_data([127, 0, 127, 0]);
        assert!(ease_in.evaluate(0.5) < 0.5);
        assert!(ease_in.evaluate(0.0).abs() < 1e-4);
    }
}
