//! 归一化整数与浮点数之间的转换
//!
//! 无符号类型映射到 [0, 1]，有符号类型映射到 [-1, 1]。
//! 有符号最小值（如 -128）除以 127 会略小于 -1，因此截断到 -1。

pub fn u8_to_normalized(value: u8) -> f32 {
    value as f32 / 255.0
}

pub fn i8_to_normalized(value: i8) -> f32 {
    (value as f32 / 127.0).max(-1.0)
}

pub fn u16_to_normalized(value: u16) -> f32 {
    value as f32 / 65535.0
}

pub fn i16_to_normalized(value: i16) -> f32 {
    (value as f32 / 32767.0).max(-1.0)
}

pub fn u32_to_normalized(value: u32) -> f32 {
    (value as f64 / 4294967295.0) as f32
}

pub fn normalized_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn normalized_to_i8(value: f32) -> i8 {
    (value.clamp(-1.0, 1.0) * 127.0).round() as i8
}

pub fn normalized_to_u16(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * 65535.0).round() as u16
}

pub fn normalized_to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

pub fn normalized_to_u32(value: f32) -> u32 {
    (value.clamp(0.0, 1.0) as f64 * 4294967295.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_round_trip() {
        for b in 0..=u8::MAX {
            assert_eq!(normalized_to_u8(u8_to_normalized(b)), b);
        }
    }

    #[test]
    fn test_i8_round_trip() {
        for b in i8::MIN..=i8::MAX {
            let back = normalized_to_i8(i8_to_normalized(b)) as i32;
            assert!((back - b as i32).abs() <= 1, "{} -> {}", b, back);
        }
        assert_eq!(i8_to_normalized(i8::MIN), -1.0);
    }

    #[test]
    fn test_u16_round_trip() {
        for v in (0..=u16::MAX).step_by(7).chain([u16::MAX]) {
            assert_eq!(normalized_to_u16(u16_to_normalized(v)), v);
        }
    }

    #[test]
    fn test_i16_round_trip() {
        for v in (i16::MIN..=i16::MAX).step_by(5) {
            let back = normalized_to_i16(i16_to_normalized(v)) as i32;
            assert!((back - v as i32).abs() <= 1, "{} -> {}", v, back);
        }
        assert_eq!(i16_to_normalized(i16::MIN), -1.0);
    }

    #[test]
    fn test_u32_round_trip() {
        // f32 只有 24 位尾数，允许误差为一个 f32 量化步长
        let step = (u32::MAX as f64 * f32::EPSILON as f64) as i64 + 1;
        for v in [0u32, 1, 255, 65_536, 1 << 24, 3_000_000_000, u32::MAX] {
            let back = normalized_to_u32(u32_to_normalized(v)) as i64;
            assert!((back - v as i64).abs() <= step, "{} -> {}", v, back);
        }
        assert_eq!(u32_to_normalized(u32::MAX), 1.0);
        assert_eq!(u32_to_normalized(0), 0.0);
    }
}
