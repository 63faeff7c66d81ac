//! 关键帧索引
//!
//! 给定查询时间，找到包围它的两个关键帧。首尾之外收缩为单帧（钳制，不外推）。
//! 连续播放时时间通常只前进一点，因此先从上一次的结果附近线性扫描，
//! 扫描窗口之外再退回二分查找。

use std::cmp::Ordering;

use crate::{ModelError, Result};

/// 线性扫描的最大帧数
const SCAN_MAX_FRAMES: usize = 30;
/// 线性扫描的最大时间跨度（秒）
const SCAN_MAX_TIME: f32 = 1.0;

/// 查找结果，同时作为下一次查找的起点
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FindResult {
    pub start_frame: usize,
    pub end_frame: usize,
    pub start_time: f32,
    pub end_time: f32,
}

impl FindResult {
    pub fn clear(&mut self) {
        *self = FindResult::default();
    }

    fn set(&mut self, times: &[f32], start: usize, end: usize) {
        self.start_frame = start;
        self.end_frame = end;
        self.start_time = times[start];
        self.end_time = times[end];
    }

    pub fn is_single_frame(&self) -> bool {
        self.start_frame == self.end_frame
    }
}

/// 单调递增的关键帧时间表
#[derive(Clone, Debug, Default)]
pub struct KeyframeIndexer {
    times: Vec<f32>,
}

impl KeyframeIndexer {
    /// 时间必须非递减
    pub fn new(times: Vec<f32>) -> Result<Self> {
        if let Some(pair) = times
            .windows(2)
            .find(|pair| matches!(pair[0].partial_cmp(&pair[1]), Some(Ordering::Greater) | None))
        {
            return Err(ModelError::SchemaViolation(format!(
                "keyframe times are not increasing: {} then {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { times })
    }

    pub fn times(&self) -> &[f32] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn start_time(&self) -> f32 {
        self.times.first().copied().unwrap_or(0.0)
    }

    pub fn last_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// 查找包围 time 的关键帧对，result 里原有的起始帧作为扫描起点
    pub fn find(&self, time: f32, result: &mut FindResult) {
        let times = &self.times;
        let Some(&last_time) = times.last() else {
            result.clear();
            return;
        };
        let last = times.len() - 1;
        if times.len() < 2 || time <= times[0] {
            result.set(times, 0, 0);
            return;
        }
        if time >= last_time {
            result.set(times, last, last);
            return;
        }

        let scan_start = result.start_frame.min(last - 1);
        let scan_end = (result.start_frame.saturating_add(SCAN_MAX_FRAMES)).min(last - 1);
        let mut current = scan_start;
        while current < last && current < scan_end && times[current] - times[scan_start] <= SCAN_MAX_TIME {
            if time >= times[current] && time < times[current + 1] {
                result.set(times, current, current + 1);
                return;
            }
            if times[current] > time {
                break;
            }
            current += 1;
        }

        let found = match times.binary_search_by(|probe| probe.partial_cmp(&time).unwrap_or(Ordering::Less)) {
            Ok(index) => index,
            Err(insertion) => insertion.saturating_sub(1),
        }
        .min(last - 1);
        result.set(times, found, found + 1);
    }
}
