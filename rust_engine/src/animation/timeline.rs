//! 播放时间轴
//!
//! 只负责推进时间：播放/暂停/停止、跳转、变速与循环。
//! 求值交给 AnimationClip::apply。

/// 播放状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Clone, Debug)]
pub struct Timeline {
    duration: f32,
    time: f32,
    speed: f32,
    loop_playback: bool,
    state: PlaybackState,
}

impl Timeline {
    pub fn new(duration: f32) -> Self {
        Self {
            duration: duration.max(0.0),
            time: 0.0,
            speed: 1.0,
            loop_playback: true,
            state: PlaybackState::Stopped,
        }
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn is_looping(&self) -> bool {
        self.loop_playback
    }

    pub fn play(&mut self) {
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// 停止并回到开头
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.time = 0.0;
    }

    pub fn seek(&mut self, time: f32) {
        self.time = time.clamp(0.0, self.duration);
    }

    /// 速度不能为负
    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed.max(0.0);
    }

    pub fn set_loop(&mut self, loop_playback: bool) {
        self.loop_playback = loop_playback;
    }

    /// 推进 delta_time 秒，返回新的播放时间
    ///
    /// 不循环时到达末尾会停在最后一帧并转为暂停。
    pub fn update(&mut self, delta_time: f32) -> f32 {
        if self.state != PlaybackState::Playing {
            return self.time;
        }
        let next = self.time + delta_time * self.speed;
        if next < self.duration {
            self.time = next;
        } else if self.loop_playback && self.duration > 0.0 {
            self.time = next % self.duration;
        } else {
            self.time = self.duration;
            self.state = PlaybackState::Paused;
        }
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_wraps() {
        let mut timeline = Timeline::new(2.0);
        timeline.play();
        timeline.update(1.5);
        let time = timeline.update(1.0);
        assert!((time - 0.5).abs() < 1e-6);
        assert_eq!(timeline.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_once_stops_at_end() {
        let mut timeline = Timeline::new(2.0);
        timeline.set_loop(false);
        timeline.set_speed(2.0);
        timeline.play();
        assert_eq!(timeline.update(3.0), 2.0);
        assert_eq!(timeline.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_paused_does_not_advance() {
        let mut timeline = Timeline::new(2.0);
        timeline.play();
        timeline.update(0.5);
        timeline.pause();
        assert_eq!(timeline.update(1.0), 0.5);
        timeline.seek(10.0);
        assert_eq!(timeline.time(), 2.0);
        timeline.stop();
        assert_eq!(timeline.time(), 0.0);
    }
}
