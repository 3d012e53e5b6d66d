//! 会话状态 (Session State)
//!
//! 主循环的可变开关集合。关键耦合: 跟随模式依赖锁定,
//! 锁释放时跟随必须同时关闭。

use std::time::Instant;

use crate::detection::DetectionMethod;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub flying: bool,
    pub tracking_enabled: bool,
    pub follow_mode: bool,
    pub debug: bool,
    pub detection_method: DetectionMethod,
    pub consecutive_frame_failures: u32,
    pub last_frame_at: Option<Instant>,
}

impl SessionState {
    pub fn new(debug: bool, detection_method: DetectionMethod) -> Self {
        Self {
            flying: false,
            tracking_enabled: true,
            follow_mode: false,
            debug,
            detection_method,
            consecutive_frame_failures: 0,
            last_frame_at: None,
        }
    }

    pub fn toggle_tracking(&mut self) -> bool {
        self.tracking_enabled = !self.tracking_enabled;
        self.tracking_enabled
    }

    /// 切换跟随模式。开启需要当前有锁定目标, 否则拒绝返回 None。
    pub fn toggle_follow(&mut self, locked: bool) -> Option<bool> {
        if self.follow_mode {
            self.follow_mode = false;
            Some(false)
        } else if locked {
            self.follow_mode = true;
            Some(true)
        } else {
            None
        }
    }

    /// 锁释放时调用: 跟随随锁一起失效
    pub fn on_unlock(&mut self) {
        self.follow_mode = false;
    }

    pub fn record_frame_ok(&mut self, now: Instant) {
        self.consecutive_frame_failures = 0;
        self.last_frame_at = Some(now);
    }

    /// 返回累计连续失败次数
    pub fn record_frame_failure(&mut self) -> u32 {
        self.consecutive_frame_failures += 1;
        self.consecutive_frame_failures
    }
}
