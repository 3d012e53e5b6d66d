//! 搜索控制器 (Search Controller)
//!
//! 锁定目标丢失且处于跟随模式时的恢复状态机:
//! 先朝初始方向小角度旋转 (阶段0, 20°), 超过半个丢失超时仍未找回
//! 则反向加大角度 (阶段1, 30°)。旋转指令限频一次/0.5秒。
//! 找回目标或锁释放时退出。

use std::time::{Duration, Instant};

use super::planner::{CommandKind, MotionCommand};

/// 搜索旋转最小间隔
pub const SEARCH_MOVE_INTERVAL: Duration = Duration::from_millis(500);

/// 阶段0旋转角度
const PHASE0_ROTATION: i32 = 20;
/// 阶段1旋转角度 (更大范围)
const PHASE1_ROTATION: i32 = 30;

#[derive(Debug, Clone)]
pub struct SearchState {
    pub active: bool,
    /// 旋转方向: 1=顺时针, -1=逆时针
    pub direction: i8,
    /// 0=初始旋转, 1=反向大角度
    pub phase: u8,
    last_move_at: Option<Instant>,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            active: false,
            direction: 1,
            phase: 0,
            last_move_at: None,
        }
    }
}

impl SearchState {
    /// 启动搜索: 从顺时针阶段0开始
    pub fn arm(&mut self, now: Instant) {
        self.active = true;
        self.direction = 1;
        self.phase = 0;
        self.last_move_at = Some(now);
    }

    /// 进入阶段1: 反向并加大旋转角度
    pub fn advance_phase(&mut self) {
        self.direction = -self.direction;
        self.phase = 1;
    }

    pub fn clear(&mut self) {
        *self = SearchState::default();
    }

    /// 激活且过了限频窗口时给出下一个旋转指令
    pub fn next_rotation(&mut self, now: Instant) -> Option<MotionCommand> {
        if !self.active {
            return None;
        }
        if let Some(last) = self.last_move_at {
            if now.duration_since(last) < SEARCH_MOVE_INTERVAL {
                return None;
            }
        }
        self.last_move_at = Some(now);

        let degrees = if self.phase == 0 {
            PHASE0_ROTATION
        } else {
            PHASE1_ROTATION
        };
        let kind = if self.direction > 0 {
            CommandKind::RotateCw
        } else {
            CommandKind::RotateCcw
        };
        Some(MotionCommand::new(kind, degrees))
    }
}
