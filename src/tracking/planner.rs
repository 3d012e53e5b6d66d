//! 运动规划器 (Motion Planner)
//!
//! 把目标的位置/大小误差翻译为离散移动指令。
//! 每帧模式互斥, 优先级: 搜索 > 跟随 > 基础。
//!
//! 跟随模式是带死区和饱和增益的比例控制:
//! 误差小于死区不动作, 误差越大修正越大但被钳制在安全区间,
//! 平滑因子 s 越大修正越小 (更慢更稳)。各轴独立, 每帧每轴至多一条指令。

use std::time::Instant;

use super::lock::{LockState, TrackedTarget};

/// 移动指令种类 (显式枚举, 指令身份不依赖任何反射机制)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    RotateCw,
    RotateCcw,
    MoveUp,
    MoveDown,
    MoveForward,
    MoveBack,
    MoveLeft,
    MoveRight,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::RotateCw => "rotate_cw",
            CommandKind::RotateCcw => "rotate_ccw",
            CommandKind::MoveUp => "move_up",
            CommandKind::MoveDown => "move_down",
            CommandKind::MoveForward => "move_forward",
            CommandKind::MoveBack => "move_back",
            CommandKind::MoveLeft => "move_left",
            CommandKind::MoveRight => "move_right",
        }
    }
}

/// 一条移动指令, 由规划器生成, 指令门消费一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub kind: CommandKind,
    /// 角度 (度) 或距离 (厘米)
    pub magnitude: i32,
}

impl MotionCommand {
    pub fn new(kind: CommandKind, magnitude: i32) -> Self {
        Self { kind, magnitude }
    }
}

// ========== 基础模式参数 ==========
const BASELINE_DEADBAND: f32 = 70.0;
const BASELINE_ROTATION: i32 = 15;
const BASELINE_VERTICAL: i32 = 20;
const BASELINE_DISTANCE: i32 = 30;
const BASELINE_TOO_CLOSE_AREA: f32 = 30000.0;
const BASELINE_TOO_FAR_AREA: f32 = 12000.0;

// ========== 跟随模式参数 (实测标定值) ==========
const FOLLOW_DEADBAND: f32 = 40.0;
const IDEAL_AREA: f32 = 25000.0;
const AREA_TOLERANCE: f32 = 3000.0;

pub struct MotionPlanner {
    smoothness: f32,
}

impl MotionPlanner {
    /// 平滑因子钳制到 [0.5, 2.0], 越大越平缓
    pub fn new(smoothness: f32) -> Self {
        Self {
            smoothness: smoothness.clamp(0.5, 2.0),
        }
    }

    pub fn smoothness(&self) -> f32 {
        self.smoothness
    }

    /// 为当前帧规划指令。仅在飞行中且追踪开启时由主循环调用。
    pub fn plan(
        &self,
        lock: &mut LockState,
        target: Option<&TrackedTarget>,
        follow_mode: bool,
        now: Instant,
    ) -> Vec<MotionCommand> {
        // 搜索优先: 丢失的锁定目标还没找回来, 只做旋转搜索
        if lock.locked && lock.search.active {
            return lock.search.next_rotation(now).into_iter().collect();
        }

        let Some(target) = target else {
            return Vec::new();
        };

        if follow_mode && lock.locked {
            self.plan_follow(target)
        } else {
            self.plan_baseline(target)
        }
    }

    /// 基础模式: 未锁定或锁定未跟随, 大死区的粗调
    fn plan_baseline(&self, target: &TrackedTarget) -> Vec<MotionCommand> {
        let mut commands = Vec::new();

        if target.diff_x.abs() > BASELINE_DEADBAND {
            let kind = if target.diff_x > 0.0 {
                CommandKind::RotateCw
            } else {
                CommandKind::RotateCcw
            };
            commands.push(MotionCommand::new(kind, BASELINE_ROTATION));
        }

        if target.diff_y.abs() > BASELINE_DEADBAND {
            let kind = if target.diff_y > 0.0 {
                CommandKind::MoveDown
            } else {
                CommandKind::MoveUp
            };
            commands.push(MotionCommand::new(kind, BASELINE_VERTICAL));
        }

        if target.area > BASELINE_TOO_CLOSE_AREA {
            commands.push(MotionCommand::new(CommandKind::MoveBack, BASELINE_DISTANCE));
        } else if target.area < BASELINE_TOO_FAR_AREA {
            commands.push(MotionCommand::new(
                CommandKind::MoveForward,
                BASELINE_DISTANCE,
            ));
        }

        commands
    }

    /// 跟随模式: 锁定且跟随, 小死区的比例修正
    fn plan_follow(&self, target: &TrackedTarget) -> Vec<MotionCommand> {
        let mut commands = Vec::new();

        // 水平: 旋转把人保持在画面中央
        if target.diff_x.abs() > FOLLOW_DEADBAND {
            let amount = (self.raw_horizontal(target.diff_x) as i32).clamp(8, 15);
            let kind = if target.diff_x > 0.0 {
                CommandKind::RotateCw
            } else {
                CommandKind::RotateCcw
            };
            commands.push(MotionCommand::new(kind, amount));
        }

        // 垂直: 升降把人保持在视线高度
        if target.diff_y.abs() > FOLLOW_DEADBAND {
            let amount = (self.raw_vertical(target.diff_y) as i32).clamp(10, 25);
            let kind = if target.diff_y > 0.0 {
                CommandKind::MoveDown
            } else {
                CommandKind::MoveUp
            };
            commands.push(MotionCommand::new(kind, amount));
        }

        // 距离: 维持理想人脸面积 25000 ± 3000
        if target.area > IDEAL_AREA + AREA_TOLERANCE {
            let amount =
                (((target.area - IDEAL_AREA) / (1000.0 * self.smoothness)) as i32).clamp(20, 40);
            commands.push(MotionCommand::new(CommandKind::MoveBack, amount));
        } else if target.area < IDEAL_AREA - AREA_TOLERANCE {
            let amount =
                (((IDEAL_AREA - target.area) / (500.0 * self.smoothness)) as i32).clamp(20, 40);
            commands.push(MotionCommand::new(CommandKind::MoveForward, amount));
        }

        commands
    }

    /// 水平修正量 (钳制前), 平滑因子作用在这里
    fn raw_horizontal(&self, diff_x: f32) -> f32 {
        diff_x.abs() / (10.0 * self.smoothness)
    }

    fn raw_vertical(&self, diff_y: f32) -> f32 {
        diff_y.abs() / (5.0 * self.smoothness)
    }
}
