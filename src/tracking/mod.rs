//! 跟踪系统 (Tracking System)
//!
//! - lock:    跨帧身份维持与锁定状态机
//! - search:  丢失恢复的旋转搜索
//! - planner: 误差到移动指令的规划

pub mod lock;
pub mod planner;
pub mod search;

pub use lock::{LockState, LockTransition, TrackedTarget};
pub use planner::{CommandKind, MotionCommand, MotionPlanner};
pub use search::SearchState;
