pub mod config; // 命令行与运行配置
pub mod control; // 无人机抽象/指令门/模拟器
pub mod detection; // 人脸检测与融合
pub mod events; // 异步事件外发
pub mod runtime; // 主控制回路
pub mod session; // 会话状态开关
pub mod tracking; // 锁定/搜索/运动规划

pub use crate::config::{Cli, Config};
pub use crate::control::{CommandGate, Drone, DroneSimulator, Telemetry};
pub use crate::detection::{DetectionMethod, FaceBox, FusedFace, FusionEngine};
pub use crate::events::{Event, EventBus, EventSink, WebhookSink};
pub use crate::runtime::{ControlLoop, OperatorCommand};
pub use crate::session::SessionState;
pub use crate::tracking::{CommandKind, LockState, MotionCommand, MotionPlanner};
