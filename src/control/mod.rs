//! 控制系统 (Control System)
//!
//! - drone:     无人机抽象接口与遥测快照
//! - gate:      指令冷却门
//! - simulator: 无真机时的模拟替身

pub mod drone;
pub mod gate;
pub mod simulator;

pub use drone::{Drone, Telemetry};
pub use gate::{CommandGate, DEFAULT_COOLDOWN};
pub use simulator::DroneSimulator;
