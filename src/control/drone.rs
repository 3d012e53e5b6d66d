//! 无人机抽象 (Drone Abstraction)
//!
//! 主循环和指令门只依赖这个 trait, 模拟器与真机驱动可互换。
//! 所有方法同步阻塞, 由调用方线程承担等待。

use anyhow::Result;
use image::RgbImage;

/// 一次遥测快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// 电量百分比 (0-100)
    pub battery: f32,
    /// 相对起飞点高度 (厘米)
    pub height_cm: i32,
    /// 机体温度 (摄氏度)
    pub temperature_c: f32,
    /// 气压计高度 (厘米)
    pub barometer_cm: f32,
    /// 本次飞行时长 (秒)
    pub flight_time_secs: u32,
}

pub trait Drone: Send {
    fn connect(&mut self) -> Result<()>;

    fn takeoff(&mut self) -> Result<()>;
    fn land(&mut self) -> Result<()>;
    /// 立即停桨, 不可恢复
    fn emergency_stop(&mut self) -> Result<()>;

    fn telemetry(&mut self) -> Result<Telemetry>;

    // ========== 移动 (距离单位厘米, 角度单位度) ==========
    fn move_up(&mut self, cm: i32) -> Result<()>;
    fn move_down(&mut self, cm: i32) -> Result<()>;
    fn move_forward(&mut self, cm: i32) -> Result<()>;
    fn move_back(&mut self, cm: i32) -> Result<()>;
    fn move_left(&mut self, cm: i32) -> Result<()>;
    fn move_right(&mut self, cm: i32) -> Result<()>;
    fn rotate_cw(&mut self, deg: i32) -> Result<()>;
    fn rotate_ccw(&mut self, deg: i32) -> Result<()>;

    // ========== 视频流 ==========
    fn stream_on(&mut self) -> Result<()>;
    fn stream_off(&mut self) -> Result<()>;
    /// 取当前帧 (RGB)。流未开启或暂时无帧时返回错误。
    fn frame(&mut self) -> Result<RgbImage>;
}
