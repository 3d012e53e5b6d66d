//! 指令门 (Command Gate)
//!
//! 所有移动指令的唯一出口: 全局冷却限频 + 统一执行 + 事件上报。
//! 冷却窗口内的指令直接丢弃 (不排队), 只有成功执行才刷新时间戳,
//! 失败的指令不消耗冷却窗口。

use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::json;

use super::drone::Drone;
use crate::events::EventBus;
use crate::tracking::{CommandKind, MotionCommand};

/// 默认指令冷却
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(300);

pub struct CommandGate {
    cooldown: Duration,
    last_issued_at: Option<Instant>,
}

impl CommandGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_issued_at: None,
        }
    }

    /// 执行一条指令。返回 true 表示真正下发并成功。
    pub fn execute(
        &mut self,
        drone: &mut dyn Drone,
        cmd: MotionCommand,
        bus: &EventBus,
        now: Instant,
    ) -> bool {
        if let Some(last) = self.last_issued_at {
            if now.duration_since(last) < self.cooldown {
                return false;
            }
        }

        match dispatch(drone, cmd) {
            Ok(()) => {
                self.last_issued_at = Some(now);
                bus.emit(
                    "movement",
                    json!({
                        "command": cmd.kind.name(),
                        "amount": cmd.magnitude,
                    }),
                );
                true
            }
            Err(e) => {
                eprintln!("❌ 指令 {} 执行失败: {:#}", cmd.kind.name(), e);
                bus.emit(
                    "movement_error",
                    json!({
                        "command": cmd.kind.name(),
                        "amount": cmd.magnitude,
                        "error": format!("{:#}", e),
                    }),
                );
                false
            }
        }
    }
}

fn dispatch(drone: &mut dyn Drone, cmd: MotionCommand) -> Result<()> {
    let m = cmd.magnitude;
    match cmd.kind {
        CommandKind::RotateCw => drone.rotate_cw(m),
        CommandKind::RotateCcw => drone.rotate_ccw(m),
        CommandKind::MoveUp => drone.move_up(m),
        CommandKind::MoveDown => drone.move_down(m),
        CommandKind::MoveForward => drone.move_forward(m),
        CommandKind::MoveBack => drone.move_back(m),
        CommandKind::MoveLeft => drone.move_left(m),
        CommandKind::MoveRight => drone.move_right(m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::drone::Telemetry;
    use anyhow::bail;
    use image::RgbImage;

    /// 计数用假无人机, `fail_moves` 为真时所有移动指令报错
    struct FakeDrone {
        moves: u32,
        fail_moves: bool,
    }

    impl FakeDrone {
        fn new(fail_moves: bool) -> Self {
            Self {
                moves: 0,
                fail_moves,
            }
        }

        fn record(&mut self) -> Result<()> {
            if self.fail_moves {
                bail!("motor error");
            }
            self.moves += 1;
            Ok(())
        }
    }

    impl Drone for FakeDrone {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        fn takeoff(&mut self) -> Result<()> {
            Ok(())
        }
        fn land(&mut self) -> Result<()> {
            Ok(())
        }
        fn emergency_stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn telemetry(&mut self) -> Result<Telemetry> {
            Ok(Telemetry {
                battery: 100.0,
                height_cm: 0,
                temperature_c: 30.0,
                barometer_cm: 150.0,
                flight_time_secs: 0,
            })
        }
        fn move_up(&mut self, _cm: i32) -> Result<()> {
            self.record()
        }
        fn move_down(&mut self, _cm: i32) -> Result<()> {
            self.record()
        }
        fn move_forward(&mut self, _cm: i32) -> Result<()> {
            self.record()
        }
        fn move_back(&mut self, _cm: i32) -> Result<()> {
            self.record()
        }
        fn move_left(&mut self, _cm: i32) -> Result<()> {
            self.record()
        }
        fn move_right(&mut self, _cm: i32) -> Result<()> {
            self.record()
        }
        fn rotate_cw(&mut self, _deg: i32) -> Result<()> {
            self.record()
        }
        fn rotate_ccw(&mut self, _deg: i32) -> Result<()> {
            self.record()
        }
        fn stream_on(&mut self) -> Result<()> {
            Ok(())
        }
        fn stream_off(&mut self) -> Result<()> {
            Ok(())
        }
        fn frame(&mut self) -> Result<RgbImage> {
            Ok(RgbImage::new(4, 4))
        }
    }

    fn cmd() -> MotionCommand {
        MotionCommand::new(CommandKind::RotateCw, 15)
    }

    #[test]
    fn test_cooldown_drops_rapid_commands() {
        let t0 = Instant::now();
        let mut gate = CommandGate::new(DEFAULT_COOLDOWN);
        let mut drone = FakeDrone::new(false);
        let bus = EventBus::disabled();

        assert!(gate.execute(&mut drone, cmd(), &bus, t0));
        // 冷却窗口内的第二条被丢弃
        assert!(!gate.execute(&mut drone, cmd(), &bus, t0 + Duration::from_millis(100)));
        assert_eq!(drone.moves, 1);

        // 窗口过后恢复
        assert!(gate.execute(&mut drone, cmd(), &bus, t0 + Duration::from_millis(350)));
        assert_eq!(drone.moves, 2);
    }

    #[test]
    fn test_failed_command_does_not_consume_cooldown() {
        let t0 = Instant::now();
        let mut gate = CommandGate::new(DEFAULT_COOLDOWN);
        let mut failing = FakeDrone::new(true);
        let bus = EventBus::disabled();

        assert!(!gate.execute(&mut failing, cmd(), &bus, t0));

        // 失败没刷新时间戳, 紧随其后的指令仍可下发
        let mut ok = FakeDrone::new(false);
        assert!(gate.execute(&mut ok, cmd(), &bus, t0 + Duration::from_millis(50)));
        assert_eq!(ok.moves, 1);
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let t0 = Instant::now();
        let mut gate = CommandGate::new(Duration::ZERO);
        let mut drone = FakeDrone::new(false);
        let bus = EventBus::disabled();

        for kind in [
            CommandKind::MoveUp,
            CommandKind::MoveDown,
            CommandKind::MoveForward,
            CommandKind::MoveBack,
            CommandKind::MoveLeft,
            CommandKind::MoveRight,
            CommandKind::RotateCw,
            CommandKind::RotateCcw,
        ] {
            assert!(gate.execute(&mut drone, MotionCommand::new(kind, 20), &bus, t0));
        }
        assert_eq!(drone.moves, 8);
    }
}
