//! 主控制回路 (Control Loop)
//!
//! 取帧 → 检测融合 → 锁定跟踪 → 运动规划 → 指令门, 约10Hz。
//! 跟随激活时加快到约20Hz。单次迭代的错误就地捕获上报, 回路继续。
//!
//! 看门狗线程监视心跳, 停滞超过3秒只告警, 绝不代替操作员降落。
//! 退出路径同样不自动降落: 收尾只做事件冲刷和关流。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::Receiver;
use image::RgbImage;
use serde_json::json;

use crate::config::Config;
use crate::control::{CommandGate, Drone, Telemetry};
use crate::detection::{DetectionMethod, FaceBox, FusionEngine};
use crate::events::EventBus;
use crate::session::SessionState;
use crate::tracking::{LockState, LockTransition, MotionCommand, MotionPlanner};

const LOOP_SLEEP: Duration = Duration::from_millis(100);
const FOLLOW_SLEEP: Duration = Duration::from_millis(50);

/// 心跳停滞告警阈值
const WATCHDOG_STALL_MILLIS: u64 = 3000;
const WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// 连续取帧失败多少次告警一次
const FRAME_FAILURE_LIMIT: u32 = 5;
/// 取帧超过这个时长算慢帧
const SLOW_FRAME_THRESHOLD: Duration = Duration::from_millis(200);

const TELEMETRY_EVENT_INTERVAL: Duration = Duration::from_secs(5);
const LOW_BATTERY_EVENT_INTERVAL: Duration = Duration::from_secs(30);
const LOW_BATTERY_THRESHOLD: f32 = 20.0;

/// 操作员指令, 由输入线程异步送入, 主循环逐迭代非阻塞消费
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Takeoff,
    Land,
    Emergency,
    ToggleTracking,
    /// 锁定当前帧选中的候选
    LockOn,
    Unlock,
    ToggleFollow,
    Rename(String),
    SetDetectionMethod(DetectionMethod),
    /// 手动移动, 同样经过指令门
    Manual(MotionCommand),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    Quit,
}

pub struct ControlLoop {
    config: Config,
    drone: Box<dyn Drone>,
    fusion: FusionEngine,
    lock: LockState,
    planner: MotionPlanner,
    gate: CommandGate,
    session: SessionState,
    bus: EventBus,
    ops: Receiver<OperatorCommand>,
    heartbeat: Arc<AtomicU64>,
    epoch: Instant,
    last_telemetry: Option<Telemetry>,
    /// 上一帧选中的候选框, 供 LockOn 使用
    last_candidate: Option<FaceBox>,
}

impl ControlLoop {
    pub fn new(
        config: Config,
        drone: Box<dyn Drone>,
        fusion: FusionEngine,
        bus: EventBus,
        ops: Receiver<OperatorCommand>,
    ) -> Self {
        let session = SessionState::new(config.debug, config.detection);
        let lock = LockState::new(config.lost_timeout);
        let planner = MotionPlanner::new(config.smoothness);
        let gate = CommandGate::new(config.command_cooldown);
        Self {
            config,
            drone,
            fusion,
            lock,
            planner,
            gate,
            session,
            bus,
            ops,
            heartbeat: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
            last_telemetry: None,
            last_candidate: None,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        self.drone.stream_on()?;
        self.bus.emit("video_stream_started", json!({}));

        let stop = Arc::new(AtomicBool::new(false));
        let watchdog = spawn_watchdog(
            Arc::clone(&self.heartbeat),
            self.bus.clone(),
            Arc::clone(&stop),
            self.epoch,
        );

        println!("🚀 控制回路启动 (检测: {})", self.session.detection_method.label());
        let mut quit = false;
        while !quit {
            self.heartbeat
                .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
            match self.tick() {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Quit) => quit = true,
                Err(e) => {
                    eprintln!("❌ 循环迭代出错: {:#}", e);
                    self.bus
                        .emit("loop_error", json!({ "error": format!("{:#}", e) }));
                }
            }
            if !quit {
                let interval = if self.session.follow_mode && self.lock.locked {
                    FOLLOW_SLEEP
                } else {
                    LOOP_SLEEP
                };
                thread::sleep(interval);
            }
        }

        // 收尾: 冲刷事件并关流, 飞行中也不代替操作员降落
        stop.store(true, Ordering::Relaxed);
        self.bus
            .emit("shutdown", json!({ "flying": self.session.flying }));
        self.bus.flush(Duration::from_millis(500));
        if let Err(e) = self.drone.stream_off() {
            eprintln!("⚠️ 关闭视频流失败: {:#}", e);
        }
        let _ = watchdog.join();
        println!("✅ 控制回路退出");
        Ok(())
    }

    fn tick(&mut self) -> Result<TickOutcome> {
        let now = Instant::now();

        // 操作员指令优先
        while let Ok(op) = self.ops.try_recv() {
            if self.handle_op(op) == TickOutcome::Quit {
                return Ok(TickOutcome::Quit);
            }
        }

        let frame = self.acquire_frame(now);
        self.poll_telemetry();

        let faces = self.fusion.fuse(&frame, self.session.detection_method);
        let frame_center = (frame.width() as f32 / 2.0, frame.height() as f32 / 2.0);
        let follow = self.session.follow_mode;
        let (target, transitions) = self.lock.select_target(&faces, frame_center, follow, now);
        self.publish_transitions(&transitions);
        self.last_candidate = target.as_ref().map(|t| t.bbox);

        if self.session.debug {
            println!(
                "🔍 人脸 {} 张, 锁定: {}, 跟随: {}",
                faces.len(),
                self.lock.locked,
                self.session.follow_mode
            );
        }

        if self.session.flying && self.session.tracking_enabled {
            let commands =
                self.planner
                    .plan(&mut self.lock, target.as_ref(), self.session.follow_mode, now);
            for cmd in commands {
                self.gate
                    .execute(self.drone.as_mut(), cmd, &self.bus, Instant::now());
            }
        }

        Ok(TickOutcome::Continue)
    }

    /// 取帧。失败时返回占位黑帧, 连续失败到阈值告警一次。
    fn acquire_frame(&mut self, now: Instant) -> RgbImage {
        let started = Instant::now();
        match self.drone.frame() {
            Ok(frame) => {
                let took = started.elapsed();
                if took > SLOW_FRAME_THRESHOLD {
                    self.bus.emit_throttled(
                        "slow_frame_capture",
                        json!({ "millis": took.as_millis() as u64 }),
                        Duration::from_secs(5),
                    );
                }
                self.session.record_frame_ok(now);
                frame
            }
            Err(e) => {
                let failures = self.session.record_frame_failure();
                if failures == FRAME_FAILURE_LIMIT {
                    eprintln!("⚠️ 连续 {} 帧获取失败: {:#}", failures, e);
                    self.bus.emit(
                        "connection_error",
                        json!({
                            "consecutive_failures": failures,
                            "error": format!("{:#}", e),
                        }),
                    );
                }
                placeholder_frame()
            }
        }
    }

    fn poll_telemetry(&mut self) {
        match self.drone.telemetry() {
            Ok(t) => {
                self.last_telemetry = Some(t);
                self.bus.emit_throttled(
                    "telemetry",
                    json!({
                        "battery": t.battery,
                        "height_cm": t.height_cm,
                        "temperature_c": t.temperature_c,
                        "barometer_cm": t.barometer_cm,
                        "flight_time_secs": t.flight_time_secs,
                    }),
                    TELEMETRY_EVENT_INTERVAL,
                );
                if t.battery < LOW_BATTERY_THRESHOLD {
                    if self.bus.emit_throttled(
                        "low_battery",
                        json!({ "battery": t.battery }),
                        LOW_BATTERY_EVENT_INTERVAL,
                    ) {
                        eprintln!("⚠️ 电量过低: {:.0}%", t.battery);
                    }
                }
            }
            Err(e) => {
                // 沿用上一份快照, 失败本身限频上报
                self.bus.emit_throttled(
                    "telemetry_error",
                    json!({ "error": format!("{:#}", e) }),
                    Duration::from_secs(5),
                );
            }
        }
    }

    fn publish_transitions(&mut self, transitions: &[LockTransition]) {
        for t in transitions {
            let name = self.lock.target_label.clone();
            match t {
                LockTransition::Lost { search_armed } => {
                    println!("🔍 目标 {} 丢失 (搜索: {})", name, search_armed);
                    self.bus.emit(
                        "face_lost",
                        json!({ "person_name": name, "search": search_armed }),
                    );
                }
                LockTransition::Found { lost_for } => {
                    println!("🎯 目标 {} 找回 ({:.1}s)", name, lost_for.as_secs_f32());
                    self.bus.emit(
                        "face_found",
                        json!({ "person_name": name, "lost_for_secs": lost_for.as_secs_f32() }),
                    );
                }
                LockTransition::SearchPhaseAdvanced { direction, phase } => {
                    self.bus.emit(
                        "search_phase_changed",
                        json!({ "direction": direction, "phase": phase }),
                    );
                }
                LockTransition::Released => {
                    println!("⚠️ 目标 {} 丢失过久, 释放锁定", name);
                    self.session.on_unlock();
                    self.bus
                        .emit("face_lock_released", json!({ "person_name": name }));
                }
            }
        }
    }

    fn handle_op(&mut self, op: OperatorCommand) -> TickOutcome {
        match op {
            OperatorCommand::Takeoff => self.op_takeoff(),
            OperatorCommand::Land => match self.drone.land() {
                Ok(()) => {
                    self.session.flying = false;
                    println!("🛬 已降落");
                    self.bus.emit("land", json!({}));
                }
                Err(e) => eprintln!("❌ 降落失败: {:#}", e),
            },
            OperatorCommand::Emergency => {
                match self.drone.emergency_stop() {
                    Ok(()) => println!("🛑 急停"),
                    Err(e) => eprintln!("❌ 急停失败: {:#}", e),
                }
                self.session.flying = false;
                self.bus.emit("emergency_stop", json!({}));
            }
            OperatorCommand::ToggleTracking => {
                let enabled = self.session.toggle_tracking();
                println!("🎯 追踪: {}", if enabled { "开启" } else { "关闭" });
                self.bus
                    .emit("tracking_toggled", json!({ "enabled": enabled }));
            }
            OperatorCommand::LockOn => match self.last_candidate {
                Some(bbox) => {
                    self.lock.lock_on(bbox);
                    println!("🔒 已锁定 {}", self.lock.target_label);
                    self.bus.emit(
                        "face_locked",
                        json!({ "person_name": self.lock.target_label }),
                    );
                }
                None => println!("⚠️ 当前没有可锁定的人脸"),
            },
            OperatorCommand::Unlock => {
                if self.lock.locked {
                    let name = self.lock.target_label.clone();
                    self.lock.release();
                    self.session.on_unlock();
                    println!("🔓 已解锁 {}", name);
                    self.bus.emit("face_unlocked", json!({ "person_name": name }));
                }
            }
            OperatorCommand::ToggleFollow => {
                match self.session.toggle_follow(self.lock.locked) {
                    Some(true) => {
                        println!("🎯 跟随模式开启");
                        self.bus.emit("follow_mode_enabled", json!({}));
                    }
                    Some(false) => {
                        self.lock.search.clear();
                        println!("🎯 跟随模式关闭");
                        self.bus.emit("follow_mode_disabled", json!({}));
                    }
                    None => println!("⚠️ 需要先锁定目标才能开启跟随"),
                }
            }
            OperatorCommand::Rename(new_name) => {
                let old_name = self.lock.rename(new_name.clone());
                println!("✅ {} 更名为 {}", old_name, new_name);
                self.bus.emit(
                    "person_renamed",
                    json!({ "old_name": old_name, "new_name": new_name }),
                );
            }
            OperatorCommand::SetDetectionMethod(method) => {
                self.session.detection_method = method;
                println!("🔍 检测方法: {}", method.label());
                self.bus.emit(
                    "detection_method_changed",
                    json!({ "method": method.label() }),
                );
            }
            OperatorCommand::Manual(cmd) => {
                if self.session.flying {
                    if self
                        .gate
                        .execute(self.drone.as_mut(), cmd, &self.bus, Instant::now())
                    {
                        self.bus.emit(
                            "manual_control",
                            json!({ "command": cmd.kind.name(), "amount": cmd.magnitude }),
                        );
                    }
                } else {
                    println!("⚠️ 未起飞, 手动指令被拒绝");
                }
            }
            OperatorCommand::Quit => return TickOutcome::Quit,
        }
        TickOutcome::Continue
    }

    fn op_takeoff(&mut self) {
        if self.session.flying {
            println!("⚠️ 已在飞行中");
            return;
        }
        let battery = self.last_telemetry.map(|t| t.battery).unwrap_or(100.0);
        if battery < LOW_BATTERY_THRESHOLD && !self.config.force_takeoff {
            eprintln!("❌ 电量 {:.0}% 过低, 拒绝起飞 (--force 可跳过)", battery);
            return;
        }
        match self.drone.takeoff() {
            Ok(()) => {
                self.session.flying = true;
                println!("🚀 起飞");
                self.bus.emit("takeoff", json!({ "battery": battery }));
            }
            Err(e) => eprintln!("❌ 起飞失败: {:#}", e),
        }
    }
}

/// 占位黑帧, 取帧失败时顶替
fn placeholder_frame() -> RgbImage {
    RgbImage::new(640, 480)
}

/// 看门狗: 心跳停滞超过阈值时告警, 绝不执行任何飞行动作
fn spawn_watchdog(
    heartbeat: Arc<AtomicU64>,
    bus: EventBus,
    stop: Arc<AtomicBool>,
    epoch: Instant,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(WATCHDOG_CHECK_INTERVAL);
            let last = heartbeat.load(Ordering::Relaxed);
            let now_ms = epoch.elapsed().as_millis() as u64;
            let stalled = now_ms.saturating_sub(last);
            if stalled > WATCHDOG_STALL_MILLIS {
                eprintln!("⚠️ 控制回路心跳停滞 {}ms", stalled);
                bus.emit_throttled(
                    "watchdog_stall",
                    json!({ "stalled_ms": stalled }),
                    Duration::from_secs(5),
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::DroneSimulator;
    use crate::detection::DetectionMethod;
    use crate::tracking::CommandKind;
    use std::path::PathBuf;

    fn test_config(force: bool) -> Config {
        Config {
            simulate: true,
            force_takeoff: force,
            direct_ip: None,
            debug: false,
            smoothness: 1.0,
            lost_timeout: Duration::from_secs(5),
            command_cooldown: Duration::from_millis(300),
            detection: DetectionMethod::Both,
            webhook_url: None,
            model_dir: PathBuf::from("models"),
        }
    }

    fn test_loop(force: bool) -> ControlLoop {
        let mut sim = DroneSimulator::new();
        sim.connect().unwrap();
        let (_tx, rx) = crossbeam_channel::bounded(16);
        ControlLoop::new(
            test_config(force),
            Box::new(sim),
            FusionEngine::new(Vec::new()),
            EventBus::disabled(),
            rx,
        )
    }

    #[test]
    fn test_takeoff_refused_on_low_battery_without_force() {
        let mut cl = test_loop(false);
        cl.last_telemetry = Some(Telemetry {
            battery: 10.0,
            height_cm: 0,
            temperature_c: 30.0,
            barometer_cm: 150.0,
            flight_time_secs: 0,
        });
        cl.handle_op(OperatorCommand::Takeoff);
        assert!(!cl.session.flying);
    }

    #[test]
    fn test_force_overrides_low_battery_guard() {
        let mut cl = test_loop(true);
        cl.last_telemetry = Some(Telemetry {
            battery: 10.0,
            height_cm: 0,
            temperature_c: 30.0,
            barometer_cm: 150.0,
            flight_time_secs: 0,
        });
        cl.handle_op(OperatorCommand::Takeoff);
        assert!(cl.session.flying);
    }

    #[test]
    fn test_lock_on_requires_candidate() {
        let mut cl = test_loop(false);
        cl.handle_op(OperatorCommand::LockOn);
        assert!(!cl.lock.locked);

        cl.last_candidate = Some(FaceBox::new(100.0, 100.0, 80.0, 80.0));
        cl.handle_op(OperatorCommand::LockOn);
        assert!(cl.lock.locked);
    }

    #[test]
    fn test_follow_refused_without_lock() {
        let mut cl = test_loop(false);
        cl.handle_op(OperatorCommand::ToggleFollow);
        assert!(!cl.session.follow_mode);

        cl.last_candidate = Some(FaceBox::new(100.0, 100.0, 80.0, 80.0));
        cl.handle_op(OperatorCommand::LockOn);
        cl.handle_op(OperatorCommand::ToggleFollow);
        assert!(cl.session.follow_mode);
    }

    #[test]
    fn test_unlock_drops_follow() {
        let mut cl = test_loop(false);
        cl.last_candidate = Some(FaceBox::new(100.0, 100.0, 80.0, 80.0));
        cl.handle_op(OperatorCommand::LockOn);
        cl.handle_op(OperatorCommand::ToggleFollow);
        cl.handle_op(OperatorCommand::Unlock);
        assert!(!cl.lock.locked);
        assert!(!cl.session.follow_mode);
    }

    #[test]
    fn test_manual_command_rejected_on_ground() {
        let mut cl = test_loop(false);
        let cmd = MotionCommand::new(CommandKind::RotateCw, 15);
        cl.handle_op(OperatorCommand::Manual(cmd));
        // 模拟器在地面会拒绝移动, 会话状态不受影响
        assert!(!cl.session.flying);
    }

    #[test]
    fn test_rename_flows_into_lock_state() {
        let mut cl = test_loop(false);
        cl.handle_op(OperatorCommand::Rename("Alice".to_string()));
        assert_eq!(cl.lock.target_label, "Alice");
    }

    #[test]
    fn test_quit_ends_tick() {
        let mut cl = test_loop(false);
        assert_eq!(cl.handle_op(OperatorCommand::Quit), TickOutcome::Quit);
    }

    #[test]
    fn test_detection_method_switch() {
        let mut cl = test_loop(false);
        cl.handle_op(OperatorCommand::SetDetectionMethod(DetectionMethod::Neural));
        assert_eq!(cl.session.detection_method, DetectionMethod::Neural);
    }
}
