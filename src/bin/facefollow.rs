/// 人脸跟踪无人机控制器 (Face-Follow Drone Controller)
///
/// 系统架构:
/// 1. 主线程:     控制回路 (取帧→检测→跟踪→规划→指令门, 约10Hz)
/// 2. 输入线程:   stdin 读取操作员指令, 经通道异步送入主循环
/// 3. 投递线程:   事件总线后台外发 webhook
/// 4. 看门狗线程: 监视主循环心跳
/// 5. 漂移线程:   模拟器遥测波动

use std::io::BufRead;
use std::thread;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use mimalloc::MiMalloc;
use serde_json::json;

use facefollow_rs::config::Cli;
use facefollow_rs::control::{Drone, DroneSimulator};
use facefollow_rs::detection::{load_backends, DetectionMethod, FusionEngine};
use facefollow_rs::events::{EventBus, WebhookSink};
use facefollow_rs::runtime::{ControlLoop, OperatorCommand};
use facefollow_rs::tracking::{CommandKind, MotionCommand};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = cli.into_config();

    println!("🚀 人脸跟踪无人机控制器");
    println!("   检测方法: {}", config.detection.label());
    println!("   平滑因子: {:.1}  丢失超时: {:.1}s", config.smoothness, config.lost_timeout.as_secs_f32());

    // 事件总线
    let bus = match &config.webhook_url {
        Some(url) => {
            println!("📡 事件外发: {}", url);
            EventBus::start(WebhookSink::new(url))
        }
        None => {
            println!("⚠️ 事件外发已停用");
            EventBus::disabled()
        }
    };
    bus.emit(
        "initialization",
        json!({
            "simulate": config.simulate,
            "detection": config.detection.label(),
        }),
    );

    // 无人机: 真机驱动是外部协作件, 未接入时一律走模拟器
    if !config.simulate {
        match &config.direct_ip {
            Some(ip) => println!("⚠️ 真机直连 {} 未接入, 回落到模拟器", ip),
            None => println!("⚠️ 真机驱动未接入, 回落到模拟器"),
        }
    }
    let mut drone: Box<dyn Drone> = Box::new(DroneSimulator::new());
    drone.connect()?;
    bus.emit("simulator_started", json!({}));
    bus.emit("drone_connected", json!({ "simulated": true }));

    // 检测后端: 模型缺失时降级, 全灭才是致命错误
    let (backends, effective) = load_backends(config.detection, &config.model_dir);
    if backends.is_empty() {
        bus.emit("connection_error", json!({ "error": "no detector backend" }));
        bus.flush(std::time::Duration::from_millis(500));
        anyhow::bail!("没有可用的检测后端, 检查模型目录 {:?}", config.model_dir);
    }
    if effective != config.detection {
        println!(
            "⚠️ 检测方法降级: {} → {}",
            config.detection.label(),
            effective.label()
        );
        bus.emit(
            "detection_method_degraded",
            json!({
                "requested": config.detection.label(),
                "effective": effective.label(),
            }),
        );
        config.detection = effective;
    }
    let fusion = FusionEngine::new(backends);

    // 操作员输入线程
    let (ops_tx, ops_rx) = bounded::<OperatorCommand>(16);
    spawn_operator_reader(ops_tx);
    print_help();

    let mut control = ControlLoop::new(config, drone, fusion, bus, ops_rx);
    control.run()
}

fn print_help() {
    println!("⌨️ 指令: t=起飞 l=降落 x=急停 p=追踪开关 k=锁定 u=解锁 f=跟随");
    println!("       name <新名字> | method <cascade|neural|both>");
    println!("       w/s=前后 a/d=左右旋转 r/c=升降 | q=退出");
}

/// stdin 按行读取, 映射为操作员指令送入主循环
fn spawn_operator_reader(tx: Sender<OperatorCommand>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let Some(op) = parse_operator_line(line.trim()) else {
                if !line.trim().is_empty() {
                    println!("⚠️ 未知指令: {}", line.trim());
                }
                continue;
            };
            let quit = op == OperatorCommand::Quit;
            if tx.send(op).is_err() || quit {
                break;
            }
        }
    });
}

fn parse_operator_line(line: &str) -> Option<OperatorCommand> {
    if let Some(name) = line.strip_prefix("name ") {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        return Some(OperatorCommand::Rename(name.to_string()));
    }
    if let Some(method) = line.strip_prefix("method ") {
        let method = match method.trim() {
            "cascade" => DetectionMethod::Cascade,
            "neural" => DetectionMethod::Neural,
            "both" => DetectionMethod::Both,
            _ => return None,
        };
        return Some(OperatorCommand::SetDetectionMethod(method));
    }

    let manual = |kind, magnitude| Some(OperatorCommand::Manual(MotionCommand::new(kind, magnitude)));
    match line {
        "t" | "takeoff" => Some(OperatorCommand::Takeoff),
        "l" | "land" => Some(OperatorCommand::Land),
        "x" | "emergency" => Some(OperatorCommand::Emergency),
        "p" | "track" => Some(OperatorCommand::ToggleTracking),
        "k" | "lock" => Some(OperatorCommand::LockOn),
        "u" | "unlock" => Some(OperatorCommand::Unlock),
        "f" | "follow" => Some(OperatorCommand::ToggleFollow),
        "w" => manual(CommandKind::MoveForward, 30),
        "s" => manual(CommandKind::MoveBack, 30),
        "a" => manual(CommandKind::RotateCcw, 15),
        "d" => manual(CommandKind::RotateCw, 15),
        "r" => manual(CommandKind::MoveUp, 20),
        "c" => manual(CommandKind::MoveDown, 20),
        "q" | "quit" => Some(OperatorCommand::Quit),
        _ => None,
    }
}
